//! Init, random read and random write phases over striped scratch files.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use rand::seq::SliceRandom;
use serde::Serialize;
use tracing::{debug, info, warn};

use spillway_io::{
    open_file, wait_all, wait_any, AlignedBuffer, BlockId, BlockLocator, Diagnostics, DiskId,
    DiskQueueConfig, DiskQueues, FileHandle, FileKind, IoStats, OpenMode, Request, RequestHandle,
    RequestKind, DEFAULT_BUFFER_ALIGNMENT,
};

use crate::cli::Cli;
use crate::striping::Striping;

const MIB: f64 = (1024 * 1024) as f64;

/// Throughput of one phase.
#[derive(Debug, Clone, Serialize)]
pub struct PhaseReport {
    pub phase: &'static str,
    pub blocks: u64,
    pub bytes: u64,
    pub seconds: f64,
    pub blocks_per_sec: f64,
    pub mib_per_sec: f64,
}

/// Counters of one scratch file's disk queue.
#[derive(Debug, Clone, Serialize)]
pub struct DiskReport {
    pub disk: u64,
    pub path: PathBuf,
    pub stats: IoStats,
}

/// Outcome of a whole run.
#[derive(Debug, Clone, Serialize)]
pub struct BenchReport {
    pub file_kind: FileKind,
    pub span: u64,
    pub block_size: u64,
    pub span_blocks: u64,
    pub work_blocks: u64,
    pub phases: Vec<PhaseReport>,
    pub stats: IoStats,
    pub disks: Vec<DiskReport>,
}

/// Scratch files, their queues and the block layout over them.
pub struct Benchmark {
    striping: Striping,
    files: Vec<Arc<dyn FileHandle>>,
    queues: DiskQueues,
    alignment: usize,
    in_flight: usize,
}

impl Benchmark {
    /// Opens one scratch file per disk and sizes it for `span_blocks`
    /// striped blocks.
    pub fn open(
        kind: FileKind,
        paths: &[PathBuf],
        direct: bool,
        block_size: u64,
        span_blocks: u64,
        in_flight: usize,
        diagnostics: &Diagnostics,
    ) -> Result<Self> {
        if paths.is_empty() {
            return Err(anyhow!("no scratch files given"));
        }
        let striping = Striping::new(paths.len(), block_size);
        let file_size = striping.blocks_per_disk(span_blocks) * block_size;

        let mut mode = OpenMode::READ_WRITE | OpenMode::CREATE;
        if direct {
            mode |= OpenMode::DIRECT;
        }

        let mut files = Vec::with_capacity(paths.len());
        for (index, path) in paths.iter().enumerate() {
            let file = open_file(kind, path, mode, Some(DiskId(index as u64)))
                .with_context(|| format!("opening scratch file {}", path.display()))?;
            file.set_size(file_size)
                .with_context(|| format!("resizing {} to {} bytes", path.display(), file_size))?;
            debug!(
                "scratch file {} on {} ({}, alignment {})",
                path.display(),
                file.disk_id(),
                file.io_type(),
                file.alignment()
            );
            files.push(file);
        }

        let alignment = files
            .iter()
            .map(|f| f.alignment() as usize)
            .max()
            .unwrap_or(DEFAULT_BUFFER_ALIGNMENT)
            .max(DEFAULT_BUFFER_ALIGNMENT);

        Ok(Self {
            striping,
            files,
            queues: DiskQueues::new(DiskQueueConfig::default(), diagnostics),
            alignment,
            in_flight: in_flight.max(1),
        })
    }

    /// Transfers every block in `blocks`, keeping at most `in_flight`
    /// requests outstanding and recycling their buffers.
    pub fn run_phase(
        &self,
        phase: &'static str,
        kind: RequestKind,
        blocks: &[BlockId],
    ) -> Result<PhaseReport> {
        let block_size = self.striping.block_size();
        let len = usize::try_from(block_size).context("block size exceeds address space")?;
        let start = Instant::now();

        let mut pending: Vec<RequestHandle> = Vec::with_capacity(self.in_flight);
        let mut spare: Vec<AlignedBuffer> = Vec::new();

        for &block in blocks {
            if pending.len() >= self.in_flight {
                let (_, done) = wait_any(&mut pending)
                    .ok_or_else(|| anyhow!("no request in flight"))?;
                done.result
                    .with_context(|| format!("{} of block at offset {}", phase, done.offset))?;
                spare.push(done.buffer);
            }
            let buffer = spare.pop().unwrap_or_else(|| self.fresh_buffer(len));
            let (disk, offset) = self.striping.locate(block);
            let file = Arc::clone(&self.files[disk]);
            pending.push(self.queues.submit(Request::new(kind, file, offset, buffer))?);
        }
        for done in wait_all(pending) {
            done.result
                .with_context(|| format!("{} of block at offset {}", phase, done.offset))?;
        }

        let seconds = start.elapsed().as_secs_f64();
        let count = blocks.len() as u64;
        let bytes = count * block_size;
        let rate = |x: f64| if seconds > 0.0 { x / seconds } else { 0.0 };
        Ok(PhaseReport {
            phase,
            blocks: count,
            bytes,
            seconds,
            blocks_per_sec: rate(count as f64),
            mib_per_sec: rate(bytes as f64 / MIB),
        })
    }

    fn fresh_buffer(&self, len: usize) -> AlignedBuffer {
        let mut buffer = AlignedBuffer::with_alignment(len, self.alignment);
        for (i, byte) in buffer.iter_mut().enumerate() {
            *byte = (i % 251) as u8;
        }
        buffer
    }

    /// Counters of every disk queue, in file order.
    pub fn disk_reports(&self) -> Vec<DiskReport> {
        let by_disk = self.queues.stats_by_disk();
        self.files
            .iter()
            .map(|file| DiskReport {
                disk: file.disk_id().0,
                path: file.path().to_path_buf(),
                stats: by_disk.get(&file.disk_id()).copied().unwrap_or_default(),
            })
            .collect()
    }

    /// Stops the queues, then closes the scratch files, removing them
    /// unless `keep` is set.
    pub fn finish(self, keep: bool) -> IoStats {
        self.queues.shutdown();
        let stats = self.queues.stats();
        for file in &self.files {
            let closed = if keep {
                file.close()
            } else {
                file.close_and_remove()
            };
            if let Err(e) = closed {
                warn!("failed to release scratch file {}: {}", file.path().display(), e);
            }
        }
        stats
    }
}

/// Scratch file paths: the ones on the command line, or a single file in
/// the temporary directory.
pub fn scratch_paths(cli: &Cli) -> Vec<PathBuf> {
    if !cli.files.is_empty() {
        return cli.files.clone();
    }
    vec![std::env::temp_dir().join(format!("spillway-bench.{}.0", std::process::id()))]
}

/// Number of blocks touched by the read and write phases.
pub fn work_blocks(size: u64, span_blocks: u64, block_size: u64) -> u64 {
    if size == 0 {
        span_blocks
    } else {
        size.div_ceil(block_size).min(span_blocks)
    }
}

/// Runs the phases selected on the command line.
pub fn run(cli: &Cli, diagnostics: &Diagnostics) -> Result<BenchReport> {
    cli.validate().map_err(|e| anyhow!(e))?;

    let span_blocks = cli.span.div_ceil(cli.block_size);
    let work = work_blocks(cli.size, span_blocks, cli.block_size);
    let ops = cli.ops();
    let paths = scratch_paths(cli);

    info!(
        "span {} bytes in {} blocks of {} bytes over {} file(s), {} blocks per phase",
        cli.span,
        span_blocks,
        cli.block_size,
        paths.len(),
        work
    );

    let bench = Benchmark::open(
        cli.file_kind,
        &paths,
        cli.direct,
        cli.block_size,
        span_blocks,
        cli.in_flight,
        diagnostics,
    )?;

    let mut blocks: Vec<BlockId> = (0..span_blocks).map(|i| bench.striping.block(i)).collect();
    let phases = run_phases(&bench, &mut blocks, work, ops.init, ops.read, ops.write);

    let disks = bench.disk_reports();
    let stats = bench.finish(cli.keep);
    let phases = phases?;

    Ok(BenchReport {
        file_kind: cli.file_kind,
        span: cli.span,
        block_size: cli.block_size,
        span_blocks,
        work_blocks: work,
        phases,
        stats,
        disks,
    })
}

fn run_phases(
    bench: &Benchmark,
    blocks: &mut [BlockId],
    work: u64,
    init: bool,
    read: bool,
    write: bool,
) -> Result<Vec<PhaseReport>> {
    let mut rng = rand::thread_rng();
    let work = work as usize;
    let mut phases = Vec::new();

    if init {
        let report = bench.run_phase("init", RequestKind::Write, blocks)?;
        info!(
            "Initialized {} blocks in {:.3} seconds: {:.1} blocks/s {:.1} MiB/s write",
            report.blocks, report.seconds, report.blocks_per_sec, report.mib_per_sec
        );
        phases.push(report);
    }

    blocks.shuffle(&mut rng);

    if read {
        let report = bench.run_phase("read", RequestKind::Read, &blocks[..work])?;
        info!(
            "Read {} blocks in {:.3} seconds: {:.1} blocks/s {:.1} MiB/s read",
            report.blocks, report.seconds, report.blocks_per_sec, report.mib_per_sec
        );
        phases.push(report);
    }

    blocks.shuffle(&mut rng);

    if write {
        let report = bench.run_phase("write", RequestKind::Write, &blocks[..work])?;
        info!(
            "Written {} blocks in {:.3} seconds: {:.1} blocks/s {:.1} MiB/s write",
            report.blocks, report.seconds, report.blocks_per_sec, report.mib_per_sec
        );
        phases.push(report);
    }

    Ok(phases)
}
