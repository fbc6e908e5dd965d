use std::path::PathBuf;

use clap::Parser;
use spillway_io::FileKind;

/// Smallest accepted block size.
pub const MIN_BLOCK_SIZE: u64 = 4 * 1024;
/// Largest accepted block size.
pub const MAX_BLOCK_SIZE: u64 = 128 * 1024 * 1024;

#[derive(Parser, Debug, Clone)]
#[command(name = "spillway-bench")]
#[command(about = "Random block access benchmark for spillway disk queues", long_about = None)]
pub struct Cli {
    /// Span of external memory to write/read to (e.g. 10GiB)
    #[arg(long, value_parser = parse_bytes)]
    pub span: u64,

    /// Size of blocks to randomly write/read, a power of two from 4KiB to 128MiB
    #[arg(short, long, default_value = "8MiB", value_parser = parse_bytes)]
    pub block_size: u64,

    /// Amount of data to operate on (e.g. 2GiB); whole span if omitted or zero
    #[arg(short, long, default_value = "0", value_parser = parse_bytes)]
    pub size: u64,

    /// Operations: [i]nitialize, [r]ead and/or [w]rite
    #[arg(short, long, default_value = "irw")]
    pub ops: String,

    /// Scratch file per disk, repeated or comma separated; blocks are
    /// striped across them
    #[arg(short, long, value_delimiter = ',')]
    pub files: Vec<PathBuf>,

    /// File backend: syscall, memory or uring
    #[arg(short = 'k', long, default_value = "syscall")]
    pub file_kind: FileKind,

    /// Open scratch files for direct I/O
    #[arg(short, long)]
    pub direct: bool,

    /// Requests kept in flight across all disks
    #[arg(long, default_value_t = 64)]
    pub in_flight: usize,

    /// Keep scratch files after the run
    #[arg(long)]
    pub keep: bool,

    /// Print the final report as JSON on stdout
    #[arg(long)]
    pub json: bool,
}

/// Phases selected by the `--ops` string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ops {
    pub init: bool,
    pub read: bool,
    pub write: bool,
}

impl Cli {
    pub fn ops(&self) -> Ops {
        Ops {
            init: self.ops.contains('i'),
            read: self.ops.contains('r'),
            write: self.ops.contains('w'),
        }
    }

    /// Checks constraints clap cannot express.
    pub fn validate(&self) -> Result<(), String> {
        if !self.block_size.is_power_of_two()
            || !(MIN_BLOCK_SIZE..=MAX_BLOCK_SIZE).contains(&self.block_size)
        {
            return Err(format!(
                "unsupported block size {}: use a power of two from 4KiB to 128MiB",
                self.block_size
            ));
        }
        if self.span == 0 {
            return Err("span must be positive".to_string());
        }
        if self.in_flight == 0 {
            return Err("--in-flight must be at least 1".to_string());
        }
        if self.ops.chars().any(|c| !matches!(c, 'i' | 'r' | 'w')) {
            return Err(format!("unknown operation in {:?}, expected i, r and/or w", self.ops));
        }
        Ok(())
    }
}

/// Parses a byte count with optional SI (`k`, `M`, `G`, `T`) or IEC
/// (`Ki`, `Mi`, `Gi`, `Ti`) multiplier and optional trailing `B`.
pub fn parse_bytes(s: &str) -> Result<u64, String> {
    let trimmed = s.trim();
    let without_b = trimmed
        .strip_suffix('B')
        .or_else(|| trimmed.strip_suffix('b'))
        .unwrap_or(trimmed);
    let split = without_b
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(without_b.len());
    let (number, unit) = without_b.split_at(split);

    let multiplier: u64 = match unit {
        "" => 1,
        "k" | "K" => 1000,
        "M" => 1000_u64.pow(2),
        "G" => 1000_u64.pow(3),
        "T" => 1000_u64.pow(4),
        "Ki" | "ki" => 1 << 10,
        "Mi" => 1 << 20,
        "Gi" => 1 << 30,
        "Ti" => 1 << 40,
        other => return Err(format!("unknown unit {:?} in {:?}", other, s)),
    };
    let value: f64 = number
        .parse()
        .map_err(|_| format!("invalid byte count {:?}", s))?;
    if !value.is_finite() || value < 0.0 {
        return Err(format!("invalid byte count {:?}", s));
    }
    Ok((value * multiplier as f64).round() as u64)
}
