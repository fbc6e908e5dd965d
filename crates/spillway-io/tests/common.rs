//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::path::Path;
use std::sync::mpsc;
use std::sync::Arc;

use spillway_io::{
    AlignedBuffer, DiskQueue, FileHandle, OpenMode, Request, RequestHandle, SyscallFile,
};

/// Opens a fresh direct-I/O scratch file inside `dir`.
pub fn direct_file(dir: &Path, name: &str) -> Arc<dyn FileHandle> {
    Arc::new(
        SyscallFile::open(
            dir.join(name),
            OpenMode::READ_WRITE | OpenMode::CREATE | OpenMode::DIRECT,
            None,
        )
        .expect("open scratch file"),
    )
}

/// Opens a fresh buffered scratch file inside `dir`.
pub fn buffered_file(dir: &Path, name: &str) -> Arc<dyn FileHandle> {
    Arc::new(
        SyscallFile::open(dir.join(name), OpenMode::READ_WRITE | OpenMode::CREATE, None)
            .expect("open scratch file"),
    )
}

/// Buffer of `len` bytes filled with `byte`, aligned for direct I/O.
pub fn filled(len: usize, byte: u8) -> AlignedBuffer {
    let mut buf = AlignedBuffer::new(len);
    buf.fill(byte);
    buf
}

/// Parks the queue's worker inside a completion callback.
///
/// Returns once the worker is parked. Sending on the returned channel lets it
/// continue; the handle belongs to the parking request.
pub fn park_worker(queue: &DiskQueue, file: &Arc<dyn FileHandle>) -> (mpsc::Sender<()>, RequestHandle) {
    let (release, gate) = mpsc::channel::<()>();
    let (parked_tx, parked) = mpsc::channel::<()>();
    let request = Request::read(Arc::clone(file), 0, AlignedBuffer::new(0)).on_complete(move |_| {
        let _ = parked_tx.send(());
        let _ = gate.recv();
    });
    let handle = queue.add_read_request(request).expect("queue accepts");
    parked.recv().expect("worker parked");
    (release, handle)
}
