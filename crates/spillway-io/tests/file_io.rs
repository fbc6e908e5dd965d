//! Round-trip and alignment behaviour of the file backends.

mod common;

use std::sync::Arc;

use spillway_io::{
    open_file, AlignedBuffer, FileHandle, FileKind, IoError, IoErrorKind, OpenMode, SyscallFile,
};

#[test]
fn test_buffered_round_trip_at_unaligned_offsets() {
    let dir = tempfile::tempdir().unwrap();
    let file = open_file(
        FileKind::Syscall,
        dir.path().join("buffered"),
        OpenMode::READ_WRITE | OpenMode::CREATE,
        None,
    )
    .unwrap();
    assert!(!file.needs_alignment());

    for (offset, len) in [(0u64, 1usize), (7, 13), (4095, 2), (10_000, 4097)] {
        let data: Vec<u8> = (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(offset as u8)).collect();
        file.write_at(offset, &data).unwrap();
        let mut out = vec![0u8; len];
        file.read_at(offset, &mut out).unwrap();
        assert_eq!(out, data, "offset {} len {}", offset, len);
    }
}

#[test]
fn test_direct_round_trip_aligned() {
    let dir = tempfile::tempdir().unwrap();
    let file = common::direct_file(dir.path(), "direct");
    let align = file.alignment() as usize;

    let data = common::filled(4 * align, 0x5a);
    file.write_at(align as u64, &data).unwrap();
    let mut out = AlignedBuffer::with_alignment(4 * align, align);
    file.read_at(align as u64, &mut out).unwrap();
    assert_eq!(&out[..], &data[..]);
}

#[test]
fn test_direct_unaligned_access_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let file = common::direct_file(dir.path(), "direct");
    let align = file.alignment() as usize;
    let buf = AlignedBuffer::with_alignment(2 * align, align);

    let cases: [(u64, &[u8]); 3] = [
        (1, &buf[..align]),
        (0, &buf[..align - 1]),
        (0, &buf[1..align + 1]),
    ];
    for (offset, slice) in cases {
        let err = file.write_at(offset, slice).unwrap_err();
        assert_eq!(err.kind(), IoErrorKind::AlignmentViolation);
        assert!(err.is_caller_error());
    }

    let mut out = vec![0u8; align + 1];
    let err = file.read_at(0, &mut out).unwrap_err();
    assert!(matches!(err, IoError::AlignmentViolation { call: "pread", .. }));

    // Nothing was written by the rejected calls.
    assert_eq!(file.size().unwrap(), 0);
}

#[test]
fn test_require_direct_never_falls_back_silently() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("required");
    match SyscallFile::open(&path, OpenMode::READ_WRITE | OpenMode::CREATE | OpenMode::REQUIRE_DIRECT, None) {
        Ok(file) => assert!(file.is_direct()),
        Err(err) => assert!(matches!(
            err.kind(),
            IoErrorKind::OpenFailure | IoErrorKind::DirectIoUnsupported
        )),
    }
}

#[test]
fn test_memory_backend_matches_syscall_semantics() {
    let dir = tempfile::tempdir().unwrap();
    let files: Vec<Arc<dyn FileHandle>> = vec![
        open_file(FileKind::Syscall, dir.path().join("s"), OpenMode::READ_WRITE | OpenMode::CREATE, None).unwrap(),
        open_file(FileKind::Memory, dir.path().join("m"), OpenMode::READ_WRITE | OpenMode::CREATE, None).unwrap(),
    ];
    for file in files {
        file.write_at(0, b"0123456789").unwrap();
        file.set_size(4).unwrap();
        assert_eq!(file.size().unwrap(), 4);

        let mut out = [0u8; 4];
        file.read_at(0, &mut out).unwrap();
        assert_eq!(&out, b"0123");

        let mut past_end = [0u8; 8];
        let err = file.read_at(0, &mut past_end).unwrap_err();
        assert_eq!(err.kind(), IoErrorKind::ReadFailure, "{}", file.io_type());

        file.close().unwrap();
        assert!(file.is_closed());
        assert_eq!(file.write_at(0, b"x").unwrap_err().kind(), IoErrorKind::Closed);
    }
}

#[test]
fn test_uring_kind_without_feature() {
    let dir = tempfile::tempdir().unwrap();
    let result = open_file(
        FileKind::Uring,
        dir.path().join("u"),
        OpenMode::READ_WRITE | OpenMode::CREATE,
        None,
    );
    if cfg!(not(feature = "uring")) {
        assert_eq!(result.unwrap_err().kind(), IoErrorKind::OpenFailure);
    }
}
