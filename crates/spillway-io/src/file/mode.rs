//! Open-mode flags for file handles.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Bit set of open-mode flags.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct OpenMode(u32);

impl OpenMode {
    /// Open for reading only.
    pub const READ_ONLY: OpenMode = OpenMode(0x001);
    /// Open for writing only.
    pub const WRITE_ONLY: OpenMode = OpenMode(0x002);
    /// Open for reading and writing.
    pub const READ_WRITE: OpenMode = OpenMode(0x004);
    /// Create the file if it does not exist.
    pub const CREATE: OpenMode = OpenMode(0x008);
    /// Truncate the file to zero length on open.
    pub const TRUNCATE: OpenMode = OpenMode(0x010);
    /// Request unbuffered (direct) I/O; falls back to buffered I/O if rejected.
    pub const DIRECT: OpenMode = OpenMode(0x020);
    /// Fail instead of falling back when direct I/O is rejected. Implies DIRECT.
    pub const REQUIRE_DIRECT: OpenMode = OpenMode(0x040);
    /// Synchronous writes (O_SYNC | O_DSYNC | O_RSYNC where available).
    pub const SYNCHRONOUS: OpenMode = OpenMode(0x080);
    /// Do not take the exclusive file lock on open.
    pub const NO_LOCK: OpenMode = OpenMode(0x100);

    const NAMES: [(OpenMode, &'static str); 9] = [
        (Self::READ_ONLY, "READ_ONLY"),
        (Self::WRITE_ONLY, "WRITE_ONLY"),
        (Self::READ_WRITE, "READ_WRITE"),
        (Self::CREATE, "CREATE"),
        (Self::TRUNCATE, "TRUNCATE"),
        (Self::DIRECT, "DIRECT"),
        (Self::REQUIRE_DIRECT, "REQUIRE_DIRECT"),
        (Self::SYNCHRONOUS, "SYNCHRONOUS"),
        (Self::NO_LOCK, "NO_LOCK"),
    ];

    /// Returns the empty set.
    pub const fn empty() -> Self {
        OpenMode(0)
    }

    /// Returns the raw bits.
    pub const fn bits(&self) -> u32 {
        self.0
    }

    /// Returns true if every flag of `other` is set.
    pub const fn contains(&self, other: OpenMode) -> bool {
        other.0 != 0 && (self.0 & other.0) == other.0
    }

    /// Returns this mode with the flags of `other` cleared.
    pub const fn without(self, other: OpenMode) -> Self {
        OpenMode(self.0 & !other.0)
    }

    /// Returns true if the handle may read.
    pub fn is_readable(&self) -> bool {
        self.contains(Self::READ_ONLY) || self.contains(Self::READ_WRITE)
    }

    /// Returns true if the handle may write.
    pub fn is_writable(&self) -> bool {
        self.contains(Self::WRITE_ONLY) || self.contains(Self::READ_WRITE)
    }

    /// Returns true if only reads are allowed.
    pub fn is_read_only(&self) -> bool {
        !self.is_writable()
    }

    /// Returns true if direct I/O was requested or required.
    pub fn wants_direct(&self) -> bool {
        self.contains(Self::DIRECT) || self.contains(Self::REQUIRE_DIRECT)
    }

    /// Returns true if falling back to buffered I/O is forbidden.
    pub fn requires_direct(&self) -> bool {
        self.contains(Self::REQUIRE_DIRECT)
    }
}

impl std::ops::BitOr for OpenMode {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        OpenMode(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for OpenMode {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for OpenMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (flag, name) in Self::NAMES {
            if self.contains(flag) {
                if !first {
                    f.write_str("|")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        if first {
            f.write_str("NONE")?;
        }
        Ok(())
    }
}

impl fmt::Debug for OpenMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OpenMode({})", self)
    }
}
