//! Sector-aligned heap buffers for direct I/O.

use std::alloc::{self, Layout};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;

/// Default alignment for I/O buffers; a multiple of every common sector size.
pub const DEFAULT_BUFFER_ALIGNMENT: usize = 4096;

/// An owned, zero-initialised byte buffer whose base address is a multiple of
/// a power-of-two alignment.
///
/// Requests take ownership of their buffer while queued and in flight and hand
/// it back on completion.
pub struct AlignedBuffer {
    ptr: NonNull<u8>,
    len: usize,
    layout: Layout,
}

// SAFETY: the buffer exclusively owns its allocation.
unsafe impl Send for AlignedBuffer {}
unsafe impl Sync for AlignedBuffer {}

impl AlignedBuffer {
    /// Allocates `len` zeroed bytes aligned to [`DEFAULT_BUFFER_ALIGNMENT`].
    pub fn new(len: usize) -> Self {
        Self::with_alignment(len, DEFAULT_BUFFER_ALIGNMENT)
    }

    /// Allocates `len` zeroed bytes aligned to `alignment`.
    ///
    /// # Panics
    /// Panics if `alignment` is not a power of two or the size overflows.
    pub fn with_alignment(len: usize, alignment: usize) -> Self {
        assert!(alignment.is_power_of_two(), "alignment must be a power of two");
        // Zero-length buffers still get a real, aligned allocation.
        let layout = Layout::from_size_align(len.max(1), alignment)
            .expect("buffer size overflows isize");
        // SAFETY: layout has a non-zero size.
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = match NonNull::new(raw) {
            Some(ptr) => ptr,
            None => alloc::handle_alloc_error(layout),
        };
        Self { ptr, len, layout }
    }

    /// Allocates an aligned buffer holding a copy of `data`.
    pub fn from_slice(data: &[u8], alignment: usize) -> Self {
        let mut buf = Self::with_alignment(data.len(), alignment);
        buf.copy_from_slice(data);
        buf
    }

    /// Returns the alignment of the base address.
    pub fn alignment(&self) -> usize {
        self.layout.align()
    }

    /// Returns the length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true for a zero-length buffer.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Deref for AlignedBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        // SAFETY: ptr is valid for len initialised bytes for the lifetime of self.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl DerefMut for AlignedBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        // SAFETY: ptr is valid for len bytes and uniquely borrowed through &mut self.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl AsRef<[u8]> for AlignedBuffer {
    fn as_ref(&self) -> &[u8] {
        self
    }
}

impl AsMut<[u8]> for AlignedBuffer {
    fn as_mut(&mut self) -> &mut [u8] {
        self
    }
}

impl Clone for AlignedBuffer {
    fn clone(&self) -> Self {
        Self::from_slice(self, self.alignment())
    }
}

impl PartialEq for AlignedBuffer {
    fn eq(&self, other: &Self) -> bool {
        self[..] == other[..]
    }
}

impl Eq for AlignedBuffer {}

impl fmt::Debug for AlignedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlignedBuffer")
            .field("addr", &self.ptr.as_ptr())
            .field("len", &self.len)
            .field("alignment", &self.alignment())
            .finish()
    }
}

impl Drop for AlignedBuffer {
    fn drop(&mut self) {
        // SAFETY: allocated in with_alignment with this exact layout.
        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) };
    }
}
