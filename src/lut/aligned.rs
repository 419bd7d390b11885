//! Cache-line aligned, zero-initialised buffers for lookup tables.
//!
//! Padding entries of a table are never read as uninitialised memory: the
//! whole buffer is zeroed at allocation.

use crate::error::{GemmError, Result};
use std::alloc::Layout;
use std::ptr::NonNull;

pub const TABLE_ALIGN: usize = 64;

/// Plain integer types for which the all-zero bit pattern is a valid value.
///
/// # Safety
/// Implementors must be valid when zero-initialised and have no drop glue.
pub unsafe trait Pod: Copy + Send + Sync + 'static {}

unsafe impl Pod for i8 {}
unsafe impl Pod for i16 {}
unsafe impl Pod for i32 {}
unsafe impl Pod for i64 {}

/// Fixed-length heap buffer aligned to `TABLE_ALIGN`.
/// Freed via `dealloc` on drop.
pub struct AlignedBuf<T: Pod> {
    ptr: NonNull<T>,
    len: usize,
}

// SAFETY: AlignedBuf owns its allocation exclusively; T is plain data.
unsafe impl<T: Pod> Send for AlignedBuf<T> {}
unsafe impl<T: Pod> Sync for AlignedBuf<T> {}

impl<T: Pod> AlignedBuf<T> {
    fn layout(len: usize) -> Result<Layout> {
        let bytes = len
            .checked_mul(std::mem::size_of::<T>())
            .ok_or_else(|| GemmError::Allocation(format!("{len} elements overflow usize")))?;
        Layout::from_size_align(bytes, TABLE_ALIGN.max(std::mem::align_of::<T>()))
            .map_err(|e| GemmError::Allocation(format!("invalid layout for {bytes} bytes: {e}")))
    }

    /// Allocate `len` zeroed elements.
    pub fn zeroed(len: usize) -> Result<Self> {
        if len == 0 {
            return Ok(AlignedBuf { ptr: NonNull::dangling(), len: 0 });
        }
        let layout = Self::layout(len)?;
        // SAFETY: layout has non-zero size; zero bytes are a valid T (Pod).
        let raw = unsafe { std::alloc::alloc_zeroed(layout) } as *mut T;
        let ptr = NonNull::new(raw).ok_or_else(|| {
            GemmError::Allocation(format!(
                "aligned alloc of {} bytes (align {}) failed",
                layout.size(),
                layout.align(),
            ))
        })?;
        Ok(AlignedBuf { ptr, len })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn as_ptr(&self) -> *const T {
        self.ptr.as_ptr()
    }

    #[inline]
    pub fn as_slice(&self) -> &[T] {
        // SAFETY: ptr is valid for len initialised elements (or dangling with len 0).
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        // SAFETY: as above, and &mut self guarantees exclusive access.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl<T: Pod> Drop for AlignedBuf<T> {
    fn drop(&mut self) {
        if self.len == 0 {
            return;
        }
        if let Ok(layout) = Self::layout(self.len) {
            // SAFETY: allocated in `zeroed` with this exact layout.
            unsafe { std::alloc::dealloc(self.ptr.as_ptr() as *mut u8, layout) }
        }
    }
}
