// Copyright 2023 IOP Systems, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! Portable process-level allocation primitives.

use core::sync::atomic::{AtomicUsize, Ordering};
use std::alloc::Layout;

use crate::Error;

/// Returns the system page size in bytes.
///
/// The value is read from the OS once and cached for the lifetime of the
/// process. On Windows this is the larger of the page size and the
/// allocation granularity, since mappings must be placed on granularity
/// boundaries.
pub fn page_size() -> usize {
    static PAGE_SIZE: AtomicUsize = AtomicUsize::new(0);

    let cached = PAGE_SIZE.load(Ordering::Relaxed);
    if cached != 0 {
        return cached;
    }

    let size = crate::sys::page_size();
    PAGE_SIZE.store(size, Ordering::Relaxed);
    size
}

/// Allocates `size` bytes aligned to `align` bytes.
///
/// `align` must be a power of two and `size` must be non-zero, otherwise
/// this returns `Error::InvalidLayout`. Allocator failure is reported as
/// `Error::OutOfMemory`. The allocation must be released with
/// [`aligned_free`] using the same `align` and `size`.
pub fn aligned_alloc(align: usize, size: usize) -> Result<*mut u8, Error> {
    if size == 0 {
        return Err(Error::InvalidLayout);
    }

    let layout = Layout::from_size_align(size, align).map_err(|_| Error::InvalidLayout)?;

    // SAFETY: the layout has a non-zero size, checked above
    let ptr = unsafe { std::alloc::alloc(layout) };

    if ptr.is_null() {
        return Err(Error::OutOfMemory);
    }

    Ok(ptr)
}

/// Releases an allocation made with [`aligned_alloc`].
///
/// # Safety
///
/// `ptr` must have been returned by `aligned_alloc(align, size)` with the
/// same `align` and `size`, and must not be used after this call.
pub unsafe fn aligned_free(ptr: *mut u8, align: usize, size: usize) {
    let layout = Layout::from_size_align_unchecked(size, align);
    std::alloc::dealloc(ptr, layout);
}
