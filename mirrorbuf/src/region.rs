// Copyright 2023 IOP Systems, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use crate::{os, sys, Error};

/// A circular byte region whose physical pages are mapped twice,
/// back-to-back, in virtual address space.
///
/// For a region of capacity `N`, the virtual range `[base, base + 2N)` is
/// readable and writable, and for every `i < N` the bytes at `base + i` and
/// `base + N + i` alias the same physical page. A contiguous access of up to
/// `N` bytes starting anywhere in the first half is therefore always valid,
/// even when it crosses the wrap point.
///
/// The region is exclusively owned: dropping it unmaps both halves and
/// releases the backing handle. The backing storage is anonymous and is
/// never observable on a filesystem.
pub struct MirroredRegion {
    base: *mut u8,
    capacity: usize,
    backing: Option<sys::Backing>,
}

// SAFETY: the mapping stays valid until drop and carries no thread
// affinity; synchronization of the bytes themselves is the caller's
// responsibility, which the SPSC queue provides via its cursors.
unsafe impl Send for MirroredRegion {}
unsafe impl Sync for MirroredRegion {}

impl MirroredRegion {
    /// Creates a new mirrored region of `capacity` bytes.
    ///
    /// `capacity` must be a non-zero power of two and a multiple of
    /// [`page_size()`](crate::page_size), otherwise this returns an
    /// invalid-argument error. OS failures while probing the backing
    /// filesystems or mapping the halves surface as `Error::Os`.
    pub fn create(capacity: usize) -> Result<Self, Error> {
        if capacity == 0 || !capacity.is_power_of_two() {
            return Err(Error::CapacityNotPowerOfTwo);
        }

        if capacity % os::page_size() != 0 {
            return Err(Error::CapacityNotPageAligned);
        }

        let (base, backing) = sys::map_mirrored(capacity)?;

        Ok(Self {
            base,
            capacity,
            backing: Some(backing),
        })
    }

    /// Returns the capacity of one half of the mapping in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the base pointer of the mapping.
    ///
    /// The pointer is valid for reads and writes of `2 * capacity` bytes.
    pub fn as_ptr(&self) -> *mut u8 {
        self.base
    }
}

impl Drop for MirroredRegion {
    fn drop(&mut self) {
        if self.base.is_null() {
            return;
        }

        if let Some(backing) = self.backing.take() {
            // SAFETY: base/capacity came from map_mirrored and the region
            // is being destroyed, so no references into it remain
            unsafe { sys::unmap_mirrored(self.base, self.capacity, backing) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_invalid_capacities() {
        assert!(matches!(
            MirroredRegion::create(0),
            Err(Error::CapacityNotPowerOfTwo)
        ));
        assert!(matches!(
            MirroredRegion::create(os::page_size() * 3),
            Err(Error::CapacityNotPowerOfTwo)
        ));

        // a power of two smaller than a page cannot be page aligned
        if os::page_size() > 8 {
            assert!(matches!(
                MirroredRegion::create(8),
                Err(Error::CapacityNotPageAligned)
            ));
        }
    }

    #[test]
    // writes through the low half must be readable through the high half
    // and vice versa, for a range of region sizes
    fn mirror_aliasing() {
        for shift in 0..4 {
            let capacity = os::page_size() << shift;
            let region = MirroredRegion::create(capacity).unwrap();
            let base = region.as_ptr();

            for i in 0..capacity {
                let v = (i * 31 + shift) as u8;
                unsafe {
                    base.add(i).write(v);
                    assert_eq!(base.add(capacity + i).read(), v);
                }
            }

            for i in 0..capacity {
                let v = (i * 17 + shift) as u8;
                unsafe {
                    base.add(capacity + i).write(v);
                    assert_eq!(base.add(i).read(), v);
                }
            }
        }
    }

    #[test]
    fn regions_are_independent() {
        let a = MirroredRegion::create(os::page_size()).unwrap();
        let b = MirroredRegion::create(os::page_size()).unwrap();

        unsafe {
            a.as_ptr().write(0xAA);
            b.as_ptr().write(0xBB);
            assert_eq!(a.as_ptr().read(), 0xAA);
            assert_eq!(b.as_ptr().read(), 0xBB);
        }
    }
}
