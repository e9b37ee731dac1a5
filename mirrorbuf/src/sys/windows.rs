// Copyright 2023 IOP Systems, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! Windows realization of the mirrored mapping.
//!
//! Windows has no `MAP_FIXED` equivalent that atomically replaces a
//! reservation, so the address for the double mapping is probed: map a `2N`
//! view to learn a suitable base, unmap it, then re-map both halves at that
//! base with `MapViewOfFileEx`. Another thread may steal the address in
//! between, in which case the probe is retried up to a fixed budget.

use std::io;

use windows_sys::Win32::Foundation::{
    CloseHandle, GetLastError, ERROR_INVALID_ADDRESS, HANDLE, INVALID_HANDLE_VALUE,
};
use windows_sys::Win32::System::Memory::{
    CreateFileMappingW, MapViewOfFile, MapViewOfFileEx, UnmapViewOfFile, FILE_MAP_ALL_ACCESS,
    MEMORY_MAPPED_VIEW_ADDRESS, PAGE_READWRITE,
};
use windows_sys::Win32::System::SystemInformation::{GetSystemInfo, SYSTEM_INFO};

/// The backing handle for a mirrored mapping: the file-mapping object,
/// which must stay open for the lifetime of the views.
pub(crate) struct Backing(HANDLE);

// SAFETY: the handle is only used to close the mapping object, which is
// valid from any thread.
unsafe impl Send for Backing {}
unsafe impl Sync for Backing {}

pub(crate) fn page_size() -> usize {
    // SAFETY: GetSystemInfo writes the struct and cannot fail
    let info = unsafe {
        let mut info: SYSTEM_INFO = core::mem::zeroed();
        GetSystemInfo(&mut info);
        info
    };

    (info.dwPageSize as usize).max(info.dwAllocationGranularity as usize)
}

/// Attempts after which the address probe gives up.
const PROBE_ATTEMPTS: usize = 16;

fn view(value: *mut u8) -> MEMORY_MAPPED_VIEW_ADDRESS {
    MEMORY_MAPPED_VIEW_ADDRESS {
        Value: value.cast(),
    }
}

pub(crate) fn map_mirrored(capacity: usize) -> io::Result<(*mut u8, Backing)> {
    let size = capacity * 2;

    // SAFETY: all handles and views created here are released on every
    // failure path before returning
    unsafe {
        let mapping = CreateFileMappingW(
            INVALID_HANDLE_VALUE,
            core::ptr::null(),
            PAGE_READWRITE,
            (size as u64 >> 32) as u32,
            size as u32,
            core::ptr::null(),
        );

        if mapping.is_null() {
            return Err(io::Error::last_os_error());
        }

        for _ in 0..PROBE_ATTEMPTS {
            // learn an address range large enough for both halves
            let probe = MapViewOfFile(mapping, FILE_MAP_ALL_ACCESS, 0, 0, size);

            if probe.Value.is_null() {
                let err = io::Error::last_os_error();
                CloseHandle(mapping);
                return Err(err);
            }

            let base: *mut u8 = probe.Value.cast();
            UnmapViewOfFile(probe);

            let low = MapViewOfFileEx(mapping, FILE_MAP_ALL_ACCESS, 0, 0, capacity, base.cast());

            if low.Value.is_null() {
                if GetLastError() == ERROR_INVALID_ADDRESS {
                    // the hole was reclaimed between probe and map
                    continue;
                }
                let err = io::Error::last_os_error();
                CloseHandle(mapping);
                return Err(err);
            }

            let high = MapViewOfFileEx(
                mapping,
                FILE_MAP_ALL_ACCESS,
                0,
                0,
                capacity,
                base.add(capacity).cast(),
            );

            if high.Value.is_null() {
                UnmapViewOfFile(view(base));
                if GetLastError() == ERROR_INVALID_ADDRESS {
                    continue;
                }
                let err = io::Error::last_os_error();
                CloseHandle(mapping);
                return Err(err);
            }

            return Ok((base, Backing(mapping)));
        }

        CloseHandle(mapping);
        Err(io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            "no stable address for the mirrored mapping",
        ))
    }
}

/// Unmaps a mapping produced by [`map_mirrored`].
///
/// # Safety
///
/// `base` and `capacity` must come from a successful `map_mirrored` call,
/// and no reference into the mapping may outlive this call.
pub(crate) unsafe fn unmap_mirrored(base: *mut u8, capacity: usize, backing: Backing) {
    UnmapViewOfFile(view(base));
    UnmapViewOfFile(view(base.add(capacity)));
    CloseHandle(backing.0);
}
