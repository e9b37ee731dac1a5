// Copyright 2023 IOP Systems, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! POSIX realization of the mirrored mapping.
//!
//! The backing storage is an anonymous file: a uniquely-named temporary file
//! which is unlinked the moment it exists, so it is never observable on any
//! filesystem. A shared-memory filesystem is preferred so the pages never
//! touch disk; a regular temp filesystem is the fallback.

use std::io;

/// The backing handle for a mirrored mapping.
///
/// The file descriptor is closed once both halves are mapped, so no handle
/// needs to outlive creation on POSIX.
pub(crate) struct Backing;

pub(crate) fn page_size() -> usize {
    // SAFETY: sysconf is always safe to call
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}

const SHM_TEMPLATE: &[u8] = b"/dev/shm/mirrorbuf-XXXXXX\0";
const TMP_TEMPLATE: &[u8] = b"/tmp/mirrorbuf-XXXXXX\0";

/// Opens a file descriptor to a freshly created, already-unlinked file.
fn unlinked_backing_fd() -> io::Result<libc::c_int> {
    let mut path = SHM_TEMPLATE.to_vec();

    // SAFETY: the template is a valid, writable C string
    let mut fd = unsafe { libc::mkstemp(path.as_mut_ptr().cast()) };

    if fd < 0 {
        path = TMP_TEMPLATE.to_vec();

        // SAFETY: as above
        fd = unsafe { libc::mkstemp(path.as_mut_ptr().cast()) };

        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
    }

    // we only want the fd, not the name
    // SAFETY: path is the NUL-terminated name mkstemp filled in
    if unsafe { libc::unlink(path.as_ptr().cast()) } == -1 {
        let err = io::Error::last_os_error();
        // SAFETY: fd is open, checked above
        unsafe { libc::close(fd) };
        return Err(err);
    }

    Ok(fd)
}

/// Maps `capacity` physical bytes twice, back-to-back, into one `2 *
/// capacity` virtual window. Capacity validation happens in the caller.
pub(crate) fn map_mirrored(capacity: usize) -> io::Result<(*mut u8, Backing)> {
    let fd = unlinked_backing_fd()?;

    // SAFETY: fd is open; failure paths below close it exactly once
    unsafe {
        if libc::ftruncate(fd, capacity as libc::off_t) == -1 {
            let err = io::Error::last_os_error();
            libc::close(fd);
            return Err(err);
        }

        // reserve a 2x window with no access; the two data mappings are
        // placed into it with MAP_FIXED below
        let base = libc::mmap(
            core::ptr::null_mut(),
            capacity * 2,
            libc::PROT_NONE,
            libc::MAP_PRIVATE | libc::MAP_ANON,
            -1,
            0,
        );

        if base == libc::MAP_FAILED {
            let err = io::Error::last_os_error();
            libc::close(fd);
            return Err(err);
        }

        // both halves must be MAP_SHARED views of the same file, otherwise
        // writes through one half would not alias the other
        for half in 0..2 {
            let addr = base.cast::<u8>().add(half * capacity);
            let mapped = libc::mmap(
                addr.cast(),
                capacity,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_FIXED | libc::MAP_SHARED,
                fd,
                0,
            );

            if mapped != addr.cast() {
                let err = io::Error::last_os_error();
                libc::munmap(base, capacity * 2);
                libc::close(fd);
                return Err(err);
            }
        }

        if libc::close(fd) == -1 {
            let err = io::Error::last_os_error();
            libc::munmap(base, capacity * 2);
            return Err(err);
        }

        Ok((base.cast(), Backing))
    }
}

/// Unmaps a mapping produced by [`map_mirrored`].
///
/// # Safety
///
/// `base` and `capacity` must come from a successful `map_mirrored` call,
/// and no reference into the mapping may outlive this call.
pub(crate) unsafe fn unmap_mirrored(base: *mut u8, capacity: usize, _backing: Backing) {
    libc::munmap(base.cast(), capacity * 2);
}
