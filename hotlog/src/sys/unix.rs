// Copyright 2023 IOP Systems, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use std::io;

/// Pins the calling thread to `cpu_id`.
///
/// On linux this is strict: a failing `sched_setaffinity` surfaces as an
/// error. Platforms without per-thread pinning treat this as a hint and
/// report success.
#[cfg(target_os = "linux")]
pub fn set_cpu_affinity(cpu_id: usize) -> io::Result<()> {
    // SAFETY: the cpu_set is a plain bitmask initialized before use
    unsafe {
        let mut cpuset: libc::cpu_set_t = core::mem::zeroed();
        libc::CPU_ZERO(&mut cpuset);
        libc::CPU_SET(cpu_id, &mut cpuset);

        if libc::sched_setaffinity(0, core::mem::size_of::<libc::cpu_set_t>(), &cpuset) == -1 {
            return Err(io::Error::last_os_error());
        }
    }

    Ok(())
}

/// Pinning a thread to a core is not supported on this platform, so this
/// is a no-op that reports success.
#[cfg(not(target_os = "linux"))]
pub fn set_cpu_affinity(_cpu_id: usize) -> io::Result<()> {
    Ok(())
}

/// Sets the OS-visible name of the calling thread, truncated to the
/// platform limit.
#[cfg(target_os = "linux")]
pub fn set_thread_name(name: &str) -> io::Result<()> {
    // PR_SET_NAME allows 15 bytes plus the terminator
    let mut buf = [0u8; 16];
    let len = name.len().min(15);
    buf[..len].copy_from_slice(&name.as_bytes()[..len]);

    // SAFETY: buf is a valid NUL-terminated C string
    if unsafe { libc::prctl(libc::PR_SET_NAME, buf.as_ptr(), 0, 0, 0) } == -1 {
        return Err(io::Error::last_os_error());
    }

    Ok(())
}

/// Sets the OS-visible name of the calling thread, truncated to the
/// platform limit.
#[cfg(any(target_os = "macos", target_os = "ios"))]
pub fn set_thread_name(name: &str) -> io::Result<()> {
    // the darwin limit is 63 bytes plus the terminator
    let mut buf = [0u8; 64];
    let len = name.len().min(63);
    buf[..len].copy_from_slice(&name.as_bytes()[..len]);

    // SAFETY: buf is a valid NUL-terminated C string
    let res = unsafe { libc::pthread_setname_np(buf.as_ptr().cast()) };

    if res != 0 {
        return Err(io::Error::from_raw_os_error(res));
    }

    Ok(())
}

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "ios")))]
pub fn set_thread_name(_name: &str) -> io::Result<()> {
    Ok(())
}

/// Returns the OS-visible id of the calling thread.
#[cfg(target_os = "linux")]
pub fn current_thread_id() -> u32 {
    // SAFETY: gettid cannot fail
    unsafe { libc::syscall(libc::SYS_gettid) as u32 }
}

/// Returns the OS-visible id of the calling thread.
#[cfg(any(target_os = "macos", target_os = "ios"))]
pub fn current_thread_id() -> u32 {
    let mut tid: u64 = 0;

    // SAFETY: pthread_self is always a valid thread handle
    unsafe {
        libc::pthread_threadid_np(libc::pthread_self(), &mut tid);
    }

    tid as u32
}

/// Returns a stable process-local id for the calling thread on platforms
/// without a native one.
#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "ios")))]
pub fn current_thread_id() -> u32 {
    use core::sync::atomic::{AtomicU32, Ordering};

    static NEXT: AtomicU32 = AtomicU32::new(1);

    thread_local! {
        static ID: u32 = NEXT.fetch_add(1, Ordering::Relaxed);
    }

    ID.with(|id| *id)
}
