// Copyright 2023 IOP Systems, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use std::io;

use windows_sys::Win32::System::Threading::{
    GetCurrentThread, GetCurrentThreadId, SetThreadAffinityMask,
};

/// Pins the calling thread to `cpu_id`.
pub fn set_cpu_affinity(cpu_id: usize) -> io::Result<()> {
    // SAFETY: the pseudo handle refers to the calling thread
    let previous = unsafe { SetThreadAffinityMask(GetCurrentThread(), 1 << cpu_id) };

    if previous == 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(())
}

/// Naming threads is not wired up on this platform; the call reports
/// success without effect.
pub fn set_thread_name(_name: &str) -> io::Result<()> {
    Ok(())
}

/// Returns the OS-visible id of the calling thread.
pub fn current_thread_id() -> u32 {
    // SAFETY: no preconditions
    unsafe { GetCurrentThreadId() }
}
