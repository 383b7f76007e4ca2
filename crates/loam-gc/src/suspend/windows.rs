//! Suspension via `SuspendThread` / `GetThreadContext`.
//!
//! Unlike the signal-based path, stopping a thread here does not push
//! its register file onto its own stack, so the captured general-purpose
//! registers are returned explicitly as root candidates.

use std::mem;

use windows_sys::Win32::Foundation::{CloseHandle, DUPLICATE_SAME_ACCESS, HANDLE};
use windows_sys::Win32::System::Diagnostics::Debug::GetThreadContext;
use windows_sys::Win32::System::Threading::{
    GetCurrentProcess, GetCurrentThread, GetCurrentThreadId, ResumeThread, SuspendThread,
};

use super::StopContext;
use crate::threads::ThreadRecord;

/// Identity of a registered OS thread: its id plus a real (duplicated)
/// handle usable from other threads.
pub(crate) struct OsThread {
    id: u32,
    handle: HANDLE,
}

impl OsThread {
    pub(crate) fn is_current(&self) -> bool {
        self.id == unsafe { GetCurrentThreadId() }
    }
}

impl Drop for OsThread {
    fn drop(&mut self) {
        unsafe {
            CloseHandle(self.handle);
        }
    }
}

pub(crate) fn current_thread() -> OsThread {
    unsafe {
        let mut handle: HANDLE = mem::zeroed();
        let process = GetCurrentProcess();
        let ok = windows_sys::Win32::Foundation::DuplicateHandle(
            process,
            GetCurrentThread(),
            process,
            &raw mut handle,
            0,
            0,
            DUPLICATE_SAME_ACCESS,
        );
        assert!(ok != 0, "DuplicateHandle for the current thread failed");
        OsThread {
            id: GetCurrentThreadId(),
            handle,
        }
    }
}

// AMD64 CONTEXT flag values (winnt.h).
#[cfg(target_arch = "x86_64")]
const CONTEXT_CONTROL_AND_INTEGER: u32 = 0x0010_0001 | 0x0010_0002;

/// Suspends `record`'s thread and captures its stack pointer and
/// general-purpose registers.
///
/// # Safety
///
/// `record` must describe a live registered thread other than the
/// caller.
pub(crate) unsafe fn suspend(record: &ThreadRecord) -> StopContext {
    unsafe {
        let rc = SuspendThread(record.os.handle);
        assert!(rc != u32::MAX, "SuspendThread failed");

        #[cfg(target_arch = "x86_64")]
        {
            use windows_sys::Win32::System::Diagnostics::Debug::CONTEXT;

            let mut context: CONTEXT = mem::zeroed();
            context.ContextFlags = CONTEXT_CONTROL_AND_INTEGER;
            let ok = GetThreadContext(record.os.handle, &raw mut context);
            assert!(ok != 0, "GetThreadContext failed");

            let sp = context.Rsp as usize;
            record
                .saved_sp
                .store(sp, std::sync::atomic::Ordering::Release);
            let regs = vec![
                context.Rax as usize,
                context.Rbx as usize,
                context.Rcx as usize,
                context.Rdx as usize,
                context.Rsi as usize,
                context.Rdi as usize,
                context.Rbp as usize,
                context.R8 as usize,
                context.R9 as usize,
                context.R10 as usize,
                context.R11 as usize,
                context.R12 as usize,
                context.R13 as usize,
                context.R14 as usize,
                context.R15 as usize,
            ];
            StopContext { sp, regs }
        }

        #[cfg(not(target_arch = "x86_64"))]
        {
            unimplemented!("register capture is not implemented for this architecture")
        }
    }
}

/// Resumes every thread previously stopped by [`suspend`].
///
/// # Safety
///
/// Each record must describe a thread currently suspended by this
/// module.
pub(crate) unsafe fn resume_all<'a, I>(records: I)
where
    I: Iterator<Item = &'a ThreadRecord>,
{
    for record in records {
        let rc = unsafe { ResumeThread(record.os.handle) };
        debug_assert!(rc != u32::MAX, "ResumeThread failed");
    }
}
