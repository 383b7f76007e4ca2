//! Signal-based suspension handshake.
//!
//! One thread is suspended at a time: the collector publishes the target
//! record, sends the suspend signal and waits on the acknowledgement
//! semaphore. The handler runs on the target thread, records its
//! approximate stack pointer, posts the semaphore and parks in
//! `sigsuspend` until the resume generation advances.
//!
//! Everything the handler touches is async-signal-safe: atomic loads and
//! stores, `sem_post`, `sigsuspend`.

use std::mem;
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};
use std::sync::Once;

use super::StopContext;
use crate::threads::ThreadRecord;

const SUSPEND_SIGNAL: libc::c_int = libc::SIGPWR;
const RESUME_SIGNAL: libc::c_int = libc::SIGXCPU;

/// Identity of a registered OS thread.
pub(crate) struct OsThread {
    id: libc::pthread_t,
}

impl OsThread {
    pub(crate) fn is_current(&self) -> bool {
        unsafe { libc::pthread_equal(self.id, libc::pthread_self()) != 0 }
    }
}

pub(crate) fn current_thread() -> OsThread {
    OsThread {
        id: unsafe { libc::pthread_self() },
    }
}

static HANDLERS: Once = Once::new();
static ACK_SEM: AtomicPtr<libc::sem_t> = AtomicPtr::new(ptr::null_mut());
static SUSPEND_TARGET: AtomicPtr<ThreadRecord> = AtomicPtr::new(ptr::null_mut());
static RESUME_GEN: AtomicUsize = AtomicUsize::new(0);

extern "C" fn on_suspend(_sig: libc::c_int) {
    let my_gen = RESUME_GEN.load(Ordering::Acquire);
    let record = SUSPEND_TARGET.load(Ordering::Acquire);
    if record.is_null() {
        // Stray signal from outside a handshake.
        return;
    }
    let marker = 0usize;
    let sp = ptr::addr_of!(marker) as usize;
    unsafe {
        (*record).saved_sp.store(sp, Ordering::Release);
        libc::sem_post(ACK_SEM.load(Ordering::Acquire));

        // The resume signal is blocked while this handler runs
        // (sa_mask), so it can only be delivered inside sigsuspend; a
        // resume sent between the generation check and the wait stays
        // pending instead of being lost.
        let mut wait_mask: libc::sigset_t = mem::zeroed();
        libc::sigfillset(&raw mut wait_mask);
        libc::sigdelset(&raw mut wait_mask, RESUME_SIGNAL);
        while RESUME_GEN.load(Ordering::Acquire) == my_gen {
            libc::sigsuspend(&raw const wait_mask);
        }
    }
}

extern "C" fn on_resume(_sig: libc::c_int) {
    // Nothing to do: delivery alone wakes the sigsuspend in on_suspend.
}

fn install_handlers() {
    HANDLERS.call_once(|| unsafe {
        let sem = Box::into_raw(Box::new(mem::zeroed::<libc::sem_t>()));
        let rc = libc::sem_init(sem, 0, 0);
        assert_eq!(rc, 0, "sem_init failed");
        ACK_SEM.store(sem, Ordering::Release);

        let mut suspend_action: libc::sigaction = mem::zeroed();
        suspend_action.sa_sigaction = on_suspend as usize;
        libc::sigfillset(&raw mut suspend_action.sa_mask);
        suspend_action.sa_flags = libc::SA_RESTART;
        let rc = libc::sigaction(SUSPEND_SIGNAL, &raw const suspend_action, ptr::null_mut());
        assert_eq!(rc, 0, "installing the suspend handler failed");

        let mut resume_action: libc::sigaction = mem::zeroed();
        resume_action.sa_sigaction = on_resume as usize;
        libc::sigemptyset(&raw mut resume_action.sa_mask);
        resume_action.sa_flags = libc::SA_RESTART;
        let rc = libc::sigaction(RESUME_SIGNAL, &raw const resume_action, ptr::null_mut());
        assert_eq!(rc, 0, "installing the resume handler failed");
    });
}

/// Suspends `record`'s thread and returns its stop context. Blocks
/// until the thread has acknowledged the stop.
///
/// # Safety
///
/// `record` must describe a live registered thread other than the
/// caller, and the caller must hold the global GC mutex so that only one
/// handshake is in flight at a time.
pub(crate) unsafe fn suspend(record: &ThreadRecord) -> StopContext {
    install_handlers();
    record.saved_sp.store(0, Ordering::Release);
    SUSPEND_TARGET.store(ptr::from_ref(record).cast_mut(), Ordering::Release);

    let rc = unsafe { libc::pthread_kill(record.os.id, SUSPEND_SIGNAL) };
    assert_eq!(rc, 0, "failed to deliver the suspend signal");

    let sem = ACK_SEM.load(Ordering::Acquire);
    while unsafe { libc::sem_wait(sem) } != 0 {
        // Interrupted; retry.
    }
    SUSPEND_TARGET.store(ptr::null_mut(), Ordering::Release);

    StopContext {
        sp: record.saved_sp.load(Ordering::Acquire),
        regs: Vec::new(),
    }
}

/// Resumes every thread previously stopped by [`suspend`] in the current
/// stop cycle.
///
/// # Safety
///
/// Each record must describe a thread currently parked in the suspend
/// handler.
pub(crate) unsafe fn resume_all<'a, I>(records: I)
where
    I: Iterator<Item = &'a ThreadRecord>,
{
    RESUME_GEN.fetch_add(1, Ordering::AcqRel);
    for record in records {
        let rc = unsafe { libc::pthread_kill(record.os.id, RESUME_SIGNAL) };
        debug_assert_eq!(rc, 0, "failed to deliver the resume signal");
    }
}
