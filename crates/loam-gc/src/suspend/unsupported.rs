//! Stubs for platforms without a suspension implementation. A runtime
//! with a single registered thread never calls these.

use super::StopContext;
use crate::threads::ThreadRecord;

/// Identity of a registered OS thread.
pub(crate) struct OsThread;

impl OsThread {
    pub(crate) fn is_current(&self) -> bool {
        true
    }
}

pub(crate) fn current_thread() -> OsThread {
    OsThread
}

/// # Safety
///
/// Never safe to call: unimplemented on this platform.
pub(crate) unsafe fn suspend(_record: &ThreadRecord) -> StopContext {
    unimplemented!("thread suspension is not implemented for this platform")
}

/// # Safety
///
/// Never safe to call: unimplemented on this platform.
pub(crate) unsafe fn resume_all<'a, I>(_records: I)
where
    I: Iterator<Item = &'a ThreadRecord>,
{
    unimplemented!("thread suspension is not implemented for this platform")
}
