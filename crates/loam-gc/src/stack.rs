//! Conservative stack scanning support.
//!
//! This module provides the two ingredients for scanning the *current*
//! thread: the bounds of its stack, and a register spill that flushes
//! callee-saved registers onto the stack so a conservative word scan
//! sees roots that live only in registers. Suspended threads are handled
//! by the `suspend` module instead.

/// Bounds of a thread's stack. Stacks grow downward on all supported
/// platforms, so `base` is the highest address.
#[derive(Debug, Clone, Copy)]
pub(crate) struct StackBounds {
    /// One past the highest scannable address (where the stack began).
    pub base: usize,
    /// The lowest address of the stack region.
    #[allow(dead_code)]
    pub limit: usize,
}

/// Retrieve the stack bounds for the current thread.
#[cfg(miri)]
pub(crate) fn current_stack_bounds() -> StackBounds {
    // Miri does not support stack scanning; an empty range disables it.
    StackBounds { base: 0, limit: 0 }
}

/// Retrieve the stack bounds for the current thread.
#[cfg(all(target_os = "linux", not(miri)))]
pub(crate) fn current_stack_bounds() -> StackBounds {
    use libc::{
        pthread_attr_destroy, pthread_attr_getstack, pthread_attr_t, pthread_getattr_np,
        pthread_self,
    };

    unsafe {
        let mut attr: pthread_attr_t = std::mem::zeroed();
        let ret = pthread_getattr_np(pthread_self(), &raw mut attr);
        assert!(ret == 0, "pthread_getattr_np failed");

        let mut stackaddr: *mut libc::c_void = std::ptr::null_mut();
        let mut stacksize: libc::size_t = 0;
        let ret = pthread_attr_getstack(&raw const attr, &raw mut stackaddr, &raw mut stacksize);
        if ret != 0 {
            pthread_attr_destroy(&raw mut attr);
            panic!("pthread_attr_getstack failed");
        }
        pthread_attr_destroy(&raw mut attr);

        StackBounds {
            base: stackaddr as usize + stacksize,
            limit: stackaddr as usize,
        }
    }
}

/// Retrieve the stack bounds for the current thread.
#[cfg(all(target_os = "macos", not(miri)))]
pub(crate) fn current_stack_bounds() -> StackBounds {
    unsafe {
        let thread = libc::pthread_self();
        let base = libc::pthread_get_stackaddr_np(thread) as usize;
        let size = libc::pthread_get_stacksize_np(thread);
        StackBounds {
            base,
            limit: base - size,
        }
    }
}

/// Retrieve the stack bounds for the current thread.
#[cfg(all(windows, not(miri)))]
pub(crate) fn current_stack_bounds() -> StackBounds {
    use windows_sys::Win32::System::Threading::GetCurrentThreadStackLimits;

    let mut low: usize = 0;
    let mut high: usize = 0;
    unsafe {
        GetCurrentThreadStackLimits(&raw mut low, &raw mut high);
    }
    StackBounds {
        base: high,
        limit: low,
    }
}

/// Retrieve the stack bounds for the current thread (unsupported OS).
#[cfg(all(not(target_os = "linux"), not(target_os = "macos"), not(windows), not(miri)))]
pub(crate) fn current_stack_bounds() -> StackBounds {
    unimplemented!("stack bounds retrieval is not implemented for this platform")
}

/// Spill callee-saved CPU registers onto the stack, then hand every
/// pointer-aligned word in `[sp, stack_base)` to `visit`.
///
/// The spill ensures roots held only in callee-saved registers become
/// visible to the word scan; caller-saved registers have already been
/// flushed into frames by the calls leading here.
#[inline(never)]
pub(crate) fn spill_registers_and_scan<F>(stack_base: usize, mut visit: F)
where
    F: FnMut(usize),
{
    // The spill stores registers straight to a stack buffer: the asm
    // only writes memory, so it is correct no matter which scratch
    // register the operand lands in.
    #[cfg(all(target_arch = "x86_64", not(miri)))]
    let mut regs = [0usize; 6];
    #[cfg(all(target_arch = "x86_64", not(miri)))]
    unsafe {
        std::arch::asm!(
            "mov [{0}], rbx",
            "mov [{0} + 8], rbp",
            "mov [{0} + 16], r12",
            "mov [{0} + 24], r13",
            "mov [{0} + 32], r14",
            "mov [{0} + 40], r15",
            in(reg) regs.as_mut_ptr(),
        );
    }
    #[cfg(all(target_arch = "x86_64", not(miri)))]
    std::hint::black_box(&regs);

    #[cfg(all(target_arch = "aarch64", not(miri)))]
    let mut regs = [0usize; 10];
    #[cfg(all(target_arch = "aarch64", not(miri)))]
    unsafe {
        std::arch::asm!(
            "stp x19, x20, [{0}]",
            "stp x21, x22, [{0}, #16]",
            "stp x23, x24, [{0}, #32]",
            "stp x25, x26, [{0}, #48]",
            "stp x27, x28, [{0}, #64]",
            in(reg) regs.as_mut_ptr(),
        );
    }
    #[cfg(all(target_arch = "aarch64", not(miri)))]
    std::hint::black_box(&regs);

    // Other architectures (or Miri): a dummy array plus black_box as a
    // best-effort spill.
    #[cfg(any(not(any(target_arch = "x86_64", target_arch = "aarch64")), miri))]
    {
        let regs = [0usize; 32];
        std::hint::black_box(&regs);
    }

    // The current stack pointer is approximately the address of a local.
    let sp = std::ptr::addr_of!(visit) as usize;
    scan_words(sp, stack_base, &mut visit);
}

/// Hands every pointer-aligned word in `[lo, hi)` to `visit`.
pub(crate) fn scan_words<F>(lo: usize, hi: usize, visit: &mut F)
where
    F: FnMut(usize),
{
    let word = std::mem::size_of::<usize>();
    let mut current = (lo + word - 1) & !(word - 1);
    while current + word <= hi {
        // SAFETY: the caller passes a readable range (the live portion of
        // a stopped thread's stack, or our own stack below `hi`).
        // Volatile keeps the read from being elided or reordered.
        let value = unsafe { std::ptr::read_volatile(current as *const usize) };
        visit(value);
        current += word;
    }
}

/// Clobbers callee-saved registers so stale pointer values left in them
/// are not treated as roots by a following collection.
///
/// Mainly useful in tests that assert reclamation: without it, a dead
/// object's address can survive in a callee-saved register after the
/// frame that produced it has returned.
#[doc(hidden)]
pub fn clear_registers() {
    #[cfg(all(target_arch = "x86_64", not(miri)))]
    unsafe {
        std::arch::asm!(
            "xor r12, r12",
            "xor r13, r13",
            "xor r14, r14",
            "xor r15, r15",
            out("r12") _,
            out("r13") _,
            out("r14") _,
            out("r15") _,
        );
    }
    #[cfg(all(target_arch = "aarch64", not(miri)))]
    unsafe {
        std::arch::asm!(
            "mov x19, xzr",
            "mov x20, xzr",
            "mov x21, xzr",
            "mov x22, xzr",
            "mov x23, xzr",
            "mov x24, xzr",
            "mov x25, xzr",
            "mov x26, xzr",
            "mov x27, xzr",
            "mov x28, xzr",
            out("x19") _,
            out("x20") _,
            out("x21") _,
            out("x22") _,
            out("x23") _,
            out("x24") _,
            out("x25") _,
            out("x26") _,
            out("x27") _,
            out("x28") _,
        );
    }
}
