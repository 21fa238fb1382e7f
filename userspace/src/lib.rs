#![no_std]
#![feature(naked_functions)]

//! Thin wrappers over the kernel's system-call table: each `kz_*` function
//! packs one [`abi::Request`] tag's arguments into [`abi::SyscallArgs`] and
//! crosses into the kernel with the architecture's own trap instruction,
//! the same shape as the reference crate's userspace wrappers around
//! `syscall()`/`ecall`/`svc`.
//!
//! `KZ_SYSCALL_TYPE_*` in the original C is this crate's [`abi::SyscallTag`];
//! `kz_recv`'s `&size`/`&p` output parameters are `RECV`'s `out` pointer.

#[cfg(feature = "cortex_m")]
mod cortex_m;
#[cfg(feature = "cortex_m")]
use cortex_m::raw_syscall;

#[cfg(feature = "rv64")]
mod rv64;
#[cfg(feature = "rv64")]
use rv64::raw_syscall;

pub use abi;

use core::mem::MaybeUninit;

use abi::{
    MailboxId, RecvOutcome, SyscallArgs, SyscallTag, ThreadEntry, ThreadId, VectorHandler,
    VectorType,
};

#[inline]
fn syscall(tag: SyscallTag, mut args: SyscallArgs) -> usize {
    unsafe { raw_syscall(tag as usize, &mut args) }
}

/// `kz_run`: spawns a new thread. `name` must outlive the spawned thread —
/// the kernel stores only the pointer and length across the trap, matching
/// the original's `strcpy`-free, pointer-sharing approach in a single
/// flat address space.
pub fn kz_run(
    entry: ThreadEntry,
    name: &'static str,
    priority: usize,
    stack_size: usize,
    argc: isize,
) -> Result<ThreadId, ()> {
    let result = syscall(
        SyscallTag::Run,
        SyscallArgs {
            arg1: entry as usize,
            arg2: name.as_ptr() as usize,
            arg3: name.len(),
            arg4: priority,
            arg5: stack_size,
            arg6: argc as usize,
        },
    );
    if result == usize::MAX {
        Err(())
    } else {
        Ok(ThreadId(result))
    }
}

/// `kz_exit`: terminates the calling thread. Never returns — once the
/// kernel zeroes this thread's TCB, the scheduler never dispatches it
/// again, so the trailing loop is unreachable in practice and exists only
/// to satisfy `-> !`.
pub fn kz_exit() -> ! {
    syscall(SyscallTag::Exit, SyscallArgs::default());
    loop {}
}

/// `kz_wait`: yields the CPU at the calling thread's own priority.
pub fn kz_wait() {
    syscall(SyscallTag::Wait, SyscallArgs::default());
}

/// `kz_sleep`: blocks until a matching `kz_wakeup`.
pub fn kz_sleep() {
    syscall(SyscallTag::Sleep, SyscallArgs::default());
}

pub fn kz_wakeup(target: ThreadId) {
    syscall(
        SyscallTag::Wakeup,
        SyscallArgs {
            arg1: target.0,
            ..Default::default()
        },
    );
}

pub fn kz_getid() -> ThreadId {
    ThreadId(syscall(SyscallTag::GetId, SyscallArgs::default()))
}

/// `kz_chpri`: sets the calling thread's priority, or only queries it when
/// `priority` is `None`. Returns the *previous* priority either way.
pub fn kz_chpri(priority: Option<usize>) -> usize {
    syscall(
        SyscallTag::ChangePriority,
        SyscallArgs {
            arg1: priority.unwrap_or(usize::MAX),
            ..Default::default()
        },
    )
}

pub fn kz_kmalloc(size: usize) -> Option<*mut u8> {
    let ptr = syscall(
        SyscallTag::KMalloc,
        SyscallArgs {
            arg1: size,
            ..Default::default()
        },
    ) as *mut u8;
    if ptr.is_null() {
        None
    } else {
        Some(ptr)
    }
}

pub fn kz_kmfree(ptr: *mut u8) {
    syscall(
        SyscallTag::KMFree,
        SyscallArgs {
            arg1: ptr as usize,
            ..Default::default()
        },
    );
}

pub fn kz_send(mailbox: MailboxId, size: usize, ptr: *mut u8) -> usize {
    syscall(
        SyscallTag::Send,
        SyscallArgs {
            arg1: mailbox.get(),
            arg2: size,
            arg3: ptr as usize,
            ..Default::default()
        },
    )
}

/// `kz_recv`: blocks until a message is available, then returns it.
///
/// Unlike the other wrappers this never inspects the scalar trap return —
/// by the time execution resumes past the trap instruction, the calling
/// thread has necessarily already been re-attached to a ready queue, which
/// only happens once `out` has been written through (either synchronously,
/// or later by whichever `kz_send` wakes this thread). `RecvOutcome::Blocked`
/// is therefore unreachable here; it exists only for the in-kernel
/// `Response::Recv` a direct (non-trapping) service caller observes.
pub fn kz_recv(mailbox: MailboxId) -> RecvOutcome {
    let mut out = MaybeUninit::<RecvOutcome>::uninit();
    syscall(
        SyscallTag::Recv,
        SyscallArgs {
            arg1: mailbox.get(),
            arg2: out.as_mut_ptr() as usize,
            ..Default::default()
        },
    );
    unsafe { out.assume_init() }
}

pub fn kz_setintr(vector: VectorType, handler: VectorHandler) {
    syscall(
        SyscallTag::SetIntr,
        SyscallArgs {
            arg1: vector.get(),
            arg2: handler as usize,
            ..Default::default()
        },
    );
}

/// No capability model and no kernel-side panic channel exist to report
/// through, unlike the reference crate's `panik` syscall — a user thread
/// that panics simply stops making progress. Its priority-queue slot is
/// never reclaimed; this is a known gap a future `kz_abort` syscall would
/// close.
#[cfg(target_os = "none")]
#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    loop {}
}
