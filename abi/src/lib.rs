#![no_std]

//! Types shared between the kernel and user threads: thread/mailbox/vector
//! identifiers, the fixed table capacities, and the tagged request/response
//! union that crosses the system-call boundary.

use core::ops::Deref;
use defmt::Format;

/// Capacity of the thread table. The reference C kernel calls this `THREAD_NUM`.
pub const THREAD_NUM: usize = 6;
/// Number of priority levels; 0 is highest (and interrupt-disabled).
pub const PRIORITY_NUM: usize = 16;
/// Visible characters in a thread name, not counting the terminator.
pub const THREAD_NAME_SIZE: usize = 15;
/// Number of mailboxes.
pub const MSGBOX_ID_NUM: usize = 2;
/// Number of software-vector slots (2 kernel-owned + device vectors).
pub const SOFTVEC_TYPE_NUM: usize = 8;

/// A reference to a thread's slot in the kernel's thread table.
///
/// Stable across the thread's lifetime; reused once the slot is freed by
/// `EXIT`, just as the original's TCB pointer is reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Format)]
#[repr(C)]
pub struct ThreadId(pub usize);

impl Deref for ThreadId {
    type Target = usize;

    fn deref(&self) -> &usize {
        &self.0
    }
}

/// A mailbox identifier, bounds-checked against [`MSGBOX_ID_NUM`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Format)]
#[repr(C)]
pub struct MailboxId(usize);

impl MailboxId {
    pub const fn new(id: usize) -> Option<Self> {
        if id < MSGBOX_ID_NUM {
            Some(MailboxId(id))
        } else {
            None
        }
    }

    pub const fn get(self) -> usize {
        self.0
    }
}

/// A software-vector type, bounds-checked against [`SOFTVEC_TYPE_NUM`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Format)]
#[repr(C)]
pub struct VectorType(usize);

impl VectorType {
    /// Owned by the kernel: routes to the system-call dispatcher.
    pub const SYSCALL: VectorType = VectorType(0);
    /// Owned by the kernel: routes to the softerr (thread-fatal) handler.
    pub const SOFTERR: VectorType = VectorType(1);

    pub const fn new(id: usize) -> Option<Self> {
        if id < SOFTVEC_TYPE_NUM {
            Some(VectorType(id))
        } else {
            None
        }
    }

    pub const fn get(self) -> usize {
        self.0
    }
}

/// The entry point of a thread: `fn(argc, argv) -> !` is never reached in
/// practice (threads fall off the end into `thread_end`/`EXIT`), so the
/// signature is a plain function pointer rather than `-> !`.
pub type ThreadEntry = fn(isize, *const *const u8);

/// A user-registered interrupt handler, installed by `SETINTR`.
pub type VectorHandler = fn();

/// The tag half of the tagged request union, used by the raw trap-argument
/// marshaling in the `arch` backends before a [`Request`] is reconstructed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Format)]
#[repr(u8)]
pub enum SyscallTag {
    Run = 0,
    Exit = 1,
    Wait = 2,
    Sleep = 3,
    Wakeup = 4,
    GetId = 5,
    ChangePriority = 6,
    KMalloc = 7,
    KMFree = 8,
    Send = 9,
    Recv = 10,
    SetIntr = 11,
}

/// One variant per system-call tag, carrying that call's inputs.
///
/// This is the strongly typed reimplementation of the original's
/// `kz_syscall_param_t` union: the dispatcher matches on the variant instead
/// of switching on a tag and reading the matching union arm.
#[derive(Debug)]
pub enum Request {
    Run {
        entry: ThreadEntry,
        name: &'static str,
        priority: usize,
        stack_size: usize,
        argc: isize,
        argv: *const *const u8,
    },
    Exit,
    Wait,
    Sleep,
    Wakeup {
        target: ThreadId,
    },
    GetId,
    ChangePriority {
        priority: Option<usize>,
    },
    KMalloc {
        size: usize,
    },
    KMFree {
        ptr: *mut u8,
    },
    Send {
        mailbox: MailboxId,
        size: usize,
        ptr: *mut u8,
    },
    Recv {
        mailbox: MailboxId,
        /// Caller-owned output slot, written directly by the kernel: once
        /// on a synchronous delivery, or later — when the caller has long
        /// since returned from its trap on the blocked path — by the
        /// matching `SEND`. Sound only because kernel and user threads
        /// share one flat address space; the original passes `&size`/`&p`
        /// the same way. Null is accepted (no output is written) for
        /// callers that only want the synchronous half of the outcome via
        /// [`Response::Recv`].
        out: *mut RecvOutcome,
    },
    SetIntr {
        vector: VectorType,
        handler: VectorHandler,
    },
}

/// The outcome of a `RECV`: either a message was delivered synchronously, or
/// the caller was parked as the mailbox's receiver.
///
/// The original writes a `-1` sentinel into the result slot on the blocked
/// path; since that slot is overwritten by the matching `SEND` before the
/// thread next observes it, the sentinel is never actually visible. Here it
/// is simply unrepresentable: `Blocked` carries no fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvOutcome {
    Delivered {
        /// `None` when the message was sent from a service call rather than
        /// a thread (the original's `thp` may be `NULL` at `sendmsg` time).
        sender: Option<ThreadId>,
        size: usize,
        ptr: *mut u8,
    },
    Blocked,
}

/// One variant per system-call tag, carrying that call's result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response {
    Run(Result<ThreadId, ()>),
    Exit,
    Wait,
    Sleep,
    Wakeup,
    GetId(ThreadId),
    ChangePriority(usize),
    KMalloc(Option<*mut u8>),
    KMFree,
    Send(usize),
    Recv(RecvOutcome),
    SetIntr,
}

/// Raw, register-width syscall arguments as seen across a real trap boundary.
/// Used only by the `arch` backends that actually trap; the `dummy`/test
/// backend calls the kernel with a [`Request`] directly.
#[derive(Default, Clone, Copy)]
#[repr(C)]
pub struct SyscallArgs {
    pub arg1: usize,
    pub arg2: usize,
    pub arg3: usize,
    pub arg4: usize,
    pub arg5: usize,
    pub arg6: usize,
}
