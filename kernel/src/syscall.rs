//! The system-call dispatcher: one handler per [`Request`] variant,
//! matching the table in the reference kernel's `kozos.c`
//! (`call_functions`/`syscall_proc`/`srvcall_proc`).
//!
//! Two entry points mirror the original's two call paths:
//! [`Kernel::syscall`] is issued by a trapping thread (`getcurrent()` first,
//! detaching it from its ready queue); [`Kernel::service_call`] is issued
//! by the kernel itself — typically a device interrupt handler calling
//! `SEND` to wake a waiting thread — and has no calling thread to detach
//! (`current` is simply cleared, as `srvcall_proc` does).

use abi::{
    MailboxId, RecvOutcome, Request, Response, SyscallArgs, SyscallTag, ThreadId, VectorType,
};

use crate::scheduler::SystemDown;
use crate::tcb::ThreadInit;
use crate::Kernel;

/// Failure modes distinct from an ordinary [`Response`]: either the kernel
/// has hit an unrecoverable condition ([`SystemDown`]), or the caller
/// passed an id that doesn't name a live thread. The latter can't arise
/// from a well-formed [`Request`] built by this crate's own userspace
/// wrappers, but a malformed trap frame decoded by an `arch` backend can
/// still produce one, so the dispatcher reports it instead of panicking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    SystemDown,
    InvalidThreadId,
}

impl From<SystemDown> for KernelError {
    fn from(_: SystemDown) -> Self {
        KernelError::SystemDown
    }
}

impl Kernel {
    /// Dispatches a request issued by the current thread via a software
    /// trap. Detaches the caller from its ready queue first (`getcurrent`),
    /// exactly as the original's `syscall_proc`.
    pub fn syscall(&mut self, request: Request) -> Result<Response, KernelError> {
        self.scheduler.detach_current();
        self.dispatch(request)
    }

    /// Dispatches a request issued from kernel/interrupt context rather
    /// than by a trapping thread. There is no caller to detach; `current`
    /// is simply cleared, matching `srvcall_proc`.
    pub fn service_call(&mut self, request: Request) -> Result<Response, KernelError> {
        self.scheduler.clear_current_for_service_call();
        self.dispatch(request)
    }

    fn dispatch(&mut self, request: Request) -> Result<Response, KernelError> {
        match request {
            Request::Run {
                entry,
                name,
                priority,
                stack_size,
                argc,
                argv,
            } => self.thread_run(entry, name, priority, stack_size, argc, argv),
            Request::Exit => self.thread_exit(),
            Request::Wait => self.thread_wait(),
            Request::Sleep => self.thread_sleep(),
            Request::Wakeup { target } => self.thread_wakeup(target),
            Request::GetId => self.thread_getid(),
            Request::ChangePriority { priority } => self.thread_chpri(priority),
            Request::KMalloc { size } => self.thread_kmalloc(size),
            Request::KMFree { ptr } => self.thread_kmfree(ptr),
            Request::Send { mailbox, size, ptr } => self.thread_send(mailbox, size, ptr),
            Request::Recv { mailbox, out } => self.thread_recv(mailbox, out),
            Request::SetIntr { vector, handler } => self.thread_setintr(vector, handler),
        }
    }

    fn thread_run(
        &mut self,
        entry: abi::ThreadEntry,
        name: &'static str,
        priority: usize,
        stack_size: usize,
        argc: isize,
        argv: *const *const u8,
    ) -> Result<Response, KernelError> {
        self.scheduler.attach_current();

        let Some(id) = self.scheduler.alloc_thread() else {
            return Ok(Response::Run(Err(())));
        };
        let Some(stack_base) = self.stacks.alloc(stack_size) else {
            return Ok(Response::Run(Err(())));
        };

        let tcb = self.scheduler.tcb_mut(id).expect("just allocated");
        tcb.zero();
        tcb.name = heapless::String::try_from(name).unwrap_or_default();
        tcb.priority = priority;
        tcb.stack_base = stack_base;
        tcb.stack_size = stack_size;
        tcb.init = Some(ThreadInit { entry, argc, argv });
        crate::arch::init_tcb_stack(tcb);

        self.scheduler.attach(id);
        Ok(Response::Run(Ok(id)))
    }

    /// `EXIT`: zeroes the current thread's TCB, reclaiming its slot but not
    /// its stack. The slot is left off every ready queue and `current`
    /// still names it until the next `schedule()` overwrites it — harmless,
    /// since nothing reads a zeroed TCB's fields before that happens.
    fn thread_exit(&mut self) -> Result<Response, KernelError> {
        if let Some(id) = self.scheduler.current() {
            if let Some(tcb) = self.scheduler.tcb_mut(id) {
                tcb.zero();
            }
        }
        Ok(Response::Exit)
    }

    /// `WAIT`: a yield. Re-attaches the caller at the tail of its priority
    /// queue and returns it to ready immediately.
    fn thread_wait(&mut self) -> Result<Response, KernelError> {
        self.scheduler.attach_current();
        Ok(Response::Wait)
    }

    /// `SLEEP`: leaves the caller detached without re-attaching it. Only a
    /// matching `WAKEUP` returns it to ready.
    fn thread_sleep(&mut self) -> Result<Response, KernelError> {
        Ok(Response::Sleep)
    }

    fn thread_wakeup(&mut self, target: ThreadId) -> Result<Response, KernelError> {
        self.scheduler.attach_current();
        if self.scheduler.tcb(target).is_none() {
            return Err(KernelError::InvalidThreadId);
        }
        self.scheduler.attach(target);
        Ok(Response::Wakeup)
    }

    fn thread_getid(&mut self) -> Result<Response, KernelError> {
        self.scheduler.attach_current();
        let id = self.scheduler.current().ok_or(KernelError::InvalidThreadId)?;
        Ok(Response::GetId(id))
    }

    /// `CHPRI`: returns the thread's *previous* priority, not the new one —
    /// the original's `thread_chpri` does likewise, letting a caller save
    /// and later restore its own priority.
    fn thread_chpri(&mut self, priority: Option<usize>) -> Result<Response, KernelError> {
        let id = self.scheduler.current().ok_or(KernelError::InvalidThreadId)?;
        let tcb = self.scheduler.tcb_mut(id).ok_or(KernelError::InvalidThreadId)?;
        let old_priority = tcb.priority;
        if let Some(priority) = priority {
            tcb.priority = priority;
        }
        self.scheduler.attach_current();
        Ok(Response::ChangePriority(old_priority))
    }

    fn thread_kmalloc(&mut self, size: usize) -> Result<Response, KernelError> {
        self.scheduler.attach_current();
        Ok(Response::KMalloc(self.pool.alloc(size).map(|p| p.as_ptr())))
    }

    fn thread_kmfree(&mut self, ptr: *mut u8) -> Result<Response, KernelError> {
        self.scheduler.attach_current();
        if let Some(ptr) = core::ptr::NonNull::new(ptr) {
            unsafe { self.pool.dealloc(ptr) };
        }
        Ok(Response::KMFree)
    }

    fn thread_send(
        &mut self,
        mailbox: MailboxId,
        size: usize,
        ptr: *mut u8,
    ) -> Result<Response, KernelError> {
        let sender = self.scheduler.current();
        self.scheduler.attach_current();
        let woken = self
            .mailboxes
            .send(&mut self.pool, mailbox, sender, size, ptr)?;
        if let Some((receiver, outcome)) = woken {
            if let Some(tcb) = self.scheduler.tcb_mut(receiver) {
                tcb.recv_result = Some(outcome);
                if let Some(out) = tcb.pending_out.take() {
                    // Sound because the receiver's trap frame (and the
                    // stack slot `out` points into) outlives it being
                    // merely descheduled — it is never freed while blocked.
                    unsafe { out.write(outcome) };
                }
            }
            self.scheduler.attach(receiver);
        }
        Ok(Response::Send(size))
    }

    /// `RECV`: on a queued message, delivers immediately (writing through
    /// `out` if the caller gave one) and re-attaches the caller. Otherwise
    /// leaves the caller detached and remembers `out` on its TCB — blocked
    /// until a matching `SEND` writes the delivered message through it and
    /// re-attaches the thread.
    fn thread_recv(
        &mut self,
        mailbox: MailboxId,
        out: *mut RecvOutcome,
    ) -> Result<Response, KernelError> {
        let caller = self.scheduler.current().ok_or(KernelError::InvalidThreadId)?;
        let outcome = self.mailboxes.recv(&mut self.pool, mailbox, caller)?;
        match outcome {
            RecvOutcome::Delivered { .. } => {
                if !out.is_null() {
                    unsafe { out.write(outcome) };
                }
                self.scheduler.attach_current();
            }
            RecvOutcome::Blocked => {
                if !out.is_null() {
                    let tcb = self.scheduler.tcb_mut(caller).expect("caller TCB must exist");
                    tcb.pending_out = Some(out);
                }
            }
        }
        Ok(Response::Recv(outcome))
    }

    fn thread_setintr(
        &mut self,
        vector: VectorType,
        handler: abi::VectorHandler,
    ) -> Result<Response, KernelError> {
        self.scheduler.attach_current();
        self.handlers[vector.get()] = Some(handler);
        Ok(Response::SetIntr)
    }
}

/// Reconstructs a [`Request`] from a trap frame's raw tag and argument
/// registers. Used only by `arch` backends that actually trap; the `RUN`
/// variant's `name`/`entry`/`argv` are passed as raw addresses cast back to
/// their typed form, which is sound only because userspace and kernel
/// share the same flat address space and ABI layout.
pub(crate) fn decode_request(tag: SyscallTag, args: SyscallArgs) -> Request {
    match tag {
        SyscallTag::Run => Request::Run {
            entry: unsafe { core::mem::transmute::<usize, abi::ThreadEntry>(args.arg1) },
            name: unsafe {
                let ptr = args.arg2 as *const u8;
                let len = args.arg3;
                core::str::from_utf8_unchecked(core::slice::from_raw_parts(ptr, len))
            },
            priority: args.arg4,
            stack_size: args.arg5,
            argc: args.arg6 as isize,
            argv: core::ptr::null(),
        },
        SyscallTag::Exit => Request::Exit,
        SyscallTag::Wait => Request::Wait,
        SyscallTag::Sleep => Request::Sleep,
        SyscallTag::Wakeup => Request::Wakeup {
            target: ThreadId(args.arg1),
        },
        SyscallTag::GetId => Request::GetId,
        SyscallTag::ChangePriority => Request::ChangePriority {
            priority: if args.arg1 == usize::MAX {
                None
            } else {
                Some(args.arg1)
            },
        },
        SyscallTag::KMalloc => Request::KMalloc { size: args.arg1 },
        SyscallTag::KMFree => Request::KMFree {
            ptr: args.arg1 as *mut u8,
        },
        SyscallTag::Send => Request::Send {
            mailbox: MailboxId::new(args.arg1).unwrap_or(MailboxId::new(0).unwrap()),
            size: args.arg2,
            ptr: args.arg3 as *mut u8,
        },
        SyscallTag::Recv => Request::Recv {
            mailbox: MailboxId::new(args.arg1).unwrap_or(MailboxId::new(0).unwrap()),
            out: args.arg2 as *mut RecvOutcome,
        },
        SyscallTag::SetIntr => Request::SetIntr {
            vector: VectorType::new(args.arg1).unwrap_or(VectorType::SYSCALL),
            handler: unsafe { core::mem::transmute::<usize, abi::VectorHandler>(args.arg2) },
        },
    }
}

/// Packs a [`Response`] down to the single scalar a real trap return path
/// hands back in its return register. Good enough for the variants that
/// carry at most one pointer-or-count; richer results (`RECV`'s sender and
/// size) are meant to be read back out of the TCB's `recv_result`, not
/// squeezed through a register.
pub(crate) fn encode_response(response: &Response) -> usize {
    match response {
        Response::Run(Ok(id)) => id.0,
        Response::Run(Err(())) => usize::MAX,
        Response::Exit | Response::Wait | Response::Sleep | Response::Wakeup => 0,
        Response::GetId(id) => id.0,
        Response::ChangePriority(priority) => *priority,
        Response::KMalloc(Some(ptr)) => *ptr as usize,
        Response::KMalloc(None) => 0,
        Response::KMFree | Response::SetIntr => 0,
        Response::Send(size) => *size,
        Response::Recv(RecvOutcome::Delivered { size, .. }) => *size,
        Response::Recv(RecvOutcome::Blocked) => usize::MAX,
    }
}
