#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![feature(asm_const)]
#![feature(strict_provenance)]
#![feature(naked_functions)]
#![allow(dead_code)]

//! A small preemptive, fixed-priority embedded kernel: a thread table,
//! per-priority ready queues, a trap-based system-call dispatcher,
//! blocking mailbox IPC, and a segregated free-list memory pool.
//!
//! The shape follows the reference kernel this grew out of (a `Kernel`
//! struct owning a `Scheduler`, an `arch` module providing the
//! context-switch primitive, `defmt` for diagnostics): a trapping thread's
//! request crosses into [`Kernel::syscall`], mutates ready queues or
//! mailboxes, and the scheduler picks the next thread to dispatch.

pub mod arch;
mod builder;
mod defmt_log;
mod mailbox;
mod mempool;
mod scheduler;
mod stack;
mod syscall;
pub mod tcb;

#[cfg(test)]
mod tests;

pub use abi;
pub use builder::{KernelBuilder, ThreadBuilder};
pub use scheduler::SystemDown;
pub use syscall::KernelError;
pub use tcb::Tcb;

use abi::SOFTVEC_TYPE_NUM;

use mailbox::Mailboxes;
use mempool::MemoryPool;
use scheduler::Scheduler;
use stack::StackArena;

/// Capacity of the kernel heap backing `KMALLOC`/`KMFREE` and mailbox
/// message buffers.
pub const HEAP_SIZE: usize = 8 * 1024;
/// Capacity of the shared user-thread stack arena, bumped forward by
/// `stack_size` bytes on every `RUN`.
pub const STACK_ARENA_SIZE: usize = 24 * 1024;

/// The kernel: thread table (via the [`Scheduler`]), mailboxes, memory
/// pool, stack arena, and the software-vector handler table `SETINTR`
/// installs into.
pub struct Kernel {
    scheduler: Scheduler,
    mailboxes: Mailboxes,
    pool: MemoryPool<HEAP_SIZE>,
    stacks: StackArena<STACK_ARENA_SIZE>,
    handlers: [Option<abi::VectorHandler>; SOFTVEC_TYPE_NUM],
}

impl Kernel {
    pub(crate) fn new() -> Self {
        Kernel {
            scheduler: Scheduler::new(),
            mailboxes: Mailboxes::new(),
            pool: MemoryPool::new(),
            stacks: StackArena::new(),
            handlers: [None; SOFTVEC_TYPE_NUM],
        }
    }

    /// The thread the scheduler last selected to run, if any.
    pub fn current_tcb(&self) -> Option<&Tcb> {
        self.scheduler.current_tcb()
    }

    pub fn current_tcb_mut(&mut self) -> Option<&mut Tcb> {
        self.scheduler.current_tcb_mut()
    }

    pub fn tcb(&self, id: abi::ThreadId) -> Option<&Tcb> {
        self.scheduler.tcb(id)
    }

    pub fn tcb_mut(&mut self, id: abi::ThreadId) -> Option<&mut Tcb> {
        self.scheduler.tcb_mut(id)
    }

    /// Picks the next thread to run: the head of the lowest populated
    /// priority queue. Called once after every interrupt, after the
    /// interrupt itself (syscall dispatch or a user vector handler) has
    /// run. Returns [`SystemDown`] if every ready queue is empty.
    pub fn schedule(&mut self) -> Result<(), SystemDown> {
        self.scheduler.schedule()
    }

    /// Routes a fired software vector to its handler: the two kernel-owned
    /// vectors (`SYSCALL`, `SOFTERR`) are handled elsewhere by the `arch`
    /// trap glue directly; anything else dispatches to whatever `SETINTR`
    /// installed, if anything.
    pub fn dispatch_vector(&mut self, vector: abi::VectorType) {
        if let Some(handler) = self.handlers[vector.get()] {
            handler();
        }
    }

    /// `SOFTERR`: the trap-fatal path for an illegal instruction or similar
    /// fault inside a thread. Logs the offending thread's name and
    /// reclaims its slot, exactly as the original's `softerr_intr` —
    /// `getcurrent()` is a no-op here since a running thread is never on a
    /// ready queue, so only the reclaim has an effect.
    pub fn softerr(&mut self) {
        if let Some(tcb) = self.scheduler.current_tcb() {
            defmt::warn!("{} DOWN.", tcb.name());
        }
        self.scheduler.detach_current();
        if let Some(id) = self.scheduler.current() {
            if let Some(tcb) = self.scheduler.tcb_mut(id) {
                tcb.zero();
            }
        }
    }
}
