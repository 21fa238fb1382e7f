//! Thread Control Block storage.
//!
//! Grounded on the reference kernel's `TCB`/`Tcb` (`kernel/src/lib.rs`,
//! `kernel/src/tcb.rs`), simplified to this kernel's flat, unprotected
//! address space: there is no per-task region table to validate pointers
//! against, so the TCB carries only what the original C `kz_thread` carries.

use abi::{RecvOutcome, ThreadEntry, ThreadId, THREAD_NAME_SIZE, THREAD_NUM};
use enumflags2::{bitflags, BitFlags};
use heapless::String;

#[bitflags]
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TcbFlag {
    /// Set iff this TCB is reachable from its priority's ready-queue head.
    Ready,
}

/// The startup triple captured at `RUN` time.
#[derive(Clone, Copy)]
pub(crate) struct ThreadInit {
    pub entry: ThreadEntry,
    pub argc: isize,
    pub argv: *const *const u8,
}

/// A thread's record in the fixed-capacity thread table.
///
/// A slot is free iff `init` is `None` — the direct analogue of the
/// original's `!thp->init.func` check.
pub struct Tcb {
    pub(crate) name: String<THREAD_NAME_SIZE>,
    pub(crate) priority: usize,
    pub(crate) stack_base: usize,
    pub(crate) stack_size: usize,
    /// The thread's saved stack-pointer snapshot, valid exactly when the
    /// thread is not currently executing. Written by interrupt entry,
    /// read by dispatch.
    pub(crate) saved_sp: usize,
    pub(crate) flags: BitFlags<TcbFlag>,
    pub(crate) init: Option<ThreadInit>,
    /// Ready-queue intrusive link. A plain index rather than a pointer: the
    /// thread table is a fixed array that never reallocates, so an index is
    /// just as stable and needs no `unsafe`.
    pub(crate) next: Option<ThreadId>,
    /// Set by a matching `SEND` once this thread is parked as a mailbox's
    /// receiver and a message arrives after it resumes. Read back by the
    /// request API once the thread is dispatched again.
    pub(crate) recv_result: Option<RecvOutcome>,
    /// The caller-supplied output slot from a blocked `RECV`, if any.
    /// Written through directly by the matching `SEND`, then cleared.
    pub(crate) pending_out: Option<*mut RecvOutcome>,
    /// Architecture-specific register scratch beyond the bare stack
    /// pointer. Opaque to everything in this module; only the matching
    /// `arch` backend reads or writes it, and keeps it consistent with
    /// `saved_sp`.
    pub(crate) saved_state: crate::arch::SavedThreadState,
}

impl Default for Tcb {
    fn default() -> Self {
        Tcb {
            name: String::new(),
            priority: 0,
            stack_base: 0,
            stack_size: 0,
            saved_sp: 0,
            flags: BitFlags::empty(),
            init: None,
            next: None,
            recv_result: None,
            pending_out: None,
            saved_state: Default::default(),
        }
    }
}

impl Tcb {
    pub fn is_free(&self) -> bool {
        self.init.is_none()
    }

    pub fn is_ready(&self) -> bool {
        self.flags.contains(TcbFlag::Ready)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn priority(&self) -> usize {
        self.priority
    }

    pub fn saved_sp(&self) -> usize {
        self.saved_sp
    }

    pub fn saved_state(&self) -> &crate::arch::SavedThreadState {
        &self.saved_state
    }

    pub fn saved_state_mut(&mut self) -> &mut crate::arch::SavedThreadState {
        &mut self.saved_state
    }

    pub(crate) fn zero(&mut self) {
        *self = Tcb::default();
    }
}

/// Fixed-capacity thread table; `THREAD_NUM` slots, scanned low-to-high for
/// a free one on `RUN`, exactly as the original's `for (i = 0; i <
/// THREAD_NUM; i++)` loop.
pub(crate) struct ThreadTable {
    slots: [Tcb; THREAD_NUM],
}

impl ThreadTable {
    pub(crate) fn new() -> Self {
        ThreadTable {
            slots: core::array::from_fn(|_| Tcb::default()),
        }
    }

    pub(crate) fn alloc(&mut self) -> Option<ThreadId> {
        self.slots.iter().position(Tcb::is_free).map(ThreadId)
    }

    pub(crate) fn get(&self, id: ThreadId) -> Option<&Tcb> {
        self.slots.get(id.0)
    }

    pub(crate) fn get_mut(&mut self, id: ThreadId) -> Option<&mut Tcb> {
        self.slots.get_mut(id.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_init() -> ThreadInit {
        ThreadInit {
            entry: |_, _| {},
            argc: 0,
            argv: core::ptr::null(),
        }
    }

    #[test]
    fn slot_free_until_init_set() {
        let mut table = ThreadTable::new();
        let id = table.alloc().expect("table should start empty");
        assert_eq!(id, ThreadId(0));
        table.get_mut(id).unwrap().init = Some(dummy_init());
        assert!(!table.get(id).unwrap().is_free());
    }

    #[test]
    fn alloc_fills_table_then_fails() {
        let mut table = ThreadTable::new();
        for i in 0..THREAD_NUM {
            let id = table.alloc().expect("slot should be available");
            assert_eq!(id, ThreadId(i));
            table.get_mut(id).unwrap().init = Some(dummy_init());
        }
        assert!(table.alloc().is_none());
    }

    #[test]
    fn zeroing_a_slot_frees_it_for_reuse() {
        let mut table = ThreadTable::new();
        let id = table.alloc().unwrap();
        table.get_mut(id).unwrap().init = Some(dummy_init());
        assert!(table.alloc().is_some() || THREAD_NUM == 1);
        table.get_mut(id).unwrap().zero();
        assert!(table.get(id).unwrap().is_free());
    }
}
