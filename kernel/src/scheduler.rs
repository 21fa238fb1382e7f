//! Ready queues and the scheduling primitives built on top of the thread
//! table.
//!
//! Grounded on the reference kernel's `Scheduler` (`kernel/src/lib.rs`):
//! one FIFO per priority level, `next_thread`/`switch_thread` picking the
//! head of the lowest populated priority. The reference uses `cordyceps`
//! intrusive lists over boxed nodes; here the list is simpler and needs no
//! allocation, since the thread table itself is the fixed, address-stable
//! backing store the nodes live in.

use abi::{ThreadId, PRIORITY_NUM};

use crate::tcb::{Tcb, TcbFlag, ThreadTable};

/// Returned by [`Scheduler::schedule`] when every ready queue is empty: the
/// kernel-fatal condition the original reports as `"system error!"` and
/// halts on. The caller (ultimately the arch boot/trap glue) decides how to
/// halt; the kernel core itself never loops forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SystemDown;

#[derive(Default, Clone, Copy)]
struct ReadyQueue {
    head: Option<ThreadId>,
    tail: Option<ThreadId>,
}

pub(crate) struct Scheduler {
    threads: ThreadTable,
    ready: [ReadyQueue; PRIORITY_NUM],
    /// `pub(crate)` so `arch` trap glue and tests can set it directly when
    /// simulating a trap taken from a particular thread; everything else
    /// should go through the methods below.
    pub(crate) current: Option<ThreadId>,
}

impl Scheduler {
    pub(crate) fn new() -> Self {
        Scheduler {
            threads: ThreadTable::new(),
            ready: [ReadyQueue::default(); PRIORITY_NUM],
            current: None,
        }
    }

    pub(crate) fn current(&self) -> Option<ThreadId> {
        self.current
    }

    pub(crate) fn tcb(&self, id: ThreadId) -> Option<&Tcb> {
        self.threads.get(id)
    }

    pub(crate) fn tcb_mut(&mut self, id: ThreadId) -> Option<&mut Tcb> {
        self.threads.get_mut(id)
    }

    pub(crate) fn current_tcb(&self) -> Option<&Tcb> {
        self.current.and_then(|id| self.threads.get(id))
    }

    pub(crate) fn current_tcb_mut(&mut self) -> Option<&mut Tcb> {
        let id = self.current?;
        self.threads.get_mut(id)
    }

    pub(crate) fn alloc_thread(&mut self) -> Option<ThreadId> {
        self.threads.alloc()
    }

    /// Appends `id` to the tail of its priority's ready queue. A no-op if
    /// the thread is already on a ready queue, matching the original
    /// `putcurrent`'s `if (current->flags.part.ready) return 1;` guard.
    pub(crate) fn attach(&mut self, id: ThreadId) {
        let Some(tcb) = self.threads.get(id) else { return };
        if tcb.is_ready() {
            return;
        }
        let priority = tcb.priority;
        let queue = &mut self.ready[priority];
        match queue.tail {
            Some(tail) => {
                self.threads.get_mut(tail).unwrap().next = Some(id);
            }
            None => {
                queue.head = Some(id);
            }
        }
        queue.tail = Some(id);
        let tcb = self.threads.get_mut(id).unwrap();
        tcb.next = None;
        tcb.flags.insert(TcbFlag::Ready);
    }

    /// Convenience over [`Scheduler::attach`] for the current thread; a
    /// no-op when there is no current thread (the service-call path, where
    /// `current` was never set).
    pub(crate) fn attach_current(&mut self) {
        if let Some(id) = self.current {
            self.attach(id);
        }
    }

    /// Removes the current thread from the head of its ready queue. A
    /// no-op if the current thread isn't on a ready queue (the normal case:
    /// a running thread is never enqueued) or if there is no current
    /// thread, matching the original `getcurrent`'s early-return guards.
    pub(crate) fn detach_current(&mut self) {
        let Some(id) = self.current else { return };
        let Some(tcb) = self.threads.get(id) else { return };
        if !tcb.is_ready() {
            return;
        }
        let priority = tcb.priority;
        let next = tcb.next;
        let queue = &mut self.ready[priority];
        debug_assert_eq!(
            queue.head,
            Some(id),
            "current thread must be its ready queue's head"
        );
        queue.head = next;
        if queue.head.is_none() {
            queue.tail = None;
        }
        let tcb = self.threads.get_mut(id).unwrap();
        tcb.flags.remove(TcbFlag::Ready);
        tcb.next = None;
    }

    /// Clears `current` ahead of dispatching a service call, which has no
    /// calling thread (the original's `srvcall_proc` sets `current = NULL`
    /// directly, skipping `getcurrent`).
    pub(crate) fn clear_current_for_service_call(&mut self) {
        self.current = None;
    }

    /// Picks the next thread to run: the head of the lowest populated
    /// priority queue. Returns [`SystemDown`] if every queue is empty.
    pub(crate) fn schedule(&mut self) -> Result<(), SystemDown> {
        for queue in &self.ready {
            if let Some(head) = queue.head {
                self.current = Some(head);
                return Ok(());
            }
        }
        Err(SystemDown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tcb::ThreadInit;

    fn spawn(sched: &mut Scheduler, priority: usize) -> ThreadId {
        let id = sched.alloc_thread().unwrap();
        let tcb = sched.tcb_mut(id).unwrap();
        tcb.priority = priority;
        tcb.init = Some(ThreadInit {
            entry: |_, _| {},
            argc: 0,
            argv: core::ptr::null(),
        });
        id
    }

    #[test]
    fn schedule_picks_lowest_populated_priority() {
        let mut sched = Scheduler::new();
        let low = spawn(&mut sched, 5);
        let high = spawn(&mut sched, 1);
        sched.attach(low);
        sched.attach(high);
        sched.schedule().unwrap();
        assert_eq!(sched.current(), Some(high));
    }

    #[test]
    fn fifo_within_a_priority() {
        let mut sched = Scheduler::new();
        let a = spawn(&mut sched, 3);
        let b = spawn(&mut sched, 3);
        sched.attach(a);
        sched.attach(b);
        sched.schedule().unwrap();
        assert_eq!(sched.current(), Some(a));
        sched.detach_current();
        sched.attach(a);
        sched.schedule().unwrap();
        assert_eq!(sched.current(), Some(b));
    }

    #[test]
    fn empty_queues_is_system_down() {
        let mut sched = Scheduler::new();
        assert_eq!(sched.schedule(), Err(SystemDown));
    }

    #[test]
    fn attach_is_idempotent() {
        let mut sched = Scheduler::new();
        let a = spawn(&mut sched, 2);
        sched.attach(a);
        sched.attach(a);
        sched.schedule().unwrap();
        sched.detach_current();
        assert_eq!(sched.schedule(), Err(SystemDown));
    }
}
