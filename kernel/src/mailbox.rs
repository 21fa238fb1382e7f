//! Mailbox message queues.
//!
//! Grounded on the original `kz_msgbox`/`kz_msgbuf`/`sendmsg`/`recvmsg`
//! (`original_source/src/12/os/kozos.c`). Message buffers are allocated out
//! of the kernel's [`MemoryPool`](crate::mempool::MemoryPool) and chained
//! with a raw intrusive `next` pointer exactly as the original's
//! `mp->next`: unlike the thread table, the set of outstanding messages is
//! unbounded over a mailbox's lifetime, so there is no fixed array to index
//! into instead.

use core::mem;
use core::ptr::NonNull;

use abi::{MailboxId, RecvOutcome, ThreadId, MSGBOX_ID_NUM};

use crate::mempool::MemoryPool;
use crate::scheduler::SystemDown;

struct MsgBuf {
    next: Option<NonNull<MsgBuf>>,
    sender: Option<ThreadId>,
    size: usize,
    ptr: *mut u8,
}

#[derive(Default)]
pub(crate) struct Mailbox {
    head: Option<NonNull<MsgBuf>>,
    tail: Option<NonNull<MsgBuf>>,
    /// The thread parked waiting on this mailbox, if any. At most one
    /// receiver at a time; a second concurrent `RECV` is a kernel-fatal
    /// condition (see `thread_recv`).
    receiver: Option<ThreadId>,
}

impl Mailbox {
    fn enqueue<const HEAP: usize>(
        &mut self,
        pool: &mut MemoryPool<HEAP>,
        sender: Option<ThreadId>,
        size: usize,
        ptr: *mut u8,
    ) -> Result<(), SystemDown> {
        let raw = pool.alloc(mem::size_of::<MsgBuf>()).ok_or(SystemDown)?;
        let node = raw.cast::<MsgBuf>();
        unsafe {
            node.as_ptr().write(MsgBuf {
                next: None,
                sender,
                size,
                ptr,
            });
        }
        match self.tail {
            Some(tail) => unsafe { (*tail.as_ptr()).next = Some(node) },
            None => self.head = Some(node),
        }
        self.tail = Some(node);
        Ok(())
    }

    fn dequeue<const HEAP: usize>(
        &mut self,
        pool: &mut MemoryPool<HEAP>,
    ) -> Option<(Option<ThreadId>, usize, *mut u8)> {
        let head = self.head?;
        let msg = unsafe { head.as_ptr().read() };
        self.head = msg.next;
        if self.head.is_none() {
            self.tail = None;
        }
        unsafe { pool.dealloc(head.cast()) };
        Some((msg.sender, msg.size, msg.ptr))
    }
}

pub(crate) struct Mailboxes {
    boxes: [Mailbox; MSGBOX_ID_NUM],
}

impl Mailboxes {
    pub(crate) fn new() -> Self {
        Mailboxes {
            boxes: core::array::from_fn(|_| Mailbox::default()),
        }
    }

    fn get_mut(&mut self, id: MailboxId) -> &mut Mailbox {
        &mut self.boxes[id.get()]
    }

    /// `SEND`: enqueues the message, then immediately hands it to a parked
    /// receiver if one is waiting. Returns the delivered outcome for that
    /// receiver (`None` if nobody was waiting) so the caller can stash it
    /// on the receiver's TCB and re-attach it.
    pub(crate) fn send<const HEAP: usize>(
        &mut self,
        pool: &mut MemoryPool<HEAP>,
        mailbox: MailboxId,
        sender: Option<ThreadId>,
        size: usize,
        ptr: *mut u8,
    ) -> Result<Option<(ThreadId, RecvOutcome)>, SystemDown> {
        let mbox = self.get_mut(mailbox);
        mbox.enqueue(pool, sender, size, ptr)?;
        let Some(receiver) = mbox.receiver else {
            return Ok(None);
        };
        let (sender, size, ptr) = mbox.dequeue(pool).expect("just enqueued");
        mbox.receiver = None;
        Ok(Some((receiver, RecvOutcome::Delivered { sender, size, ptr })))
    }

    /// `RECV`: delivers immediately if a message is already queued,
    /// otherwise parks the caller as the mailbox's receiver. Returns
    /// [`SystemDown`] if another thread is already parked on this mailbox —
    /// the protocol supports only one receiver at a time.
    pub(crate) fn recv<const HEAP: usize>(
        &mut self,
        pool: &mut MemoryPool<HEAP>,
        mailbox: MailboxId,
        caller: ThreadId,
    ) -> Result<RecvOutcome, SystemDown> {
        let mbox = self.get_mut(mailbox);
        if mbox.receiver.is_some() {
            defmt::error!("duplicate mailbox receiver");
            return Err(SystemDown);
        }
        mbox.receiver = Some(caller);
        if let Some((sender, size, ptr)) = mbox.dequeue(pool) {
            mbox.receiver = None;
            Ok(RecvOutcome::Delivered { sender, size, ptr })
        } else {
            Ok(RecvOutcome::Blocked)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_before_recv_queues_then_delivers() {
        let mut pool: MemoryPool<4096> = MemoryPool::new();
        let mut boxes = Mailboxes::new();
        let mbx = MailboxId::new(0).unwrap();
        let payload = 0x1234usize as *mut u8;

        let delivered = boxes
            .send(&mut pool, mbx, Some(ThreadId(1)), 4, payload)
            .unwrap();
        assert!(delivered.is_none(), "no receiver parked yet");

        let caller = ThreadId(2);
        let outcome = boxes.recv(&mut pool, mbx, caller).unwrap();
        match outcome {
            RecvOutcome::Delivered { sender, size, ptr } => {
                assert_eq!(sender, Some(ThreadId(1)));
                assert_eq!(size, 4);
                assert_eq!(ptr, payload);
            }
            RecvOutcome::Blocked => panic!("message was already queued"),
        }
    }

    #[test]
    fn recv_before_send_blocks_then_gets_woken() {
        let mut pool: MemoryPool<4096> = MemoryPool::new();
        let mut boxes = Mailboxes::new();
        let mbx = MailboxId::new(1).unwrap();
        let receiver = ThreadId(3);

        let outcome = boxes.recv(&mut pool, mbx, receiver).unwrap();
        assert_eq!(outcome, RecvOutcome::Blocked);

        let payload = 0x5678usize as *mut u8;
        let delivered = boxes
            .send(&mut pool, mbx, None, 8, payload)
            .unwrap()
            .expect("receiver was parked");
        assert_eq!(delivered.0, receiver);
        assert_eq!(
            delivered.1,
            RecvOutcome::Delivered {
                sender: None,
                size: 8,
                ptr: payload
            }
        );
    }

    #[test]
    fn duplicate_receiver_is_system_down() {
        let mut pool: MemoryPool<4096> = MemoryPool::new();
        let mut boxes = Mailboxes::new();
        let mbx = MailboxId::new(0).unwrap();
        boxes.recv(&mut pool, mbx, ThreadId(1)).unwrap();
        assert_eq!(
            boxes.recv(&mut pool, mbx, ThreadId(2)),
            Err(SystemDown)
        );
    }
}
