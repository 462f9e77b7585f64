//! The pending queue: borrowers waiting for a resource to become
//! available, ordered per the pool's configured [`Order`].

use std::collections::VecDeque;

use tokio::sync::oneshot;

use crate::config::Order;
use crate::error::Error;
use crate::idle_store::IdleEntry;

/// A hand-off in flight to a waiter, carrying a callback that runs if the
/// entry is dropped before [`take`](Self::take) is called.
///
/// A direct hand-off (§4.3) pops the waiter out of `PendingQueue` and then
/// sends through its `oneshot` channel; `PendingGuard` only removes a
/// waiter still *in* the queue, so it cannot observe a waiter whose entry
/// was already popped and sent. If that waiter's `acquire` future is then
/// dropped (cancellation, not timeout) before it receives the value, the
/// channel drops the unreceived `PendingOutcome` — and, without this
/// wrapper, the resource inside it along with it, leaking the slot it held
/// in `allocated`. Wrapping the entry routes that drop through the same
/// release path an abandoned in-flight allocation already uses.
pub(crate) struct Granted<T: Send + 'static> {
    entry: Option<IdleEntry<T>>,
    on_abandon: Option<Box<dyn FnOnce(IdleEntry<T>) + Send>>,
}

impl<T: Send + 'static> Granted<T> {
    pub(crate) fn new(
        entry: IdleEntry<T>,
        on_abandon: impl FnOnce(IdleEntry<T>) + Send + 'static,
    ) -> Self {
        Self {
            entry: Some(entry),
            on_abandon: Some(Box::new(on_abandon)),
        }
    }

    /// Take the entry out, disarming the abandonment callback.
    pub(crate) fn take(mut self) -> IdleEntry<T> {
        self.on_abandon = None;
        self.entry.take().expect("Granted taken twice")
    }
}

impl<T: Send + 'static> Drop for Granted<T> {
    fn drop(&mut self) {
        if let (Some(entry), Some(on_abandon)) = (self.entry.take(), self.on_abandon.take()) {
            on_abandon(entry);
        }
    }
}

/// Terminal signal sent to a waiting borrower.
pub(crate) enum PendingOutcome<T: Send + 'static> {
    /// A resource was handed directly to this waiter, bypassing the idle
    /// store entirely (§4.3).
    Granted(Granted<T>),
    /// The orchestrator failed this waiter outright (currently unused in
    /// the happy path — timeouts and cancellation are handled by the
    /// waiting future itself rather than a queued failure signal — but
    /// kept for symmetry and future allocator-failure fan-out).
    Failed(Error),
}

pub(crate) struct PendingEntry<T: Send + 'static> {
    pub(crate) id: u64,
    sender: oneshot::Sender<PendingOutcome<T>>,
}

impl<T: Send + 'static> PendingEntry<T> {
    /// Attempt to deliver `outcome`. Returns it back on failure (the
    /// receiver was dropped, i.e. the waiter cancelled concurrently).
    pub(crate) fn try_send(self, outcome: PendingOutcome<T>) -> Result<(), PendingOutcome<T>> {
        self.sender.send(outcome)
    }
}

/// Bounded, ordered queue of suspended borrowers.
pub(crate) struct PendingQueue<T: Send + 'static> {
    order: Order,
    queue: VecDeque<PendingEntry<T>>,
    next_id: u64,
}

impl<T: Send + 'static> PendingQueue<T> {
    pub(crate) fn new(order: Order) -> Self {
        Self {
            order,
            queue: VecDeque::new(),
            next_id: 0,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.queue.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Register a new waiter, returning its id and the receiving half of
    /// its completion channel.
    pub(crate) fn push(&mut self) -> (u64, oneshot::Receiver<PendingOutcome<T>>) {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        let (sender, receiver) = oneshot::channel();
        self.queue.push_back(PendingEntry { id, sender });
        (id, receiver)
    }

    /// Pop the next waiter to serve, per the configured order: FIFO pops
    /// the earliest submission, LIFO pops the most recent.
    pub(crate) fn pop_next(&mut self) -> Option<PendingEntry<T>> {
        match self.order {
            Order::Fifo => self.queue.pop_front(),
            Order::Lifo => self.queue.pop_back(),
        }
    }

    /// Remove a specific waiter by id (cancellation or timeout). Returns
    /// `true` if it was still present.
    pub(crate) fn remove(&mut self, id: u64) -> bool {
        if let Some(pos) = self.queue.iter().position(|e| e.id == id) {
            self.queue.remove(pos);
            true
        } else {
            false
        }
    }

    /// Drain every waiter, failing each with `PoolShutDown`. Used by
    /// `dispose`.
    pub(crate) fn drain_shutdown(&mut self) {
        for entry in self.queue.drain(..) {
            let _ = entry.try_send(PendingOutcome::Failed(Error::PoolShutDown));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_pop_next_returns_earliest() {
        let mut q: PendingQueue<u32> = PendingQueue::new(Order::Fifo);
        let (id_a, _rx_a) = q.push();
        let (id_b, _rx_b) = q.push();
        assert_eq!(q.pop_next().unwrap().id, id_a);
        assert_eq!(q.pop_next().unwrap().id, id_b);
    }

    #[test]
    fn lifo_pop_next_returns_latest() {
        let mut q: PendingQueue<u32> = PendingQueue::new(Order::Lifo);
        let (id_a, _rx_a) = q.push();
        let (id_b, _rx_b) = q.push();
        assert_eq!(q.pop_next().unwrap().id, id_b);
        assert_eq!(q.pop_next().unwrap().id, id_a);
    }

    #[test]
    fn remove_by_id_skips_cancelled_entries() {
        let mut q: PendingQueue<u32> = PendingQueue::new(Order::Fifo);
        let (id_a, _rx_a) = q.push();
        let (id_b, _rx_b) = q.push();
        assert!(q.remove(id_a));
        assert_eq!(q.pop_next().unwrap().id, id_b);
        assert!(!q.remove(id_a));
    }

    #[tokio::test]
    async fn drain_shutdown_fails_every_waiter() {
        let mut q: PendingQueue<u32> = PendingQueue::new(Order::Fifo);
        let (_id, rx) = q.push();
        q.drain_shutdown();
        match rx.await.unwrap() {
            PendingOutcome::Failed(Error::PoolShutDown) => {}
            _ => panic!("expected PoolShutDown"),
        }
    }
}
