//! The idle store: an ordered container of currently-idle resources,
//! optionally partitioned per carrier thread.

use std::collections::hash_map::DefaultHasher;
use std::collections::VecDeque;
use std::hash::{Hash, Hasher};
use std::time::Instant;

use crate::config::Order;
use crate::traits::RefMetadata;

/// One idle resource plus its bookkeeping, as stored internally before
/// being handed back out as a `PoolableRef`.
pub(crate) struct IdleEntry<T> {
    pub(crate) instance: T,
    pub(crate) meta: RefMetadata,
}

impl<T> IdleEntry<T> {
    pub(crate) fn fresh(instance: T, now: Instant) -> Self {
        Self {
            instance,
            meta: RefMetadata::new(now),
        }
    }

    pub(crate) fn mark_idle(&mut self, now: Instant) {
        self.meta.last_idle_since = Some(now);
    }
}

/// Returns a stable partition index for the calling thread out of `n`
/// partitions, without requiring a registry or an external crate: each
/// thread hashes to the same index for the lifetime of the process.
fn partition_of_current_thread(n: usize) -> usize {
    if n <= 1 {
        return 0;
    }
    let mut hasher = DefaultHasher::new();
    std::thread::current().id().hash(&mut hasher);
    (hasher.finish() as usize) % n
}

enum Storage<T> {
    Simple(VecDeque<IdleEntry<T>>),
    Affinity(Vec<VecDeque<IdleEntry<T>>>),
}

/// Ordered container of idle resources.
///
/// In simple mode this is a single `VecDeque` popped from the front (FIFO)
/// or the back (LIFO). In affinity mode it is partitioned into N
/// sub-queues, one per expected carrier thread; `take_next` probes the
/// calling thread's own partition first and falls back to a fixed rotation
/// over the others (work-stealing) on a miss. `insert` always targets the
/// *releasing* thread's partition, per the affinity contract.
pub(crate) struct IdleStore<T> {
    order: Order,
    storage: Storage<T>,
}

impl<T> IdleStore<T> {
    pub(crate) fn new(order: Order, affinity: bool, partitions: usize) -> Self {
        let storage = if affinity {
            let n = partitions.max(1);
            Storage::Affinity((0..n).map(|_| VecDeque::new()).collect())
        } else {
            Storage::Simple(VecDeque::new())
        };
        Self { order, storage }
    }

    pub(crate) fn len(&self) -> usize {
        match &self.storage {
            Storage::Simple(q) => q.len(),
            Storage::Affinity(parts) => parts.iter().map(VecDeque::len).sum(),
        }
    }

    pub(crate) fn insert(&mut self, entry: IdleEntry<T>) {
        match &mut self.storage {
            Storage::Simple(q) => Self::push(q, entry, self.order),
            Storage::Affinity(parts) => {
                let idx = partition_of_current_thread(parts.len());
                Self::push(&mut parts[idx], entry, self.order);
            }
        }
    }

    pub(crate) fn take_next(&mut self) -> Option<IdleEntry<T>> {
        match &mut self.storage {
            Storage::Simple(q) => Self::pop(q, self.order),
            Storage::Affinity(parts) => {
                let n = parts.len();
                let home = partition_of_current_thread(n);
                if let Some(e) = Self::pop(&mut parts[home], self.order) {
                    return Some(e);
                }
                for offset in 1..n {
                    let idx = (home + offset) % n;
                    if let Some(e) = Self::pop(&mut parts[idx], self.order) {
                        return Some(e);
                    }
                }
                None
            }
        }
    }

    fn push(q: &mut VecDeque<IdleEntry<T>>, entry: IdleEntry<T>, _order: Order) {
        // Always push to the back; FIFO pops from the front, LIFO from the
        // back, so both orders are expressed purely by where `pop` reads.
        q.push_back(entry);
    }

    fn pop(q: &mut VecDeque<IdleEntry<T>>, order: Order) -> Option<IdleEntry<T>> {
        match order {
            Order::Fifo => q.pop_front(),
            Order::Lifo => q.pop_back(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(n: u32) -> IdleEntry<u32> {
        IdleEntry::fresh(n, Instant::now())
    }

    #[test]
    fn fifo_simple_preserves_arrival_order() {
        let mut store = IdleStore::new(Order::Fifo, false, 1);
        store.insert(entry(1));
        store.insert(entry(2));
        store.insert(entry(3));
        assert_eq!(store.take_next().unwrap().instance, 1);
        assert_eq!(store.take_next().unwrap().instance, 2);
        assert_eq!(store.take_next().unwrap().instance, 3);
        assert!(store.take_next().is_none());
    }

    #[test]
    fn lifo_simple_reverses_arrival_order() {
        let mut store = IdleStore::new(Order::Lifo, false, 1);
        store.insert(entry(1));
        store.insert(entry(2));
        store.insert(entry(3));
        assert_eq!(store.take_next().unwrap().instance, 3);
        assert_eq!(store.take_next().unwrap().instance, 2);
        assert_eq!(store.take_next().unwrap().instance, 1);
    }

    #[test]
    fn affinity_single_partition_behaves_like_simple() {
        let mut store = IdleStore::new(Order::Fifo, true, 4);
        store.insert(entry(10));
        store.insert(entry(20));
        assert_eq!(store.len(), 2);
        // Both inserts land in this thread's own partition, and this
        // thread's take_next probes that partition first.
        assert_eq!(store.take_next().unwrap().instance, 10);
        assert_eq!(store.take_next().unwrap().instance, 20);
    }

    #[test]
    fn affinity_work_steals_from_other_partitions_on_miss() {
        let mut store: IdleStore<u32> = IdleStore::new(Order::Fifo, true, 4);
        // Force an entry into a partition that is not this thread's home,
        // emulating another thread having released it there.
        if let Storage::Affinity(parts) = &mut store.storage {
            let home = partition_of_current_thread(parts.len());
            let other = (home + 1) % parts.len();
            parts[other].push_back(entry(99));
        }
        assert_eq!(store.len(), 1);
        assert_eq!(store.take_next().unwrap().instance, 99);
    }
}
