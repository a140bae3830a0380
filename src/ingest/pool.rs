//! Scoped worker pool for the partitioned cleaning path.
//!
//! The pool is a plain value handed to whoever needs it. Workers are scoped
//! threads that exist only for the duration of [`WorkerPool::map_partitions`]
//! and are all joined before it returns.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerPool {
    workers: usize,
}

impl WorkerPool {
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Split `items` into one partition per worker by hashing `key`, run `f`
    /// on each partition in its own thread, and concatenate the results.
    ///
    /// Items with equal keys always land in the same partition. Output order
    /// follows partition order, not input order.
    pub fn map_partitions<T, K, R, KF, F>(&self, items: Vec<T>, key: KF, f: F) -> Vec<R>
    where
        T: Send,
        R: Send,
        K: Hash,
        KF: Fn(&T) -> K,
        F: Fn(Vec<T>) -> Vec<R> + Sync,
    {
        let mut partitions: Vec<Vec<T>> = (0..self.workers).map(|_| Vec::new()).collect();
        for item in items {
            let mut hasher = DefaultHasher::new();
            key(&item).hash(&mut hasher);
            let idx = (hasher.finish() % self.workers as u64) as usize;
            partitions[idx].push(item);
        }

        debug!(
            workers = self.workers,
            sizes = ?partitions.iter().map(Vec::len).collect::<Vec<_>>(),
            "Dispatching partitions"
        );

        let f = &f;
        std::thread::scope(|scope| {
            let handles: Vec<_> = partitions
                .into_iter()
                .map(|part| scope.spawn(move || f(part)))
                .collect();

            let mut merged = Vec::new();
            for handle in handles {
                match handle.join() {
                    Ok(out) => merged.extend(out),
                    Err(panic) => std::panic::resume_unwind(panic),
                }
            }
            merged
        })
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(4)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_workers_clamps_to_one() {
        assert_eq!(WorkerPool::new(0).workers(), 1);
    }

    #[test]
    fn every_item_is_processed_once() {
        let pool = WorkerPool::new(3);
        let mut out = pool.map_partitions((0..100).collect(), |n: &i32| *n, |part| {
            part.into_iter().map(|n| n * 2).collect()
        });
        out.sort_unstable();
        assert_eq!(out, (0..100).map(|n| n * 2).collect::<Vec<_>>());
    }

    #[test]
    fn equal_keys_share_a_partition() {
        let pool = WorkerPool::new(4);
        // Each partition reports the set of keys it saw; no key may appear twice.
        let items: Vec<u8> = (0..50).flat_map(|k| [k, k]).collect();
        let seen = pool.map_partitions(items, |k| *k, |mut part| {
            part.sort_unstable();
            part.dedup();
            part
        });
        assert_eq!(seen.len(), 50);
    }
}
