use std::collections::HashSet;

use tracing::info;

use crate::ingest::pool::WorkerPool;
use crate::types::Transaction;

/// Counts of what each cleaning step removed or repaired.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CleaningStats {
    pub duplicates_removed: usize,
    pub fields_filled: usize,
    pub invalid_removed: usize,
}

impl CleaningStats {
    fn merge(self, other: Self) -> Self {
        Self {
            duplicates_removed: self.duplicates_removed + other.duplicates_removed,
            fields_filled: self.fields_filled + other.fields_filled,
            invalid_removed: self.invalid_removed + other.invalid_removed,
        }
    }
}

/// Removes duplicates, zero-fills missing numerics and drops non-positive values.
/// With a [`WorkerPool`] the batch is hash-partitioned and cleaned in parallel;
/// row order is then not preserved.
#[derive(Debug, Clone, Default)]
pub struct DataCleaner {
    pool: Option<WorkerPool>,
}

type IdentityKey = (Option<String>, Option<i64>, Option<u64>, Option<u64>, Option<u64>);

fn identity_key(tx: &Transaction) -> IdentityKey {
    (
        tx.hash.clone(),
        tx.timestamp.map(|t| t.timestamp()),
        tx.value.map(f64::to_bits),
        tx.gas.map(f64::to_bits),
        tx.gas_price.map(f64::to_bits),
    )
}

impl DataCleaner {
    pub fn new() -> Self {
        Self { pool: None }
    }

    pub fn with_pool(pool: WorkerPool) -> Self {
        Self { pool: Some(pool) }
    }

    /// Build from a worker count; 1 keeps the sequential path.
    pub fn with_workers(workers: usize) -> Self {
        if workers > 1 {
            Self::with_pool(WorkerPool::new(workers))
        } else {
            Self::new()
        }
    }

    pub fn clean(&self, batch: Vec<Transaction>) -> Vec<Transaction> {
        let initial = batch.len();
        let (cleaned, stats) = match self.pool {
            Some(pool) if pool.workers() > 1 => {
                let parts = pool.map_partitions(batch, identity_key, |part| {
                    vec![clean_partition(part)]
                });
                parts.into_iter().fold(
                    (Vec::with_capacity(initial), CleaningStats::default()),
                    |(mut acc, stats), (rows, s)| {
                        acc.extend(rows);
                        (acc, stats.merge(s))
                    },
                )
            }
            _ => clean_partition(batch),
        };

        info!(
            input = initial,
            output = cleaned.len(),
            duplicates = stats.duplicates_removed,
            filled = stats.fields_filled,
            invalid = stats.invalid_removed,
            parallel = self.pool.is_some(),
            "Data cleaning completed"
        );
        cleaned
    }
}

fn clean_partition(batch: Vec<Transaction>) -> (Vec<Transaction>, CleaningStats) {
    let (batch, duplicates_removed) = remove_duplicates(batch);
    let (batch, fields_filled) = handle_missing_values(batch);
    let (batch, invalid_removed) = filter_invalid_transactions(batch);
    (
        batch,
        CleaningStats {
            duplicates_removed,
            fields_filled,
            invalid_removed,
        },
    )
}

/// Drop exact duplicates, keeping the first occurrence.
pub fn remove_duplicates(batch: Vec<Transaction>) -> (Vec<Transaction>, usize) {
    let before = batch.len();
    let mut seen = HashSet::with_capacity(before);
    let kept: Vec<Transaction> = batch
        .into_iter()
        .filter(|tx| seen.insert(identity_key(tx)))
        .collect();
    let removed = before - kept.len();
    (kept, removed)
}

/// Zero-fill missing value/gas/gasPrice. Returns the number of fields filled.
pub fn handle_missing_values(mut batch: Vec<Transaction>) -> (Vec<Transaction>, usize) {
    let mut filled = 0;
    for tx in &mut batch {
        for field in [&mut tx.value, &mut tx.gas, &mut tx.gas_price] {
            if field.is_none() {
                *field = Some(0.0);
                filled += 1;
            }
        }
    }
    (batch, filled)
}

/// Keep only transactions with a strictly positive value.
pub fn filter_invalid_transactions(batch: Vec<Transaction>) -> (Vec<Transaction>, usize) {
    let before = batch.len();
    let kept: Vec<Transaction> = batch
        .into_iter()
        .filter(|tx| tx.value.is_some_and(|v| v > 0.0))
        .collect();
    let removed = before - kept.len();
    (kept, removed)
}
