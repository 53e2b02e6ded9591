//! # Pending Commit Table
//!
//! Buffer for COMMIT notifications that arrive ahead of the commit cursor.

use std::collections::BTreeMap;

use crate::{Epoch, LogRecord, ZxId};

/// Commits waiting for the gap before them to close, keyed
/// `epoch -> counter -> record`.
///
/// Every buffered zxid is strictly greater than the commit cursor it was
/// inserted against; [`PendingCommitTable::prune_through`] restores that
/// invariant when the cursor jumps forward during synchronization.
///
/// # Examples
///
/// ```rust
/// use zab_core::{LogRecord, PendingCommitTable, ZxId};
///
/// let mut pending = PendingCommitTable::new();
/// let cursor = ZxId::new(1, 1);
///
/// assert!(pending.insert(LogRecord::new(ZxId::new(1, 3), "c"), cursor));
/// assert!(pending.take_next(cursor).is_none()); // (1,2) still missing
///
/// assert!(pending.insert(LogRecord::new(ZxId::new(1, 2), "b"), cursor));
/// let ready = pending.drain_ready(cursor);
/// assert_eq!(ready.len(), 2);
/// assert!(pending.is_empty());
/// ```
#[derive(Debug, Clone, Default)]
pub struct PendingCommitTable {
    entries: BTreeMap<Epoch, BTreeMap<i64, LogRecord>>,
    len: usize,
}

impl PendingCommitTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffers `record` unless it is at or behind `cursor` or already present.
    pub fn insert(&mut self, record: LogRecord, cursor: ZxId) -> bool {
        if record.zxid <= cursor {
            return false;
        }
        let by_counter = self.entries.entry(record.zxid.epoch).or_default();
        if by_counter.contains_key(&record.zxid.counter) {
            return false;
        }
        by_counter.insert(record.zxid.counter, record);
        self.len += 1;
        true
    }

    /// Removes and returns the record directly after `cursor`, if buffered.
    pub fn take_next(&mut self, cursor: ZxId) -> Option<LogRecord> {
        self.take(cursor.next())
    }

    pub fn take(&mut self, zxid: ZxId) -> Option<LogRecord> {
        let by_counter = self.entries.get_mut(&zxid.epoch)?;
        let record = by_counter.remove(&zxid.counter)?;
        if by_counter.is_empty() {
            self.entries.remove(&zxid.epoch);
        }
        self.len -= 1;
        Some(record)
    }

    /// Removes every contiguous record after `cursor`, in order, stopping at
    /// the first gap.
    pub fn drain_ready(&mut self, mut cursor: ZxId) -> Vec<LogRecord> {
        let mut ready = Vec::new();
        while let Some(record) = self.take_next(cursor) {
            cursor = record.zxid;
            ready.push(record);
        }
        ready
    }

    /// Drops every entry at or behind `cursor`. Returns how many were dropped.
    pub fn prune_through(&mut self, cursor: ZxId) -> usize {
        let before = self.len;
        self.entries.retain(|epoch, by_counter| {
            if *epoch < cursor.epoch {
                return false;
            }
            if *epoch == cursor.epoch {
                by_counter.retain(|counter, _| *counter > cursor.counter);
            }
            !by_counter.is_empty()
        });
        self.len = self.entries.values().map(BTreeMap::len).sum();
        before - self.len
    }

    pub fn contains(&self, zxid: ZxId) -> bool {
        self.entries
            .get(&zxid.epoch)
            .map(|by_counter| by_counter.contains_key(&zxid.counter))
            .unwrap_or(false)
    }

    /// Lowest buffered zxid.
    pub fn first_zxid(&self) -> Option<ZxId> {
        self.entries.iter().next().and_then(|(epoch, by_counter)| {
            by_counter
                .keys()
                .next()
                .map(|counter| ZxId::new(*epoch, *counter))
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.len = 0;
    }
}
