//! # Log
//!
//! Ordered sequence of proposed or committed records.
//!
//! The log is owned by a single node and touched only by its protocol tick,
//! so it needs no synchronization. Records are kept strictly increasing by
//! zxid, which makes every lookup a binary search.

use crate::{LogRecord, Result, ZabError, ZxId};

/// Append-only (except for wholesale replacement during synchronization)
/// sequence of [`LogRecord`]s.
///
/// # Examples
///
/// ```rust
/// use zab_core::{Log, LogRecord, ZxId};
///
/// let mut log = Log::new();
/// log.append(LogRecord::new(ZxId::new(1, 0), "a")).unwrap();
/// log.append(LogRecord::new(ZxId::new(1, 1), "b")).unwrap();
/// assert_eq!(log.last_zxid(), ZxId::new(1, 1));
///
/// // Out-of-order appends are rejected.
/// assert!(log.append(LogRecord::new(ZxId::new(1, 0), "c")).is_err());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Log {
    records: Vec<LogRecord>,
}

impl Log {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a log from a history received from a peer.
    pub fn from_history(history: Vec<LogRecord>) -> Result<Self> {
        check_ordered(&history)?;
        Ok(Self { records: history })
    }

    /// Appends a record whose zxid is strictly greater than the last one.
    pub fn append(&mut self, record: LogRecord) -> Result<()> {
        let last = self.last_zxid();
        if record.zxid <= last {
            return Err(ZabError::LogOrder {
                last,
                attempted: record.zxid,
            });
        }
        self.records.push(record);
        Ok(())
    }

    /// Inserts a record at its sorted position.
    ///
    /// Used when a commit arrives for a proposal this node never saw. Returns
    /// `false` and leaves the log untouched if the zxid is already present.
    pub fn insert(&mut self, record: LogRecord) -> bool {
        match self
            .records
            .binary_search_by(|existing| existing.zxid.cmp(&record.zxid))
        {
            Ok(_) => false,
            Err(position) => {
                self.records.insert(position, record);
                true
            }
        }
    }

    /// Bulk overwrite with an authoritative history. Not a merge.
    pub fn replace(&mut self, history: Vec<LogRecord>) -> Result<()> {
        check_ordered(&history)?;
        self.records = history;
        Ok(())
    }

    pub fn get(&self, zxid: ZxId) -> Option<&LogRecord> {
        self.records
            .binary_search_by(|record| record.zxid.cmp(&zxid))
            .ok()
            .map(|index| &self.records[index])
    }

    pub fn contains(&self, zxid: ZxId) -> bool {
        self.get(zxid).is_some()
    }

    /// Greatest zxid in the log, or [`ZxId::NONE`] when empty.
    pub fn last_zxid(&self) -> ZxId {
        self.records
            .last()
            .map(|record| record.zxid)
            .unwrap_or(ZxId::NONE)
    }

    /// Records with `after < zxid <= through`.
    pub fn range(&self, after: ZxId, through: ZxId) -> &[LogRecord] {
        let start = self.records.partition_point(|record| record.zxid <= after);
        let end = self
            .records
            .partition_point(|record| record.zxid <= through);
        if start >= end {
            &[]
        } else {
            &self.records[start..end]
        }
    }

    /// Records strictly after `zxid`.
    pub fn entries_after(&self, zxid: ZxId) -> &[LogRecord] {
        let start = self.records.partition_point(|record| record.zxid <= zxid);
        &self.records[start..]
    }

    /// Copy of every record up to and including `through`.
    pub fn history_through(&self, through: ZxId) -> Vec<LogRecord> {
        let end = self
            .records
            .partition_point(|record| record.zxid <= through);
        self.records[..end].to_vec()
    }

    /// Copy of the full log, as shipped in ACKEPOCH and NEWLEADER.
    pub fn to_history(&self) -> Vec<LogRecord> {
        self.records.clone()
    }

    pub fn records(&self) -> &[LogRecord] {
        &self.records
    }

    pub fn iter(&self) -> impl Iterator<Item = &LogRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Checks that `records` is strictly increasing by zxid.
pub fn check_ordered(records: &[LogRecord]) -> Result<()> {
    for pair in records.windows(2) {
        if pair[1].zxid <= pair[0].zxid {
            return Err(ZabError::LogOrder {
                last: pair[0].zxid,
                attempted: pair[1].zxid,
            });
        }
    }
    Ok(())
}
