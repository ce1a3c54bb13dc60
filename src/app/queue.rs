use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::debug;

use super::action::Action;
use crate::db::{Database, QueueRow};

/// A queue entry as stored: the payload stays raw so an entry whose kind
/// this build does not know can still be popped and dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub sequence_no: i64,
    pub payload: String,
    pub queued_at: String,
}

impl QueueEntry {
    pub fn decode(&self) -> serde_json::Result<Action> {
        serde_json::from_str(&self.payload)
    }
}

impl From<QueueRow> for QueueEntry {
    fn from(row: QueueRow) -> Self {
        Self {
            sequence_no: row.seq,
            payload: row.payload,
            queued_at: row.queued_at,
        }
    }
}

/// Persistent FIFO between the host callback thread and the dispatcher.
///
/// `push` returns once the row is committed, so an entry survives a crash
/// between push and pop. Entries are consumed strictly by sequence number.
#[derive(Clone)]
pub struct DurableQueue {
    db: Arc<Database>,
}

impl DurableQueue {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn push(&self, action: &Action) -> Result<i64> {
        let payload = serde_json::to_string(action).context("failed to encode action")?;
        let seq = self.db.enqueue(&payload)?;
        debug!(seq, kind = action.kind(), "queued action");
        Ok(seq)
    }

    pub fn pop(&self) -> Result<Option<QueueEntry>> {
        Ok(self.db.take_oldest()?.map(QueueEntry::from))
    }

    pub fn length(&self) -> Result<usize> {
        self.db.queue_len()
    }

    pub fn purge(&self) -> Result<usize> {
        let removed = self.db.purge_queue()?;
        if removed > 0 {
            debug!(removed, "purged stale queue entries");
        }
        Ok(removed)
    }

    pub fn entries(&self) -> Result<Vec<QueueEntry>> {
        Ok(self
            .db
            .list_entries()?
            .into_iter()
            .map(QueueEntry::from)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_queue() -> DurableQueue {
        DurableQueue::new(Arc::new(Database::open_in_memory().unwrap()))
    }

    #[test]
    fn pops_in_push_order() {
        let queue = memory_queue();
        let pushed = vec![
            Action::Paused,
            Action::Resumed,
            Action::SeekChapter { chapter: 2 },
            Action::Stopped,
        ];
        for action in &pushed {
            queue.push(action).unwrap();
        }

        let mut popped = Vec::new();
        while let Some(entry) = queue.pop().unwrap() {
            popped.push(entry.decode().unwrap());
        }
        assert_eq!(popped, pushed);
        assert!(queue.pop().unwrap().is_none());
    }

    #[test]
    fn purge_always_leaves_zero_entries() {
        let queue = memory_queue();
        queue.purge().unwrap();
        assert_eq!(queue.length().unwrap(), 0);

        for _ in 0..5 {
            queue.push(&Action::ScanStarted).unwrap();
        }
        assert_eq!(queue.length().unwrap(), 5);
        queue.purge().unwrap();
        assert_eq!(queue.length().unwrap(), 0);
    }

    #[test]
    fn pending_entries_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.db");
        {
            let db = Database::open(&path).unwrap();
            db.migrate().unwrap();
            let queue = DurableQueue::new(Arc::new(db));
            queue.push(&Action::DatabaseUpdated).unwrap();
            queue.push(&Action::SettingsChanged).unwrap();
        }

        let db = Database::open(&path).unwrap();
        db.migrate().unwrap();
        let queue = DurableQueue::new(Arc::new(db));
        assert_eq!(queue.length().unwrap(), 2);
        let first = queue.pop().unwrap().unwrap().decode().unwrap();
        assert_eq!(first, Action::DatabaseUpdated);
    }
}
