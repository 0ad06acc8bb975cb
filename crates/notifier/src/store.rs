//! In-memory notification store.
//!
//! Records live behind their own lock so that writes to one notification
//! never wait on another. The outer index lock is only held long enough to
//! look up or register a record, never while a record is being mutated.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use uuid::Uuid;

use courier_common::error::AppError;
use courier_common::types::{DeliveryStatus, NotificationRecord};

type RecordCell = Arc<RwLock<NotificationRecord>>;

#[derive(Default)]
struct Index {
    records: HashMap<Uuid, RecordCell>,
    /// Record ids per user, in creation order.
    by_user: HashMap<String, Vec<Uuid>>,
}

/// Count of records per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct StatusCounts {
    pub queued: usize,
    pub sending: usize,
    pub sent: usize,
    pub failed: usize,
}

impl StatusCounts {
    pub fn total(&self) -> usize {
        self.queued + self.sending + self.sent + self.failed
    }
}

/// Thread-safe registry of notification records, keyed by id and indexed by user.
#[derive(Default)]
pub struct NotificationStore {
    index: RwLock<Index>,
}

impl NotificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new record. Ids are never overwritten.
    pub(crate) fn put(&self, record: NotificationRecord) -> Result<(), AppError> {
        let mut index = self.index.write();
        if index.records.contains_key(&record.id) {
            return Err(AppError::Internal(format!(
                "Notification {} already exists",
                record.id
            )));
        }

        let id = record.id;
        index
            .by_user
            .entry(record.user_id.clone())
            .or_default()
            .push(id);
        index.records.insert(id, Arc::new(RwLock::new(record)));
        Ok(())
    }

    /// Snapshot of a single record.
    pub fn get(&self, id: Uuid) -> Option<NotificationRecord> {
        self.cell(id).map(|cell| cell.read().clone())
    }

    /// Snapshots of every record for `user_id`, oldest first.
    pub fn list_by_user(&self, user_id: &str) -> Vec<NotificationRecord> {
        let cells: Vec<RecordCell> = {
            let index = self.index.read();
            match index.by_user.get(user_id) {
                Some(ids) => ids
                    .iter()
                    .filter_map(|id| index.records.get(id).cloned())
                    .collect(),
                None => return Vec::new(),
            }
        };

        cells.iter().map(|cell| cell.read().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.index.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn status_counts(&self) -> StatusCounts {
        let cells: Vec<RecordCell> = self.index.read().records.values().cloned().collect();

        let mut counts = StatusCounts::default();
        for cell in cells {
            match cell.read().status {
                DeliveryStatus::Queued => counts.queued += 1,
                DeliveryStatus::Sending => counts.sending += 1,
                DeliveryStatus::Sent => counts.sent += 1,
                DeliveryStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }

    /// Atomically move a record from `queued` to `sending`.
    ///
    /// Fails with `DuplicateDispatch` for any other status, which guarantees
    /// a record is dispatched at most once.
    pub(crate) fn claim(&self, id: Uuid) -> Result<NotificationRecord, AppError> {
        let cell = self
            .cell(id)
            .ok_or_else(|| AppError::NotFound(format!("Notification {} not found", id)))?;

        let mut record = cell.write();
        if record.status != DeliveryStatus::Queued {
            return Err(AppError::DuplicateDispatch(id));
        }
        record.status = DeliveryStatus::Sending;
        Ok(record.clone())
    }

    /// Record the result of one attempt: set the attempt count and status together.
    pub(crate) fn record_attempt(
        &self,
        id: Uuid,
        attempt: u32,
        status: DeliveryStatus,
    ) -> Option<NotificationRecord> {
        let cell = self.cell(id)?;
        let mut record = cell.write();
        if record.status.is_terminal() {
            return Some(record.clone());
        }
        record.attempt_count = record.attempt_count.max(attempt);
        record.status = status;
        Some(record.clone())
    }

    fn cell(&self, id: Uuid) -> Option<RecordCell> {
        self.index.read().records.get(&id).cloned()
    }
}
