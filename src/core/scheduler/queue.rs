//! The call queue: one row per scheduled future attempt.
//!
//! Invariant: a lead has at most one `Pending` or `Claimed` entry at any
//! time, enforced at insertion through a per-lead index. Entries are mutated
//! only by the scheduler (claim / complete) and the operator skip action;
//! the audio bridge never touches them.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::hours::CallingHours;

/// Queue entry lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    /// Waiting for its scheduled time and an eligible window
    Pending,
    /// Taken by a scheduler pass; a call is being placed or is in flight
    Claimed,
    /// The attempt concluded (next attempt, if any, is a new entry)
    Completed,
    /// Removed by an operator
    Skipped,
}

/// One scheduled call attempt for a lead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallQueueEntry {
    pub id: Uuid,
    pub lead_id: String,
    pub status: QueueStatus,
    /// 1-based attempt counter
    pub attempt_number: u32,
    pub scheduled_time: DateTime<Utc>,
    /// IANA timezone the calling-hours window is evaluated in
    pub timezone: String,
    /// Which of the lead's phone numbers this attempt dials
    pub phone_index: usize,
    pub created_at: DateTime<Utc>,
}

impl CallQueueEntry {
    pub fn new(
        lead_id: impl Into<String>,
        attempt_number: u32,
        scheduled_time: DateTime<Utc>,
        timezone: impl Into<String>,
        phone_index: usize,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            lead_id: lead_id.into(),
            status: QueueStatus::Pending,
            attempt_number,
            scheduled_time,
            timezone: timezone.into(),
            phone_index,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Lead {0} already has an open queue entry")]
    DuplicateOpenEntry(String),

    #[error("Queue entry {0} not found")]
    NotFound(Uuid),

    #[error("Queue entry {0} is not pending")]
    NotPending(Uuid),
}

/// In-process queue store.
#[derive(Default)]
pub struct QueueStore {
    entries: DashMap<Uuid, CallQueueEntry>,
    /// lead id -> its single open (pending or claimed) entry
    open_by_lead: DashMap<String, Uuid>,
}

impl QueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new pending entry, enforcing the one-open-entry-per-lead
    /// invariant.
    pub fn enqueue(&self, entry: CallQueueEntry) -> Result<Uuid, QueueError> {
        use dashmap::mapref::entry::Entry;

        let id = entry.id;
        match self.open_by_lead.entry(entry.lead_id.clone()) {
            Entry::Occupied(existing) => {
                // The index may point at an entry that has since concluded.
                let still_open = self
                    .entries
                    .get(existing.get())
                    .map(|e| matches!(e.status, QueueStatus::Pending | QueueStatus::Claimed))
                    .unwrap_or(false);
                if still_open {
                    return Err(QueueError::DuplicateOpenEntry(entry.lead_id));
                }
                let mut existing = existing;
                existing.insert(id);
            }
            Entry::Vacant(slot) => {
                slot.insert(id);
            }
        }
        self.entries.insert(id, entry);
        Ok(id)
    }

    /// Claim every entry that is due and inside its calling-hours window.
    ///
    /// The transition `Pending -> Claimed` happens under the entry lock, so
    /// overlapping callers cannot claim the same entry twice. Entries that
    /// are due but outside their window are left untouched — not failed,
    /// not rescheduled.
    pub fn claim_due(&self, now: DateTime<Utc>, hours: &CallingHours) -> Vec<CallQueueEntry> {
        let due_ids: Vec<Uuid> = self
            .entries
            .iter()
            .filter(|e| {
                e.status == QueueStatus::Pending
                    && e.scheduled_time <= now
                    && hours.permits(now, &e.timezone)
            })
            .map(|e| e.id)
            .collect();

        let mut claimed = Vec::with_capacity(due_ids.len());
        for id in due_ids {
            if let Some(mut entry) = self.entries.get_mut(&id)
                && entry.status == QueueStatus::Pending
            {
                entry.status = QueueStatus::Claimed;
                claimed.push(entry.clone());
            }
        }
        claimed
    }

    /// Mark an attempt concluded.
    pub fn complete(&self, id: &Uuid) -> Result<(), QueueError> {
        let mut entry = self.entries.get_mut(id).ok_or(QueueError::NotFound(*id))?;
        entry.status = QueueStatus::Completed;
        Ok(())
    }

    /// Operator removal of a pending entry.
    pub fn skip(&self, id: &Uuid) -> Result<(), QueueError> {
        let mut entry = self.entries.get_mut(id).ok_or(QueueError::NotFound(*id))?;
        if entry.status != QueueStatus::Pending {
            return Err(QueueError::NotPending(*id));
        }
        entry.status = QueueStatus::Skipped;
        Ok(())
    }

    pub fn get(&self, id: &Uuid) -> Option<CallQueueEntry> {
        self.entries.get(id).map(|e| e.clone())
    }

    /// The lead's single open entry, if any.
    pub fn open_entry_for_lead(&self, lead_id: &str) -> Option<CallQueueEntry> {
        let id = self.open_by_lead.get(lead_id)?;
        let entry = self.entries.get(&id)?;
        matches!(entry.status, QueueStatus::Pending | QueueStatus::Claimed)
            .then(|| entry.clone())
    }

    pub fn list(&self) -> Vec<CallQueueEntry> {
        let mut entries: Vec<_> = self.entries.iter().map(|e| e.clone()).collect();
        entries.sort_by_key(|e| e.scheduled_time);
        entries
    }

    pub fn pending_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.status == QueueStatus::Pending)
            .count()
    }
}
