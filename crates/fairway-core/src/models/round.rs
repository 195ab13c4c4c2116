//! Round model

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::SyncStatus;
use crate::util::now_millis;

/// A round of golf recorded on this device.
///
/// `id` is the record's current identifier: negative while provisional,
/// replaced by the positive server id at reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Round {
    pub id: i64,
    pub server_id: Option<i64>,
    pub course_name: String,
    /// Date the round was played, `YYYY-MM-DD`.
    pub date: String,
    pub total_score: i64,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    /// Set when the round is finished (Unix ms)
    pub ended_at: Option<i64>,
    /// Last local mutation (Unix ms); guards push snapshots
    pub updated_at: i64,
    pub sync_status: SyncStatus,
    /// Client-minted token attached to the create request
    pub idempotency_key: String,
}

impl Round {
    /// Build a new provisional round under the given device-generated id.
    pub fn new(id: i64, course_name: impl Into<String>, date: impl Into<String>) -> Self {
        let now = now_millis();
        Self {
            id,
            server_id: None,
            course_name: course_name.into(),
            date: date.into(),
            total_score: 0,
            created_at: now,
            ended_at: None,
            updated_at: now,
            sync_status: SyncStatus::Pending,
            idempotency_key: Uuid::now_v7().to_string(),
        }
    }

    /// A round is active until it has been finished.
    pub const fn is_active(&self) -> bool {
        self.ended_at.is_none()
    }
}

/// Partial update applied by `RoundRepository::update`.
#[derive(Debug, Clone, Default)]
pub struct RoundPatch {
    pub course_name: Option<String>,
    pub date: Option<String>,
    pub total_score: Option<i64>,
    pub ended_at: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_round_is_provisional_and_pending() {
        let round = Round::new(-1, "Pebble Beach", "2026-08-01");
        assert_eq!(round.id, -1);
        assert_eq!(round.server_id, None);
        assert_eq!(round.sync_status, SyncStatus::Pending);
        assert!(round.is_active());
        assert_eq!(round.created_at, round.updated_at);
        assert!(!round.idempotency_key.is_empty());
    }

    #[test]
    fn idempotency_keys_are_unique() {
        let a = Round::new(-1, "A", "2026-08-01");
        let b = Round::new(-2, "B", "2026-08-01");
        assert_ne!(a.idempotency_key, b.idempotency_key);
    }
}
