//! Sync queue task model

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::{EntityKind, Operation};
use crate::error::Error;

/// Dispatch state of a queue task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Waiting to be dispatched
    Pending,
    /// Claimed by a push worker; its payload snapshot is frozen
    InFlight,
    /// Exhausted its attempts or was rejected; kept until user retry
    Failed,
}

impl TaskState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InFlight => "in_flight",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_flight" => Ok(Self::InFlight),
            "failed" => Ok(Self::Failed),
            other => Err(Error::InvalidInput(format!("unknown task state: {other}"))),
        }
    }
}

/// One durable mutation awaiting confirmation by the remote service.
///
/// At most one row exists per `(entity_kind, entity_id)`; a later mutation
/// collapses into the existing pending task instead of appending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncQueueItem {
    pub id: i64,
    pub entity_kind: EntityKind,
    /// Entity id in its current id space (rewritten at reconciliation)
    pub entity_id: i64,
    /// Parent entity id for tasks that cannot dispatch before their parent
    /// has a server id (course holes reference their course here)
    pub parent_id: Option<i64>,
    pub operation: Operation,
    /// Wire-ready payload snapshot frozen at enqueue time
    pub payload: serde_json::Value,
    /// The entity's `updated_at` when the snapshot was built
    pub snapshot_updated_at: i64,
    /// Idempotency token forwarded on create requests
    pub idempotency_key: Option<String>,
    pub attempt_count: i64,
    pub last_error: Option<String>,
    pub state: TaskState,
    /// The entity was deleted locally while this task was in flight; a
    /// compensating delete follows once the server id is known
    pub cancelled: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_state_round_trips() {
        for state in [TaskState::Pending, TaskState::InFlight, TaskState::Failed] {
            let parsed: TaskState = state.as_str().parse().unwrap();
            assert_eq!(parsed, state);
        }
    }
}
