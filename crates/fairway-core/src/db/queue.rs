//! Sync queue repository
//!
//! One durable row per `(entity_kind, entity_id)`: a later mutation collapses
//! into the existing pending task rather than appending a second one. A task
//! leaves the table only after its remote call succeeded and reconciliation
//! committed.

use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::Result;
use crate::models::{is_provisional, EntityKind, Operation, SyncQueueItem, TaskState};
use crate::util::now_millis;

/// Exponential backoff in milliseconds with a capped exponent.
pub fn backoff_millis(attempt_count: i64) -> i64 {
    const MAX_EXPONENT: u32 = 8;
    const BASE_DELAY_MILLIS: i64 = 5_000;

    let capped = u32::try_from(attempt_count.clamp(0, i64::from(MAX_EXPONENT))).unwrap_or(0);
    2_i64.pow(capped) * BASE_DELAY_MILLIS
}

/// Everything `enqueue` needs to build or refresh a task.
#[derive(Debug, Clone)]
pub struct EnqueueRequest {
    pub entity_kind: EntityKind,
    pub entity_id: i64,
    pub parent_id: Option<i64>,
    pub operation: Operation,
    pub payload: serde_json::Value,
    pub snapshot_updated_at: i64,
    pub idempotency_key: Option<String>,
}

/// Enqueue a mutation, deduplicating against any existing task for the same
/// entity. Returns `false` when the request annihilated an existing task
/// (delete of a never-pushed create) instead of leaving one behind.
pub fn enqueue(conn: &Connection, request: &EnqueueRequest) -> Result<bool> {
    let now = now_millis();
    let existing = find(conn, request.entity_kind, request.entity_id)?;

    let Some(task) = existing else {
        insert(conn, request, now)?;
        return Ok(true);
    };

    if task.state == TaskState::InFlight {
        // The in-flight snapshot is frozen; a newer edit is caught by the
        // snapshot re-validation at reconciliation time. A delete flags the
        // task so a compensating delete follows once the push resolves.
        if request.operation == Operation::Delete {
            conn.execute(
                "UPDATE sync_queue SET cancelled = 1, updated_at = ? WHERE id = ?",
                params![now, task.id],
            )?;
        }
        return Ok(true);
    }

    let merged = match (task.operation, request.operation) {
        // Deleting an entity the server never saw: both vanish.
        (Operation::Create, Operation::Delete) => {
            conn.execute("DELETE FROM sync_queue WHERE id = ?", params![task.id])?;
            return Ok(false);
        }
        // A create absorbs every later mutation until it is dispatched.
        (Operation::Create, _) => Operation::Create,
        (_, Operation::Delete) => Operation::Delete,
        (Operation::Delete, _) => Operation::Delete,
        (_, Operation::Publish) => Operation::Publish,
        (Operation::Publish, _) => Operation::Publish,
        _ => Operation::Update,
    };

    // Collapsing a fresh payload into a failed task counts as the user
    // acting on it: the attempt budget starts over.
    conn.execute(
        "UPDATE sync_queue
         SET operation = ?, payload = ?, snapshot_updated_at = ?, parent_id = ?,
             state = 'pending', attempt_count = 0, last_error = NULL, updated_at = ?
         WHERE id = ?",
        params![
            merged.as_str(),
            request.payload.to_string(),
            request.snapshot_updated_at,
            request.parent_id,
            now,
            task.id
        ],
    )?;
    Ok(true)
}

fn insert(conn: &Connection, request: &EnqueueRequest, now: i64) -> Result<()> {
    conn.execute(
        "INSERT INTO sync_queue
         (entity_kind, entity_id, parent_id, operation, payload, snapshot_updated_at,
          idempotency_key, attempt_count, state, cancelled, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, 0, 'pending', 0, ?, ?)",
        params![
            request.entity_kind.as_str(),
            request.entity_id,
            request.parent_id,
            request.operation.as_str(),
            request.payload.to_string(),
            request.snapshot_updated_at,
            request.idempotency_key,
            now,
            now
        ],
    )?;
    Ok(())
}

/// Look up the task for an entity, if any.
pub fn find(conn: &Connection, kind: EntityKind, entity_id: i64) -> Result<Option<SyncQueueItem>> {
    let task = conn
        .query_row(
            &format!("SELECT {COLUMNS} FROM sync_queue WHERE entity_kind = ? AND entity_id = ?"),
            params![kind.as_str(), entity_id],
            parse_task,
        )
        .optional()?;
    Ok(task)
}

/// Look up a task by its queue row id.
pub fn get_by_id(conn: &Connection, task_id: i64) -> Result<Option<SyncQueueItem>> {
    let task = conn
        .query_row(
            &format!("SELECT {COLUMNS} FROM sync_queue WHERE id = ?"),
            params![task_id],
            parse_task,
        )
        .optional()?;
    Ok(task)
}

const COLUMNS: &str = "id, entity_kind, entity_id, parent_id, operation, payload, \
                       snapshot_updated_at, idempotency_key, attempt_count, last_error, \
                       state, cancelled, created_at, updated_at";

fn parse_task(row: &Row<'_>) -> rusqlite::Result<SyncQueueItem> {
    let kind: String = row.get(1)?;
    let operation: String = row.get(4)?;
    let payload: String = row.get(5)?;
    let state: String = row.get(10)?;
    Ok(SyncQueueItem {
        id: row.get(0)?,
        entity_kind: kind.parse().unwrap_or(EntityKind::Round),
        entity_id: row.get(2)?,
        parent_id: row.get(3)?,
        operation: operation.parse().unwrap_or(Operation::Update),
        payload: serde_json::from_str(&payload).unwrap_or(serde_json::Value::Null),
        snapshot_updated_at: row.get(6)?,
        idempotency_key: row.get(7)?,
        attempt_count: row.get(8)?,
        last_error: row.get(9)?,
        state: state.parse().unwrap_or(TaskState::Pending),
        cancelled: row.get::<_, i64>(11)? != 0,
        created_at: row.get(12)?,
        updated_at: row.get(13)?,
    })
}

/// Trait for queue storage operations used by the sync engine
pub trait QueueRepository {
    /// Tasks ready to dispatch right now, oldest first.
    fn list_dispatchable(&self, now: i64) -> Result<Vec<SyncQueueItem>>;

    /// Atomically claim a pending task for dispatch. Returns `None` when the
    /// task was already claimed, completed, or failed by another worker.
    fn claim(&self, task_id: i64) -> Result<Option<SyncQueueItem>>;

    /// Drop a task whose push and reconciliation both succeeded.
    fn complete(&self, task_id: i64) -> Result<()>;

    /// Return a claimed task to the queue untouched (offline: no attempt was
    /// made, so the attempt counter does not move).
    fn release(&self, task_id: i64) -> Result<()>;

    /// Record a transient failure; the task fails permanently once the
    /// attempt budget is exhausted.
    fn record_failure(&self, task_id: i64, error: &str, max_attempts: i64) -> Result<TaskState>;

    /// Mark a task rejected by the server; never auto-retried.
    fn mark_rejected(&self, task_id: i64, error: &str) -> Result<()>;

    /// Put every failed task back in rotation with a fresh attempt budget.
    fn reset_failed(&self) -> Result<usize>;

    /// Put one task back in rotation with a fresh attempt budget (explicit
    /// user retry of a single entity).
    fn reset_task(&self, task_id: i64) -> Result<()>;

    /// Rewrite a claimed task in place (conflict path: fresh snapshot
    /// against the reconciled server id).
    fn requeue_as_update(
        &self,
        task_id: i64,
        entity_id: i64,
        payload: &serde_json::Value,
        snapshot_updated_at: i64,
    ) -> Result<()>;

    /// Rewrite a claimed, cancelled create into the compensating delete of
    /// the server record it produced.
    fn requeue_as_delete(&self, task_id: i64, server_id: i64) -> Result<()>;

    fn pending_count(&self) -> Result<usize>;
    fn failed_count(&self) -> Result<usize>;
    fn list_all(&self) -> Result<Vec<SyncQueueItem>>;
}

/// `SQLite` implementation of `QueueRepository`
pub struct SqliteQueueRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteQueueRepository<'a> {
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl QueueRepository for SqliteQueueRepository<'_> {
    fn list_dispatchable(&self, now: i64) -> Result<Vec<SyncQueueItem>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {COLUMNS} FROM sync_queue WHERE state = 'pending' ORDER BY id ASC"
        ))?;
        let tasks = stmt
            .query_map([], parse_task)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(tasks
            .into_iter()
            .filter(|task| {
                // A child task cannot dispatch before its parent has a
                // server id; the parent's reconciliation rewrites parent_id.
                if task.parent_id.is_some_and(is_provisional) {
                    return false;
                }
                task.attempt_count == 0
                    || task.updated_at + backoff_millis(task.attempt_count) <= now
            })
            .collect())
    }

    fn claim(&self, task_id: i64) -> Result<Option<SyncQueueItem>> {
        let changed = self.conn.execute(
            "UPDATE sync_queue SET state = 'in_flight', updated_at = ?
             WHERE id = ? AND state = 'pending'",
            params![now_millis(), task_id],
        )?;
        if changed == 0 {
            return Ok(None);
        }
        let task = self
            .conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM sync_queue WHERE id = ?"),
                params![task_id],
                parse_task,
            )
            .optional()?;
        Ok(task)
    }

    fn complete(&self, task_id: i64) -> Result<()> {
        self.conn
            .execute("DELETE FROM sync_queue WHERE id = ?", params![task_id])?;
        Ok(())
    }

    fn release(&self, task_id: i64) -> Result<()> {
        self.conn.execute(
            "UPDATE sync_queue SET state = 'pending' WHERE id = ? AND state = 'in_flight'",
            params![task_id],
        )?;
        Ok(())
    }

    fn record_failure(&self, task_id: i64, error: &str, max_attempts: i64) -> Result<TaskState> {
        let attempts: i64 = self.conn.query_row(
            "UPDATE sync_queue
             SET attempt_count = attempt_count + 1, last_error = ?, updated_at = ?,
                 state = CASE WHEN attempt_count + 1 >= ? THEN 'failed' ELSE 'pending' END
             WHERE id = ?
             RETURNING attempt_count",
            params![error, now_millis(), max_attempts, task_id],
            |row| row.get(0),
        )?;
        Ok(if attempts >= max_attempts {
            TaskState::Failed
        } else {
            TaskState::Pending
        })
    }

    fn mark_rejected(&self, task_id: i64, error: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE sync_queue SET state = 'failed', last_error = ?, updated_at = ? WHERE id = ?",
            params![error, now_millis(), task_id],
        )?;
        Ok(())
    }

    fn reset_failed(&self) -> Result<usize> {
        let changed = self.conn.execute(
            "UPDATE sync_queue
             SET state = 'pending', attempt_count = 0, last_error = NULL, updated_at = ?
             WHERE state = 'failed'",
            params![now_millis()],
        )?;
        Ok(changed)
    }

    fn reset_task(&self, task_id: i64) -> Result<()> {
        self.conn.execute(
            "UPDATE sync_queue
             SET state = 'pending', attempt_count = 0, last_error = NULL, updated_at = ?
             WHERE id = ? AND state = 'failed'",
            params![now_millis(), task_id],
        )?;
        Ok(())
    }

    fn requeue_as_update(
        &self,
        task_id: i64,
        entity_id: i64,
        payload: &serde_json::Value,
        snapshot_updated_at: i64,
    ) -> Result<()> {
        self.conn.execute(
            "UPDATE sync_queue
             SET entity_id = ?, operation = 'update', payload = ?, snapshot_updated_at = ?,
                 state = 'pending', updated_at = ?
             WHERE id = ?",
            params![
                entity_id,
                payload.to_string(),
                snapshot_updated_at,
                now_millis(),
                task_id
            ],
        )?;
        Ok(())
    }

    fn requeue_as_delete(&self, task_id: i64, server_id: i64) -> Result<()> {
        self.conn.execute(
            "UPDATE sync_queue
             SET entity_id = ?, operation = 'delete', payload = 'null', cancelled = 0,
                 state = 'pending', attempt_count = 0, last_error = NULL, updated_at = ?
             WHERE id = ?",
            params![server_id, now_millis(), task_id],
        )?;
        Ok(())
    }

    fn pending_count(&self) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sync_queue WHERE state IN ('pending', 'in_flight')",
            [],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    fn failed_count(&self) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sync_queue WHERE state = 'failed'",
            [],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    fn list_all(&self) -> Result<Vec<SyncQueueItem>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {COLUMNS} FROM sync_queue ORDER BY id ASC"))?;
        let tasks = stmt
            .query_map([], parse_task)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tasks)
    }
}
