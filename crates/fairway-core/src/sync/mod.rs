//! Sync engine: pull/push orchestration and id reconciliation.
//!
//! One cycle runs pull (canonical server state, local-wins) then push (drain
//! the queue with bounded concurrency). Per-entity ordering is enforced by
//! the queue's exclusive claim; the cycle lock keeps pull and push phases of
//! concurrent triggers from interleaving.

pub mod connectivity;
pub mod status;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex, Semaphore};
use tokio::task::JoinSet;

use crate::api::{wire, RemoteApi};
use crate::config::SyncSettings;
use crate::db::{
    self, meta,
    queue::{self, QueueRepository, SqliteQueueRepository},
    reconcile::{self, ReconcileOutcome, ServerIds},
    ClubRepository, CourseRepository, RoundRepository, SqliteClubRepository,
    SqliteCourseRepository, SqliteRoundRepository,
};
use crate::error::{Error, Result};
use crate::models::{EntityKind, Operation, SyncQueueItem, SyncStatus, TaskState};
use crate::services::StoreService;
use crate::util::now_millis;

use connectivity::ConnectivityMonitor;
use status::StatusReporter;

/// Engine lifecycle states, observable for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnginePhase {
    Idle,
    CheckingConnectivity,
    Pulling,
    Pushing,
    Error,
}

/// What one cycle accomplished.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleSummary {
    pub offline: bool,
    pub pulled: usize,
    pub pushed: usize,
    pub failed: usize,
}

/// Terminal state of one task dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Remote call and reconciliation both committed; task removed
    Completed,
    /// Task went back to pending (conflict re-snapshot, compensation, or
    /// transient failure within budget)
    Requeued,
    /// Task marked failed and surfaced for explicit retry
    Failed,
    /// No attempt was made; connectivity is gone
    Offline,
    /// Another worker already owned the task
    Skipped,
}

pub struct SyncEngine {
    store: StoreService,
    remote: Arc<dyn RemoteApi>,
    settings: SyncSettings,
    status: StatusReporter,
    phase: watch::Sender<EnginePhase>,
    cycle_lock: Mutex<()>,
}

impl SyncEngine {
    pub fn new(store: StoreService, remote: Arc<dyn RemoteApi>, settings: SyncSettings) -> Arc<Self> {
        let (phase, _) = watch::channel(EnginePhase::Idle);
        Arc::new(Self {
            store,
            remote,
            settings,
            status: StatusReporter::new(),
            phase,
            cycle_lock: Mutex::new(()),
        })
    }

    pub const fn status(&self) -> &StatusReporter {
        &self.status
    }

    pub fn phase(&self) -> EnginePhase {
        *self.phase.borrow()
    }

    fn set_phase(&self, phase: EnginePhase) {
        self.phase.send_replace(phase);
    }

    /// Run one full sync cycle: connectivity check, pull, push.
    pub async fn run_cycle(self: &Arc<Self>) -> Result<CycleSummary> {
        let _guard = self.cycle_lock.lock().await;
        self.set_phase(EnginePhase::CheckingConnectivity);

        if self.remote.ping().await.is_err() {
            tracing::debug!("sync skipped; service unreachable");
            self.status.set_offline(true);
            self.set_phase(EnginePhase::Idle);
            self.refresh_counts().await?;
            return Ok(CycleSummary {
                offline: true,
                ..CycleSummary::default()
            });
        }
        self.status.set_offline(false);
        self.status.set_syncing(true);

        let outcome = self.pull_and_push().await;
        self.status.set_syncing(false);
        self.refresh_counts().await?;

        match outcome {
            Ok(summary) => {
                self.set_phase(EnginePhase::Idle);
                tracing::info!(
                    pulled = summary.pulled,
                    pushed = summary.pushed,
                    failed = summary.failed,
                    "sync cycle complete"
                );
                Ok(summary)
            }
            Err(error) => {
                self.set_phase(EnginePhase::Error);
                tracing::warn!("sync cycle failed: {error}");
                self.set_phase(EnginePhase::Idle);
                Err(error)
            }
        }
    }

    async fn pull_and_push(self: &Arc<Self>) -> Result<CycleSummary> {
        self.set_phase(EnginePhase::Pulling);
        let pulled = self.pull_all().await?;

        self.set_phase(EnginePhase::Pushing);
        let (pushed, failed, offline) = self.drain().await?;

        Ok(CycleSummary {
            offline,
            pulled,
            pushed,
            failed,
        })
    }

    /// Force a pull of canonical server state (`sync_down`).
    pub async fn sync_down(self: &Arc<Self>) -> Result<usize> {
        let _guard = self.cycle_lock.lock().await;
        let pulled = self.pull_all().await?;
        self.refresh_counts().await?;
        Ok(pulled)
    }

    /// Push one entity immediately, resetting it first if it had failed.
    pub async fn sync_entity(self: &Arc<Self>, kind: EntityKind, id: i64) -> Result<PushOutcome> {
        let task = self
            .store
            .with_conn(move |conn| queue::find(conn, kind, id))
            .await?
            .ok_or_else(|| Error::NotFound(format!("no queued sync for {kind} {id}")))?;

        match task.state {
            TaskState::InFlight => return Ok(PushOutcome::Skipped),
            TaskState::Failed => {
                let task_id = task.id;
                self.store
                    .with_conn(move |conn| SqliteQueueRepository::new(conn).reset_task(task_id))
                    .await?;
            }
            TaskState::Pending => {}
        }

        let outcome = self.push_task(task).await;
        self.refresh_counts().await?;
        Ok(outcome)
    }

    /// Reset failed tasks and run a cycle.
    pub async fn retry_failed(self: &Arc<Self>) -> Result<CycleSummary> {
        self.store.retry_failed().await?;
        self.run_cycle().await
    }

    /// Periodic + connectivity-triggered background loop.
    pub async fn run_background(self: Arc<Self>, monitor: Arc<ConnectivityMonitor>) {
        let trigger = monitor.online_trigger();
        loop {
            let pending = self.store.pending_count().await.unwrap_or(0);
            let interval = if pending > 0 {
                self.settings.sync_interval.min(Duration::from_secs(5))
            } else {
                self.settings.sync_interval
            };

            tokio::select! {
                () = trigger.notified() => {
                    tracing::debug!("sync triggered by connectivity");
                }
                () = tokio::time::sleep(interval) => {}
            }

            if let Err(error) = self.run_cycle().await {
                tracing::warn!("background sync cycle failed: {error}");
            }
        }
    }

    async fn refresh_counts(&self) -> Result<()> {
        let (pending, failed) = self
            .store
            .with_conn(|conn| {
                let repo = SqliteQueueRepository::new(conn);
                Ok((repo.pending_count()?, repo.failed_count()?))
            })
            .await?;
        self.status.set_counts(pending, failed);
        Ok(())
    }

    // --- pull phase ---

    /// Upsert canonical server state, never touching dirty local records.
    async fn pull_all(&self) -> Result<usize> {
        let mut pulled = 0usize;

        match self.remote.list_rounds().await {
            Ok(wires) => pulled += self.apply_pulled_rounds(wires).await?,
            Err(error) if error.is_transient() => {
                tracing::debug!("round pull unavailable: {error}");
            }
            Err(error) => return Err(error),
        }

        match self.remote.list_clubs().await {
            Ok(wires) => pulled += self.apply_pulled_clubs(wires).await?,
            Err(error) if error.is_transient() => {
                tracing::debug!("club pull unavailable: {error}");
            }
            Err(error) => return Err(error),
        }

        pulled += self.refresh_courses().await?;

        self.store
            .with_conn(|conn| meta::set(conn, meta::KEY_LAST_PULL_AT, &now_millis().to_string()))
            .await?;
        Ok(pulled)
    }

    async fn apply_pulled_rounds(&self, wires: Vec<wire::RoundWire>) -> Result<usize> {
        self.store
            .with_conn(move |conn| {
                let mut applied = 0usize;
                for payload in wires {
                    if payload.id.is_none() {
                        continue;
                    }
                    let (round, holes) = wire::round_from_wire(&payload)?;
                    if db::apply_server_round(conn, &round, &holes)? {
                        applied += 1;
                    }
                }
                Ok(applied)
            })
            .await
    }

    async fn apply_pulled_clubs(&self, wires: Vec<wire::ClubWire>) -> Result<usize> {
        self.store
            .with_conn(move |conn| {
                let mut applied = 0usize;
                for payload in wires {
                    if payload.id.is_none() {
                        continue;
                    }
                    let club = wire::club_from_wire(&payload)?;
                    if db::apply_server_club(conn, &club)? {
                        applied += 1;
                    }
                }
                Ok(applied)
            })
            .await
    }

    /// No course list endpoint exists; refresh courses we already know.
    async fn refresh_courses(&self) -> Result<usize> {
        let known: Vec<i64> = self
            .store
            .with_conn(|conn| {
                Ok(SqliteCourseRepository::new(conn)
                    .list()?
                    .into_iter()
                    .filter_map(|course| course.server_id)
                    .collect())
            })
            .await?;

        let mut applied = 0usize;
        for server_id in known {
            let payload = match self.remote.get_course(server_id).await {
                Ok(payload) => payload,
                Err(error) if error.is_transient() => continue,
                Err(Error::RemoteRejected { status: 404, .. }) => continue,
                Err(error) => return Err(error),
            };
            let merged = self
                .store
                .with_conn(move |conn| {
                    let (course, holes) = wire::course_from_wire(&payload)?;
                    db::apply_server_course(conn, &course, &holes)
                })
                .await?;
            if merged {
                applied += 1;
            }
        }
        Ok(applied)
    }

    // --- push phase ---

    /// Drain the queue in waves until nothing dispatchable remains.
    async fn drain(self: &Arc<Self>) -> Result<(usize, usize, bool)> {
        let mut pushed = 0usize;
        let mut failed = 0usize;

        loop {
            let tasks = self
                .store
                .with_conn(|conn| SqliteQueueRepository::new(conn).list_dispatchable(now_millis()))
                .await?;
            if tasks.is_empty() {
                break;
            }

            let semaphore = Arc::new(Semaphore::new(self.settings.push_concurrency));
            let mut workers: JoinSet<PushOutcome> = JoinSet::new();
            for task in tasks {
                let engine = Arc::clone(self);
                let semaphore = Arc::clone(&semaphore);
                workers.spawn(async move {
                    let Ok(_permit) = semaphore.acquire_owned().await else {
                        return PushOutcome::Skipped;
                    };
                    engine.push_task(task).await
                });
            }

            let mut wave_pushed = 0usize;
            let mut went_offline = false;
            while let Some(joined) = workers.join_next().await {
                match joined {
                    Ok(PushOutcome::Completed) => wave_pushed += 1,
                    Ok(PushOutcome::Failed) => failed += 1,
                    Ok(PushOutcome::Offline) => went_offline = true,
                    Ok(PushOutcome::Requeued | PushOutcome::Skipped) => {}
                    Err(error) => tracing::error!("push worker panicked: {error}"),
                }
            }
            pushed += wave_pushed;
            self.refresh_counts().await?;

            if went_offline {
                self.status.set_offline(true);
                return Ok((pushed, failed, true));
            }
            if wave_pushed == 0 {
                // Remaining tasks are deferred (backoff or provisional
                // parent); a later cycle picks them up.
                break;
            }
        }
        Ok((pushed, failed, false))
    }

    /// Claim and dispatch one task end to end.
    async fn push_task(&self, task: SyncQueueItem) -> PushOutcome {
        let task_id = task.id;
        let claimed = self
            .store
            .with_conn(move |conn| SqliteQueueRepository::new(conn).claim(task_id))
            .await;
        let task = match claimed {
            Ok(Some(task)) => task,
            Ok(None) => return PushOutcome::Skipped,
            Err(error) => {
                tracing::error!("task claim failed: {error}");
                return PushOutcome::Skipped;
            }
        };

        if self
            .set_entity_status(task.entity_kind, task.entity_id, SyncStatus::Syncing)
            .await
            .is_err()
        {
            tracing::debug!("entity for task {} is gone; continuing", task.id);
        }

        match self.dispatch(&task).await {
            Ok(outcome) => outcome,
            Err(error) => self.handle_push_error(&task, &error).await,
        }
    }

    async fn dispatch(&self, task: &SyncQueueItem) -> Result<PushOutcome> {
        match (task.entity_kind, task.operation) {
            (EntityKind::Round, Operation::Create | Operation::Update) => {
                self.push_round(task).await
            }
            (EntityKind::Round, Operation::Delete) => {
                self.push_delete(task, |id| self.remote.delete_round(id)).await
            }
            (EntityKind::Club, Operation::Create | Operation::Update) => self.push_club(task).await,
            (EntityKind::Club, Operation::Delete) => {
                self.push_delete(task, |id| self.remote.delete_club(id)).await
            }
            (EntityKind::Course, Operation::Create) => self.push_course(task).await,
            (EntityKind::Course, Operation::Publish) => self.push_course_publish(task).await,
            (EntityKind::CourseHole, Operation::Update) => self.push_course_hole(task).await,
            (kind, operation) => {
                // Nothing on the wire can express this pairing; keep the
                // task out of rotation rather than retrying it forever.
                let message = format!("unsupported sync operation {operation} for {kind}");
                tracing::error!("{message}");
                let task_id = task.id;
                self.store
                    .with_conn(move |conn| {
                        SqliteQueueRepository::new(conn).mark_rejected(task_id, &message)
                    })
                    .await?;
                Ok(PushOutcome::Failed)
            }
        }
    }

    async fn push_round(&self, task: &SyncQueueItem) -> Result<PushOutcome> {
        let payload: wire::RoundWire = serde_json::from_value(task.payload.clone())
            .map_err(|error| Error::InvalidInput(format!("corrupt round snapshot: {error}")))?;

        let response = match task.operation {
            Operation::Create => {
                let key = idempotency_key(task);
                self.remote.create_round(&payload, &key).await?
            }
            _ => self.remote.update_round(task.entity_id, &payload).await?,
        };
        let server_id = response
            .id
            .ok_or_else(|| Error::InvalidInput("server round response missing id".into()))?;

        if self.task_cancelled(task.id).await? {
            // The record was deleted locally mid-flight; compensate.
            let task_id = task.id;
            self.store
                .with_conn(move |conn| {
                    SqliteQueueRepository::new(conn).requeue_as_delete(task_id, server_id)
                })
                .await?;
            return Ok(PushOutcome::Requeued);
        }

        let local_id = task.entity_id;
        let snapshot_updated_at = task.snapshot_updated_at;
        let holes = self
            .store
            .with_conn(move |conn| db::load_holes(conn, local_id))
            .await?;
        let children: Vec<(i64, i64)> = response
            .holes
            .iter()
            .filter_map(|remote_hole| {
                let local = holes
                    .iter()
                    .find(|hole| hole.hole_number == remote_hole.number)?;
                Some((local.id, remote_hole.id?))
            })
            .collect();

        let ids = ServerIds {
            server_id,
            children,
        };
        let outcome = self
            .store
            .with_conn(move |conn| {
                reconcile::reconcile(
                    conn,
                    &reconcile::ROUND_FAMILY,
                    local_id,
                    &ids,
                    snapshot_updated_at,
                )
            })
            .await?;

        match outcome {
            ReconcileOutcome::Synced => {
                self.complete_task(task.id).await?;
                Ok(PushOutcome::Completed)
            }
            ReconcileOutcome::KeptDirty => {
                self.requeue_round_update(task.id, server_id).await?;
                Ok(PushOutcome::Requeued)
            }
        }
    }

    /// Conflict path: the family moved to server ids but kept local edits;
    /// rebuild the snapshot and go again as an update.
    async fn requeue_round_update(&self, task_id: i64, server_id: i64) -> Result<()> {
        self.store
            .with_conn(move |conn| {
                let repo = SqliteRoundRepository::new(conn);
                let round = repo
                    .get(server_id)?
                    .ok_or_else(|| Error::NotFound(format!("round {server_id}")))?;
                let holes = repo.holes_for_round(server_id)?;
                let payload = serde_json::to_value(wire::round_to_wire(&round, &holes))?;
                conn.execute(
                    "UPDATE rounds SET sync_status = 'pending' WHERE id = ?",
                    rusqlite::params![server_id],
                )?;
                SqliteQueueRepository::new(conn).requeue_as_update(
                    task_id,
                    server_id,
                    &payload,
                    round.updated_at,
                )
            })
            .await
    }

    async fn push_club(&self, task: &SyncQueueItem) -> Result<PushOutcome> {
        let payload: wire::ClubWire = serde_json::from_value(task.payload.clone())
            .map_err(|error| Error::InvalidInput(format!("corrupt club snapshot: {error}")))?;

        let response = match task.operation {
            Operation::Create => {
                let key = idempotency_key(task);
                self.remote.create_club(&payload, &key).await?
            }
            _ => self.remote.update_club(task.entity_id, &payload).await?,
        };
        let server_id = response
            .id
            .ok_or_else(|| Error::InvalidInput("server club response missing id".into()))?;

        if self.task_cancelled(task.id).await? {
            let task_id = task.id;
            self.store
                .with_conn(move |conn| {
                    SqliteQueueRepository::new(conn).requeue_as_delete(task_id, server_id)
                })
                .await?;
            return Ok(PushOutcome::Requeued);
        }

        let local_id = task.entity_id;
        let snapshot_updated_at = task.snapshot_updated_at;
        let outcome = self
            .store
            .with_conn(move |conn| {
                let ids = ServerIds {
                    server_id,
                    children: vec![],
                };
                let outcome = reconcile::reconcile(
                    conn,
                    &reconcile::CLUB_FAMILY,
                    local_id,
                    &ids,
                    snapshot_updated_at,
                )?;
                if local_id != server_id {
                    // Holes referencing the retired club id follow it.
                    db::rewrite_club_references(conn, local_id, server_id)?;
                }
                Ok(outcome)
            })
            .await?;

        match outcome {
            ReconcileOutcome::Synced => {
                self.complete_task(task.id).await?;
                Ok(PushOutcome::Completed)
            }
            ReconcileOutcome::KeptDirty => {
                let task_id = task.id;
                self.store
                    .with_conn(move |conn| {
                        let club = SqliteClubRepository::new(conn)
                            .get(server_id)?
                            .ok_or_else(|| Error::NotFound(format!("club {server_id}")))?;
                        let payload = serde_json::to_value(wire::club_to_wire(&club))?;
                        conn.execute(
                            "UPDATE clubs SET sync_status = 'pending' WHERE id = ?",
                            rusqlite::params![server_id],
                        )?;
                        SqliteQueueRepository::new(conn).requeue_as_update(
                            task_id,
                            server_id,
                            &payload,
                            club.updated_at,
                        )
                    })
                    .await?;
                Ok(PushOutcome::Requeued)
            }
        }
    }

    async fn push_course(&self, task: &SyncQueueItem) -> Result<PushOutcome> {
        let payload: wire::CourseWire = serde_json::from_value(task.payload.clone())
            .map_err(|error| Error::InvalidInput(format!("corrupt course snapshot: {error}")))?;

        let key = idempotency_key(task);
        let response = self.remote.create_course(&payload, &key).await?;
        let server_id = response
            .id
            .ok_or_else(|| Error::InvalidInput("server course response missing id".into()))?;

        let local_id = task.entity_id;
        let snapshot_updated_at = task.snapshot_updated_at;
        let holes = self
            .store
            .with_conn(move |conn| db::load_course_holes(conn, local_id))
            .await?;
        let children: Vec<(i64, i64)> = response
            .holes
            .iter()
            .filter_map(|remote_hole| {
                let local = holes
                    .iter()
                    .find(|hole| hole.hole_number == remote_hole.number)?;
                Some((local.id, remote_hole.id?))
            })
            .collect();

        let ids = ServerIds {
            server_id,
            children,
        };
        let outcome = self
            .store
            .with_conn(move |conn| {
                reconcile::reconcile(
                    conn,
                    &reconcile::COURSE_FAMILY,
                    local_id,
                    &ids,
                    snapshot_updated_at,
                )
            })
            .await?;

        match outcome {
            ReconcileOutcome::Synced => {
                self.complete_task(task.id).await?;
                Ok(PushOutcome::Completed)
            }
            ReconcileOutcome::KeptDirty => {
                // Course metadata is frozen while the create is in flight,
                // so only hole layouts can have moved; each dirty layout
                // re-enters the queue as its own patch.
                let task_id = task.id;
                self.store
                    .with_conn(move |conn| {
                        conn.execute(
                            "UPDATE courses SET sync_status = 'synced' WHERE id = ?",
                            rusqlite::params![server_id],
                        )?;
                        let repo = SqliteCourseRepository::new(conn);
                        for hole in repo.holes_for_course(server_id)? {
                            if hole.updated_at <= snapshot_updated_at {
                                conn.execute(
                                    "UPDATE course_holes SET sync_status = 'synced' WHERE id = ?",
                                    rusqlite::params![hole.id],
                                )?;
                                continue;
                            }
                            queue::enqueue(
                                conn,
                                &queue::EnqueueRequest {
                                    entity_kind: EntityKind::CourseHole,
                                    entity_id: hole.id,
                                    parent_id: Some(server_id),
                                    operation: Operation::Update,
                                    payload: serde_json::to_value(wire::course_hole_to_wire(
                                        &hole,
                                    ))?,
                                    snapshot_updated_at: hole.updated_at,
                                    idempotency_key: None,
                                },
                            )?;
                        }
                        SqliteQueueRepository::new(conn).complete(task_id)
                    })
                    .await?;
                Ok(PushOutcome::Completed)
            }
        }
    }

    async fn push_course_publish(&self, task: &SyncQueueItem) -> Result<PushOutcome> {
        self.remote.publish_course(task.entity_id).await?;
        let entity_id = task.entity_id;
        let snapshot_updated_at = task.snapshot_updated_at;
        self.store
            .with_conn(move |conn| {
                conn.execute(
                    "UPDATE courses SET sync_status = 'synced' WHERE id = ? AND updated_at = ?",
                    rusqlite::params![entity_id, snapshot_updated_at],
                )?;
                Ok(())
            })
            .await?;
        self.complete_task(task.id).await?;
        Ok(PushOutcome::Completed)
    }

    async fn push_course_hole(&self, task: &SyncQueueItem) -> Result<PushOutcome> {
        let payload: wire::CourseHoleWire = serde_json::from_value(task.payload.clone())
            .map_err(|error| Error::InvalidInput(format!("corrupt hole snapshot: {error}")))?;
        let course_server_id = task.parent_id.ok_or_else(|| {
            Error::InvalidInput("course hole task has no parent course".into())
        })?;

        let response = self
            .remote
            .patch_course_hole(course_server_id, payload.number, &payload)
            .await?;
        let server_id = response
            .id
            .ok_or_else(|| Error::InvalidInput("server hole response missing id".into()))?;

        let local_id = task.entity_id;
        let snapshot_updated_at = task.snapshot_updated_at;
        let outcome = self
            .store
            .with_conn(move |conn| {
                let ids = ServerIds {
                    server_id,
                    children: vec![],
                };
                reconcile::reconcile(
                    conn,
                    &reconcile::COURSE_HOLE_FAMILY,
                    local_id,
                    &ids,
                    snapshot_updated_at,
                )
            })
            .await?;

        match outcome {
            ReconcileOutcome::Synced => {
                self.complete_task(task.id).await?;
                Ok(PushOutcome::Completed)
            }
            ReconcileOutcome::KeptDirty => {
                let task_id = task.id;
                self.store
                    .with_conn(move |conn| {
                        let repo = SqliteCourseRepository::new(conn);
                        let holes = repo.holes_for_course(course_server_id)?;
                        let hole = holes
                            .iter()
                            .find(|hole| hole.id == server_id)
                            .ok_or_else(|| Error::NotFound(format!("course hole {server_id}")))?;
                        conn.execute(
                            "UPDATE course_holes SET sync_status = 'pending' WHERE id = ?",
                            rusqlite::params![server_id],
                        )?;
                        let payload = serde_json::to_value(wire::course_hole_to_wire(hole))?;
                        SqliteQueueRepository::new(conn).requeue_as_update(
                            task_id,
                            server_id,
                            &payload,
                            hole.updated_at,
                        )
                    })
                    .await?;
                Ok(PushOutcome::Requeued)
            }
        }
    }

    async fn push_delete<F, Fut>(&self, task: &SyncQueueItem, delete: F) -> Result<PushOutcome>
    where
        F: FnOnce(i64) -> Fut,
        Fut: std::future::Future<Output = Result<()>>,
    {
        match delete(task.entity_id).await {
            Ok(()) => {}
            // Already gone server-side; the intent is satisfied.
            Err(Error::RemoteRejected { status: 404, .. }) => {}
            Err(error) => return Err(error),
        }
        self.complete_task(task.id).await?;
        Ok(PushOutcome::Completed)
    }

    // --- shared helpers ---

    async fn task_cancelled(&self, task_id: i64) -> Result<bool> {
        let task = self
            .store
            .with_conn(move |conn| queue::get_by_id(conn, task_id))
            .await?;
        Ok(task.is_some_and(|task| task.cancelled))
    }

    async fn complete_task(&self, task_id: i64) -> Result<()> {
        self.store
            .with_conn(move |conn| SqliteQueueRepository::new(conn).complete(task_id))
            .await
    }

    async fn handle_push_error(&self, task: &SyncQueueItem, error: &Error) -> PushOutcome {
        let task_id = task.id;
        let max_attempts = self.settings.max_attempts;
        let message = error.to_string();

        if error.is_offline() {
            let released = self
                .store
                .with_conn(move |conn| SqliteQueueRepository::new(conn).release(task_id))
                .await;
            if let Err(release_error) = released {
                tracing::error!("failed to release task {task_id}: {release_error}");
            }
            let _ = self
                .set_entity_status(task.entity_kind, task.entity_id, SyncStatus::Pending)
                .await;
            return PushOutcome::Offline;
        }

        if matches!(error, Error::RemoteTransient(_)) {
            tracing::debug!("transient push failure for task {task_id}: {message}");
            let state = self
                .store
                .with_conn(move |conn| {
                    SqliteQueueRepository::new(conn).record_failure(task_id, &message, max_attempts)
                })
                .await;
            return match state {
                Ok(TaskState::Failed) => {
                    let _ = self
                        .set_entity_status(task.entity_kind, task.entity_id, SyncStatus::Failed)
                        .await;
                    PushOutcome::Failed
                }
                Ok(_) => {
                    let _ = self
                        .set_entity_status(task.entity_kind, task.entity_id, SyncStatus::Pending)
                        .await;
                    PushOutcome::Requeued
                }
                Err(record_error) => {
                    tracing::error!("failed to record push failure: {record_error}");
                    PushOutcome::Requeued
                }
            };
        }

        // Rejected payloads (and anything unexpected) are surfaced and wait
        // for the user; retrying them verbatim cannot succeed.
        tracing::warn!("push rejected for task {task_id}: {message}");
        let marked = self
            .store
            .with_conn(move |conn| SqliteQueueRepository::new(conn).mark_rejected(task_id, &message))
            .await;
        if let Err(mark_error) = marked {
            tracing::error!("failed to mark task {task_id} rejected: {mark_error}");
        }
        let _ = self
            .set_entity_status(task.entity_kind, task.entity_id, SyncStatus::Failed)
            .await;
        PushOutcome::Failed
    }

    /// Flip an entity's status flag without touching its `updated_at`.
    async fn set_entity_status(
        &self,
        kind: EntityKind,
        entity_id: i64,
        status: SyncStatus,
    ) -> Result<()> {
        let table = match kind {
            EntityKind::Round => "rounds",
            EntityKind::Club => "clubs",
            EntityKind::Course => "courses",
            EntityKind::CourseHole => "course_holes",
        };
        self.store
            .with_conn(move |conn| {
                conn.execute(
                    &format!("UPDATE {table} SET sync_status = ? WHERE id = ?"),
                    rusqlite::params![status.as_str(), entity_id],
                )?;
                Ok(())
            })
            .await
    }
}

/// Stable idempotency token for a create task, surviving retries.
fn idempotency_key(task: &SyncQueueItem) -> String {
    task.idempotency_key
        .clone()
        .unwrap_or_else(|| format!("queue-{}-{}", task.entity_kind, task.created_at))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ClubType, FairwayStatus, GirStatus, HoleDraft};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct MockState {
        online: bool,
        fail_next: usize,
        reject_creates: bool,
        create_delay: Option<Duration>,
        next_id: i64,
        next_child_id: i64,
        rounds: HashMap<i64, wire::RoundWire>,
        clubs: HashMap<i64, wire::ClubWire>,
        courses: HashMap<i64, wire::CourseWire>,
        idempotency: HashMap<String, i64>,
        create_attempts: usize,
    }

    struct MockRemote {
        state: StdMutex<MockState>,
    }

    impl MockRemote {
        fn new(online: bool) -> Arc<Self> {
            Arc::new(Self {
                state: StdMutex::new(MockState {
                    online,
                    next_id: 42,
                    next_child_id: 501,
                    ..MockState::default()
                }),
            })
        }

        fn set_online(&self, online: bool) {
            self.state.lock().unwrap().online = online;
        }

        fn fail_next(&self, count: usize) {
            self.state.lock().unwrap().fail_next = count;
        }

        fn check_online(&self) -> Result<()> {
            if self.state.lock().unwrap().online {
                Ok(())
            } else {
                Err(Error::Offline("mock service unreachable".into()))
            }
        }

        /// Mutations additionally consume injected transient failures.
        fn check(&self) -> Result<()> {
            self.check_online()?;
            let mut state = self.state.lock().unwrap();
            if state.fail_next > 0 {
                state.fail_next -= 1;
                return Err(Error::RemoteTransient("injected 503".into()));
            }
            Ok(())
        }

        async fn maybe_delay(&self) {
            let delay = self.state.lock().unwrap().create_delay;
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
        }
    }

    #[async_trait]
    impl RemoteApi for MockRemote {
        async fn create_round(
            &self,
            payload: &wire::RoundWire,
            idempotency_key: &str,
        ) -> Result<wire::RoundWire> {
            self.check()?;
            self.maybe_delay().await;
            let mut state = self.state.lock().unwrap();
            state.create_attempts += 1;
            if state.reject_creates {
                return Err(Error::RemoteRejected {
                    status: 422,
                    message: "round payload rejected".into(),
                });
            }
            if let Some(existing) = state.idempotency.get(idempotency_key) {
                return Ok(state.rounds[existing].clone());
            }
            let id = state.next_id;
            state.next_id += 1;
            let mut stored = payload.clone();
            stored.id = Some(id);
            for hole in &mut stored.holes {
                if hole.id.is_none() {
                    hole.id = Some(state.next_child_id);
                    state.next_child_id += 1;
                }
            }
            state.rounds.insert(id, stored.clone());
            state.idempotency.insert(idempotency_key.to_string(), id);
            Ok(stored)
        }

        async fn update_round(
            &self,
            server_id: i64,
            payload: &wire::RoundWire,
        ) -> Result<wire::RoundWire> {
            self.check()?;
            let mut state = self.state.lock().unwrap();
            if !state.rounds.contains_key(&server_id) {
                return Err(Error::RemoteRejected {
                    status: 404,
                    message: "unknown round".into(),
                });
            }
            let mut stored = payload.clone();
            stored.id = Some(server_id);
            for hole in &mut stored.holes {
                if hole.id.is_none() {
                    hole.id = Some(state.next_child_id);
                    state.next_child_id += 1;
                }
            }
            state.rounds.insert(server_id, stored.clone());
            Ok(stored)
        }

        async fn delete_round(&self, server_id: i64) -> Result<()> {
            self.check()?;
            let mut state = self.state.lock().unwrap();
            if state.rounds.remove(&server_id).is_none() {
                return Err(Error::RemoteRejected {
                    status: 404,
                    message: "unknown round".into(),
                });
            }
            Ok(())
        }

        async fn list_rounds(&self) -> Result<Vec<wire::RoundWire>> {
            self.check_online()?;
            Ok(self.state.lock().unwrap().rounds.values().cloned().collect())
        }

        async fn create_club(
            &self,
            payload: &wire::ClubWire,
            idempotency_key: &str,
        ) -> Result<wire::ClubWire> {
            self.check()?;
            let mut state = self.state.lock().unwrap();
            state.create_attempts += 1;
            if state.reject_creates {
                return Err(Error::RemoteRejected {
                    status: 422,
                    message: "club payload rejected".into(),
                });
            }
            if let Some(existing) = state.idempotency.get(idempotency_key) {
                return Ok(state.clubs[existing].clone());
            }
            let id = state.next_id;
            state.next_id += 1;
            let mut stored = payload.clone();
            stored.id = Some(id);
            state.clubs.insert(id, stored.clone());
            state.idempotency.insert(idempotency_key.to_string(), id);
            Ok(stored)
        }

        async fn update_club(
            &self,
            server_id: i64,
            payload: &wire::ClubWire,
        ) -> Result<wire::ClubWire> {
            self.check()?;
            let mut state = self.state.lock().unwrap();
            if !state.clubs.contains_key(&server_id) {
                return Err(Error::RemoteRejected {
                    status: 404,
                    message: "unknown club".into(),
                });
            }
            let mut stored = payload.clone();
            stored.id = Some(server_id);
            state.clubs.insert(server_id, stored.clone());
            Ok(stored)
        }

        async fn delete_club(&self, server_id: i64) -> Result<()> {
            self.check()?;
            let mut state = self.state.lock().unwrap();
            if state.clubs.remove(&server_id).is_none() {
                return Err(Error::RemoteRejected {
                    status: 404,
                    message: "unknown club".into(),
                });
            }
            Ok(())
        }

        async fn list_clubs(&self) -> Result<Vec<wire::ClubWire>> {
            self.check_online()?;
            Ok(self.state.lock().unwrap().clubs.values().cloned().collect())
        }

        async fn create_course(
            &self,
            payload: &wire::CourseWire,
            idempotency_key: &str,
        ) -> Result<wire::CourseWire> {
            self.check()?;
            let mut state = self.state.lock().unwrap();
            state.create_attempts += 1;
            if let Some(existing) = state.idempotency.get(idempotency_key) {
                return Ok(state.courses[existing].clone());
            }
            let id = state.next_id;
            state.next_id += 1;
            let mut stored = payload.clone();
            stored.id = Some(id);
            for hole in &mut stored.holes {
                if hole.id.is_none() {
                    hole.id = Some(state.next_child_id);
                    state.next_child_id += 1;
                }
            }
            state.courses.insert(id, stored.clone());
            state.idempotency.insert(idempotency_key.to_string(), id);
            Ok(stored)
        }

        async fn get_course(&self, server_id: i64) -> Result<wire::CourseWire> {
            self.check_online()?;
            self.state
                .lock()
                .unwrap()
                .courses
                .get(&server_id)
                .cloned()
                .ok_or(Error::RemoteRejected {
                    status: 404,
                    message: "unknown course".into(),
                })
        }

        async fn patch_course_hole(
            &self,
            course_server_id: i64,
            hole_number: i64,
            payload: &wire::CourseHoleWire,
        ) -> Result<wire::CourseHoleWire> {
            self.check()?;
            let mut state = self.state.lock().unwrap();
            let next_child_id = &mut state.next_child_id;
            let assigned = payload.id.unwrap_or_else(|| {
                let id = *next_child_id;
                *next_child_id += 1;
                id
            });
            let course = state
                .courses
                .get_mut(&course_server_id)
                .ok_or(Error::RemoteRejected {
                    status: 404,
                    message: "unknown course".into(),
                })?;
            let mut stored = payload.clone();
            stored.id = Some(assigned);
            if let Some(existing) = course
                .holes
                .iter_mut()
                .find(|hole| hole.number == hole_number)
            {
                *existing = stored.clone();
            } else {
                course.holes.push(stored.clone());
            }
            Ok(stored)
        }

        async fn publish_course(&self, server_id: i64) -> Result<()> {
            self.check()?;
            let mut state = self.state.lock().unwrap();
            let course = state
                .courses
                .get_mut(&server_id)
                .ok_or(Error::RemoteRejected {
                    status: 404,
                    message: "unknown course".into(),
                })?;
            course.is_published = true;
            Ok(())
        }

        async fn create_user(&self, device_id: &str) -> Result<wire::UserWire> {
            self.check()?;
            Ok(wire::UserWire {
                id: 1,
                device: Some(device_id.to_string()),
            })
        }

        async fn me(&self) -> Result<wire::UserWire> {
            self.check()?;
            Ok(wire::UserWire {
                id: 1,
                device: None,
            })
        }

        async fn ping(&self) -> Result<()> {
            self.check_online()
        }
    }

    fn draft(number: i64) -> HoleDraft {
        HoleDraft {
            hole_number: number,
            par: 4,
            score: 5,
            putts: 2,
            fairway_status: FairwayStatus::Hit,
            gir_status: GirStatus::Missed,
            proximity_to_hole: None,
            club_ids: vec![],
        }
    }

    async fn harness(online: bool) -> (StoreService, Arc<MockRemote>, Arc<SyncEngine>) {
        let store = StoreService::open_in_memory().await.unwrap();
        let remote = MockRemote::new(online);
        let engine = SyncEngine::new(
            store.clone(),
            Arc::clone(&remote) as Arc<dyn RemoteApi>,
            SyncSettings::new("https://api.test"),
        );
        (store, remote, engine)
    }

    async fn clear_backoff(store: &StoreService) {
        store
            .with_conn(|conn| {
                conn.execute("UPDATE sync_queue SET updated_at = 0", [])?;
                Ok(())
            })
            .await
            .unwrap();
    }

    /// Offline creates reach `Synced` with server ids once connectivity
    /// resumes; the provisional round id disappears entirely.
    #[tokio::test(flavor = "multi_thread")]
    async fn offline_round_reaches_server_after_reconnect() {
        let (store, remote, engine) = harness(false).await;

        let round = store.start_round("Pebble Beach", "2026-08-01").await.unwrap();
        for number in 1..=18 {
            store.record_hole(round.id, draft(number)).await.unwrap();
        }

        let summary = engine.run_cycle().await.unwrap();
        assert!(summary.offline);
        let snapshot = engine.status().current();
        assert!(snapshot.offline);
        assert_eq!(snapshot.pending, 1);

        remote.set_online(true);
        let summary = engine.run_cycle().await.unwrap();
        assert_eq!(summary.pushed, 1);

        assert!(store.get_round(-1).await.unwrap().is_none());
        let synced = store.get_round(42).await.unwrap().unwrap();
        assert_eq!(synced.sync_status, SyncStatus::Synced);
        assert_eq!(synced.server_id, Some(42));

        let holes = store.holes_for_round(42).await.unwrap();
        assert_eq!(holes.len(), 18);
        assert!(holes.iter().all(|hole| hole.round_id == 42));
        assert!(holes.iter().all(|hole| hole.id >= 501));
        assert!(holes
            .iter()
            .all(|hole| hole.sync_status == SyncStatus::Synced));

        let snapshot = engine.status().current();
        assert!(!snapshot.offline);
        assert!(snapshot.is_clear());
    }

    /// Two concurrent pushes for the same entity produce one server create.
    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_sync_of_one_entity_creates_once() {
        let (store, remote, engine) = harness(true).await;
        store.start_round("Pebble Beach", "2026-08-01").await.unwrap();

        let first = Arc::clone(&engine);
        let second = Arc::clone(&engine);
        let (a, b) = tokio::join!(
            async move { first.sync_entity(EntityKind::Round, -1).await },
            async move { second.sync_entity(EntityKind::Round, -1).await },
        );

        let completions = [a, b]
            .into_iter()
            .filter(|result| matches!(result, Ok(PushOutcome::Completed)))
            .count();
        assert_eq!(completions, 1);
        assert_eq!(remote.state.lock().unwrap().rounds.len(), 1);
        assert_eq!(store.list_rounds().await.unwrap().len(), 1);
    }

    /// A locally dirty record survives a pull untouched (local-wins).
    #[tokio::test(flavor = "multi_thread")]
    async fn local_edit_survives_pull() {
        let (store, remote, engine) = harness(true).await;
        store.add_club("Driver", ClubType::Driver, None).await.unwrap();
        engine.run_cycle().await.unwrap();
        let synced = store.list_clubs().await.unwrap().remove(0);
        assert_eq!(synced.sync_status, SyncStatus::Synced);

        store
            .update_club(
                synced.id,
                crate::models::ClubPatch {
                    name: Some("Big Dog".into()),
                    ..crate::models::ClubPatch::default()
                },
            )
            .await
            .unwrap();

        // The server copy drifts; a pull must not clobber the local edit
        remote
            .state
            .lock()
            .unwrap()
            .clubs
            .get_mut(&synced.id)
            .unwrap()
            .label = "Server Name".into();

        engine.sync_down().await.unwrap();
        let local = store.get_club(synced.id).await.unwrap().unwrap();
        assert_eq!(local.name, "Big Dog");
        assert_eq!(local.sync_status, SyncStatus::Pending);

        // Once pushed, the edit is the server truth
        engine.run_cycle().await.unwrap();
        let label = remote.state.lock().unwrap().clubs[&synced.id].label.clone();
        assert_eq!(label, "Big Dog");
    }

    /// N transient failures then success converge to the first-try state.
    #[tokio::test(flavor = "multi_thread")]
    async fn transient_failures_converge_on_retry() {
        let (store, remote, engine) = harness(true).await;
        store.add_club("Driver", ClubType::Driver, None).await.unwrap();
        remote.fail_next(2);

        engine.run_cycle().await.unwrap();
        clear_backoff(&store).await;
        engine.run_cycle().await.unwrap();
        clear_backoff(&store).await;
        let summary = engine.run_cycle().await.unwrap();
        assert_eq!(summary.pushed, 1);

        let club = store.list_clubs().await.unwrap().remove(0);
        assert_eq!(club.sync_status, SyncStatus::Synced);
        assert_eq!(club.server_id, Some(42));
        assert_eq!(store.pending_count().await.unwrap(), 0);
        assert_eq!(remote.state.lock().unwrap().clubs.len(), 1);
    }

    /// 4xx rejections are surfaced, kept, and only retried by the user.
    #[tokio::test(flavor = "multi_thread")]
    async fn rejected_create_waits_for_explicit_retry() {
        let (store, remote, engine) = harness(true).await;
        store.add_club("Driver", ClubType::Driver, None).await.unwrap();
        remote.state.lock().unwrap().reject_creates = true;

        let summary = engine.run_cycle().await.unwrap();
        assert_eq!(summary.failed, 1);
        assert_eq!(store.failed_count().await.unwrap(), 1);
        let club = store.list_clubs().await.unwrap().remove(0);
        assert_eq!(club.sync_status, SyncStatus::Failed);
        let attempts = remote.state.lock().unwrap().create_attempts;

        // Cycles do not touch the rejected task
        engine.run_cycle().await.unwrap();
        assert_eq!(remote.state.lock().unwrap().create_attempts, attempts);

        // Explicit retry succeeds once the server accepts
        remote.state.lock().unwrap().reject_creates = false;
        engine.retry_failed().await.unwrap();
        let club = store.list_clubs().await.unwrap().remove(0);
        assert_eq!(club.sync_status, SyncStatus::Synced);
        assert_eq!(store.failed_count().await.unwrap(), 0);
    }

    /// Deleting an entity with an in-flight create schedules a compensating
    /// delete; the server ends up with nothing and nothing resurrects.
    #[tokio::test(flavor = "multi_thread")]
    async fn delete_during_in_flight_create_compensates() {
        let (store, remote, engine) = harness(true).await;
        remote.state.lock().unwrap().create_delay = Some(Duration::from_millis(200));
        store.start_round("Pebble Beach", "2026-08-01").await.unwrap();

        let pusher = Arc::clone(&engine);
        let push = tokio::spawn(async move { pusher.sync_entity(EntityKind::Round, -1).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        store.delete_round(-1).await.unwrap();

        let outcome = push.await.unwrap().unwrap();
        assert_eq!(outcome, PushOutcome::Requeued);
        assert_eq!(remote.state.lock().unwrap().rounds.len(), 1);

        remote.state.lock().unwrap().create_delay = None;
        let summary = engine.run_cycle().await.unwrap();
        assert_eq!(summary.pushed, 1);
        assert!(remote.state.lock().unwrap().rounds.is_empty());
        assert!(store.get_round(-1).await.unwrap().is_none());
        assert!(store.get_round(42).await.unwrap().is_none());
        assert_eq!(store.pending_count().await.unwrap(), 0);
    }

    /// The club scenario: offline shows "1 pending", reconnect clears it,
    /// and the server holds the club exactly once.
    #[tokio::test(flavor = "multi_thread")]
    async fn offline_club_clears_on_reconnect() {
        let (store, remote, engine) = harness(false).await;
        store.add_club("Driver", ClubType::Driver, None).await.unwrap();

        engine.run_cycle().await.unwrap();
        let snapshot = engine.status().current();
        assert!(snapshot.offline);
        assert_eq!(snapshot.pending, 1);

        remote.set_online(true);
        engine.run_cycle().await.unwrap();
        assert!(engine.status().current().is_clear());

        let clubs = remote.list_clubs().await.unwrap();
        assert_eq!(clubs.len(), 1);
        assert_eq!(clubs[0].label, "Driver");
    }

    /// Server records absent locally arrive as `Synced` rows on pull.
    #[tokio::test(flavor = "multi_thread")]
    async fn pull_inserts_unknown_server_rounds() {
        let (store, remote, engine) = harness(true).await;
        remote.state.lock().unwrap().rounds.insert(
            42,
            wire::RoundWire {
                id: Some(42),
                course: "Old Links".into(),
                played_on: "2026-07-15".into(),
                score: 90,
                started_at: 1_700_000_000_000,
                finished_at: Some(1_700_000_400_000),
                holes: vec![],
            },
        );

        let summary = engine.run_cycle().await.unwrap();
        assert_eq!(summary.pulled, 1);
        let round = store.get_round(42).await.unwrap().unwrap();
        assert_eq!(round.sync_status, SyncStatus::Synced);
        assert_eq!(round.course_name, "Old Links");
    }

    /// Course holes patch after their parent has a server id; the deferral
    /// keeps the child out of rotation until then.
    #[tokio::test(flavor = "multi_thread")]
    async fn course_layout_edits_flow_through_parent_then_patch() {
        let (store, remote, engine) = harness(true).await;

        let course = store.create_course("Hilltop", None, 9).await.unwrap();
        store
            .define_course_hole(course.id, 1, 4, Some(390), None)
            .await
            .unwrap();
        engine.run_cycle().await.unwrap();

        let course = store.list_courses().await.unwrap().remove(0);
        assert_eq!(course.sync_status, SyncStatus::Synced);
        assert_eq!(course.server_id, Some(42));

        // Edit a hole on the synced course: one patch task, parent resolved
        let hole = store.course_holes(course.id).await.unwrap().remove(0);
        store
            .update_course_hole(
                hole.id,
                crate::models::HoleDefinitionPatch {
                    par: Some(5),
                    ..crate::models::HoleDefinitionPatch::default()
                },
            )
            .await
            .unwrap();
        let summary = engine.run_cycle().await.unwrap();
        assert_eq!(summary.pushed, 1);

        let patched = store.course_holes(course.id).await.unwrap().remove(0);
        assert_eq!(patched.sync_status, SyncStatus::Synced);
        let server_par = remote.state.lock().unwrap().courses[&42].holes[0].par;
        assert_eq!(server_par, 5);

        // Publish flows as its own action
        store.publish_course(course.id).await.unwrap();
        engine.run_cycle().await.unwrap();
        assert!(remote.state.lock().unwrap().courses[&42].is_published);
    }
}
