//! Round and hole repository implementation

use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::api::wire;
use crate::error::{Error, Result};
use crate::models::{
    is_provisional, EntityKind, Hole, HoleDraft, HolePatch, Operation, Round, RoundPatch,
    SyncStatus,
};
use crate::util::now_millis;

use super::{meta, queue};

/// Trait for round storage operations
pub trait RoundRepository {
    /// Start a new round locally and queue its creation for sync
    fn create(&self, course_name: &str, date: &str) -> Result<Round>;

    /// Get a round by its current id
    fn get(&self, id: i64) -> Result<Option<Round>>;

    /// Rounds still being played, newest first
    fn active(&self) -> Result<Vec<Round>>;

    /// Finished rounds, newest first
    fn past(&self) -> Result<Vec<Round>>;

    /// All rounds, newest first
    fn list(&self) -> Result<Vec<Round>>;

    /// Apply a patch; a synced round flips back to pending and re-enqueues
    fn update(&self, id: i64, patch: &RoundPatch) -> Result<Round>;

    /// Delete a round and its holes locally, scheduling any remote cleanup
    fn delete(&self, id: i64) -> Result<()>;

    /// Record a hole within a round
    fn record_hole(&self, round_id: i64, draft: HoleDraft) -> Result<Hole>;

    /// Update a hole; dirties the parent round's sync snapshot
    fn update_hole(&self, hole_id: i64, patch: &HolePatch) -> Result<Hole>;

    /// Get a hole by its current id
    fn get_hole(&self, hole_id: i64) -> Result<Option<Hole>>;

    /// Holes of a round ordered by hole number (local read, never network)
    fn holes_for_round(&self, round_id: i64) -> Result<Vec<Hole>>;
}

/// `SQLite` implementation of `RoundRepository`
pub struct SqliteRoundRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteRoundRepository<'a> {
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_round(row: &Row<'_>) -> rusqlite::Result<Round> {
        let status: String = row.get(9)?;
        Ok(Round {
            id: row.get(0)?,
            server_id: row.get(1)?,
            course_name: row.get(2)?,
            date: row.get(3)?,
            total_score: row.get(4)?,
            created_at: row.get(5)?,
            ended_at: row.get(6)?,
            updated_at: row.get(7)?,
            sync_status: status.parse().unwrap_or(SyncStatus::Pending),
            idempotency_key: row.get(8)?,
        })
    }

    fn parse_hole(row: &Row<'_>) -> rusqlite::Result<Hole> {
        let fairway: String = row.get(8)?;
        let gir: String = row.get(9)?;
        let clubs: String = row.get(10)?;
        let status: String = row.get(13)?;
        Ok(Hole {
            id: row.get(0)?,
            server_id: row.get(1)?,
            round_id: row.get(2)?,
            hole_number: row.get(3)?,
            par: row.get(4)?,
            score: row.get(5)?,
            putts: row.get(6)?,
            proximity_to_hole: row.get(7)?,
            fairway_status: fairway
                .parse()
                .unwrap_or(crate::models::FairwayStatus::NotApplicable),
            gir_status: gir.parse().unwrap_or(crate::models::GirStatus::Missed),
            club_ids: serde_json::from_str(&clubs).unwrap_or_default(),
            created_at: row.get(11)?,
            updated_at: row.get(12)?,
            sync_status: status.parse().unwrap_or(SyncStatus::Pending),
        })
    }
}

const ROUND_COLUMNS: &str = "id, server_id, course_name, date, total_score, created_at, ended_at, \
                             updated_at, idempotency_key, sync_status";
const HOLE_COLUMNS: &str = "id, server_id, round_id, hole_number, par, score, putts, \
                            proximity_to_hole, fairway_status, gir_status, club_ids, \
                            created_at, updated_at, sync_status";

fn insert_round(conn: &Connection, round: &Round) -> Result<()> {
    conn.execute(
        "INSERT INTO rounds (id, server_id, course_name, date, total_score, created_at, ended_at,
                             updated_at, sync_status, idempotency_key)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            round.id,
            round.server_id,
            round.course_name,
            round.date,
            round.total_score,
            round.created_at,
            round.ended_at,
            round.updated_at,
            round.sync_status.as_str(),
            round.idempotency_key
        ],
    )?;
    Ok(())
}

fn store_round(conn: &Connection, round: &Round) -> Result<()> {
    let changed = conn.execute(
        "UPDATE rounds SET server_id = ?, course_name = ?, date = ?, total_score = ?,
                           created_at = ?, ended_at = ?, updated_at = ?, sync_status = ?
         WHERE id = ?",
        params![
            round.server_id,
            round.course_name,
            round.date,
            round.total_score,
            round.created_at,
            round.ended_at,
            round.updated_at,
            round.sync_status.as_str(),
            round.id
        ],
    )?;
    if changed == 0 {
        return Err(Error::NotFound(format!("round {}", round.id)));
    }
    Ok(())
}

pub(crate) fn insert_hole(conn: &Connection, hole: &Hole) -> Result<()> {
    conn.execute(
        "INSERT INTO holes (id, server_id, round_id, hole_number, par, score, putts,
                            fairway_status, gir_status, proximity_to_hole, club_ids,
                            created_at, updated_at, sync_status)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            hole.id,
            hole.server_id,
            hole.round_id,
            hole.hole_number,
            hole.par,
            hole.score,
            hole.putts,
            hole.fairway_status.as_str(),
            hole.gir_status.as_str(),
            hole.proximity_to_hole,
            serde_json::to_string(&hole.club_ids)?,
            hole.created_at,
            hole.updated_at,
            hole.sync_status.as_str()
        ],
    )?;
    Ok(())
}

fn store_hole(conn: &Connection, hole: &Hole) -> Result<()> {
    let changed = conn.execute(
        "UPDATE holes SET server_id = ?, round_id = ?, hole_number = ?, par = ?, score = ?,
                          putts = ?, fairway_status = ?, gir_status = ?, proximity_to_hole = ?,
                          club_ids = ?, updated_at = ?, sync_status = ?
         WHERE id = ?",
        params![
            hole.server_id,
            hole.round_id,
            hole.hole_number,
            hole.par,
            hole.score,
            hole.putts,
            hole.fairway_status.as_str(),
            hole.gir_status.as_str(),
            hole.proximity_to_hole,
            serde_json::to_string(&hole.club_ids)?,
            hole.updated_at,
            hole.sync_status.as_str(),
            hole.id
        ],
    )?;
    if changed == 0 {
        return Err(Error::NotFound(format!("hole {}", hole.id)));
    }
    Ok(())
}

pub(crate) fn load_holes(conn: &Connection, round_id: i64) -> Result<Vec<Hole>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {HOLE_COLUMNS} FROM holes WHERE round_id = ? ORDER BY hole_number ASC"
    ))?;
    let holes = stmt
        .query_map(params![round_id], SqliteRoundRepository::parse_hole)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(holes)
}

/// Refresh the queue task for a round with a snapshot of its current family.
///
/// Called after every local mutation of the round or one of its holes; the
/// queue collapses repeated calls into the single task for this round.
pub(crate) fn enqueue_round_sync(conn: &Connection, round: &Round) -> Result<()> {
    let holes = load_holes(conn, round.id)?;
    let payload = serde_json::to_value(wire::round_to_wire(round, &holes))?;
    let operation = if is_provisional(round.id) {
        Operation::Create
    } else {
        Operation::Update
    };
    queue::enqueue(
        conn,
        &queue::EnqueueRequest {
            entity_kind: EntityKind::Round,
            entity_id: round.id,
            parent_id: None,
            operation,
            payload,
            snapshot_updated_at: round.updated_at,
            idempotency_key: Some(round.idempotency_key.clone()),
        },
    )?;
    Ok(())
}

/// Touch the parent round so one snapshot timestamp guards the whole family.
fn dirty_round(round: &mut Round, now: i64) {
    round.updated_at = now;
    if round.sync_status == SyncStatus::Synced {
        round.sync_status = SyncStatus::Pending;
    }
}

impl RoundRepository for SqliteRoundRepository<'_> {
    fn create(&self, course_name: &str, date: &str) -> Result<Round> {
        if course_name.trim().is_empty() {
            return Err(Error::InvalidInput("course name cannot be empty".into()));
        }
        let tx = self.conn.unchecked_transaction()?;
        let id = meta::next_local_id(&tx)?;
        let round = Round::new(id, course_name, date);
        insert_round(&tx, &round)?;
        enqueue_round_sync(&tx, &round)?;
        tx.commit()?;
        Ok(round)
    }

    fn get(&self, id: i64) -> Result<Option<Round>> {
        let round = self
            .conn
            .query_row(
                &format!("SELECT {ROUND_COLUMNS} FROM rounds WHERE id = ?"),
                params![id],
                Self::parse_round,
            )
            .optional()?;
        Ok(round)
    }

    fn active(&self) -> Result<Vec<Round>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ROUND_COLUMNS} FROM rounds WHERE ended_at IS NULL ORDER BY created_at DESC"
        ))?;
        let rounds = stmt
            .query_map([], Self::parse_round)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rounds)
    }

    fn past(&self) -> Result<Vec<Round>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ROUND_COLUMNS} FROM rounds WHERE ended_at IS NOT NULL ORDER BY created_at DESC"
        ))?;
        let rounds = stmt
            .query_map([], Self::parse_round)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rounds)
    }

    fn list(&self) -> Result<Vec<Round>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ROUND_COLUMNS} FROM rounds ORDER BY created_at DESC"
        ))?;
        let rounds = stmt
            .query_map([], Self::parse_round)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rounds)
    }

    fn update(&self, id: i64, patch: &RoundPatch) -> Result<Round> {
        let tx = self.conn.unchecked_transaction()?;
        let mut round = SqliteRoundRepository::new(&tx)
            .get(id)?
            .ok_or_else(|| Error::NotFound(format!("round {id}")))?;

        if let Some(course_name) = &patch.course_name {
            round.course_name.clone_from(course_name);
        }
        if let Some(date) = &patch.date {
            round.date.clone_from(date);
        }
        if let Some(total_score) = patch.total_score {
            round.total_score = total_score;
        }
        if let Some(ended_at) = patch.ended_at {
            round.ended_at = Some(ended_at);
        }
        dirty_round(&mut round, now_millis());

        store_round(&tx, &round)?;
        enqueue_round_sync(&tx, &round)?;
        tx.commit()?;
        Ok(round)
    }

    fn delete(&self, id: i64) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        let round = SqliteRoundRepository::new(&tx)
            .get(id)?
            .ok_or_else(|| Error::NotFound(format!("round {id}")))?;

        let task = queue::find(&tx, EntityKind::Round, id)?;
        if task.is_some() || !is_provisional(round.id) {
            // Collapses a never-pushed create to nothing, supersedes a
            // pending update, or flags an in-flight push for compensation.
            queue::enqueue(
                &tx,
                &queue::EnqueueRequest {
                    entity_kind: EntityKind::Round,
                    entity_id: round.id,
                    parent_id: None,
                    operation: Operation::Delete,
                    payload: serde_json::Value::Null,
                    snapshot_updated_at: now_millis(),
                    idempotency_key: None,
                },
            )?;
        }

        tx.execute("DELETE FROM holes WHERE round_id = ?", params![id])?;
        tx.execute("DELETE FROM rounds WHERE id = ?", params![id])?;
        tx.commit()?;
        Ok(())
    }

    fn record_hole(&self, round_id: i64, draft: HoleDraft) -> Result<Hole> {
        if !(1..=36).contains(&draft.hole_number) {
            return Err(Error::InvalidInput(format!(
                "hole number {} out of range",
                draft.hole_number
            )));
        }
        let tx = self.conn.unchecked_transaction()?;
        let mut round = SqliteRoundRepository::new(&tx)
            .get(round_id)?
            .ok_or_else(|| Error::NotFound(format!("round {round_id}")))?;

        let id = meta::next_local_id(&tx)?;
        let hole = Hole::new(id, round_id, draft);
        insert_hole(&tx, &hole)?;

        round.total_score += hole.score;
        dirty_round(&mut round, now_millis());
        store_round(&tx, &round)?;
        enqueue_round_sync(&tx, &round)?;
        tx.commit()?;
        Ok(hole)
    }

    fn update_hole(&self, hole_id: i64, patch: &HolePatch) -> Result<Hole> {
        let tx = self.conn.unchecked_transaction()?;
        let mut hole = SqliteRoundRepository::new(&tx)
            .get_hole(hole_id)?
            .ok_or_else(|| Error::NotFound(format!("hole {hole_id}")))?;
        let mut round = SqliteRoundRepository::new(&tx)
            .get(hole.round_id)?
            .ok_or_else(|| Error::NotFound(format!("round {}", hole.round_id)))?;

        let old_score = hole.score;
        if let Some(par) = patch.par {
            hole.par = par;
        }
        if let Some(score) = patch.score {
            hole.score = score;
        }
        if let Some(putts) = patch.putts {
            hole.putts = putts;
        }
        if let Some(fairway_status) = patch.fairway_status {
            hole.fairway_status = fairway_status;
        }
        if let Some(gir_status) = patch.gir_status {
            hole.gir_status = gir_status;
        }
        if let Some(proximity) = patch.proximity_to_hole {
            hole.proximity_to_hole = proximity;
        }
        if let Some(club_ids) = &patch.club_ids {
            hole.club_ids.clone_from(club_ids);
        }

        let now = now_millis();
        hole.updated_at = now;
        if hole.sync_status == SyncStatus::Synced {
            hole.sync_status = SyncStatus::Pending;
        }
        store_hole(&tx, &hole)?;

        round.total_score += hole.score - old_score;
        dirty_round(&mut round, now);
        store_round(&tx, &round)?;
        enqueue_round_sync(&tx, &round)?;
        tx.commit()?;
        Ok(hole)
    }

    fn get_hole(&self, hole_id: i64) -> Result<Option<Hole>> {
        let hole = self
            .conn
            .query_row(
                &format!("SELECT {HOLE_COLUMNS} FROM holes WHERE id = ?"),
                params![hole_id],
                Self::parse_hole,
            )
            .optional()?;
        Ok(hole)
    }

    fn holes_for_round(&self, round_id: i64) -> Result<Vec<Hole>> {
        load_holes(self.conn, round_id)
    }
}

/// Merge one server round into the local store under the local-wins policy.
///
/// Inserts the family when it is absent, replaces it when the local copy is
/// `Synced` (clean), and leaves any dirty local copy untouched. Returns
/// whether the server value was applied.
pub(crate) fn apply_server_round(conn: &Connection, round: &Round, holes: &[Hole]) -> Result<bool> {
    let tx = conn.unchecked_transaction()?;
    // Any queued task for this id means unconfirmed local intent, including
    // a compensating delete whose local rows are already gone.
    if queue::find(&tx, EntityKind::Round, round.id)?.is_some() {
        return Ok(false);
    }
    let existing = SqliteRoundRepository::new(&tx).get(round.id)?;

    match existing {
        None => {
            insert_round(&tx, round)?;
            for hole in holes {
                insert_hole(&tx, hole)?;
            }
        }
        Some(local) if local.sync_status == SyncStatus::Synced => {
            store_round(&tx, round)?;
            tx.execute("DELETE FROM holes WHERE round_id = ?", params![round.id])?;
            for hole in holes {
                insert_hole(&tx, hole)?;
            }
        }
        Some(_) => return Ok(false),
    }
    tx.commit()?;
    Ok(true)
}

/// Replace references to a reconciled club id inside hole records.
///
/// Touches affected rounds so their next push carries the resolved ids.
pub(crate) fn rewrite_club_references(
    conn: &Connection,
    old_club_id: i64,
    new_club_id: i64,
) -> Result<usize> {
    let mut stmt = conn.prepare("SELECT id, round_id, club_ids FROM holes")?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let now = now_millis();
    let mut touched_rounds = std::collections::BTreeSet::new();
    let mut rewritten = 0usize;
    for (hole_id, round_id, raw) in rows {
        let mut club_ids: Vec<i64> = serde_json::from_str(&raw).unwrap_or_default();
        if !club_ids.contains(&old_club_id) {
            continue;
        }
        for id in &mut club_ids {
            if *id == old_club_id {
                *id = new_club_id;
            }
        }
        conn.execute(
            "UPDATE holes SET club_ids = ?, updated_at = ? WHERE id = ?",
            params![serde_json::to_string(&club_ids)?, now, hole_id],
        )?;
        touched_rounds.insert(round_id);
        rewritten += 1;
    }

    let repo = SqliteRoundRepository::new(conn);
    for round_id in touched_rounds {
        if let Some(mut round) = repo.get(round_id)? {
            dirty_round(&mut round, now);
            store_round(conn, &round)?;
            enqueue_round_sync(conn, &round)?;
        }
    }
    Ok(rewritten)
}
