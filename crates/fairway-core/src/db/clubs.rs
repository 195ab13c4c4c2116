//! Club repository implementation

use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::api::wire;
use crate::error::{Error, Result};
use crate::models::{is_provisional, Club, ClubPatch, ClubType, EntityKind, Operation, SyncStatus};
use crate::util::now_millis;

use super::{meta, queue};

/// Trait for club storage operations
pub trait ClubRepository {
    /// Add a club to the bag and queue its creation for sync
    fn create(&self, name: &str, club_type: ClubType, loft: Option<f64>) -> Result<Club>;

    /// Get a club by its current id
    fn get(&self, id: i64) -> Result<Option<Club>>;

    /// All clubs, alphabetical
    fn list(&self) -> Result<Vec<Club>>;

    /// Apply a patch; a synced club flips back to pending and re-enqueues
    fn update(&self, id: i64, patch: &ClubPatch) -> Result<Club>;

    /// Delete a club locally, scheduling any remote cleanup
    fn delete(&self, id: i64) -> Result<()>;
}

/// `SQLite` implementation of `ClubRepository`
pub struct SqliteClubRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteClubRepository<'a> {
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_club(row: &Row<'_>) -> rusqlite::Result<Club> {
        let club_type: String = row.get(3)?;
        let status: String = row.get(8)?;
        Ok(Club {
            id: row.get(0)?,
            server_id: row.get(1)?,
            name: row.get(2)?,
            club_type: club_type.parse().unwrap_or(ClubType::Iron),
            loft: row.get(4)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
            idempotency_key: row.get(7)?,
            sync_status: status.parse().unwrap_or(SyncStatus::Pending),
        })
    }
}

const CLUB_COLUMNS: &str =
    "id, server_id, name, club_type, loft, created_at, updated_at, idempotency_key, sync_status";

fn store_club(conn: &Connection, club: &Club) -> Result<()> {
    let changed = conn.execute(
        "UPDATE clubs SET server_id = ?, name = ?, club_type = ?, loft = ?, updated_at = ?,
                          sync_status = ?
         WHERE id = ?",
        params![
            club.server_id,
            club.name,
            club.club_type.as_str(),
            club.loft,
            club.updated_at,
            club.sync_status.as_str(),
            club.id
        ],
    )?;
    if changed == 0 {
        return Err(Error::NotFound(format!("club {}", club.id)));
    }
    Ok(())
}

fn enqueue_club_sync(conn: &Connection, club: &Club) -> Result<()> {
    let payload = serde_json::to_value(wire::club_to_wire(club))?;
    let operation = if is_provisional(club.id) {
        Operation::Create
    } else {
        Operation::Update
    };
    queue::enqueue(
        conn,
        &queue::EnqueueRequest {
            entity_kind: EntityKind::Club,
            entity_id: club.id,
            parent_id: None,
            operation,
            payload,
            snapshot_updated_at: club.updated_at,
            idempotency_key: Some(club.idempotency_key.clone()),
        },
    )?;
    Ok(())
}

fn insert_club(conn: &Connection, club: &Club) -> Result<()> {
    conn.execute(
        "INSERT INTO clubs (id, server_id, name, club_type, loft, created_at, updated_at,
                            sync_status, idempotency_key)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            club.id,
            club.server_id,
            club.name,
            club.club_type.as_str(),
            club.loft,
            club.created_at,
            club.updated_at,
            club.sync_status.as_str(),
            club.idempotency_key
        ],
    )?;
    Ok(())
}

/// Merge one server club into the local store under the local-wins policy.
pub(crate) fn apply_server_club(conn: &Connection, club: &Club) -> Result<bool> {
    // A queued task for this id is unconfirmed local intent, including a
    // compensating delete whose local row is already gone.
    if queue::find(conn, EntityKind::Club, club.id)?.is_some() {
        return Ok(false);
    }
    let existing = SqliteClubRepository::new(conn).get(club.id)?;
    match existing {
        None => insert_club(conn, club)?,
        Some(local) if local.sync_status == SyncStatus::Synced => store_club(conn, club)?,
        Some(_) => return Ok(false),
    }
    Ok(true)
}

impl ClubRepository for SqliteClubRepository<'_> {
    fn create(&self, name: &str, club_type: ClubType, loft: Option<f64>) -> Result<Club> {
        if name.trim().is_empty() {
            return Err(Error::InvalidInput("club name cannot be empty".into()));
        }
        let tx = self.conn.unchecked_transaction()?;
        let id = meta::next_local_id(&tx)?;
        let club = Club::new(id, name, club_type, loft);
        insert_club(&tx, &club)?;
        enqueue_club_sync(&tx, &club)?;
        tx.commit()?;
        Ok(club)
    }

    fn get(&self, id: i64) -> Result<Option<Club>> {
        let club = self
            .conn
            .query_row(
                &format!("SELECT {CLUB_COLUMNS} FROM clubs WHERE id = ?"),
                params![id],
                Self::parse_club,
            )
            .optional()?;
        Ok(club)
    }

    fn list(&self) -> Result<Vec<Club>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {CLUB_COLUMNS} FROM clubs ORDER BY name COLLATE NOCASE ASC"
        ))?;
        let clubs = stmt
            .query_map([], Self::parse_club)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(clubs)
    }

    fn update(&self, id: i64, patch: &ClubPatch) -> Result<Club> {
        let tx = self.conn.unchecked_transaction()?;
        let mut club = SqliteClubRepository::new(&tx)
            .get(id)?
            .ok_or_else(|| Error::NotFound(format!("club {id}")))?;

        if let Some(name) = &patch.name {
            club.name.clone_from(name);
        }
        if let Some(club_type) = patch.club_type {
            club.club_type = club_type;
        }
        if let Some(loft) = patch.loft {
            club.loft = loft;
        }
        club.updated_at = now_millis();
        if club.sync_status == SyncStatus::Synced {
            club.sync_status = SyncStatus::Pending;
        }

        store_club(&tx, &club)?;
        enqueue_club_sync(&tx, &club)?;
        tx.commit()?;
        Ok(club)
    }

    fn delete(&self, id: i64) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        let club = SqliteClubRepository::new(&tx)
            .get(id)?
            .ok_or_else(|| Error::NotFound(format!("club {id}")))?;

        let task = queue::find(&tx, EntityKind::Club, id)?;
        if task.is_some() || !is_provisional(club.id) {
            queue::enqueue(
                &tx,
                &queue::EnqueueRequest {
                    entity_kind: EntityKind::Club,
                    entity_id: club.id,
                    parent_id: None,
                    operation: Operation::Delete,
                    payload: serde_json::Value::Null,
                    snapshot_updated_at: now_millis(),
                    idempotency_key: None,
                },
            )?;
        }

        tx.execute("DELETE FROM clubs WHERE id = ?", params![id])?;
        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::TaskState;

    fn setup() -> Database {
        Database::open_in_memory().unwrap()
    }

    #[test]
    fn create_and_list() {
        let db = setup();
        let repo = SqliteClubRepository::new(db.connection());

        repo.create("Driver", ClubType::Driver, Some(10.5)).unwrap();
        repo.create("7 Iron", ClubType::Iron, Some(34.0)).unwrap();

        let clubs = repo.list().unwrap();
        assert_eq!(clubs.len(), 2);
        assert_eq!(clubs[0].name, "7 Iron");
        assert!(clubs.iter().all(|c| c.sync_status == SyncStatus::Pending));
    }

    #[test]
    fn two_updates_collapse_into_one_task_with_latest_payload() {
        let db = setup();
        let repo = SqliteClubRepository::new(db.connection());

        let club = repo.create("Driver", ClubType::Driver, None).unwrap();
        repo.update(
            club.id,
            &ClubPatch {
                loft: Some(Some(9.5)),
                ..ClubPatch::default()
            },
        )
        .unwrap();
        repo.update(
            club.id,
            &ClubPatch {
                loft: Some(Some(10.5)),
                ..ClubPatch::default()
            },
        )
        .unwrap();

        let task = queue::find(db.connection(), EntityKind::Club, club.id)
            .unwrap()
            .unwrap();
        assert_eq!(task.operation, Operation::Create);
        assert_eq!(task.payload["loft_deg"], 10.5);
        assert_eq!(task.state, TaskState::Pending);
    }

    #[test]
    fn delete_of_synced_club_enqueues_remote_delete() {
        let db = setup();
        let repo = SqliteClubRepository::new(db.connection());

        let club = repo.create("Driver", ClubType::Driver, None).unwrap();
        // Simulate a completed sync
        db.connection()
            .execute("DELETE FROM sync_queue", [])
            .unwrap();
        db.connection()
            .execute(
                "UPDATE clubs SET id = 7, server_id = 7, sync_status = 'synced' WHERE id = ?",
                params![club.id],
            )
            .unwrap();

        repo.delete(7).unwrap();

        let task = queue::find(db.connection(), EntityKind::Club, 7)
            .unwrap()
            .unwrap();
        assert_eq!(task.operation, Operation::Delete);
        assert!(repo.get(7).unwrap().is_none());
    }
}
