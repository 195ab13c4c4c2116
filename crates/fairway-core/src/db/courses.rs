//! Course repository implementation
//!
//! Courses differ from rounds on the wire: the server exposes no endpoint
//! for editing course metadata after creation, only per-hole `PATCH` and a
//! publish action. Metadata edits are therefore accepted while the course
//! create is still queued (they refresh the create snapshot) and rejected
//! once the course is synced.

use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::api::wire;
use crate::error::{Error, Result};
use crate::models::{
    is_provisional, Course, CoursePatch, EntityKind, HoleDefinition, HoleDefinitionPatch,
    Operation, SyncStatus,
};
use crate::util::now_millis;

use super::{meta, queue};

/// Trait for course storage operations
pub trait CourseRepository {
    /// Create a course shell and queue its creation for sync
    fn create(&self, name: &str, city: Option<String>, hole_count: i64) -> Result<Course>;

    /// Get a course by its current id
    fn get(&self, id: i64) -> Result<Option<Course>>;

    /// All courses, alphabetical
    fn list(&self) -> Result<Vec<Course>>;

    /// Apply a metadata patch; only valid while the create is still queued
    fn update(&self, id: i64, patch: &CoursePatch) -> Result<Course>;

    /// Delete a course that was never synced (no remote delete endpoint)
    fn delete(&self, id: i64) -> Result<()>;

    /// Define or redefine a hole's layout; geometry arrives opaquely from
    /// the drawing tool
    fn define_hole(
        &self,
        course_id: i64,
        hole_number: i64,
        par: i64,
        yardage: Option<i64>,
        geometry: Option<serde_json::Value>,
    ) -> Result<HoleDefinition>;

    /// Patch an existing hole definition
    fn update_hole(&self, hole_id: i64, patch: &HoleDefinitionPatch) -> Result<HoleDefinition>;

    /// Hole definitions for a course ordered by hole number
    fn holes_for_course(&self, course_id: i64) -> Result<Vec<HoleDefinition>>;

    /// Mark the course published and queue the publish action
    fn publish(&self, id: i64) -> Result<Course>;
}

/// `SQLite` implementation of `CourseRepository`
pub struct SqliteCourseRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteCourseRepository<'a> {
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_course(row: &Row<'_>) -> rusqlite::Result<Course> {
        let status: String = row.get(9)?;
        Ok(Course {
            id: row.get(0)?,
            server_id: row.get(1)?,
            name: row.get(2)?,
            city: row.get(3)?,
            hole_count: row.get(4)?,
            published: row.get::<_, i64>(5)? != 0,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
            idempotency_key: row.get(8)?,
            sync_status: status.parse().unwrap_or(SyncStatus::Pending),
        })
    }

    fn parse_hole(row: &Row<'_>) -> rusqlite::Result<HoleDefinition> {
        let geometry: Option<String> = row.get(6)?;
        let status: String = row.get(9)?;
        Ok(HoleDefinition {
            id: row.get(0)?,
            server_id: row.get(1)?,
            course_id: row.get(2)?,
            hole_number: row.get(3)?,
            par: row.get(4)?,
            yardage: row.get(5)?,
            geometry: geometry.and_then(|raw| serde_json::from_str(&raw).ok()),
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
            sync_status: status.parse().unwrap_or(SyncStatus::Pending),
        })
    }
}

const COURSE_COLUMNS: &str = "id, server_id, name, city, hole_count, published, created_at, \
                              updated_at, idempotency_key, sync_status";
const COURSE_HOLE_COLUMNS: &str = "id, server_id, course_id, hole_number, par, yardage, geometry, \
                                   created_at, updated_at, sync_status";

fn store_course(conn: &Connection, course: &Course) -> Result<()> {
    let changed = conn.execute(
        "UPDATE courses SET server_id = ?, name = ?, city = ?, hole_count = ?, published = ?,
                            updated_at = ?, sync_status = ?
         WHERE id = ?",
        params![
            course.server_id,
            course.name,
            course.city,
            course.hole_count,
            i64::from(course.published),
            course.updated_at,
            course.sync_status.as_str(),
            course.id
        ],
    )?;
    if changed == 0 {
        return Err(Error::NotFound(format!("course {}", course.id)));
    }
    Ok(())
}

fn store_course_hole(conn: &Connection, hole: &HoleDefinition) -> Result<()> {
    let geometry = hole
        .geometry
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    let changed = conn.execute(
        "UPDATE course_holes SET server_id = ?, course_id = ?, hole_number = ?, par = ?,
                                 yardage = ?, geometry = ?, updated_at = ?, sync_status = ?
         WHERE id = ?",
        params![
            hole.server_id,
            hole.course_id,
            hole.hole_number,
            hole.par,
            hole.yardage,
            geometry,
            hole.updated_at,
            hole.sync_status.as_str(),
            hole.id
        ],
    )?;
    if changed == 0 {
        return Err(Error::NotFound(format!("course hole {}", hole.id)));
    }
    Ok(())
}

pub(crate) fn load_course_holes(conn: &Connection, course_id: i64) -> Result<Vec<HoleDefinition>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COURSE_HOLE_COLUMNS} FROM course_holes WHERE course_id = ? ORDER BY hole_number ASC"
    ))?;
    let holes = stmt
        .query_map(params![course_id], SqliteCourseRepository::parse_hole)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(holes)
}

/// Refresh the create task for a still-provisional course with a snapshot of
/// the whole layout.
fn enqueue_course_create(conn: &Connection, course: &Course) -> Result<()> {
    let holes = load_course_holes(conn, course.id)?;
    let payload = serde_json::to_value(wire::course_to_wire(course, &holes))?;
    queue::enqueue(
        conn,
        &queue::EnqueueRequest {
            entity_kind: EntityKind::Course,
            entity_id: course.id,
            parent_id: None,
            operation: Operation::Create,
            payload,
            snapshot_updated_at: course.updated_at,
            idempotency_key: Some(course.idempotency_key.clone()),
        },
    )?;
    Ok(())
}

/// Queue a per-hole patch against an already-synced course. The task defers
/// until `parent_id` holds the course's server id.
fn enqueue_hole_patch(conn: &Connection, hole: &HoleDefinition) -> Result<()> {
    let payload = serde_json::to_value(wire::course_hole_to_wire(hole))?;
    queue::enqueue(
        conn,
        &queue::EnqueueRequest {
            entity_kind: EntityKind::CourseHole,
            entity_id: hole.id,
            parent_id: Some(hole.course_id),
            operation: Operation::Update,
            payload,
            snapshot_updated_at: hole.updated_at,
            idempotency_key: None,
        },
    )?;
    Ok(())
}

fn insert_course(conn: &Connection, course: &Course) -> Result<()> {
    conn.execute(
        "INSERT INTO courses (id, server_id, name, city, hole_count, published, created_at,
                              updated_at, sync_status, idempotency_key)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            course.id,
            course.server_id,
            course.name,
            course.city,
            course.hole_count,
            i64::from(course.published),
            course.created_at,
            course.updated_at,
            course.sync_status.as_str(),
            course.idempotency_key
        ],
    )?;
    Ok(())
}

fn insert_course_hole(conn: &Connection, hole: &HoleDefinition) -> Result<()> {
    let geometry = hole
        .geometry
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    conn.execute(
        "INSERT INTO course_holes (id, server_id, course_id, hole_number, par, yardage,
                                   geometry, created_at, updated_at, sync_status)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            hole.id,
            hole.server_id,
            hole.course_id,
            hole.hole_number,
            hole.par,
            hole.yardage,
            geometry,
            hole.created_at,
            hole.updated_at,
            hole.sync_status.as_str()
        ],
    )?;
    Ok(())
}

/// Merge one server course into the local store under the local-wins policy.
///
/// The whole family is skipped while the course or any of its hole layouts
/// carries unconfirmed local edits.
pub(crate) fn apply_server_course(
    conn: &Connection,
    course: &Course,
    holes: &[HoleDefinition],
) -> Result<bool> {
    let tx = conn.unchecked_transaction()?;
    if queue::find(&tx, EntityKind::Course, course.id)?.is_some() {
        return Ok(false);
    }
    let repo = SqliteCourseRepository::new(&tx);
    match repo.get(course.id)? {
        None => {
            insert_course(&tx, course)?;
            for hole in holes {
                insert_course_hole(&tx, hole)?;
            }
        }
        Some(local) if local.sync_status == SyncStatus::Synced => {
            let dirty_holes = load_course_holes(&tx, course.id)?
                .iter()
                .any(|hole| hole.sync_status.is_dirty());
            if dirty_holes {
                return Ok(false);
            }
            store_course(&tx, course)?;
            tx.execute(
                "DELETE FROM course_holes WHERE course_id = ?",
                params![course.id],
            )?;
            for hole in holes {
                insert_course_hole(&tx, hole)?;
            }
        }
        Some(_) => return Ok(false),
    }
    tx.commit()?;
    Ok(true)
}

impl CourseRepository for SqliteCourseRepository<'_> {
    fn create(&self, name: &str, city: Option<String>, hole_count: i64) -> Result<Course> {
        if name.trim().is_empty() {
            return Err(Error::InvalidInput("course name cannot be empty".into()));
        }
        if !(1..=36).contains(&hole_count) {
            return Err(Error::InvalidInput(format!(
                "hole count {hole_count} out of range"
            )));
        }
        let tx = self.conn.unchecked_transaction()?;
        let id = meta::next_local_id(&tx)?;
        let course = Course::new(id, name, city, hole_count);
        insert_course(&tx, &course)?;
        enqueue_course_create(&tx, &course)?;
        tx.commit()?;
        Ok(course)
    }

    fn get(&self, id: i64) -> Result<Option<Course>> {
        let course = self
            .conn
            .query_row(
                &format!("SELECT {COURSE_COLUMNS} FROM courses WHERE id = ?"),
                params![id],
                Self::parse_course,
            )
            .optional()?;
        Ok(course)
    }

    fn list(&self) -> Result<Vec<Course>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {COURSE_COLUMNS} FROM courses ORDER BY name COLLATE NOCASE ASC"
        ))?;
        let courses = stmt
            .query_map([], Self::parse_course)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(courses)
    }

    fn update(&self, id: i64, patch: &CoursePatch) -> Result<Course> {
        let tx = self.conn.unchecked_transaction()?;
        let mut course = SqliteCourseRepository::new(&tx)
            .get(id)?
            .ok_or_else(|| Error::NotFound(format!("course {id}")))?;
        if !is_provisional(course.id) {
            return Err(Error::InvalidInput(
                "course metadata cannot change after sync; edit holes instead".into(),
            ));
        }
        if queue::find(&tx, EntityKind::Course, id)?
            .is_some_and(|task| task.state == crate::models::TaskState::InFlight)
        {
            return Err(Error::InvalidInput(
                "course creation is syncing; retry once it settles".into(),
            ));
        }

        if let Some(name) = &patch.name {
            course.name.clone_from(name);
        }
        if let Some(city) = &patch.city {
            course.city.clone_from(city);
        }
        if let Some(hole_count) = patch.hole_count {
            course.hole_count = hole_count;
        }
        course.updated_at = now_millis();

        store_course(&tx, &course)?;
        enqueue_course_create(&tx, &course)?;
        tx.commit()?;
        Ok(course)
    }

    fn delete(&self, id: i64) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        let course = SqliteCourseRepository::new(&tx)
            .get(id)?
            .ok_or_else(|| Error::NotFound(format!("course {id}")))?;
        if !is_provisional(course.id) {
            return Err(Error::InvalidInput(
                "synced courses cannot be deleted from this device".into(),
            ));
        }
        if queue::find(&tx, EntityKind::Course, id)?
            .is_some_and(|task| task.state == crate::models::TaskState::InFlight)
        {
            return Err(Error::InvalidInput(
                "course creation is syncing; retry once it settles".into(),
            ));
        }

        queue::enqueue(
            &tx,
            &queue::EnqueueRequest {
                entity_kind: EntityKind::Course,
                entity_id: course.id,
                parent_id: None,
                operation: Operation::Delete,
                payload: serde_json::Value::Null,
                snapshot_updated_at: now_millis(),
                idempotency_key: None,
            },
        )?;
        tx.execute(
            "DELETE FROM sync_queue WHERE entity_kind = 'course_hole' AND parent_id = ?",
            params![id],
        )?;
        tx.execute("DELETE FROM course_holes WHERE course_id = ?", params![id])?;
        tx.execute("DELETE FROM courses WHERE id = ?", params![id])?;
        tx.commit()?;
        Ok(())
    }

    fn define_hole(
        &self,
        course_id: i64,
        hole_number: i64,
        par: i64,
        yardage: Option<i64>,
        geometry: Option<serde_json::Value>,
    ) -> Result<HoleDefinition> {
        let tx = self.conn.unchecked_transaction()?;
        let mut course = SqliteCourseRepository::new(&tx)
            .get(course_id)?
            .ok_or_else(|| Error::NotFound(format!("course {course_id}")))?;
        if !(1..=course.hole_count).contains(&hole_number) {
            return Err(Error::InvalidInput(format!(
                "hole number {hole_number} out of range for course"
            )));
        }

        let existing: Option<i64> = tx
            .query_row(
                "SELECT id FROM course_holes WHERE course_id = ? AND hole_number = ?",
                params![course_id, hole_number],
                |row| row.get(0),
            )
            .optional()?;

        let hole = if let Some(hole_id) = existing {
            let mut hole = SqliteCourseRepository::new(&tx)
                .get_hole(hole_id)?
                .ok_or_else(|| Error::NotFound(format!("course hole {hole_id}")))?;
            hole.par = par;
            hole.yardage = yardage;
            hole.geometry = geometry;
            hole.updated_at = now_millis();
            if hole.sync_status == SyncStatus::Synced {
                hole.sync_status = SyncStatus::Pending;
            }
            store_course_hole(&tx, &hole)?;
            hole
        } else {
            let id = meta::next_local_id(&tx)?;
            let hole = HoleDefinition::new(id, course_id, hole_number, par, yardage, geometry);
            insert_course_hole(&tx, &hole)?;
            hole
        };

        if is_provisional(course.id) {
            course.updated_at = now_millis();
            store_course(&tx, &course)?;
            enqueue_course_create(&tx, &course)?;
        } else {
            enqueue_hole_patch(&tx, &hole)?;
        }
        tx.commit()?;
        Ok(hole)
    }

    fn update_hole(&self, hole_id: i64, patch: &HoleDefinitionPatch) -> Result<HoleDefinition> {
        let tx = self.conn.unchecked_transaction()?;
        let mut hole = SqliteCourseRepository::new(&tx)
            .get_hole(hole_id)?
            .ok_or_else(|| Error::NotFound(format!("course hole {hole_id}")))?;
        let mut course = SqliteCourseRepository::new(&tx)
            .get(hole.course_id)?
            .ok_or_else(|| Error::NotFound(format!("course {}", hole.course_id)))?;

        if let Some(par) = patch.par {
            hole.par = par;
        }
        if let Some(yardage) = patch.yardage {
            hole.yardage = yardage;
        }
        if let Some(geometry) = &patch.geometry {
            hole.geometry.clone_from(geometry);
        }
        hole.updated_at = now_millis();
        if hole.sync_status == SyncStatus::Synced {
            hole.sync_status = SyncStatus::Pending;
        }
        store_course_hole(&tx, &hole)?;

        if is_provisional(course.id) {
            course.updated_at = now_millis();
            store_course(&tx, &course)?;
            enqueue_course_create(&tx, &course)?;
        } else {
            enqueue_hole_patch(&tx, &hole)?;
        }
        tx.commit()?;
        Ok(hole)
    }

    fn holes_for_course(&self, course_id: i64) -> Result<Vec<HoleDefinition>> {
        load_course_holes(self.conn, course_id)
    }

    fn publish(&self, id: i64) -> Result<Course> {
        let tx = self.conn.unchecked_transaction()?;
        let mut course = SqliteCourseRepository::new(&tx)
            .get(id)?
            .ok_or_else(|| Error::NotFound(format!("course {id}")))?;

        course.published = true;
        course.updated_at = now_millis();
        if course.sync_status == SyncStatus::Synced {
            course.sync_status = SyncStatus::Pending;
        }
        store_course(&tx, &course)?;

        if is_provisional(course.id) {
            // The create payload carries is_published; no separate action.
            enqueue_course_create(&tx, &course)?;
        } else {
            queue::enqueue(
                &tx,
                &queue::EnqueueRequest {
                    entity_kind: EntityKind::Course,
                    entity_id: course.id,
                    parent_id: None,
                    operation: Operation::Publish,
                    payload: serde_json::Value::Null,
                    snapshot_updated_at: course.updated_at,
                    idempotency_key: None,
                },
            )?;
        }
        tx.commit()?;
        Ok(course)
    }
}

impl SqliteCourseRepository<'_> {
    fn get_hole(&self, hole_id: i64) -> Result<Option<HoleDefinition>> {
        let hole = self
            .conn
            .query_row(
                &format!("SELECT {COURSE_HOLE_COLUMNS} FROM course_holes WHERE id = ?"),
                params![hole_id],
                Self::parse_hole,
            )
            .optional()?;
        Ok(hole)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::queue::{QueueRepository, SqliteQueueRepository};
    use crate::db::Database;
    use crate::models::TaskState;

    fn setup() -> Database {
        Database::open_in_memory().unwrap()
    }

    #[test]
    fn defining_holes_refreshes_the_create_snapshot() {
        let db = setup();
        let repo = SqliteCourseRepository::new(db.connection());

        let course = repo.create("Hilltop", Some("Bath".into()), 9).unwrap();
        repo.define_hole(course.id, 1, 4, Some(390), None).unwrap();
        repo.define_hole(course.id, 2, 3, Some(160), None).unwrap();

        let queue_repo = SqliteQueueRepository::new(db.connection());
        let tasks = queue_repo.list_all().unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].operation, Operation::Create);
        assert_eq!(tasks[0].payload["holes"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn redefining_a_hole_upserts_by_number() {
        let db = setup();
        let repo = SqliteCourseRepository::new(db.connection());

        let course = repo.create("Hilltop", None, 9).unwrap();
        let first = repo.define_hole(course.id, 1, 4, Some(390), None).unwrap();
        let second = repo.define_hole(course.id, 1, 5, Some(520), None).unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(repo.holes_for_course(course.id).unwrap().len(), 1);
    }

    #[test]
    fn hole_patch_on_synced_course_defers_on_provisional_parent() {
        let db = setup();
        let repo = SqliteCourseRepository::new(db.connection());

        let course = repo.create("Hilltop", None, 9).unwrap();
        let hole = repo.define_hole(course.id, 1, 4, None, None).unwrap();

        // Simulate the course being synced while the hole keeps its local id
        db.connection()
            .execute("DELETE FROM sync_queue", [])
            .unwrap();
        db.connection()
            .execute(
                "UPDATE courses SET id = 9, server_id = 9, sync_status = 'synced' WHERE id = ?",
                params![course.id],
            )
            .unwrap();
        db.connection()
            .execute(
                "UPDATE course_holes SET course_id = 9 WHERE id = ?",
                params![hole.id],
            )
            .unwrap();

        repo.update_hole(
            hole.id,
            &HoleDefinitionPatch {
                par: Some(5),
                ..HoleDefinitionPatch::default()
            },
        )
        .unwrap();

        let task = queue::find(db.connection(), EntityKind::CourseHole, hole.id)
            .unwrap()
            .unwrap();
        assert_eq!(task.parent_id, Some(9));
        assert_eq!(task.state, TaskState::Pending);
    }

    #[test]
    fn metadata_update_is_rejected_after_sync() {
        let db = setup();
        let repo = SqliteCourseRepository::new(db.connection());

        let course = repo.create("Hilltop", None, 9).unwrap();
        db.connection()
            .execute(
                "UPDATE courses SET id = 9, server_id = 9, sync_status = 'synced' WHERE id = ?",
                params![course.id],
            )
            .unwrap();

        let result = repo.update(
            9,
            &CoursePatch {
                name: Some("New Name".into()),
                ..CoursePatch::default()
            },
        );
        assert!(result.is_err());
    }

    #[test]
    fn publish_of_synced_course_enqueues_publish_task() {
        let db = setup();
        let repo = SqliteCourseRepository::new(db.connection());

        let course = repo.create("Hilltop", None, 9).unwrap();
        db.connection()
            .execute("DELETE FROM sync_queue", [])
            .unwrap();
        db.connection()
            .execute(
                "UPDATE courses SET id = 9, server_id = 9, sync_status = 'synced' WHERE id = ?",
                params![course.id],
            )
            .unwrap();

        let published = repo.publish(9).unwrap();
        assert!(published.published);

        let task = queue::find(db.connection(), EntityKind::Course, 9)
            .unwrap()
            .unwrap();
        assert_eq!(task.operation, Operation::Publish);
    }

    #[test]
    fn delete_of_provisional_course_removes_everything() {
        let db = setup();
        let repo = SqliteCourseRepository::new(db.connection());

        let course = repo.create("Hilltop", None, 9).unwrap();
        repo.define_hole(course.id, 1, 4, None, None).unwrap();
        repo.delete(course.id).unwrap();

        assert!(repo.get(course.id).unwrap().is_none());
        assert!(repo.holes_for_course(course.id).unwrap().is_empty());
        let queue_repo = SqliteQueueRepository::new(db.connection());
        assert!(queue_repo.list_all().unwrap().is_empty());
    }
}
