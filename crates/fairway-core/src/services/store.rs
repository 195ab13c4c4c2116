//! Shared store service wrapper used across clients.

use std::path::PathBuf;
use std::sync::Arc;

use rusqlite::Connection;
use tokio::sync::Mutex;

use crate::db::{
    ClubRepository, CourseRepository, Database, QueueRepository, RoundRepository,
    SqliteClubRepository, SqliteCourseRepository, SqliteQueueRepository, SqliteRoundRepository,
};
use crate::error::Result;
use crate::models::{
    Club, ClubPatch, ClubType, Course, CoursePatch, Hole, HoleDefinition, HoleDefinitionPatch,
    HoleDraft, HolePatch, Round, RoundPatch, SyncQueueItem,
};

/// Thread-safe service over the local store and its repositories.
///
/// The single writer lives behind an async mutex; network I/O must never
/// run while the lock is held.
#[derive(Clone)]
pub struct StoreService {
    db: Arc<Mutex<Database>>,
}

impl StoreService {
    /// Open a store at the given filesystem path.
    pub async fn open_path(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        let db = Database::open(&db_path)?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }

    /// Open an in-memory store (primarily for tests).
    pub async fn open_in_memory() -> Result<Self> {
        let db = Database::open_in_memory()?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }

    /// Run a closure against the locked connection.
    pub async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let db = self.db.lock().await;
        f(db.connection())
    }

    // --- rounds ---

    /// Start a new round.
    pub async fn start_round(&self, course_name: &str, date: &str) -> Result<Round> {
        self.with_conn(|conn| SqliteRoundRepository::new(conn).create(course_name, date))
            .await
    }

    /// Fetch a round by id.
    pub async fn get_round(&self, id: i64) -> Result<Option<Round>> {
        self.with_conn(move |conn| SqliteRoundRepository::new(conn).get(id))
            .await
    }

    /// Rounds still being played.
    pub async fn active_rounds(&self) -> Result<Vec<Round>> {
        self.with_conn(|conn| SqliteRoundRepository::new(conn).active())
            .await
    }

    /// Finished rounds.
    pub async fn past_rounds(&self) -> Result<Vec<Round>> {
        self.with_conn(|conn| SqliteRoundRepository::new(conn).past())
            .await
    }

    /// All rounds.
    pub async fn list_rounds(&self) -> Result<Vec<Round>> {
        self.with_conn(|conn| SqliteRoundRepository::new(conn).list())
            .await
    }

    /// Patch a round.
    pub async fn update_round(&self, id: i64, patch: RoundPatch) -> Result<Round> {
        self.with_conn(move |conn| SqliteRoundRepository::new(conn).update(id, &patch))
            .await
    }

    /// Delete a round and its holes.
    pub async fn delete_round(&self, id: i64) -> Result<()> {
        self.with_conn(move |conn| SqliteRoundRepository::new(conn).delete(id))
            .await
    }

    /// Record a hole in a round.
    pub async fn record_hole(&self, round_id: i64, draft: HoleDraft) -> Result<Hole> {
        self.with_conn(move |conn| SqliteRoundRepository::new(conn).record_hole(round_id, draft))
            .await
    }

    /// Patch a hole.
    pub async fn update_hole(&self, hole_id: i64, patch: HolePatch) -> Result<Hole> {
        self.with_conn(move |conn| SqliteRoundRepository::new(conn).update_hole(hole_id, &patch))
            .await
    }

    /// Holes of a round.
    pub async fn holes_for_round(&self, round_id: i64) -> Result<Vec<Hole>> {
        self.with_conn(move |conn| SqliteRoundRepository::new(conn).holes_for_round(round_id))
            .await
    }

    // --- clubs ---

    /// Add a club to the bag.
    pub async fn add_club(
        &self,
        name: &str,
        club_type: ClubType,
        loft: Option<f64>,
    ) -> Result<Club> {
        self.with_conn(move |conn| SqliteClubRepository::new(conn).create(name, club_type, loft))
            .await
    }

    /// Fetch a club by id.
    pub async fn get_club(&self, id: i64) -> Result<Option<Club>> {
        self.with_conn(move |conn| SqliteClubRepository::new(conn).get(id))
            .await
    }

    /// All clubs.
    pub async fn list_clubs(&self) -> Result<Vec<Club>> {
        self.with_conn(|conn| SqliteClubRepository::new(conn).list())
            .await
    }

    /// Patch a club.
    pub async fn update_club(&self, id: i64, patch: ClubPatch) -> Result<Club> {
        self.with_conn(move |conn| SqliteClubRepository::new(conn).update(id, &patch))
            .await
    }

    /// Delete a club.
    pub async fn delete_club(&self, id: i64) -> Result<()> {
        self.with_conn(move |conn| SqliteClubRepository::new(conn).delete(id))
            .await
    }

    // --- courses ---

    /// Create a course shell.
    pub async fn create_course(
        &self,
        name: &str,
        city: Option<String>,
        hole_count: i64,
    ) -> Result<Course> {
        self.with_conn(move |conn| SqliteCourseRepository::new(conn).create(name, city, hole_count))
            .await
    }

    /// Fetch a course by id.
    pub async fn get_course(&self, id: i64) -> Result<Option<Course>> {
        self.with_conn(move |conn| SqliteCourseRepository::new(conn).get(id))
            .await
    }

    /// All courses.
    pub async fn list_courses(&self) -> Result<Vec<Course>> {
        self.with_conn(|conn| SqliteCourseRepository::new(conn).list())
            .await
    }

    /// Patch course metadata (only while the create is still queued).
    pub async fn update_course(&self, id: i64, patch: CoursePatch) -> Result<Course> {
        self.with_conn(move |conn| SqliteCourseRepository::new(conn).update(id, &patch))
            .await
    }

    /// Define or redefine a hole layout.
    pub async fn define_course_hole(
        &self,
        course_id: i64,
        hole_number: i64,
        par: i64,
        yardage: Option<i64>,
        geometry: Option<serde_json::Value>,
    ) -> Result<HoleDefinition> {
        self.with_conn(move |conn| {
            SqliteCourseRepository::new(conn).define_hole(
                course_id,
                hole_number,
                par,
                yardage,
                geometry,
            )
        })
        .await
    }

    /// Patch a hole layout.
    pub async fn update_course_hole(
        &self,
        hole_id: i64,
        patch: HoleDefinitionPatch,
    ) -> Result<HoleDefinition> {
        self.with_conn(move |conn| SqliteCourseRepository::new(conn).update_hole(hole_id, &patch))
            .await
    }

    /// Hole layouts for a course.
    pub async fn course_holes(&self, course_id: i64) -> Result<Vec<HoleDefinition>> {
        self.with_conn(move |conn| SqliteCourseRepository::new(conn).holes_for_course(course_id))
            .await
    }

    /// Publish a course.
    pub async fn publish_course(&self, id: i64) -> Result<Course> {
        self.with_conn(move |conn| SqliteCourseRepository::new(conn).publish(id))
            .await
    }

    // --- sync queue ---

    /// Tasks awaiting or denied confirmation.
    pub async fn queue_items(&self) -> Result<Vec<SyncQueueItem>> {
        self.with_conn(|conn| SqliteQueueRepository::new(conn).list_all())
            .await
    }

    /// Count of tasks still awaiting confirmation.
    pub async fn pending_count(&self) -> Result<usize> {
        self.with_conn(|conn| SqliteQueueRepository::new(conn).pending_count())
            .await
    }

    /// Count of tasks marked failed.
    pub async fn failed_count(&self) -> Result<usize> {
        self.with_conn(|conn| SqliteQueueRepository::new(conn).failed_count())
            .await
    }

    /// Put failed tasks back in rotation.
    pub async fn retry_failed(&self) -> Result<usize> {
        self.with_conn(|conn| SqliteQueueRepository::new(conn).reset_failed())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread")]
    async fn in_memory_round_lifecycle() {
        let store = StoreService::open_in_memory().await.unwrap();

        let round = store.start_round("Pebble Beach", "2026-08-01").await.unwrap();
        assert_eq!(round.id, -1);
        assert_eq!(store.active_rounds().await.unwrap().len(), 1);
        assert_eq!(store.pending_count().await.unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_clones_share_one_store() {
        let store = StoreService::open_in_memory().await.unwrap();
        let other = store.clone();

        store.add_club("Driver", ClubType::Driver, None).await.unwrap();
        assert_eq!(other.list_clubs().await.unwrap().len(), 1);
    }
}
