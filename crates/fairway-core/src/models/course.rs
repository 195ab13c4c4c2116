//! Course and course-hole models

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::SyncStatus;
use crate::util::now_millis;

/// A course built in the course editor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Course {
    pub id: i64,
    pub server_id: Option<i64>,
    pub name: String,
    pub city: Option<String>,
    pub hole_count: i64,
    pub published: bool,
    pub created_at: i64,
    pub updated_at: i64,
    pub sync_status: SyncStatus,
    pub idempotency_key: String,
}

impl Course {
    pub fn new(id: i64, name: impl Into<String>, city: Option<String>, hole_count: i64) -> Self {
        let now = now_millis();
        Self {
            id,
            server_id: None,
            name: name.into(),
            city,
            hole_count,
            published: false,
            created_at: now,
            updated_at: now,
            sync_status: SyncStatus::Pending,
            idempotency_key: Uuid::now_v7().to_string(),
        }
    }
}

/// Partial update applied by `CourseRepository::update`.
#[derive(Debug, Clone, Default)]
pub struct CoursePatch {
    pub name: Option<String>,
    pub city: Option<Option<String>>,
    pub hole_count: Option<i64>,
}

/// Layout of one hole on a course.
///
/// `geometry` is the feature payload emitted by the external drawing tool;
/// it is stored and forwarded verbatim, never interpreted here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HoleDefinition {
    pub id: i64,
    pub server_id: Option<i64>,
    pub course_id: i64,
    pub hole_number: i64,
    pub par: i64,
    pub yardage: Option<i64>,
    pub geometry: Option<serde_json::Value>,
    pub created_at: i64,
    pub updated_at: i64,
    pub sync_status: SyncStatus,
}

impl HoleDefinition {
    pub fn new(
        id: i64,
        course_id: i64,
        hole_number: i64,
        par: i64,
        yardage: Option<i64>,
        geometry: Option<serde_json::Value>,
    ) -> Self {
        let now = now_millis();
        Self {
            id,
            server_id: None,
            course_id,
            hole_number,
            par,
            yardage,
            geometry,
            created_at: now,
            updated_at: now,
            sync_status: SyncStatus::Pending,
        }
    }
}

/// Partial update applied by `CourseRepository::update_hole`.
#[derive(Debug, Clone, Default)]
pub struct HoleDefinitionPatch {
    pub par: Option<i64>,
    pub yardage: Option<Option<i64>>,
    pub geometry: Option<Option<serde_json::Value>>,
}
