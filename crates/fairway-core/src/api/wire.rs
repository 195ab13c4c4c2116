//! Wire payload types and model mapping
//!
//! The remote service speaks a flat payload vocabulary that does not match
//! the local record fields (`course_name` vs `course`, `total_score` vs
//! `score`, `hole_number` vs `number`, ...). Every rename lives here, once,
//! in both directions; nothing else in the crate translates field names.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::{
    is_provisional, Club, ClubType, Course, FairwayStatus, GirStatus, Hole, HoleDefinition, Round,
    SyncStatus,
};
use crate::util::now_millis;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundWire {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub course: String,
    pub played_on: String,
    pub score: i64,
    pub started_at: i64,
    #[serde(default)]
    pub finished_at: Option<i64>,
    #[serde(default)]
    pub holes: Vec<HoleWire>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HoleWire {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub number: i64,
    pub par: i64,
    pub strokes: i64,
    pub putts: i64,
    pub fairway: String,
    pub gir: String,
    #[serde(default)]
    pub proximity_m: Option<f64>,
    #[serde(default)]
    pub clubs: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClubWire {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub label: String,
    pub category: String,
    #[serde(default)]
    pub loft_deg: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourseWire {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub title: String,
    #[serde(default)]
    pub city: Option<String>,
    pub holes_total: i64,
    pub is_published: bool,
    #[serde(default)]
    pub holes: Vec<CourseHoleWire>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourseHoleWire {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub number: i64,
    pub par: i64,
    #[serde(default)]
    pub yards: Option<i64>,
    #[serde(default)]
    pub geometry: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserWire {
    pub id: i64,
    #[serde(default)]
    pub device: Option<String>,
}

fn require_id(id: Option<i64>, what: &str) -> Result<i64> {
    id.ok_or_else(|| Error::InvalidInput(format!("server payload for {what} is missing an id")))
}

/// Build the outbound round payload from local records.
///
/// Club references still in the provisional id space are withheld; they are
/// re-sent once the club itself has reconciled.
pub fn round_to_wire(round: &Round, holes: &[Hole]) -> RoundWire {
    RoundWire {
        id: round.server_id,
        course: round.course_name.clone(),
        played_on: round.date.clone(),
        score: round.total_score,
        started_at: round.created_at,
        finished_at: round.ended_at,
        holes: holes.iter().map(hole_to_wire).collect(),
    }
}

pub fn hole_to_wire(hole: &Hole) -> HoleWire {
    HoleWire {
        id: hole.server_id,
        number: hole.hole_number,
        par: hole.par,
        strokes: hole.score,
        putts: hole.putts,
        fairway: hole.fairway_status.as_str().to_string(),
        gir: hole.gir_status.as_str().to_string(),
        proximity_m: hole.proximity_to_hole,
        clubs: hole
            .club_ids
            .iter()
            .copied()
            .filter(|id| !is_provisional(*id))
            .collect(),
    }
}

/// Materialize a server-confirmed round (and its holes) as `Synced` records.
pub fn round_from_wire(wire: &RoundWire) -> Result<(Round, Vec<Hole>)> {
    let id = require_id(wire.id, "round")?;
    let now = now_millis();
    let round = Round {
        id,
        server_id: Some(id),
        course_name: wire.course.clone(),
        date: wire.played_on.clone(),
        total_score: wire.score,
        created_at: wire.started_at,
        ended_at: wire.finished_at,
        updated_at: now,
        sync_status: SyncStatus::Synced,
        idempotency_key: uuid::Uuid::now_v7().to_string(),
    };
    let holes = wire
        .holes
        .iter()
        .map(|hole| hole_from_wire(id, hole))
        .collect::<Result<Vec<_>>>()?;
    Ok((round, holes))
}

pub fn hole_from_wire(round_id: i64, wire: &HoleWire) -> Result<Hole> {
    let id = require_id(wire.id, "hole")?;
    let fairway_status: FairwayStatus = wire.fairway.parse()?;
    let gir_status: GirStatus = wire.gir.parse()?;
    let now = now_millis();
    Ok(Hole {
        id,
        server_id: Some(id),
        round_id,
        hole_number: wire.number,
        par: wire.par,
        score: wire.strokes,
        putts: wire.putts,
        fairway_status,
        gir_status,
        proximity_to_hole: wire.proximity_m,
        club_ids: wire.clubs.clone(),
        created_at: now,
        updated_at: now,
        sync_status: SyncStatus::Synced,
    })
}

pub fn club_to_wire(club: &Club) -> ClubWire {
    ClubWire {
        id: club.server_id,
        label: club.name.clone(),
        category: club.club_type.as_str().to_string(),
        loft_deg: club.loft,
    }
}

pub fn club_from_wire(wire: &ClubWire) -> Result<Club> {
    let id = require_id(wire.id, "club")?;
    let club_type: ClubType = wire.category.parse()?;
    let now = now_millis();
    Ok(Club {
        id,
        server_id: Some(id),
        name: wire.label.clone(),
        club_type,
        loft: wire.loft_deg,
        created_at: now,
        updated_at: now,
        sync_status: SyncStatus::Synced,
        idempotency_key: uuid::Uuid::now_v7().to_string(),
    })
}

pub fn course_to_wire(course: &Course, holes: &[HoleDefinition]) -> CourseWire {
    CourseWire {
        id: course.server_id,
        title: course.name.clone(),
        city: course.city.clone(),
        holes_total: course.hole_count,
        is_published: course.published,
        holes: holes.iter().map(course_hole_to_wire).collect(),
    }
}

pub fn course_hole_to_wire(hole: &HoleDefinition) -> CourseHoleWire {
    CourseHoleWire {
        id: hole.server_id,
        number: hole.hole_number,
        par: hole.par,
        yards: hole.yardage,
        geometry: hole.geometry.clone(),
    }
}

pub fn course_from_wire(wire: &CourseWire) -> Result<(Course, Vec<HoleDefinition>)> {
    let id = require_id(wire.id, "course")?;
    let now = now_millis();
    let course = Course {
        id,
        server_id: Some(id),
        name: wire.title.clone(),
        city: wire.city.clone(),
        hole_count: wire.holes_total,
        published: wire.is_published,
        created_at: now,
        updated_at: now,
        sync_status: SyncStatus::Synced,
        idempotency_key: uuid::Uuid::now_v7().to_string(),
    };
    let holes = wire
        .holes
        .iter()
        .map(|hole| course_hole_from_wire(id, hole))
        .collect::<Result<Vec<_>>>()?;
    Ok((course, holes))
}

pub fn course_hole_from_wire(course_id: i64, wire: &CourseHoleWire) -> Result<HoleDefinition> {
    let id = require_id(wire.id, "course hole")?;
    let now = now_millis();
    Ok(HoleDefinition {
        id,
        server_id: Some(id),
        course_id,
        hole_number: wire.number,
        par: wire.par,
        yardage: wire.yards,
        geometry: wire.geometry.clone(),
        created_at: now,
        updated_at: now,
        sync_status: SyncStatus::Synced,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::HoleDraft;
    use pretty_assertions::assert_eq;

    fn sample_hole(id: i64, round_id: i64, number: i64) -> Hole {
        Hole::new(
            id,
            round_id,
            HoleDraft {
                hole_number: number,
                par: 4,
                score: 5,
                putts: 2,
                fairway_status: FairwayStatus::MissedLeft,
                gir_status: GirStatus::Missed,
                proximity_to_hole: Some(7.25),
                club_ids: vec![11, 12],
            },
        )
    }

    #[test]
    fn round_maps_every_field_to_wire() {
        let mut round = Round::new(-1, "Pebble Beach", "2026-08-01");
        round.total_score = 82;
        round.ended_at = Some(round.created_at + 1);
        let holes = vec![sample_hole(-2, -1, 1)];

        let wire = round_to_wire(&round, &holes);
        assert_eq!(wire.id, None);
        assert_eq!(wire.course, "Pebble Beach");
        assert_eq!(wire.played_on, "2026-08-01");
        assert_eq!(wire.score, 82);
        assert_eq!(wire.started_at, round.created_at);
        assert_eq!(wire.finished_at, round.ended_at);
        assert_eq!(wire.holes.len(), 1);
        assert_eq!(wire.holes[0].number, 1);
        assert_eq!(wire.holes[0].strokes, 5);
        assert_eq!(wire.holes[0].fairway, "missed_left");
        assert_eq!(wire.holes[0].clubs, vec![11, 12]);
    }

    #[test]
    fn provisional_club_references_are_withheld() {
        let mut hole = sample_hole(-2, -1, 1);
        hole.club_ids = vec![-3, 11];
        let wire = hole_to_wire(&hole);
        assert_eq!(wire.clubs, vec![11]);
    }

    #[test]
    fn round_wire_round_trips_through_model() {
        let wire = RoundWire {
            id: Some(42),
            course: "Old Links".into(),
            played_on: "2026-07-15".into(),
            score: 90,
            started_at: 1_700_000_000_000,
            finished_at: Some(1_700_000_400_000),
            holes: vec![HoleWire {
                id: Some(501),
                number: 1,
                par: 4,
                strokes: 6,
                putts: 3,
                fairway: "hit".into(),
                gir: "missed".into(),
                proximity_m: None,
                clubs: vec![11],
            }],
        };

        let (round, holes) = round_from_wire(&wire).unwrap();
        assert_eq!(round.id, 42);
        assert_eq!(round.server_id, Some(42));
        assert_eq!(round.sync_status, SyncStatus::Synced);
        assert_eq!(holes[0].round_id, 42);
        assert_eq!(holes[0].id, 501);

        let back = round_to_wire(&round, &holes);
        assert_eq!(back.id, wire.id);
        assert_eq!(back.course, wire.course);
        assert_eq!(back.played_on, wire.played_on);
        assert_eq!(back.score, wire.score);
        assert_eq!(back.finished_at, wire.finished_at);
        assert_eq!(back.holes, wire.holes);
    }

    #[test]
    fn round_from_wire_without_id_is_rejected() {
        let wire = RoundWire {
            id: None,
            course: "x".into(),
            played_on: "2026-01-01".into(),
            score: 0,
            started_at: 0,
            finished_at: None,
            holes: vec![],
        };
        assert!(round_from_wire(&wire).is_err());
    }

    #[test]
    fn club_wire_round_trips_through_model() {
        let wire = ClubWire {
            id: Some(7),
            label: "Driver".into(),
            category: "driver".into(),
            loft_deg: Some(10.5),
        };
        let club = club_from_wire(&wire).unwrap();
        assert_eq!(club.id, 7);
        assert_eq!(club.name, "Driver");
        assert_eq!(club.club_type, ClubType::Driver);
        assert_eq!(club_to_wire(&club), wire);
    }

    #[test]
    fn club_wire_unknown_category_is_rejected() {
        let wire = ClubWire {
            id: Some(7),
            label: "Shovel".into(),
            category: "shovel".into(),
            loft_deg: None,
        };
        assert!(club_from_wire(&wire).is_err());
    }

    #[test]
    fn course_wire_round_trips_with_geometry() {
        let geometry = serde_json::json!({"type": "Feature", "coordinates": [[0.1, 51.2]]});
        let wire = CourseWire {
            id: Some(9),
            title: "Hilltop".into(),
            city: Some("Bath".into()),
            holes_total: 9,
            is_published: true,
            holes: vec![CourseHoleWire {
                id: Some(91),
                number: 1,
                par: 3,
                yards: Some(160),
                geometry: Some(geometry.clone()),
            }],
        };

        let (course, holes) = course_from_wire(&wire).unwrap();
        assert_eq!(course.name, "Hilltop");
        assert_eq!(course.hole_count, 9);
        assert!(course.published);
        assert_eq!(holes[0].course_id, 9);
        assert_eq!(holes[0].geometry, Some(geometry));
        assert_eq!(course_to_wire(&course, &holes), wire);
    }

    #[test]
    fn wire_json_uses_server_field_names() {
        let round = Round::new(-1, "Pebble Beach", "2026-08-01");
        let value = serde_json::to_value(round_to_wire(&round, &[])).unwrap();
        let object = value.as_object().unwrap();
        assert!(object.contains_key("course"));
        assert!(object.contains_key("played_on"));
        assert!(object.contains_key("score"));
        assert!(!object.contains_key("course_name"));
        assert!(!object.contains_key("total_score"));
        assert!(!object.contains_key("id"));
    }
}
