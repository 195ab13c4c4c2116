//! Hole model

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::SyncStatus;
use crate::error::Error;
use crate::util::now_millis;

/// Fairway outcome for the tee shot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FairwayStatus {
    Hit,
    MissedLeft,
    MissedRight,
    /// Par 3s have no fairway to hit.
    NotApplicable,
}

impl FairwayStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Hit => "hit",
            Self::MissedLeft => "missed_left",
            Self::MissedRight => "missed_right",
            Self::NotApplicable => "na",
        }
    }
}

impl fmt::Display for FairwayStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FairwayStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hit" => Ok(Self::Hit),
            "missed_left" => Ok(Self::MissedLeft),
            "missed_right" => Ok(Self::MissedRight),
            "na" => Ok(Self::NotApplicable),
            other => Err(Error::InvalidInput(format!(
                "unknown fairway status: {other}"
            ))),
        }
    }
}

/// Green-in-regulation outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GirStatus {
    Hit,
    Missed,
}

impl GirStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Hit => "hit",
            Self::Missed => "missed",
        }
    }
}

impl fmt::Display for GirStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GirStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hit" => Ok(Self::Hit),
            "missed" => Ok(Self::Missed),
            other => Err(Error::InvalidInput(format!("unknown gir status: {other}"))),
        }
    }
}

/// A single hole scored within a round.
///
/// `round_id` always references the parent round's current id space, local or
/// server; reparenting happens atomically with the parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hole {
    pub id: i64,
    pub server_id: Option<i64>,
    pub round_id: i64,
    pub hole_number: i64,
    pub par: i64,
    pub score: i64,
    pub putts: i64,
    pub fairway_status: FairwayStatus,
    pub gir_status: GirStatus,
    /// Approach proximity to the pin in metres, if measured
    pub proximity_to_hole: Option<f64>,
    /// Clubs used on this hole (current id space)
    pub club_ids: Vec<i64>,
    pub created_at: i64,
    pub updated_at: i64,
    pub sync_status: SyncStatus,
}

/// Scoring data captured when a hole is first recorded.
#[derive(Debug, Clone)]
pub struct HoleDraft {
    pub hole_number: i64,
    pub par: i64,
    pub score: i64,
    pub putts: i64,
    pub fairway_status: FairwayStatus,
    pub gir_status: GirStatus,
    pub proximity_to_hole: Option<f64>,
    pub club_ids: Vec<i64>,
}

impl Hole {
    pub fn new(id: i64, round_id: i64, draft: HoleDraft) -> Self {
        let now = now_millis();
        Self {
            id,
            server_id: None,
            round_id,
            hole_number: draft.hole_number,
            par: draft.par,
            score: draft.score,
            putts: draft.putts,
            fairway_status: draft.fairway_status,
            gir_status: draft.gir_status,
            proximity_to_hole: draft.proximity_to_hole,
            club_ids: draft.club_ids,
            created_at: now,
            updated_at: now,
            sync_status: SyncStatus::Pending,
        }
    }
}

/// Partial update applied by `HoleRepository::update`.
#[derive(Debug, Clone, Default)]
pub struct HolePatch {
    pub par: Option<i64>,
    pub score: Option<i64>,
    pub putts: Option<i64>,
    pub fairway_status: Option<FairwayStatus>,
    pub gir_status: Option<GirStatus>,
    pub proximity_to_hole: Option<Option<f64>>,
    pub club_ids: Option<Vec<i64>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft() -> HoleDraft {
        HoleDraft {
            hole_number: 1,
            par: 4,
            score: 5,
            putts: 2,
            fairway_status: FairwayStatus::Hit,
            gir_status: GirStatus::Missed,
            proximity_to_hole: Some(6.5),
            club_ids: vec![-3],
        }
    }

    #[test]
    fn new_hole_references_parent() {
        let hole = Hole::new(-2, -1, draft());
        assert_eq!(hole.round_id, -1);
        assert_eq!(hole.sync_status, SyncStatus::Pending);
        assert_eq!(hole.server_id, None);
    }

    #[test]
    fn fairway_status_round_trips() {
        for status in [
            FairwayStatus::Hit,
            FairwayStatus::MissedLeft,
            FairwayStatus::MissedRight,
            FairwayStatus::NotApplicable,
        ] {
            let parsed: FairwayStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn gir_status_rejects_unknown() {
        assert!("short".parse::<GirStatus>().is_err());
    }
}
