//! Club model

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::SyncStatus;
use crate::error::Error;
use crate::util::now_millis;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClubType {
    Driver,
    Wood,
    Hybrid,
    Iron,
    Wedge,
    Putter,
}

impl ClubType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Driver => "driver",
            Self::Wood => "wood",
            Self::Hybrid => "hybrid",
            Self::Iron => "iron",
            Self::Wedge => "wedge",
            Self::Putter => "putter",
        }
    }
}

impl fmt::Display for ClubType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClubType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "driver" => Ok(Self::Driver),
            "wood" => Ok(Self::Wood),
            "hybrid" => Ok(Self::Hybrid),
            "iron" => Ok(Self::Iron),
            "wedge" => Ok(Self::Wedge),
            "putter" => Ok(Self::Putter),
            other => Err(Error::InvalidInput(format!("unknown club type: {other}"))),
        }
    }
}

/// A club in the user's bag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Club {
    pub id: i64,
    pub server_id: Option<i64>,
    pub name: String,
    pub club_type: ClubType,
    /// Loft in degrees, if known
    pub loft: Option<f64>,
    pub created_at: i64,
    pub updated_at: i64,
    pub sync_status: SyncStatus,
    pub idempotency_key: String,
}

impl Club {
    pub fn new(id: i64, name: impl Into<String>, club_type: ClubType, loft: Option<f64>) -> Self {
        let now = now_millis();
        Self {
            id,
            server_id: None,
            name: name.into(),
            club_type,
            loft,
            created_at: now,
            updated_at: now,
            sync_status: SyncStatus::Pending,
            idempotency_key: Uuid::now_v7().to_string(),
        }
    }
}

/// Partial update applied by `ClubRepository::update`.
#[derive(Debug, Clone, Default)]
pub struct ClubPatch {
    pub name: Option<String>,
    pub club_type: Option<ClubType>,
    pub loft: Option<Option<f64>>,
}
