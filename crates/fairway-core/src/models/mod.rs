//! Data models for Fairway

mod club;
mod course;
mod hole;
mod queue;
mod round;
mod status;

pub use club::{Club, ClubPatch, ClubType};
pub use course::{Course, CoursePatch, HoleDefinition, HoleDefinitionPatch};
pub use hole::{FairwayStatus, GirStatus, Hole, HoleDraft, HolePatch};
pub use queue::{SyncQueueItem, TaskState};
pub use round::{Round, RoundPatch};
pub use status::{is_provisional, EntityKind, Operation, SyncStatus};
