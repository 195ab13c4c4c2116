//! Database layer for Fairway

mod clubs;
mod connection;
mod courses;
pub mod meta;
mod migrations;
pub mod queue;
pub mod reconcile;
mod rounds;

pub use clubs::{ClubRepository, SqliteClubRepository};
pub use connection::Database;
pub use courses::{CourseRepository, SqliteCourseRepository};
pub use queue::{QueueRepository, SqliteQueueRepository};
pub use rounds::{RoundRepository, SqliteRoundRepository};

pub(crate) use clubs::apply_server_club;
pub(crate) use courses::{apply_server_course, load_course_holes};
pub(crate) use rounds::{apply_server_round, load_holes, rewrite_club_references};
