//! fairway-core - Core library for Fairway
//!
//! This crate contains the shared models, local store, and offline-first
//! sync engine used by all Fairway interfaces. Entity mutations are written
//! through to SQLite and queued durably; the sync engine reconciles them
//! with the remote service whenever connectivity allows.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod session;
pub mod sync;
pub mod util;

pub use config::SyncSettings;
pub use error::{Error, Result};
pub use models::{Club, Course, Hole, Round, SyncStatus};
pub use services::StoreService;
pub use session::Session;
pub use sync::{status::SyncStatusSnapshot, SyncEngine};
