//! Async service wrappers shared by all clients

mod store;

pub use store::StoreService;
