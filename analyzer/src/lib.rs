//! Conversion-analysis task service.
//!
//! A client submits a URL, subscribes a live connection to the returned task
//! id, and receives progress and the final findings as a background worker
//! runs. Task state and task-to-connection bindings are persisted so the
//! intake, subscription and worker paths share nothing in memory.

pub mod api;
pub mod catalog;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod initiator;
pub mod invoker;
pub mod push;
pub mod resolve;
pub mod retry;
pub mod state;
pub mod store;
pub mod subscription;
pub mod worker;

pub use error::AppError;
pub use state::AppState;
