//! Stalewatch - GitLab activity mirror for stale merge request review.
//!
//! Periodically pulls merge requests, issues, issue links, and board
//! configuration for monitored GitLab projects into a local SQLite mirror,
//! then serves staleness-annotated views over that mirror.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;

pub use config::Config;
pub use error::SyncError;
