//! Data models for the mirror store.
//!
//! Each module pairs a `FromRow` struct with the query helpers that operate on
//! its table. Timestamps are Unix seconds; list-valued columns (labels,
//! reviewers, assignees) are JSON-encoded strings.

pub mod account;
pub mod board_list;
pub mod issue;
pub mod issue_link;
pub mod merge_request;
pub mod project;
pub mod sync_run;

pub use account::Account;
pub use board_list::{BoardList, NewBoardList};
pub use issue::{Issue, NewIssue};
pub use merge_request::{MergeRequest, MergeRequestState, NewMergeRequest, Reviewer};
pub use project::MonitoredProject;
pub use sync_run::{NewSyncRun, SyncRun, SyncRunStatus};
