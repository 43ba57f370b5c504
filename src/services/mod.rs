//! Service layer: token handling, the API client, reconciliation, and the
//! orchestration that ties them together.

pub mod dashboard;
pub mod gitlab_client;
pub mod reconciler;
pub mod scheduler;
pub mod secrets;
pub mod staleness;
pub mod sync_engine;
pub mod token_manager;

pub use gitlab_client::{GitLabClient, GitLabClientConfig};
pub use reconciler::Reconciler;
pub use scheduler::SyncScheduler;
pub use secrets::TokenCipher;
pub use sync_engine::{SyncOrchestrator, SyncOutcome};
pub use token_manager::TokenManager;
