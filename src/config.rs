//! Worker configuration.
//!
//! All settings come from the environment (or CLI flags); the worker carries no
//! config file. The encryption key is validated here so a malformed key fails
//! at startup instead of at the first token decrypt.

use crate::error::SyncError;
use clap::Parser;

/// Default quota threshold below which the transport proactively backs off.
pub const DEFAULT_RATE_LIMIT_LOW_WATER: u32 = 10;

/// Default cap on 429 retries for a single request.
pub const DEFAULT_RATE_LIMIT_MAX_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone, Parser)]
#[command(name = "stalewatch", about = "GitLab staleness mirror worker")]
pub struct Config {
    /// Path to the SQLite database file.
    #[arg(long, env = "STALEWATCH_DB_PATH", default_value = "stalewatch.db")]
    pub db_path: String,

    /// Base URL of the GitLab instance.
    #[arg(
        long,
        env = "STALEWATCH_GITLAB_BASE_URL",
        default_value = "https://gitlab.com"
    )]
    pub gitlab_base_url: String,

    /// OAuth application client ID (used for refresh-token exchange).
    #[arg(long, env = "STALEWATCH_CLIENT_ID", default_value = "")]
    pub client_id: String,

    /// OAuth application client secret.
    #[arg(long, env = "STALEWATCH_CLIENT_SECRET", default_value = "")]
    pub client_secret: String,

    /// AES-256 key for token encryption at rest, as 64 hex characters.
    #[arg(long, env = "STALEWATCH_ENCRYPTION_KEY")]
    pub encryption_key: String,

    /// Cron expression for the periodic sweep (six fields, seconds first).
    #[arg(long, env = "STALEWATCH_SYNC_CRON", default_value = "0 */15 * * * *")]
    pub sync_cron: String,

    /// Idle-days cutoff beyond which a merge request counts as stale.
    #[arg(long, env = "STALEWATCH_STALE_THRESHOLD_DAYS", default_value_t = 3)]
    pub stale_threshold_days: i64,

    /// Remaining-quota threshold that triggers proactive backoff.
    #[arg(
        long,
        env = "STALEWATCH_RATE_LIMIT_LOW_WATER",
        default_value_t = DEFAULT_RATE_LIMIT_LOW_WATER
    )]
    pub rate_limit_low_water: u32,

    /// Maximum attempts for a request that keeps hitting 429.
    #[arg(
        long,
        env = "STALEWATCH_RATE_LIMIT_MAX_ATTEMPTS",
        default_value_t = DEFAULT_RATE_LIMIT_MAX_ATTEMPTS
    )]
    pub rate_limit_max_attempts: u32,

    /// Skip a failed project and continue the run instead of aborting it.
    #[arg(
        long,
        env = "STALEWATCH_CONTINUE_ON_PROJECT_ERROR",
        default_value_t = false
    )]
    pub continue_on_project_error: bool,

    /// HTTP request timeout in seconds.
    #[arg(long, env = "STALEWATCH_HTTP_TIMEOUT_SECS", default_value_t = 30)]
    pub http_timeout_secs: u64,
}

impl Config {
    /// Decode and validate the encryption key.
    pub fn encryption_key_bytes(&self) -> Result<[u8; 32], SyncError> {
        let bytes = hex::decode(&self.encryption_key)
            .map_err(|_| SyncError::config("STALEWATCH_ENCRYPTION_KEY is not valid hex"))?;
        bytes.try_into().map_err(|_| {
            SyncError::config("STALEWATCH_ENCRYPTION_KEY must be 32 bytes (64 hex characters)")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_key(key: &str) -> Config {
        Config::parse_from(["stalewatch", "--encryption-key", key])
    }

    #[test]
    fn test_defaults() {
        let config = config_with_key(&"ab".repeat(32));
        assert_eq!(config.gitlab_base_url, "https://gitlab.com");
        assert_eq!(config.sync_cron, "0 */15 * * * *");
        assert_eq!(config.stale_threshold_days, 3);
        assert_eq!(config.rate_limit_low_water, DEFAULT_RATE_LIMIT_LOW_WATER);
        assert_eq!(
            config.rate_limit_max_attempts,
            DEFAULT_RATE_LIMIT_MAX_ATTEMPTS
        );
        assert!(!config.continue_on_project_error);
    }

    #[test]
    fn test_encryption_key_roundtrip() {
        let config = config_with_key(&"0f".repeat(32));
        let key = config.encryption_key_bytes().unwrap();
        assert_eq!(key, [0x0f; 32]);
    }

    #[test]
    fn test_encryption_key_rejects_bad_input() {
        assert!(config_with_key("not-hex").encryption_key_bytes().is_err());
        // Valid hex, wrong length
        assert!(config_with_key("abcd").encryption_key_bytes().is_err());
    }
}
