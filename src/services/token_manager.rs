//! OAuth token lifecycle.
//!
//! Every API call goes through [`TokenManager::get_valid_token`], which
//! decrypts the stored access token and transparently runs the refresh
//! exchange when the token is within the expiry margin. Refreshed tokens are
//! re-encrypted and persisted before the plaintext is handed back, so a crash
//! mid-sync never loses a rotated refresh token.

use serde::Deserialize;
use tracing::{debug, info};

use crate::db::DbPool;
use crate::error::SyncError;
use crate::models::account::{self, Account};
use crate::services::secrets::TokenCipher;

/// Refresh when the token expires within this many seconds.
pub const EXPIRY_MARGIN_SECS: i64 = 300;

/// Whether a token expiring at `expires_at` needs a refresh at `now`.
///
/// Tokens without an expiry never need refreshing.
pub fn needs_refresh(now: i64, expires_at: Option<i64>) -> bool {
    match expires_at {
        Some(at) => now + EXPIRY_MARGIN_SECS >= at,
        None => false,
    }
}

/// Successful response from the provider's token endpoint.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: i64,
    /// Unix seconds the token was minted at; falls back to local time.
    created_at: Option<i64>,
}

/// Manages access token validity for all accounts.
pub struct TokenManager {
    pool: DbPool,
    cipher: TokenCipher,
    http: reqwest::Client,
    base_url: String,
    client_id: String,
    client_secret: String,
}

impl TokenManager {
    pub fn new(
        pool: DbPool,
        cipher: TokenCipher,
        http: reqwest::Client,
        base_url: String,
        client_id: String,
        client_secret: String,
    ) -> Self {
        Self {
            pool,
            cipher,
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            client_id,
            client_secret,
        }
    }

    /// Return a plaintext access token for `account_id`, refreshing it first
    /// if it is near expiry.
    pub async fn get_valid_token(&self, account_id: i64) -> Result<String, SyncError> {
        let account = account::get_account(&self.pool, account_id)
            .await?
            .ok_or_else(|| SyncError::not_found_with_id("account", account_id.to_string()))?;

        let now = chrono::Utc::now().timestamp();
        if !needs_refresh(now, account.expires_at) {
            return self.cipher.open(&account.access_token);
        }

        debug!(account_id, expires_at = ?account.expires_at, "access token near expiry, refreshing");
        self.refresh(&account, now).await
    }

    /// Run the refresh exchange and persist the rotated tokens. Returns the
    /// new plaintext access token.
    async fn refresh(&self, account: &Account, now: i64) -> Result<String, SyncError> {
        let refresh_token = match &account.refresh_token {
            Some(sealed) => self.cipher.open(sealed)?,
            None => {
                return Err(SyncError::auth(format!(
                    "Access token for account {} expired and no refresh token is stored",
                    account.id
                )))
            }
        };

        let url = format!("{}/oauth/token", self.base_url);
        let response = self
            .http
            .post(&url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token.as_str()),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::auth(format!(
                "Token refresh for account {} failed with status {}: {}",
                account.id,
                status.as_u16(),
                body
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| SyncError::auth(format!("Invalid token refresh response: {e}")))?;

        let expires_at = token.created_at.unwrap_or(now) + token.expires_in;

        let sealed_access = self.cipher.seal(&token.access_token)?;
        let sealed_refresh = match &token.refresh_token {
            Some(rt) => Some(self.cipher.seal(rt)?),
            None => None,
        };

        account::update_tokens(
            &self.pool,
            account.id,
            &sealed_access,
            sealed_refresh.as_deref(),
            expires_at,
        )
        .await?;

        info!(account_id = account.id, expires_at, "refreshed access token");
        Ok(token.access_token)
    }
}
