use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Persisted refresh-token session. `id` is the refresh token's payload id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub username: String,
    pub refresh_token: String,
    pub client_ip: String,
    pub user_agent: String,
    /// Only ever goes from false to true.
    pub is_blocked: bool,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSessionParams {
    pub id: Uuid,
    pub username: String,
    pub refresh_token: String,
    pub client_ip: String,
    pub user_agent: String,
    pub expires_at: DateTime<Utc>,
}

impl CreateSessionParams {
    pub(crate) fn into_session(self, created_at: DateTime<Utc>) -> Session {
        Session {
            id: self.id,
            username: self.username,
            refresh_token: self.refresh_token,
            client_ip: self.client_ip,
            user_agent: self.user_agent,
            is_blocked: false,
            expires_at: self.expires_at,
            created_at,
        }
    }
}

/// Short, stable log handle for a refresh token. The token itself is never logged.
pub(crate) fn token_fingerprint(token: &str) -> String {
    let hash = blake3::hash(token.as_bytes()).to_hex();
    hash[..16].to_string()
}
