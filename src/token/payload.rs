use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Error;

/// Identity claim carried by every access and refresh token.
///
/// The `id` doubles as the session key when the token is a refresh token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    pub id: Uuid,
    pub username: String,
    pub issued_at: DateTime<Utc>,
    pub expired_at: DateTime<Utc>,
}

impl Payload {
    pub fn new(username: &str, duration: Duration) -> Result<Self, Error> {
        Self::issued_at(username, duration, Utc::now())
    }

    /// Payload issued at a given instant. A negative `duration` yields an
    /// already expired payload.
    pub fn issued_at(
        username: &str,
        duration: Duration,
        issued_at: DateTime<Utc>,
    ) -> Result<Self, Error> {
        let expired_at = issued_at
            .checked_add_signed(duration)
            .ok_or_else(|| Error::InvalidArgument("token duration out of range".to_string()))?;

        Ok(Self {
            id: Uuid::now_v7(),
            username: username.to_string(),
            issued_at,
            expired_at,
        })
    }

    pub fn validate(&self) -> Result<(), Error> {
        if Utc::now() > self.expired_at {
            return Err(Error::ExpiredToken);
        }
        Ok(())
    }
}
