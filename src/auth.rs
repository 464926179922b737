//! Registration, login, refresh-token renewal and bearer authorization.
//!
//! A login resolves the user, checks the password against the stored hash,
//! then issues a short-lived access token and a long-lived refresh token
//! and stores a [`Session`](crate::Session) keyed by the refresh token's
//! payload id. Renewal trades a refresh token for a new access token only
//! if the token verifies *and* its session is present, unblocked, owned by
//! the same user, still holding that exact token, and unexpired.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    CreateSessionParams, CreateUserParams, CreateUserRequest, Error, Maker, Payload,
    SessionAdapter, User, UserAdapter, session::token_fingerprint,
};

const AUTHORIZATION_TYPE_BEARER: &str = "bearer";

/// Password hashing capability supplied by the caller.
pub trait PasswordHasher: Send + Sync {
    fn hash(&self, password: &str) -> Result<String, Error>;
    fn verify(&self, password: &str, hashed_password: &str) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenDurations {
    pub access: Duration,
    pub refresh: Duration,
}

impl Default for TokenDurations {
    fn default() -> Self {
        Self {
            access: Duration::minutes(15),
            refresh: Duration::hours(24),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientMetadata {
    pub client_ip: String,
    pub user_agent: String,
}

#[derive(Debug, Clone)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
    pub client: ClientMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginResponse {
    pub session_id: Uuid,
    pub user: User,
    pub access_token: String,
    pub access_token_expires_at: DateTime<Utc>,
    pub refresh_token: String,
    pub refresh_token_expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenewedAccessToken {
    pub access_token: String,
    pub access_token_expires_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct AuthService {
    maker: Arc<dyn Maker>,
    sessions: Arc<dyn SessionAdapter>,
    users: Arc<dyn UserAdapter>,
    hasher: Arc<dyn PasswordHasher>,
    durations: TokenDurations,
}

impl AuthService {
    pub fn new(
        maker: Arc<dyn Maker>,
        sessions: Arc<dyn SessionAdapter>,
        users: Arc<dyn UserAdapter>,
        hasher: Arc<dyn PasswordHasher>,
        durations: TokenDurations,
    ) -> Self {
        Self {
            maker,
            sessions,
            users,
            hasher,
            durations,
        }
    }

    pub fn maker(&self) -> &dyn Maker {
        self.maker.as_ref()
    }

    /// Registers a user, storing only the hash of the password.
    #[tracing::instrument(skip_all, fields(username = %request.username))]
    pub async fn create_user(&self, request: CreateUserRequest) -> Result<User, Error> {
        request.validate()?;

        let hashed_password = self.hasher.hash(&request.password)?;
        let user = self
            .users
            .create_user(CreateUserParams {
                username: request.username,
                hashed_password,
                full_name: request.full_name,
                email: request.email,
            })
            .await?;

        tracing::info!("user created");
        Ok(user)
    }

    pub async fn get_user(&self, username: &str) -> Result<User, Error> {
        self.users.get_user(username).await
    }

    /// `NotFound` for an unknown username, `Permission` for a wrong password.
    #[tracing::instrument(skip_all, fields(username = %request.username))]
    pub async fn login(&self, request: LoginRequest) -> Result<LoginResponse, Error> {
        let user = self.users.get_user(&request.username).await?;

        if !self
            .hasher
            .verify(&request.password, &user.hashed_password)
        {
            tracing::info!("password mismatch");
            return Err(Error::Permission("password mismatch".to_string()));
        }

        let (access_token, access_payload) = self
            .maker
            .create_token(&user.username, self.durations.access)?;
        let (refresh_token, refresh_payload) = self
            .maker
            .create_token(&user.username, self.durations.refresh)?;

        let session = self
            .sessions
            .create_session(CreateSessionParams {
                id: refresh_payload.id,
                username: user.username.clone(),
                refresh_token: refresh_token.clone(),
                client_ip: request.client.client_ip,
                user_agent: request.client.user_agent,
                expires_at: refresh_payload.expired_at,
            })
            .await?;

        tracing::info!(
            session_id = %session.id,
            token = %token_fingerprint(&refresh_token),
            "session created"
        );

        Ok(LoginResponse {
            session_id: session.id,
            user,
            access_token,
            access_token_expires_at: access_payload.expired_at,
            refresh_token,
            refresh_token_expires_at: refresh_payload.expired_at,
        })
    }

    /// Exchanges a refresh token for a new access token.
    ///
    /// Every gate is checked in order and the first failure is returned
    /// as-is: token errors from verification, `NotFound` for a missing
    /// session, `Permission` for a blocked, foreign, superseded or expired
    /// session.
    #[tracing::instrument(skip_all, fields(token = %token_fingerprint(refresh_token)))]
    pub async fn renew_access_token(&self, refresh_token: &str) -> Result<RenewedAccessToken, Error> {
        let payload = self.maker.verify_token(refresh_token)?;

        let session = self.sessions.get_session(payload.id).await?;

        if session.is_blocked {
            tracing::info!(session_id = %session.id, "renewal on blocked session");
            return Err(Error::Permission("refresh token blocked".to_string()));
        }

        if session.username != payload.username {
            tracing::warn!(session_id = %session.id, "renewal with mismatched username");
            return Err(Error::Permission("mismatched user names".to_string()));
        }

        if session.refresh_token != refresh_token {
            tracing::warn!(session_id = %session.id, "renewal with superseded refresh token");
            return Err(Error::Permission(
                "session refresh token does not match".to_string(),
            ));
        }

        if session.is_expired() {
            return Err(Error::Permission("session expired".to_string()));
        }

        let (access_token, access_payload) = self
            .maker
            .create_token(&session.username, self.durations.access)?;

        Ok(RenewedAccessToken {
            access_token,
            access_token_expires_at: access_payload.expired_at,
        })
    }

    /// Blocks the session so its refresh token can no longer be renewed.
    pub async fn revoke_session(&self, session_id: Uuid) -> Result<(), Error> {
        self.sessions.block_session(session_id).await?;
        tracing::info!(%session_id, "session blocked");
        Ok(())
    }
}

/// Verifies an `authorization` header of the form `bearer <token>`.
pub fn authorize_bearer(maker: &dyn Maker, header: &str) -> Result<Payload, Error> {
    let mut fields = header.split_whitespace();

    let Some(kind) = fields.next() else {
        return Err(Error::Permission(
            "authorization header not found".to_string(),
        ));
    };
    if !kind.eq_ignore_ascii_case(AUTHORIZATION_TYPE_BEARER) {
        return Err(Error::Permission(format!(
            "unsupported authorization type: {}",
            kind.to_ascii_lowercase()
        )));
    }

    let (Some(token), None) = (fields.next(), fields.next()) else {
        return Err(Error::Permission(
            "invalid authorization header format".to_string(),
        ));
    };

    maker.verify_token(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::{JwtMaker, test_util::random_string};

    fn maker() -> JwtMaker {
        JwtMaker::new(&random_string(32)).unwrap()
    }

    #[test]
    fn test_authorize_bearer() {
        let maker = maker();
        let (token, issued) = maker.create_token("alice", Duration::minutes(1)).unwrap();

        let payload = authorize_bearer(&maker, &format!("Bearer {}", token)).unwrap();
        assert_eq!(payload, issued);
        let payload = authorize_bearer(&maker, &format!("bearer   {}", token)).unwrap();
        assert_eq!(payload.username, "alice");
    }

    #[test]
    fn test_authorize_bearer_rejects_bad_headers() {
        let maker = maker();
        let (token, _) = maker.create_token("alice", Duration::minutes(1)).unwrap();

        for header in [
            String::new(),
            "   ".to_string(),
            format!("Basic {}", token),
            "bearer".to_string(),
            format!("bearer {} extra", token),
        ] {
            assert!(
                matches!(authorize_bearer(&maker, &header), Err(Error::Permission(_))),
                "header {:?} should be rejected",
                header
            );
        }
    }

    #[test]
    fn test_authorize_bearer_propagates_token_errors() {
        let maker = maker();
        let (expired, _) = maker.create_token("alice", -Duration::minutes(1)).unwrap();

        assert_eq!(
            authorize_bearer(&maker, &format!("bearer {}", expired)),
            Err(Error::ExpiredToken)
        );
        assert_eq!(
            authorize_bearer(&maker, "bearer not-a-token"),
            Err(Error::InvalidToken)
        );
    }
}
