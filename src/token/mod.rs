//! Token makers.
//!
//! Two interchangeable backends implement [`Maker`]:
//!
//! - [`JwtMaker`]: HMAC-SHA256 signed claims (`header.claims.signature`).
//! - [`SealedMaker`]: XChaCha20-Poly1305 sealed payload, one opaque blob.
//!
//! The backend is picked once, from configuration, and shared as
//! `Arc<dyn Maker>`. A maker's secret never changes after construction.

mod jwt;
mod payload;
mod sealed;

use std::str::FromStr;
use std::sync::Arc;

use chrono::Duration;

pub use jwt::{JwtMaker, MIN_SECRET_KEY_SIZE};
pub use payload::Payload;
pub use sealed::{SEALED_KEY_SIZE, SealedMaker};

use crate::Error;

pub trait Maker: Send + Sync {
    /// Issues a token for `username` valid for `duration`, returning the
    /// wire token and the payload it carries.
    fn create_token(&self, username: &str, duration: Duration) -> Result<(String, Payload), Error>;

    /// Fails with [`Error::InvalidToken`] or [`Error::ExpiredToken`].
    fn verify_token(&self, token: &str) -> Result<Payload, Error>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TokenBackend {
    Jwt,
    #[default]
    Sealed,
}

impl FromStr for TokenBackend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "jwt" => Ok(TokenBackend::Jwt),
            "sealed" | "paseto" => Ok(TokenBackend::Sealed),
            other => Err(Error::Config(format!("unknown token backend: {}", other))),
        }
    }
}

pub fn new_maker(backend: TokenBackend, secret: &str) -> Result<Arc<dyn Maker>, Error> {
    let maker: Arc<dyn Maker> = match backend {
        TokenBackend::Jwt => Arc::new(JwtMaker::new(secret)?),
        TokenBackend::Sealed => Arc::new(SealedMaker::new(secret.as_bytes())?),
    };
    Ok(maker)
}
