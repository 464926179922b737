use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chacha20poly1305::{
    Key, XChaCha20Poly1305, XNonce,
    aead::{Aead, AeadCore, KeyInit, OsRng},
};
use chrono::Duration;
use zeroize::Zeroizing;

use super::{Maker, Payload};
use crate::Error;

/// Key size required by XChaCha20-Poly1305.
pub const SEALED_KEY_SIZE: usize = 32;

const NONCE_SIZE: usize = 24;
const TAG_SIZE: usize = 16;

/// Authenticated-encryption maker. The token is
/// `base64url(nonce || ciphertext)` over the JSON payload.
pub struct SealedMaker {
    key: Zeroizing<[u8; SEALED_KEY_SIZE]>,
}

impl std::fmt::Debug for SealedMaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SealedMaker").finish_non_exhaustive()
    }
}

impl SealedMaker {
    /// The key must be exactly [`SEALED_KEY_SIZE`] bytes.
    pub fn new(key: &[u8]) -> Result<Self, Error> {
        let key: [u8; SEALED_KEY_SIZE] = key.try_into().map_err(|_| {
            Error::Config(format!(
                "invalid key size {}, must be exactly {}",
                key.len(),
                SEALED_KEY_SIZE
            ))
        })?;
        Ok(Self {
            key: Zeroizing::new(key),
        })
    }

    fn cipher(&self) -> XChaCha20Poly1305 {
        XChaCha20Poly1305::new(Key::from_slice(self.key.as_slice()))
    }
}

impl Maker for SealedMaker {
    fn create_token(&self, username: &str, duration: Duration) -> Result<(String, Payload), Error> {
        let payload = Payload::new(username, duration)?;
        let plaintext = serde_json::to_vec(&payload).map_err(|e| Error::Internal(e.to_string()))?;

        let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher()
            .encrypt(&nonce, plaintext.as_ref())
            .map_err(|e| Error::Internal(format!("sealing failed: {}", e)))?;

        let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(nonce.as_slice());
        sealed.extend_from_slice(&ciphertext);

        Ok((URL_SAFE_NO_PAD.encode(sealed), payload))
    }

    fn verify_token(&self, token: &str) -> Result<Payload, Error> {
        let sealed = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|_| Error::InvalidToken)?;
        if sealed.len() < NONCE_SIZE + TAG_SIZE {
            return Err(Error::InvalidToken);
        }

        let (nonce, ciphertext) = sealed.split_at(NONCE_SIZE);
        let plaintext = self
            .cipher()
            .decrypt(XNonce::from_slice(nonce), ciphertext)
            .map_err(|_| Error::InvalidToken)?;
        let payload: Payload =
            serde_json::from_slice(&plaintext).map_err(|_| Error::InvalidToken)?;

        // Decryption says nothing about expiry.
        payload.validate()?;
        Ok(payload)
    }
}
