use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Duration, SubsecRound, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use sha2::Sha256;
use uuid::Uuid;
use zeroize::Zeroizing;

use super::{Maker, Payload};
use crate::Error;

type HmacSha256 = Hmac<Sha256>;

pub const MIN_SECRET_KEY_SIZE: usize = 30;

const ALGORITHM: &str = "HS256";

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    alg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    typ: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    jti: Uuid,
    iat: i64,
    exp: i64,
}

impl Claims {
    fn from_payload(payload: &Payload) -> Self {
        Self {
            sub: payload.username.clone(),
            jti: payload.id,
            iat: payload.issued_at.timestamp(),
            exp: payload.expired_at.timestamp(),
        }
    }

    fn into_payload(self) -> Result<Payload, Error> {
        let issued_at = DateTime::<Utc>::from_timestamp(self.iat, 0).ok_or(Error::InvalidToken)?;
        let expired_at = DateTime::<Utc>::from_timestamp(self.exp, 0).ok_or(Error::InvalidToken)?;
        Ok(Payload {
            id: self.jti,
            username: self.sub,
            issued_at,
            expired_at,
        })
    }
}

/// Signed-claims maker. Only HS256 tokens are accepted.
pub struct JwtMaker {
    secret: Zeroizing<Vec<u8>>,
}

impl std::fmt::Debug for JwtMaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtMaker").finish_non_exhaustive()
    }
}

impl JwtMaker {
    pub fn new(secret: &str) -> Result<Self, Error> {
        if secret.len() < MIN_SECRET_KEY_SIZE {
            return Err(Error::Config(format!(
                "secret key must be at least {} characters",
                MIN_SECRET_KEY_SIZE
            )));
        }
        Ok(Self {
            secret: Zeroizing::new(secret.as_bytes().to_vec()),
        })
    }

    fn mac(&self) -> Result<HmacSha256, Error> {
        HmacSha256::new_from_slice(&self.secret).map_err(|e| Error::Internal(e.to_string()))
    }

    fn sign(&self, signing_input: &str) -> Result<String, Error> {
        let mut mac = self.mac()?;
        mac.update(signing_input.as_bytes());
        Ok(URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes()))
    }
}

fn encode_segment<T: Serialize>(value: &T) -> Result<String, Error> {
    let json = serde_json::to_vec(value).map_err(|e| Error::Internal(e.to_string()))?;
    Ok(URL_SAFE_NO_PAD.encode(json))
}

fn decode_segment<T: DeserializeOwned>(segment: &str) -> Result<T, Error> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|_| Error::InvalidToken)?;
    serde_json::from_slice(&bytes).map_err(|_| Error::InvalidToken)
}

impl Maker for JwtMaker {
    fn create_token(&self, username: &str, duration: Duration) -> Result<(String, Payload), Error> {
        // Claims carry whole seconds; issue on a second boundary so the
        // verified payload equals the issued one.
        let payload = Payload::issued_at(username, duration, Utc::now().trunc_subsecs(0))?;

        let header = encode_segment(&Header {
            alg: ALGORITHM.to_string(),
            typ: Some("JWT".to_string()),
        })?;
        let claims = encode_segment(&Claims::from_payload(&payload))?;
        let signing_input = format!("{}.{}", header, claims);
        let signature = self.sign(&signing_input)?;

        Ok((format!("{}.{}", signing_input, signature), payload))
    }

    fn verify_token(&self, token: &str) -> Result<Payload, Error> {
        let mut segments = token.split('.');
        let (Some(header), Some(claims), Some(signature), None) = (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) else {
            return Err(Error::InvalidToken);
        };

        let decoded_header: Header = decode_segment(header)?;
        if decoded_header.alg != ALGORITHM {
            tracing::debug!(alg = %decoded_header.alg, "rejecting token with unexpected algorithm");
            return Err(Error::InvalidToken);
        }

        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| Error::InvalidToken)?;
        let mut mac = self.mac()?;
        mac.update(header.as_bytes());
        mac.update(b".");
        mac.update(claims.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| Error::InvalidToken)?;

        let payload = decode_segment::<Claims>(claims)?.into_payload()?;
        payload.validate()?;
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::test_util::random_string;

    fn forge(secret: &str, header: &str, payload: &Payload) -> String {
        let header = URL_SAFE_NO_PAD.encode(header);
        let claims = encode_segment(&Claims::from_payload(payload)).unwrap();
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(format!("{}.{}", header, claims).as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
        format!("{}.{}.{}", header, claims, signature)
    }

    #[test]
    fn test_jwt_round_trip() {
        let maker = JwtMaker::new(&random_string(32)).unwrap();
        let username = random_string(6);
        let issued_at = Utc::now();
        let duration = Duration::minutes(1);

        let (token, issued) = maker.create_token(&username, duration).unwrap();
        assert_eq!(token.split('.').count(), 3);

        let payload = maker.verify_token(&token).unwrap();
        assert_eq!(payload, issued);
        assert_eq!(payload.username, username);
        assert!((payload.issued_at - issued_at).num_seconds().abs() <= 1);
        assert_eq!(payload.expired_at, payload.issued_at + duration);
    }

    #[test]
    fn test_jwt_expired() {
        let maker = JwtMaker::new(&random_string(32)).unwrap();
        let (token, _) = maker
            .create_token(&random_string(6), -Duration::minutes(1))
            .unwrap();
        assert_eq!(maker.verify_token(&token), Err(Error::ExpiredToken));
    }

    #[test]
    fn test_jwt_wrong_secret() {
        let maker = JwtMaker::new(&random_string(32)).unwrap();
        let other = JwtMaker::new(&random_string(32)).unwrap();
        let (token, _) = maker.create_token("alice", Duration::minutes(1)).unwrap();
        assert_eq!(other.verify_token(&token), Err(Error::InvalidToken));
    }

    #[test]
    fn test_jwt_rejects_none_algorithm() {
        let maker = JwtMaker::new(&random_string(32)).unwrap();
        let payload = Payload::new("alice", Duration::minutes(1)).unwrap();
        let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"none","typ":"JWT"}"#);
        let claims = encode_segment(&Claims::from_payload(&payload)).unwrap();
        let token = format!("{}.{}.", header, claims);
        assert_eq!(maker.verify_token(&token), Err(Error::InvalidToken));
    }

    #[test]
    fn test_jwt_rejects_other_algorithm_with_valid_mac() {
        let secret = random_string(32);
        let maker = JwtMaker::new(&secret).unwrap();
        let payload = Payload::new("alice", Duration::minutes(1)).unwrap();

        let token = forge(&secret, r#"{"alg":"HS512","typ":"JWT"}"#, &payload);
        assert_eq!(maker.verify_token(&token), Err(Error::InvalidToken));

        let token = forge(&secret, r#"{"alg":"HS256","typ":"JWT"}"#, &payload);
        assert!(maker.verify_token(&token).is_ok());
    }

    #[test]
    fn test_jwt_tampered_claims() {
        let maker = JwtMaker::new(&random_string(32)).unwrap();
        let (token, payload) = maker.create_token("alice", Duration::minutes(1)).unwrap();

        let mut forged = payload.clone();
        forged.username = "mallory".to_string();
        let forged_claims = encode_segment(&Claims::from_payload(&forged)).unwrap();

        let segments: Vec<&str> = token.split('.').collect();
        let tampered = format!("{}.{}.{}", segments[0], forged_claims, segments[2]);
        assert_eq!(maker.verify_token(&tampered), Err(Error::InvalidToken));
    }

    #[test]
    fn test_jwt_malformed() {
        let maker = JwtMaker::new(&random_string(32)).unwrap();
        for token in ["", "abc", "a.b", "a.b.c.d", "!!.??.##"] {
            assert_eq!(maker.verify_token(token), Err(Error::InvalidToken));
        }
    }

    #[test]
    fn test_jwt_short_secret() {
        assert!(matches!(
            JwtMaker::new(&random_string(MIN_SECRET_KEY_SIZE - 1)),
            Err(Error::Config(_))
        ));
        assert!(JwtMaker::new(&random_string(MIN_SECRET_KEY_SIZE)).is_ok());
    }
}
