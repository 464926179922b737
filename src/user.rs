use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Error;

pub const MIN_PASSWORD_LEN: usize = 6;

/// Registered user. The hash never leaves the process in serialized form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub username: String,
    #[serde(skip_serializing, default)]
    pub hashed_password: String,
    pub full_name: String,
    pub email: String,
    pub password_changed_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Row insert. `hashed_password` is already hashed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateUserParams {
    pub username: String,
    pub hashed_password: String,
    pub full_name: String,
    pub email: String,
}

impl CreateUserParams {
    pub(crate) fn into_user(self, now: DateTime<Utc>) -> User {
        User {
            username: self.username,
            hashed_password: self.hashed_password,
            full_name: self.full_name,
            email: self.email,
            password_changed_at: now,
            created_at: now,
        }
    }
}

/// Registration input carrying the plain password.
#[derive(Debug, Clone)]
pub struct CreateUserRequest {
    pub username: String,
    pub password: String,
    pub full_name: String,
    pub email: String,
}

impl CreateUserRequest {
    pub fn validate(&self) -> Result<(), Error> {
        if self.username.is_empty() || !self.username.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(Error::InvalidArgument(format!(
                "username must be alphanumeric: {:?}",
                self.username
            )));
        }
        if self.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(Error::InvalidArgument(format!(
                "password must be at least {} characters",
                MIN_PASSWORD_LEN
            )));
        }
        if self.full_name.trim().is_empty() {
            return Err(Error::InvalidArgument("full name is required".to_string()));
        }
        match self.email.split_once('@') {
            Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(()),
            _ => Err(Error::InvalidArgument(format!(
                "invalid email: {:?}",
                self.email
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> CreateUserRequest {
        CreateUserRequest {
            username: "alice".to_string(),
            password: "s3cret".to_string(),
            full_name: "Alice Liddell".to_string(),
            email: "alice@example.com".to_string(),
        }
    }

    #[test]
    fn test_validate_user_request() {
        assert!(request().validate().is_ok());

        let bad = [
            CreateUserRequest {
                username: "al ice".to_string(),
                ..request()
            },
            CreateUserRequest {
                username: String::new(),
                ..request()
            },
            CreateUserRequest {
                password: "short".to_string(),
                ..request()
            },
            CreateUserRequest {
                full_name: "  ".to_string(),
                ..request()
            },
            CreateUserRequest {
                email: "alice.example.com".to_string(),
                ..request()
            },
            CreateUserRequest {
                email: "@example.com".to_string(),
                ..request()
            },
        ];
        for req in bad {
            assert!(matches!(req.validate(), Err(Error::InvalidArgument(_))));
        }
    }

    #[test]
    fn test_hash_is_not_serialized() {
        let user = CreateUserParams {
            username: "alice".to_string(),
            hashed_password: "hash".to_string(),
            full_name: "Alice".to_string(),
            email: "alice@example.com".to_string(),
        }
        .into_user(Utc::now());

        let json = serde_json::to_string(&user).unwrap();
        assert!(!json.contains("hash\""));
        assert!(!json.contains("hashed_password"));
    }
}
