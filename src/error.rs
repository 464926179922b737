use std::fmt::Display;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Account, entry, transfer or session row does not exist.
    NotFound,
    Permission(String),
    /// Malformed token, wrong key or wrong signing algorithm.
    InvalidToken,
    /// Well-formed token whose expiry has passed.
    ExpiredToken,
    Conflict(String),
    InvalidArgument(String),
    Config(String),
    /// The unit of work was abandoned before commit.
    Cancelled,
    Internal(String),
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::NotFound => write!(f, "Not found"),
            Error::Permission(msg) => write!(f, "Permission denied: {}", msg),
            Error::InvalidToken => write!(f, "Token is invalid"),
            Error::ExpiredToken => write!(f, "Token has expired"),
            Error::Conflict(msg) => write!(f, "Conflict: {}", msg),
            Error::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
            Error::Cancelled => write!(f, "Operation cancelled"),
            Error::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl Error {
    /// True for the two token failures a caller must tell apart.
    pub fn is_token_error(&self) -> bool {
        matches!(self, Error::InvalidToken | Error::ExpiredToken)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_errors_stay_distinct() {
        assert_ne!(Error::InvalidToken, Error::ExpiredToken);
        assert!(Error::InvalidToken.is_token_error());
        assert!(Error::ExpiredToken.is_token_error());
        assert!(!Error::Permission("blocked".to_string()).is_token_error());
    }

    #[test]
    fn test_display() {
        assert_eq!(Error::NotFound.to_string(), "Not found");
        assert_eq!(
            Error::Permission("session is blocked".to_string()).to_string(),
            "Permission denied: session is blocked"
        );
        assert_eq!(
            Error::Internal("connection reset".to_string()).to_string(),
            "Internal error: connection reset"
        );
    }
}
