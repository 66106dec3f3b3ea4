//! Error types for Huddle services

use thiserror::Error;

pub type Result<T> = std::result::Result<T, HuddleError>;

#[derive(Error, Debug)]
pub enum HuddleError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl HuddleError {
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::Auth(_) => 401,
            Self::Unavailable(_) => 503,
            _ => 500,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Config(_) => "CONFIG_ERROR",
            Self::Storage(_) => "STORAGE_ERROR",
            Self::Network(_) => "NETWORK_ERROR",
            Self::Auth(_) => "AUTH_ERROR",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Unavailable(_) => "UNAVAILABLE",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<std::io::Error> for HuddleError {
    fn from(err: std::io::Error) -> Self {
        HuddleError::Network(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(HuddleError::Validation("x".into()).status_code(), 400);
        assert_eq!(HuddleError::Auth("x".into()).status_code(), 401);
        assert_eq!(HuddleError::Storage("x".into()).status_code(), 500);
        assert_eq!(HuddleError::Config("x".into()).error_code(), "CONFIG_ERROR");
    }

    #[test]
    fn test_io_error_maps_to_network() {
        let err: HuddleError = std::io::Error::new(std::io::ErrorKind::AddrInUse, "bind").into();
        assert!(matches!(err, HuddleError::Network(_)));
    }
}
