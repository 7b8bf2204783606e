//! Error types for the wallet session library

use thiserror::Error;

use crate::provider::ProviderError;

/// Result type alias using our custom Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for wallet sessions
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    // Provider errors
    #[error("provider not found")]
    ProviderMissing,

    #[error("User rejected the request: {0}")]
    UserRejected(String),

    #[error("Provider request failed ({code}): {message}")]
    RequestFailed { code: i64, message: String },

    #[error("Chain {0} has not been added to the wallet")]
    ChainNotAdded(u64),

    #[error("Failed to fetch balance: {0}")]
    BalanceFetch(String),

    #[error("Unexpected provider response for {method}: {detail}")]
    InvalidResponse { method: String, detail: String },

    // Value errors
    #[error("Invalid quantity: {0}")]
    InvalidQuantity(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Storage errors
    #[error("Storage error: {0}")]
    Storage(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Anyhow(String),
}

impl Error {
    /// Check if the user declined the request in their wallet
    pub fn is_user_rejection(&self) -> bool {
        matches!(self, Error::UserRejected(_))
    }

    /// Check if this error is transient and the caller may re-invoke the action
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::BalanceFetch(_) | Error::Io(_) => true,
            Error::RequestFailed { code, .. } => {
                *code == ProviderError::DISCONNECTED || *code == ProviderError::INTERNAL
            }
            _ => false,
        }
    }
}

impl From<ProviderError> for Error {
    fn from(e: ProviderError) -> Self {
        if e.code == ProviderError::USER_REJECTED {
            Error::UserRejected(e.message)
        } else {
            Error::RequestFailed {
                code: e.code,
                message: e.message,
            }
        }
    }
}

// Conversion from anyhow errors (Clone-able, so stored as a message)
impl From<anyhow::Error> for Error {
    fn from(e: anyhow::Error) -> Self {
        Error::Anyhow(e.to_string())
    }
}

// Conversion from serde_json errors
impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

// Conversion from I/O errors
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

// Conversion from reqwest errors
impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::RequestFailed {
            code: ProviderError::DISCONNECTED,
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_rejection_mapping() {
        let err: Error = ProviderError::new(4001, "User rejected the request.").into();
        assert!(err.is_user_rejection());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_generic_request_failure_mapping() {
        let err: Error = ProviderError::new(-32603, "boom").into();
        assert_eq!(
            err,
            Error::RequestFailed {
                code: -32603,
                message: "boom".to_string()
            }
        );
        assert!(err.is_retryable());
    }

    #[test]
    fn test_provider_missing_message() {
        assert_eq!(Error::ProviderMissing.to_string(), "provider not found");
    }
}
