//! Error types for the swap watchtower

use thiserror::Error;

/// Main error type for the watchtower
#[derive(Error, Debug)]
pub enum WatchtowerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unknown currency {currency}")]
    UnknownCurrency { currency: String },

    #[error("Unknown contract {address} for currency {currency}")]
    UnknownContract { currency: String, address: String },

    #[error("Provider {provider} error: {message}")]
    Provider { provider: String, message: String },

    #[error("Provider {provider} does not support {operation}")]
    NotSupported { provider: String, operation: String },

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("Wallet error: {0}")]
    Wallet(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl WatchtowerError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            WatchtowerError::Http(_)
                | WatchtowerError::Provider { .. }
                | WatchtowerError::Database(_)
        )
    }

    /// Deployment misconfiguration, never swallowed by provider fallback
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            WatchtowerError::Config(_)
                | WatchtowerError::UnknownCurrency { .. }
                | WatchtowerError::UnknownContract { .. }
        )
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, WatchtowerError::Cancelled)
    }

    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        WatchtowerError::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn unknown_currency(currency: impl Into<String>) -> Self {
        WatchtowerError::UnknownCurrency {
            currency: currency.into(),
        }
    }
}

/// Result type for watchtower operations
pub type WatchtowerResult<T> = Result<T, WatchtowerError>;
