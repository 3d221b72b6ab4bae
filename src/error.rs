//! Error types for the market data layer.
//!
//! Nothing here is fatal: an `UpstreamUnavailable` degrades one row or one
//! chart for the current cycle and the next poll tries again.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MarketDataError {
    /// Network failure, non-success HTTP status, timeout, or an undecodable
    /// payload from the provider.
    #[error("upstream unavailable during {operation}: {reason}")]
    UpstreamUnavailable { operation: String, reason: String },

    /// Caller passed arguments the provider cannot serve (e.g. `days == 0`).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A tracked asset was absent from the provider's snapshot.
    #[error("asset missing from snapshot: {0}")]
    MissingAsset(String),
}

impl MarketDataError {
    pub fn upstream(operation: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::UpstreamUnavailable {
            operation: operation.into(),
            reason: reason.to_string(),
        }
    }
}

pub type MarketDataResult<T> = Result<T, MarketDataError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_message_names_operation() {
        let err = MarketDataError::upstream("fetch_history", "HTTP 429");
        assert_eq!(
            err.to_string(),
            "upstream unavailable during fetch_history: HTTP 429"
        );
    }
}
