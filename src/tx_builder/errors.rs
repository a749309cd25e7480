//! Error types for checkout transaction building
//!
//! The build path fails closed: anything that prevents a correct, priced,
//! co-signed transaction is an error the boundary turns into an HTTP status.

use crate::ledger::LedgerError;
use thiserror::Error;

/// Errors returned by the checkout transaction builder
#[derive(Error, Debug)]
pub enum CheckoutError {
    /// The request itself cannot be checked out (zero total, missing
    /// reference or buyer, malformed keys)
    #[error("{0}")]
    InvalidOrder(String),

    /// The server is missing something it needs, typically the shop secret
    #[error("{0}")]
    Configuration(String),

    /// A ledger read or the account setup transaction failed
    #[error("Ledger unavailable: {0}")]
    LedgerUnavailable(#[from] LedgerError),

    /// Instruction encoding, signing or serialization failed
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CheckoutError {
    /// HTTP status the boundary responds with
    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidOrder(_) => 400,
            Self::Configuration(_) | Self::LedgerUnavailable(_) | Self::Internal(_) => 500,
        }
    }

    /// Get the error category for metrics and observability
    pub fn category(&self) -> &'static str {
        match self {
            Self::InvalidOrder(_) => "invalid_order",
            Self::Configuration(_) => "config",
            Self::LedgerUnavailable(_) => "ledger",
            Self::Internal(_) => "internal",
        }
    }

    /// True when the caller sent something wrong
    pub fn is_client_error(&self) -> bool {
        self.status_code() < 500
    }
}

// Convenience constructors for common error scenarios
impl CheckoutError {
    pub fn zero_amount() -> Self {
        Self::InvalidOrder("Can't checkout with a value of 0".to_string())
    }

    pub fn missing_reference() -> Self {
        Self::InvalidOrder("No reference provided".to_string())
    }

    pub fn missing_account() -> Self {
        Self::InvalidOrder("No account provided".to_string())
    }

    pub fn missing_shop_key() -> Self {
        Self::Configuration("Shop private key not available".to_string())
    }

    pub fn invalid_order(reason: impl Into<String>) -> Self {
        Self::InvalidOrder(reason.into())
    }

    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal(reason.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            CheckoutError::zero_amount().to_string(),
            "Can't checkout with a value of 0"
        );
        assert_eq!(
            CheckoutError::missing_shop_key().to_string(),
            "Shop private key not available"
        );
        let err = CheckoutError::from(LedgerError::Timeout {
            endpoint: "http://localhost:8899".to_string(),
        });
        assert!(err.to_string().starts_with("Ledger unavailable"));
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(CheckoutError::missing_reference().status_code(), 400);
        assert_eq!(CheckoutError::missing_account().status_code(), 400);
        assert_eq!(CheckoutError::missing_shop_key().status_code(), 500);
        assert_eq!(CheckoutError::internal("sign").status_code(), 500);
        assert_eq!(
            CheckoutError::from(LedgerError::Internal("boom".to_string())).status_code(),
            500
        );
    }

    #[test]
    fn test_error_categories() {
        assert_eq!(CheckoutError::zero_amount().category(), "invalid_order");
        assert_eq!(CheckoutError::missing_shop_key().category(), "config");
        assert_eq!(CheckoutError::internal("x").category(), "internal");
        assert!(CheckoutError::zero_amount().is_client_error());
        assert!(!CheckoutError::internal("x").is_client_error());
    }
}
