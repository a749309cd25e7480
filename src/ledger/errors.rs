use solana_client::client_error::ClientError;
use thiserror::Error;

/// Failures talking to the ledger
#[derive(Debug, Clone, Error)]
pub enum LedgerError {
    /// Transport-level errors (network, connection)
    #[error("Transport error: {message} (endpoint: {endpoint})")]
    Transport { endpoint: String, message: String },

    /// Timeout errors
    #[error("Timeout (endpoint: {endpoint})")]
    Timeout { endpoint: String },

    /// Rate limit exceeded
    #[error("Rate limit exceeded (endpoint: {endpoint})")]
    RateLimitExceeded { endpoint: String },

    /// RPC response errors (from the RPC server)
    #[error("RPC response error: {message} (endpoint: {endpoint}, code: {code:?})")]
    RpcResponse {
        endpoint: String,
        message: String,
        code: Option<i64>,
    },

    /// Account data could not be decoded as the expected SPL type
    #[error("Account decode error for {account}: {reason}")]
    AccountDecode { account: String, reason: String },

    /// A required account (eg. a mint) does not exist
    #[error("Account not found: {0}")]
    AccountNotFound(String),

    /// The ledger refused or failed to execute a submitted transaction
    #[error("Transaction rejected: {0}")]
    TransactionRejected(String),

    /// Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl LedgerError {
    /// Check if this error is transient (worth polling again)
    pub fn is_retryable(&self) -> bool {
        match self {
            LedgerError::Transport { .. } => true,
            LedgerError::Timeout { .. } => true,
            LedgerError::RateLimitExceeded { .. } => true,
            LedgerError::RpcResponse { code, .. } => {
                // Retry on server errors (5xx)
                matches!(code, Some(c) if (500..600).contains(c))
            }
            LedgerError::AccountDecode { .. } => false,
            LedgerError::AccountNotFound(_) => false,
            LedgerError::TransactionRejected(_) => false,
            LedgerError::Internal(_) => false,
        }
    }

    /// Get the endpoint associated with this error, if any
    pub fn endpoint(&self) -> Option<&str> {
        match self {
            LedgerError::Transport { endpoint, .. } => Some(endpoint),
            LedgerError::Timeout { endpoint } => Some(endpoint),
            LedgerError::RateLimitExceeded { endpoint } => Some(endpoint),
            LedgerError::RpcResponse { endpoint, .. } => Some(endpoint),
            _ => None,
        }
    }

    /// Create from ClientError with context
    pub fn from_client_error(err: ClientError, endpoint: &str) -> Self {
        Self::classify(&err.to_string(), endpoint)
    }

    /// Classify a raw error message from the RPC client
    pub fn classify(message: &str, endpoint: &str) -> Self {
        let err_str = message.to_lowercase();

        if err_str.contains("rate limit")
            || err_str.contains("too many requests")
            || err_str.contains("429")
        {
            LedgerError::RateLimitExceeded {
                endpoint: endpoint.to_string(),
            }
        } else if err_str.contains("timeout") || err_str.contains("timed out") {
            LedgerError::Timeout {
                endpoint: endpoint.to_string(),
            }
        } else if err_str.contains("error sending request")
            || err_str.contains("connection refused")
            || err_str.contains("connection reset")
            || err_str.contains("dns error")
        {
            LedgerError::Transport {
                endpoint: endpoint.to_string(),
                message: message.to_string(),
            }
        } else if err_str.contains("transaction simulation failed")
            || err_str.contains("insufficient funds")
            || err_str.contains("insufficient lamports")
            || err_str.contains("blockhash not found")
        {
            LedgerError::TransactionRejected(message.to_string())
        } else {
            // Extract error code if available
            let code = err_str
                .split("code:")
                .nth(1)
                .and_then(|s| s.split_whitespace().next())
                .and_then(|s| s.trim_end_matches(',').parse::<i64>().ok());

            LedgerError::RpcResponse {
                endpoint: endpoint.to_string(),
                message: message.to_string(),
                code,
            }
        }
    }
}
