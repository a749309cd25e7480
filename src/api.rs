//! Transaction request boundary
//!
//! Transport-independent handling of `/api/makeTransaction`, the Solana Pay
//! transaction request endpoint:
//! - `GET` returns the shop descriptor `{label, icon}`
//! - `POST ?<item>=<qty>&reference=<key>` with body `{account}` returns
//!   `{transaction, message}` or `{error}`
//! - anything else is `405 Method not allowed`

use crate::metrics::metrics;
use crate::pricing::OrderRequest;
use crate::reference::Reference;
use crate::tx_builder::{CheckoutError, TransactionBuilder};
use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;
use std::str::FromStr;
use tracing::error;

pub const REFERENCE_PARAM: &str = "reference";

/// POST body
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MakeTransactionInput {
    #[serde(default)]
    pub account: Option<String>,
}

/// GET response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MakeTransactionGetResponse {
    pub label: String,
    pub icon: String,
}

/// POST success response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MakeTransactionOutput {
    /// Base64 bincode transaction, shop co-signed, buyer signature missing
    pub transaction: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorOutput {
    pub error: String,
}

/// Status code plus JSON body
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: serde_json::Value,
}

impl ApiResponse {
    fn json<T: Serialize>(status: u16, body: &T) -> Self {
        match serde_json::to_value(body) {
            Ok(body) => Self { status, body },
            Err(e) => {
                error!(error = %e, "Failed to encode response body");
                Self::error(500, "error creating transaction")
            }
        }
    }

    fn error(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            body: serde_json::json!({ "error": message.into() }),
        }
    }
}

/// Serves transaction requests for the shop
#[derive(Debug, Clone)]
pub struct TransactionRequester {
    builder: TransactionBuilder,
    label: String,
    icon: String,
}

impl TransactionRequester {
    pub fn new(builder: TransactionBuilder, label: impl Into<String>, icon: impl Into<String>) -> Self {
        Self {
            builder,
            label: label.into(),
            icon: icon.into(),
        }
    }

    pub fn builder(&self) -> &TransactionBuilder {
        &self.builder
    }

    /// Dispatch on the HTTP method
    pub async fn handle(&self, method: &str, query: &[(String, String)], body: &[u8]) -> ApiResponse {
        match method {
            "GET" => ApiResponse::json(200, &self.descriptor()),
            "POST" => self.make_transaction(query, body).await,
            _ => ApiResponse::error(405, "Method not allowed"),
        }
    }

    pub fn descriptor(&self) -> MakeTransactionGetResponse {
        MakeTransactionGetResponse {
            label: self.label.clone(),
            icon: self.icon.clone(),
        }
    }

    /// Build a checkout transaction from query pairs and a JSON body
    pub async fn make_transaction(&self, query: &[(String, String)], body: &[u8]) -> ApiResponse {
        metrics().checkout_requests.inc();

        let (order, reference) = match parse_query(query) {
            Ok(parsed) => parsed,
            Err(e) => return Self::failure(e),
        };
        let buyer = match parse_account(body) {
            Ok(buyer) => buyer,
            Err(e) => return Self::failure(e),
        };

        let built = match self.builder.build(&order, buyer, reference).await {
            Ok(built) => built,
            Err(e) => return Self::failure(e),
        };
        match built.serialize_base64() {
            Ok(transaction) => ApiResponse::json(
                200,
                &MakeTransactionOutput {
                    transaction,
                    message: built.message.to_string(),
                },
            ),
            Err(e) => Self::failure(e),
        }
    }

    fn failure(err: CheckoutError) -> ApiResponse {
        match &err {
            CheckoutError::InvalidOrder(message) | CheckoutError::Configuration(message) => {
                ApiResponse::error(err.status_code(), message.clone())
            }
            CheckoutError::LedgerUnavailable(_) | CheckoutError::Internal(_) => {
                error!(error = %err, category = err.category(), "Error creating transaction");
                ApiResponse::error(500, "error creating transaction")
            }
        }
    }
}

/// Split query pairs into the order and the reference
fn parse_query(
    query: &[(String, String)],
) -> Result<(OrderRequest, Option<Reference>), CheckoutError> {
    let mut reference = None;
    let mut items = Vec::with_capacity(query.len());

    for (key, value) in query {
        if key == REFERENCE_PARAM {
            if value.trim().is_empty() {
                continue;
            }
            let parsed = Reference::from_str(value)
                .map_err(|_| CheckoutError::invalid_order("Invalid reference"))?;
            reference = Some(parsed);
        } else {
            items.push((key.clone(), value.clone()));
        }
    }
    Ok((OrderRequest::from_pairs(items), reference))
}

/// Buyer key from the JSON body; an empty body means no account
fn parse_account(body: &[u8]) -> Result<Option<Pubkey>, CheckoutError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    let input: MakeTransactionInput = serde_json::from_slice(body)
        .map_err(|_| CheckoutError::invalid_order("Invalid request body"))?;
    match input.account.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(account) => Pubkey::from_str(account)
            .map(Some)
            .map_err(|_| CheckoutError::invalid_order("Invalid account")),
    }
}
