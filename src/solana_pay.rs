//! Solana Pay transfer requests
//!
//! Wallet-less checkout: the shop renders a `solana:` URL (usually as a QR
//! code), the buyer's wallet builds and signs the transfer itself, and the
//! settlement watcher finds it by reference like any other checkout.

use crate::reference::Reference;
use reqwest::Url;
use rust_decimal::Decimal;
use solana_sdk::pubkey::Pubkey;
use thiserror::Error;

pub const SOLANA_PAY_SCHEME: &str = "solana";

#[derive(Debug, Error)]
pub enum TransferRequestError {
    #[error("amount must be positive, got {0}")]
    NonPositiveAmount(Decimal),

    #[error("invalid transfer request url: {0}")]
    Url(String),
}

/// Fields of a Solana Pay transfer request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub recipient: Pubkey,
    pub amount: Option<Decimal>,
    /// Token to pay in; native SOL when absent
    pub spl_token: Option<Pubkey>,
    pub references: Vec<Reference>,
    pub label: Option<String>,
    pub message: Option<String>,
    pub memo: Option<String>,
}

impl TransferRequest {
    pub fn new(recipient: Pubkey) -> Self {
        Self {
            recipient,
            amount: None,
            spl_token: None,
            references: Vec::new(),
            label: None,
            message: None,
            memo: None,
        }
    }

    pub fn amount(mut self, amount: Decimal) -> Self {
        self.amount = Some(amount);
        self
    }

    pub fn spl_token(mut self, mint: Pubkey) -> Self {
        self.spl_token = Some(mint);
        self
    }

    pub fn reference(mut self, reference: Reference) -> Self {
        self.references.push(reference);
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn memo(mut self, memo: impl Into<String>) -> Self {
        self.memo = Some(memo.into());
        self
    }
}

/// Render a transfer request as a `solana:` URL
pub fn encode_transfer_url(request: &TransferRequest) -> Result<Url, TransferRequestError> {
    let mut url = Url::parse(&format!("{SOLANA_PAY_SCHEME}:{}", request.recipient))
        .map_err(|e| TransferRequestError::Url(e.to_string()))?;

    {
        let mut query = url.query_pairs_mut();
        if let Some(amount) = request.amount {
            if amount <= Decimal::ZERO {
                return Err(TransferRequestError::NonPositiveAmount(amount));
            }
            query.append_pair("amount", &amount.normalize().to_string());
        }
        if let Some(mint) = &request.spl_token {
            query.append_pair("spl-token", &mint.to_string());
        }
        for reference in &request.references {
            query.append_pair("reference", &reference.to_string());
        }
        if let Some(label) = &request.label {
            query.append_pair("label", label);
        }
        if let Some(message) = &request.message {
            query.append_pair("message", message);
        }
        if let Some(memo) = &request.memo {
            query.append_pair("memo", memo);
        }
    }

    // No parameters at all: drop the dangling '?'
    if url.query() == Some("") {
        url.set_query(None);
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_encode_full_request() {
        let recipient = Pubkey::new_unique();
        let mint = Pubkey::new_unique();
        let reference = Reference::generate();

        let url = encode_transfer_url(
            &TransferRequest::new(recipient)
                .amount(dec!(15.00))
                .spl_token(mint)
                .reference(reference)
                .label("Farm+Home")
                .message("Thanks for your order! 🛒"),
        )
        .unwrap();

        assert_eq!(url.scheme(), "solana");
        assert_eq!(url.path(), recipient.to_string());

        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("amount".to_string(), "15".to_string()),
                ("spl-token".to_string(), mint.to_string()),
                ("reference".to_string(), reference.to_string()),
                ("label".to_string(), "Farm+Home".to_string()),
                ("message".to_string(), "Thanks for your order! 🛒".to_string()),
            ]
        );
    }

    #[test]
    fn test_bare_recipient() {
        let recipient = Pubkey::new_unique();
        let url = encode_transfer_url(&TransferRequest::new(recipient)).unwrap();
        assert_eq!(url.as_str(), format!("solana:{recipient}"));
    }

    #[test]
    fn test_rejects_zero_amount() {
        let request = TransferRequest::new(Pubkey::new_unique()).amount(Decimal::ZERO);
        assert!(matches!(
            encode_transfer_url(&request),
            Err(TransferRequestError::NonPositiveAmount(_))
        ));
    }
}
