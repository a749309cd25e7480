//! Checkout transaction output
//!
//! Holds the co-signed transaction together with everything the caller needs
//! afterwards: the wire encoding for the buyer's wallet, the status message,
//! and the expectation the settlement watcher validates against.

use crate::compat;
use crate::reference::Reference;
use crate::tx_builder::errors::CheckoutError;
use crate::tx_builder::instructions::LoyaltyOperation;
use crate::watcher::SettlementExpectation;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use rust_decimal::Decimal;
use solana_sdk::{pubkey::Pubkey, signature::Signature, transaction::Transaction};

/// A built, shop co-signed checkout transaction
///
/// The transaction is not mutated after co-signing; the only signature still
/// missing is the buyer's, added by their wallet.
#[derive(Debug, Clone)]
pub struct CheckoutTransaction {
    pub tx: Transaction,

    /// Status message shown to the buyer
    pub message: &'static str,

    /// Order total before any discount
    pub total: Decimal,

    /// Amount the buyer pays
    pub payable: Decimal,

    /// `payable` in base units of the payment mint
    pub payable_base_units: u64,

    pub loyalty: LoyaltyOperation,
    pub reference: Reference,
    pub buyer: Pubkey,

    /// Shop identity, the owner of the credited payment account
    pub recipient: Pubkey,
    pub payment_mint: Pubkey,

    /// Shop-funded transaction that created missing token accounts, if any
    pub setup_signature: Option<Signature>,
}

impl CheckoutTransaction {
    /// Bincode wire format, base64 encoded, with empty signature slots kept
    pub fn serialize_base64(&self) -> Result<String, CheckoutError> {
        let bytes = bincode::serialize(&self.tx)
            .map_err(|e| CheckoutError::internal(format!("transaction serialization failed: {e}")))?;
        Ok(STANDARD.encode(bytes))
    }

    /// Signers whose signature slot is still empty (the buyer)
    pub fn missing_signers(&self) -> Vec<Pubkey> {
        compat::missing_signers(&self.tx)
    }

    pub fn is_discounted(&self) -> bool {
        self.loyalty.is_discount()
    }

    /// What the settled transaction must credit to the shop
    pub fn settlement_expectation(&self) -> SettlementExpectation {
        SettlementExpectation {
            reference: self.reference,
            recipient: self.recipient,
            mint: self.payment_mint,
            amount: self.payable_base_units,
        }
    }
}

/// Decode a transaction produced by [`CheckoutTransaction::serialize_base64`]
pub fn deserialize_base64(encoded: &str) -> Result<Transaction, CheckoutError> {
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|e| CheckoutError::invalid_order(format!("transaction is not valid base64: {e}")))?;
    bincode::deserialize(&bytes)
        .map_err(|e| CheckoutError::invalid_order(format!("transaction is not decodable: {e}")))
}
