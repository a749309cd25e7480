//! Ledger port
//!
//! Everything the checkout needs from the chain goes through the [`Ledger`]
//! trait: token account reads, mint metadata, recency (blockhash), submitting
//! shop-funded setup transactions, and finding/fetching settled transactions
//! by reference. The chain is treated as an append-only source of truth that
//! can be queried but never rolled back.
//!
//! Two implementations ship with the crate:
//! - [`RpcLedger`]: Solana JSON-RPC via `solana-client`
//! - [`InMemoryLedger`]: a small SPL token ledger for offline demo mode and tests

pub mod errors;
pub mod memory;
pub mod rpc;

pub use errors::LedgerError;
pub use memory::InMemoryLedger;
pub use rpc::RpcLedger;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use solana_sdk::{
    hash::Hash,
    pubkey::Pubkey,
    signature::Signature,
    transaction::Transaction,
};

/// Decoded SPL token account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenAccount {
    pub address: Pubkey,
    pub mint: Pubkey,
    pub owner: Pubkey,
    /// Raw amount in the mint's base units
    pub amount: u64,
}

/// Token balance movement of one account inside a settled transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenBalanceChange {
    pub account: Pubkey,
    pub owner: Option<Pubkey>,
    pub mint: Pubkey,
    pub decimals: u8,
    /// Base units before execution (0 when the account was created by the transaction)
    pub pre: u64,
    /// Base units after execution
    pub post: u64,
}

impl TokenBalanceChange {
    /// Signed change in base units
    pub fn delta(&self) -> i128 {
        i128::from(self.post) - i128::from(self.pre)
    }
}

/// Ledger proof that a transaction executed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementRecord {
    pub signature: Signature,
    pub slot: u64,
    pub block_time: Option<DateTime<Utc>>,
    /// Static keys followed by any keys loaded from lookup tables
    pub account_keys: Vec<Pubkey>,
    pub token_balances: Vec<TokenBalanceChange>,
    /// Execution error, if the transaction landed but failed
    pub error: Option<String>,
}

impl SettlementRecord {
    pub fn mentions(&self, key: &Pubkey) -> bool {
        self.account_keys.contains(key)
    }

    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// External ledger collaborator
#[async_trait]
pub trait Ledger: Send + Sync + std::fmt::Debug {
    /// Read a token account; `Ok(None)` when it does not exist
    async fn token_account(&self, address: &Pubkey) -> Result<Option<TokenAccount>, LedgerError>;

    /// Declared decimal precision of a mint
    async fn mint_decimals(&self, mint: &Pubkey) -> Result<u8, LedgerError>;

    /// Recent blockhash used as the transaction's recency token
    async fn latest_blockhash(&self) -> Result<Hash, LedgerError>;

    /// Submit a fully signed transaction and wait for confirmation
    async fn send_and_confirm(&self, tx: &Transaction) -> Result<Signature, LedgerError>;

    /// Signatures of transactions that include `address`, newest first
    async fn signatures_for_address(&self, address: &Pubkey)
        -> Result<Vec<Signature>, LedgerError>;

    /// Full record of a transaction; `Ok(None)` when the ledger does not know it (yet)
    async fn settlement_record(
        &self,
        signature: &Signature,
    ) -> Result<Option<SettlementRecord>, LedgerError>;
}

/// Canonical token account of `owner` for `mint`
pub fn associated_token_address(owner: &Pubkey, mint: &Pubkey) -> Pubkey {
    spl_associated_token_account::get_associated_token_address(owner, mint)
}
