//! coupon-checkout - Solana storefront checkout with coupon loyalty
//!
//! The server prices an order, builds a single atomic transaction (payment
//! plus coupon exchange) tagged with a unique reference, co-signs it as the
//! shop and hands it to the buyer's wallet. A settlement watcher then polls
//! the ledger for a transaction carrying that reference and validates it
//! before the checkout is confirmed.

pub mod api;
pub mod catalog;
pub mod compat;
pub mod config;
pub mod endpoints;
pub mod ledger;
pub mod loyalty;
pub mod metrics;
pub mod observability;
pub mod pricing;
pub mod reference;
pub mod session;
pub mod solana_pay;
pub mod structured_logging;
pub mod tx_builder;
pub mod wallet;
pub mod watcher;

// Re-export commonly used types
pub use ledger::{InMemoryLedger, Ledger, LedgerError, RpcLedger};
pub use pricing::{calculate_price, OrderRequest};
pub use reference::Reference;
pub use session::CheckoutSession;
pub use tx_builder::{CheckoutError, CheckoutTransaction, TransactionBuilder};
pub use watcher::{SettlementExpectation, SettlementWatcher, WatchHandle, WatchState};
pub use solana_sdk::{pubkey::Pubkey, signature::Signature};
