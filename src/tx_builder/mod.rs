//! Checkout transaction builder
//!
//! ## Architecture
//!
//! - **errors**: [`CheckoutError`] taxonomy with HTTP status and metric category
//! - **context**: per-build recency token and trace context
//! - **instructions**: payment/coupon instruction rendering, base-unit conversion
//!   and reference placement checks
//! - **output**: [`CheckoutTransaction`], the co-signed transaction plus its
//!   settlement expectation
//! - **builder**: [`TransactionBuilder`], the build pipeline
//!
//! ## Build pipeline
//!
//! 1. price the order and validate the request (total, reference, buyer, shop key)
//! 2. read the buyer's coupon balance and pick [`LoyaltyOperation`]
//! 3. create missing token accounts in a shop-funded setup transaction
//! 4. convert the payable amount to base units of the payment mint
//! 5. render `[payment, coupon]`, buyer as fee payer, latest blockhash
//! 6. partially sign as the shop; the buyer's slot stays empty

pub mod errors;
pub use errors::CheckoutError;

mod builder;
mod context;
pub mod instructions;
mod output;

pub use builder::TransactionBuilder;
pub use context::BuildContext;
pub use instructions::{
    sanity_check_reference, to_base_units, LoyaltyOperation, ShopAssets, DISCOUNT_MESSAGE,
    THANKS_MESSAGE,
};
pub use output::{deserialize_base64, CheckoutTransaction};
