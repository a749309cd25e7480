//! Instruction planning and reference validation
//!
//! A checkout transaction always holds exactly two instructions:
//! 1. the payment: `transfer_checked` of the payment token, buyer → shop,
//!    tagged with the reference key
//! 2. the coupon exchange, chosen by [`LoyaltyOperation`], carrying the shop
//!    as an extra signer

use crate::loyalty::{LoyaltyBalance, COUPONS_PER_ORDER, DISCOUNT_THRESHOLD};
use crate::reference::Reference;
use crate::tx_builder::errors::CheckoutError;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use solana_sdk::{
    instruction::{AccountMeta, Instruction},
    pubkey::Pubkey,
};

/// Coupon mint precision
pub const COUPON_DECIMALS: u8 = 0;

pub const DISCOUNT_MESSAGE: &str = "50% Discount 🎉";
pub const THANKS_MESSAGE: &str = "Thanks for your order! 🛒";

/// What happens to the buyer's coupons in this checkout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoyaltyOperation {
    /// Buyer hands coupons back to the shop in exchange for the discount
    Spend { amount: u64 },
    /// Shop rewards the buyer with a coupon
    Earn { amount: u64 },
}

impl LoyaltyOperation {
    /// Pick the operation for a buyer's current balance
    pub fn for_balance(balance: &LoyaltyBalance) -> Self {
        if balance.is_discount_eligible() {
            Self::Spend {
                amount: DISCOUNT_THRESHOLD,
            }
        } else {
            Self::Earn {
                amount: COUPONS_PER_ORDER,
            }
        }
    }

    pub fn is_discount(&self) -> bool {
        matches!(self, Self::Spend { .. })
    }

    pub fn coupons(&self) -> u64 {
        match self {
            Self::Spend { amount } | Self::Earn { amount } => *amount,
        }
    }

    /// Amount the buyer pays for an order worth `total`
    pub fn payable(&self, total: Decimal) -> Decimal {
        if self.is_discount() {
            total / Decimal::TWO
        } else {
            total
        }
    }

    /// Status message returned alongside the transaction
    pub fn message(&self) -> &'static str {
        if self.is_discount() {
            DISCOUNT_MESSAGE
        } else {
            THANKS_MESSAGE
        }
    }
}

/// Token mints the shop trades in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShopAssets {
    pub payment_mint: Pubkey,
    pub coupon_mint: Pubkey,
}

/// Convert a decimal amount into integer base units of a mint.
///
/// Multiplies by `10^decimals` and truncates toward zero. `None` when the
/// amount is negative or does not fit in a `u64`.
pub fn to_base_units(amount: Decimal, decimals: u8) -> Option<u64> {
    if amount.is_sign_negative() {
        return None;
    }
    let scale = 10u64.checked_pow(u32::from(decimals))?;
    amount
        .checked_mul(Decimal::from(scale))?
        .trunc()
        .to_u64()
}

fn transfer_checked(
    source: &Pubkey,
    mint: &Pubkey,
    destination: &Pubkey,
    authority: &Pubkey,
    amount: u64,
    decimals: u8,
) -> Result<Instruction, CheckoutError> {
    spl_token::instruction::transfer_checked(
        &spl_token::id(),
        source,
        mint,
        destination,
        authority,
        &[],
        amount,
        decimals,
    )
    .map_err(|e| CheckoutError::internal(format!("transfer_checked encoding failed: {e}")))
}

/// Payment transfer from the buyer's token account to the shop's, tagged
/// with the reference as a readonly non-signer key
pub fn payment_instruction(
    buyer: &Pubkey,
    shop: &Pubkey,
    payment_mint: &Pubkey,
    base_units: u64,
    decimals: u8,
    reference: &Reference,
) -> Result<Instruction, CheckoutError> {
    let source = spl_associated_token_account::get_associated_token_address(buyer, payment_mint);
    let destination = spl_associated_token_account::get_associated_token_address(shop, payment_mint);

    let mut ix = transfer_checked(&source, payment_mint, &destination, buyer, base_units, decimals)?;
    ix.accounts
        .push(AccountMeta::new_readonly(reference.pubkey(), false));
    Ok(ix)
}

/// Coupon transfer for `operation`; the shop is always an extra signer
pub fn coupon_instruction(
    operation: LoyaltyOperation,
    buyer: &Pubkey,
    shop: &Pubkey,
    coupon_mint: &Pubkey,
) -> Result<Instruction, CheckoutError> {
    let buyer_account = spl_associated_token_account::get_associated_token_address(buyer, coupon_mint);
    let shop_account = spl_associated_token_account::get_associated_token_address(shop, coupon_mint);

    let mut ix = match operation {
        LoyaltyOperation::Spend { amount } => transfer_checked(
            &buyer_account,
            coupon_mint,
            &shop_account,
            buyer,
            amount,
            COUPON_DECIMALS,
        )?,
        LoyaltyOperation::Earn { amount } => transfer_checked(
            &shop_account,
            coupon_mint,
            &buyer_account,
            shop,
            amount,
            COUPON_DECIMALS,
        )?,
    };
    ix.accounts.push(AccountMeta::new_readonly(*shop, true));
    Ok(ix)
}

/// Check that the reference is attached to exactly one instruction, as a
/// readonly non-signer key
pub fn sanity_check_reference(
    instructions: &[Instruction],
    reference: &Reference,
) -> Result<(), CheckoutError> {
    let key = reference.pubkey();
    let mut carriers = 0usize;

    for ix in instructions {
        let metas: Vec<&AccountMeta> = ix.accounts.iter().filter(|m| m.pubkey == key).collect();
        if metas.is_empty() {
            continue;
        }
        carriers += 1;
        if metas.iter().any(|m| m.is_signer || m.is_writable) {
            return Err(CheckoutError::internal(
                "reference must be a readonly non-signer key",
            ));
        }
    }

    match carriers {
        1 => Ok(()),
        n => Err(CheckoutError::internal(format!(
            "reference attached to {n} instructions, expected exactly 1"
        ))),
    }
}
