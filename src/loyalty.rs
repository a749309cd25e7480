//! Coupon loyalty balance
//!
//! Every order without a discount earns one coupon; five coupons buy a 50%
//! discount on the next order. Balances are always read fresh from the
//! ledger. A missing coupon account is a normal state (the buyer never
//! ordered) and reads as zero; any other read failure also reads as zero so
//! the checkout falls back to "no discount" instead of failing.

use crate::ledger::{associated_token_address, Ledger};
use solana_sdk::pubkey::Pubkey;
use std::sync::Arc;
use tracing::{debug, warn};

/// Coupons needed for the discount
pub const DISCOUNT_THRESHOLD: u64 = 5;

/// Coupons the shop hands out per full-price order
pub const COUPONS_PER_ORDER: u64 = 1;

/// Coupon count owned by a buyer
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct LoyaltyBalance(u64);

impl LoyaltyBalance {
    pub const ZERO: Self = Self(0);

    pub fn new(coupons: u64) -> Self {
        Self(coupons)
    }

    /// True balance as held on the ledger
    pub fn coupons(&self) -> u64 {
        self.0
    }

    /// Balance shown to the buyer, capped at the discount threshold
    pub fn display(&self) -> u64 {
        self.0.min(DISCOUNT_THRESHOLD)
    }

    /// Orders still needed before the discount unlocks
    pub fn remaining_for_discount(&self) -> u64 {
        DISCOUNT_THRESHOLD - self.display()
    }

    /// Eligibility uses the uncapped balance
    pub fn is_discount_eligible(&self) -> bool {
        self.0 >= DISCOUNT_THRESHOLD
    }
}

/// Reads coupon balances from the ledger
#[derive(Debug, Clone)]
pub struct LoyaltyReader {
    ledger: Arc<dyn Ledger>,
    coupon_mint: Pubkey,
}

impl LoyaltyReader {
    pub fn new(ledger: Arc<dyn Ledger>, coupon_mint: Pubkey) -> Self {
        Self {
            ledger,
            coupon_mint,
        }
    }

    pub fn coupon_mint(&self) -> &Pubkey {
        &self.coupon_mint
    }

    /// Current balance of `buyer`; never fails
    pub async fn read(&self, buyer: Option<&Pubkey>) -> LoyaltyBalance {
        let Some(buyer) = buyer else {
            return LoyaltyBalance::ZERO;
        };

        let address = associated_token_address(buyer, &self.coupon_mint);
        match self.ledger.token_account(&address).await {
            Ok(Some(account)) => LoyaltyBalance::new(account.amount),
            Ok(None) => {
                debug!(buyer = %buyer, "Buyer doesn't have a coupon account yet");
                LoyaltyBalance::ZERO
            }
            Err(e) => {
                warn!(buyer = %buyer, error = %e, "Error getting coupon balance, assuming none");
                LoyaltyBalance::ZERO
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::InMemoryLedger;

    #[test]
    fn test_display_is_capped() {
        let balance = LoyaltyBalance::new(12);
        assert_eq!(balance.display(), 5);
        assert_eq!(balance.remaining_for_discount(), 0);
        assert!(balance.is_discount_eligible());

        let balance = LoyaltyBalance::new(2);
        assert_eq!(balance.display(), 2);
        assert_eq!(balance.remaining_for_discount(), 3);
        assert!(!balance.is_discount_eligible());
    }

    #[test]
    fn test_threshold_is_inclusive() {
        assert!(!LoyaltyBalance::new(4).is_discount_eligible());
        assert!(LoyaltyBalance::new(5).is_discount_eligible());
    }

    #[tokio::test]
    async fn test_read_balance() {
        let ledger = Arc::new(InMemoryLedger::new());
        let coupon = Pubkey::new_unique();
        let buyer = Pubkey::new_unique();
        ledger.create_mint(coupon, 0);
        ledger.mint_to(&buyer, &coupon, 7);

        let reader = LoyaltyReader::new(ledger, coupon);
        let balance = reader.read(Some(&buyer)).await;
        assert_eq!(balance.coupons(), 7);
        assert_eq!(balance.display(), 5);
    }

    #[tokio::test]
    async fn test_missing_account_and_anonymous_buyer_read_zero() {
        let ledger = Arc::new(InMemoryLedger::new());
        let reader = LoyaltyReader::new(ledger, Pubkey::new_unique());
        assert_eq!(reader.read(Some(&Pubkey::new_unique())).await, LoyaltyBalance::ZERO);
        assert_eq!(reader.read(None).await, LoyaltyBalance::ZERO);
    }

    #[tokio::test]
    async fn test_read_failure_fails_open() {
        let ledger = Arc::new(InMemoryLedger::new());
        let coupon = Pubkey::new_unique();
        let buyer = Pubkey::new_unique();
        ledger.create_mint(coupon, 0);
        ledger.mint_to(&buyer, &coupon, 9);
        ledger.set_unavailable(true);

        let reader = LoyaltyReader::new(ledger, coupon);
        assert_eq!(reader.read(Some(&buyer)).await, LoyaltyBalance::ZERO);
    }
}
