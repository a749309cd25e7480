//! End-to-end checkout flow against the in-memory ledger
//!
//! Covers pricing → build → buyer signature → settlement → watcher
//! confirmation, for both the reward and the discount path.

use coupon_checkout::ledger::{associated_token_address, InMemoryLedger, Ledger};
use coupon_checkout::pricing::OrderRequest;
use coupon_checkout::reference::Reference;
use coupon_checkout::tx_builder::instructions::payment_instruction;
use coupon_checkout::tx_builder::{
    CheckoutError, LoyaltyOperation, ShopAssets, TransactionBuilder, DISCOUNT_MESSAGE,
    THANKS_MESSAGE,
};
use coupon_checkout::wallet::ShopSigner;
use coupon_checkout::watcher::{SettlementWatcher, ValidationMismatch, WatchState};
use rust_decimal_macros::dec;
use solana_sdk::{
    message::Message,
    pubkey::Pubkey,
    signature::{Keypair, Signer},
    transaction::Transaction,
};
use std::sync::Arc;
use std::time::Duration;

const USDC: u64 = 1_000_000;

struct Shop {
    ledger: Arc<InMemoryLedger>,
    shop: Keypair,
    assets: ShopAssets,
    builder: TransactionBuilder,
}

impl Shop {
    fn open() -> Self {
        let ledger = Arc::new(InMemoryLedger::new());
        let assets = ShopAssets {
            payment_mint: Pubkey::new_unique(),
            coupon_mint: Pubkey::new_unique(),
        };
        ledger.create_mint(assets.payment_mint, 6);
        ledger.create_mint(assets.coupon_mint, 0);

        let shop = Keypair::new();
        ledger.mint_to(&shop.pubkey(), &assets.payment_mint, 0);
        ledger.mint_to(&shop.pubkey(), &assets.coupon_mint, 1_000_000);

        let builder = TransactionBuilder::new(
            ledger.clone(),
            Some(ShopSigner::from_keypair(shop.insecure_clone())),
            assets,
        );
        Self {
            ledger,
            shop,
            assets,
            builder,
        }
    }

    fn buyer(&self, usdc: u64, coupons: u64) -> Keypair {
        let buyer = Keypair::new();
        self.ledger
            .mint_to(&buyer.pubkey(), &self.assets.payment_mint, usdc * USDC);
        self.ledger
            .mint_to(&buyer.pubkey(), &self.assets.coupon_mint, coupons);
        buyer
    }

    fn usdc(&self, owner: &Pubkey) -> u64 {
        self.ledger.balance_of(owner, &self.assets.payment_mint)
    }

    fn coupons(&self, owner: &Pubkey) -> u64 {
        self.ledger.balance_of(owner, &self.assets.coupon_mint)
    }
}

/// What the buyer's wallet does with the returned transaction
fn wallet_sign(mut tx: Transaction, buyer: &Keypair) -> Transaction {
    let blockhash = tx.message.recent_blockhash;
    tx.partial_sign(&[buyer], blockhash);
    tx
}

fn is_writable(message: &Message, index: usize) -> bool {
    let header = &message.header;
    let signed = usize::from(header.num_required_signatures);
    if index < signed {
        index < signed - usize::from(header.num_readonly_signed_accounts)
    } else {
        index < message.account_keys.len() - usize::from(header.num_readonly_unsigned_accounts)
    }
}

#[tokio::test(start_paused = true)]
async fn test_full_price_order_earns_a_coupon() {
    let shop = Shop::open();
    let buyer = shop.buyer(100, 0);
    let reference = Reference::generate();

    let built = shop
        .builder
        .build(
            &OrderRequest::new().with_item("box-of-cookies", "1"),
            Some(buyer.pubkey()),
            Some(reference),
        )
        .await
        .unwrap();

    assert_eq!(built.total, dec!(5));
    assert_eq!(built.payable, dec!(5));
    assert_eq!(built.payable_base_units, 5 * USDC);
    assert_eq!(built.loyalty, LoyaltyOperation::Earn { amount: 1 });
    assert_eq!(built.message, THANKS_MESSAGE);
    assert_eq!(built.missing_signers(), vec![buyer.pubkey()]);

    let mut handle = SettlementWatcher::new(shop.ledger.clone(), built.settlement_expectation())
        .spawn(Duration::from_millis(500));

    let signature = shop
        .ledger
        .send_and_confirm(&wallet_sign(built.tx.clone(), &buyer))
        .await
        .unwrap();

    assert_eq!(handle.confirmed().await, Some(signature));
    assert_eq!(shop.usdc(&buyer.pubkey()), 95 * USDC);
    assert_eq!(shop.usdc(&shop.shop.pubkey()), 5 * USDC);
    assert_eq!(shop.coupons(&buyer.pubkey()), 1);
    assert_eq!(shop.coupons(&shop.shop.pubkey()), 999_999);
}

#[tokio::test(start_paused = true)]
async fn test_five_coupons_buy_half_price() {
    let shop = Shop::open();
    let buyer = shop.buyer(100, 7);

    let built = shop
        .builder
        .build(
            &OrderRequest::new()
                .with_item("box-of-cookies", "1")
                .with_item("basket-of-fruit", "1"),
            Some(buyer.pubkey()),
            Some(Reference::generate()),
        )
        .await
        .unwrap();

    assert_eq!(built.total, dec!(15));
    assert_eq!(built.payable, dec!(7.5));
    assert_eq!(built.payable_base_units, 7_500_000);
    assert_eq!(built.loyalty, LoyaltyOperation::Spend { amount: 5 });
    assert_eq!(built.message, DISCOUNT_MESSAGE);

    let mut handle = SettlementWatcher::new(shop.ledger.clone(), built.settlement_expectation())
        .spawn(Duration::from_millis(500));
    let signature = shop
        .ledger
        .send_and_confirm(&wallet_sign(built.tx.clone(), &buyer))
        .await
        .unwrap();

    assert_eq!(handle.confirmed().await, Some(signature));
    assert_eq!(shop.usdc(&buyer.pubkey()), 100 * USDC - 7_500_000);
    assert_eq!(shop.coupons(&buyer.pubkey()), 2);
    assert_eq!(shop.coupons(&shop.shop.pubkey()), 1_000_005);
}

#[tokio::test]
async fn test_reference_is_a_single_readonly_key() {
    let shop = Shop::open();
    let buyer = shop.buyer(10, 0);
    let reference = Reference::generate();

    let built = shop
        .builder
        .build(
            &OrderRequest::new().with_item("box-of-cookies", "1"),
            Some(buyer.pubkey()),
            Some(reference),
        )
        .await
        .unwrap();

    let message = &built.tx.message;
    let index = message
        .account_keys
        .iter()
        .position(|k| *k == reference.pubkey())
        .unwrap();
    assert!(!message.is_signer(index));
    assert!(!is_writable(message, index));

    let carriers = message
        .instructions
        .iter()
        .filter(|ix| ix.accounts.contains(&(index as u8)))
        .count();
    assert_eq!(carriers, 1);
    assert_eq!(message.instructions.len(), 2);

    // Fee payer is the buyer, shop signature already present
    assert_eq!(message.account_keys[0], buyer.pubkey());
    let verified = built.tx.verify_with_results();
    let shop_index = message
        .account_keys
        .iter()
        .position(|k| *k == shop.shop.pubkey())
        .unwrap();
    assert!(verified[shop_index]);
    assert!(!verified[0]);
}

#[tokio::test]
async fn test_invalid_orders_are_rejected() {
    let shop = Shop::open();
    let buyer = shop.buyer(10, 0);

    let err = shop
        .builder
        .build(
            &OrderRequest::new().with_item("unknown-item", "3"),
            Some(buyer.pubkey()),
            Some(Reference::generate()),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CheckoutError::InvalidOrder(_)));
    assert_eq!(err.to_string(), "Can't checkout with a value of 0");

    let err = shop
        .builder
        .build(
            &OrderRequest::new().with_item("box-of-cookies", "1"),
            Some(buyer.pubkey()),
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CheckoutError::InvalidOrder(_)));
    assert_eq!(err.to_string(), "No reference provided");
}

#[tokio::test]
async fn test_underpayment_is_never_confirmed() {
    let shop = Shop::open();
    let buyer = shop.buyer(100, 0);

    let built = shop
        .builder
        .build(
            &OrderRequest::new().with_item("basket-of-fruit", "1"),
            Some(buyer.pubkey()),
            Some(Reference::generate()),
        )
        .await
        .unwrap();
    let mut watcher = SettlementWatcher::new(shop.ledger.clone(), built.settlement_expectation());

    // The buyer pays 4 USDC with the right reference instead of signing the shop's transaction
    let underpay = payment_instruction(
        &buyer.pubkey(),
        &shop.shop.pubkey(),
        &shop.assets.payment_mint,
        4 * USDC,
        6,
        &built.reference,
    )
    .unwrap();
    let blockhash = shop.ledger.latest_blockhash().await.unwrap();
    let tx = Transaction::new_signed_with_payer(&[underpay], Some(&buyer.pubkey()), &[&buyer], blockhash);
    let bad = shop.ledger.send_and_confirm(&tx).await.unwrap();

    match watcher.step().await.clone() {
        WatchState::Rejected { signature, reason } => {
            assert_eq!(signature, bad);
            assert_eq!(
                reason,
                ValidationMismatch::AmountMismatch {
                    expected: 10 * USDC,
                    actual: i128::from(4 * USDC),
                }
            );
        }
        other => panic!("expected rejection, got {other:?}"),
    }
    assert_eq!(watcher.step().await, &WatchState::Polling);

    // The real transaction still confirms afterwards
    let good = shop
        .ledger
        .send_and_confirm(&wallet_sign(built.tx.clone(), &buyer))
        .await
        .unwrap();
    assert_eq!(watcher.step().await, &WatchState::Confirmed(good));
}

#[tokio::test]
async fn test_buyer_without_coupon_account_gets_one() {
    let shop = Shop::open();
    let buyer = Keypair::new();
    shop.ledger
        .mint_to(&buyer.pubkey(), &shop.assets.payment_mint, 20 * USDC);
    let coupon_account = associated_token_address(&buyer.pubkey(), &shop.assets.coupon_mint);
    assert!(!shop.ledger.account_exists(&coupon_account));

    let built = shop
        .builder
        .build(
            &OrderRequest::new().with_item("box-of-cookies", "2"),
            Some(buyer.pubkey()),
            Some(Reference::generate()),
        )
        .await
        .unwrap();
    assert!(built.setup_signature.is_some());
    assert!(shop.ledger.account_exists(&coupon_account));

    shop.ledger
        .send_and_confirm(&wallet_sign(built.tx.clone(), &buyer))
        .await
        .unwrap();
    assert_eq!(shop.coupons(&buyer.pubkey()), 1);
    assert_eq!(shop.usdc(&buyer.pubkey()), 10 * USDC);
}
