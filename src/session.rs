//! Checkout session
//!
//! Caller-owned state for one checkout attempt: the order, its single-use
//! reference, the transaction built for it (at most once) and the settlement
//! watcher. Dropping the session cancels the watcher.

use crate::ledger::Ledger;
use crate::pricing::{calculate_price, OrderRequest};
use crate::reference::Reference;
use crate::solana_pay::TransferRequest;
use crate::tx_builder::{CheckoutError, CheckoutTransaction, TransactionBuilder};
use crate::watcher::{SettlementExpectation, SettlementWatcher, WatchHandle};
use rust_decimal::Decimal;
use solana_sdk::{pubkey::Pubkey, signature::Signature};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug)]
pub struct CheckoutSession {
    order: OrderRequest,
    reference: Reference,
    transaction: Option<CheckoutTransaction>,
    watch: Option<WatchHandle>,
    confirmed: Option<Signature>,
}

impl CheckoutSession {
    /// Open a session with a fresh reference
    pub fn new(order: OrderRequest) -> Self {
        Self::with_reference(order, Reference::generate())
    }

    pub fn with_reference(order: OrderRequest, reference: Reference) -> Self {
        Self {
            order,
            reference,
            transaction: None,
            watch: None,
            confirmed: None,
        }
    }

    pub fn reference(&self) -> &Reference {
        &self.reference
    }

    pub fn order(&self) -> &OrderRequest {
        &self.order
    }

    /// Undiscounted order total
    pub fn total(&self) -> Decimal {
        calculate_price(&self.order)
    }

    pub fn transaction(&self) -> Option<&CheckoutTransaction> {
        self.transaction.as_ref()
    }

    pub fn confirmed_signature(&self) -> Option<Signature> {
        self.confirmed
    }

    /// Build the checkout transaction for `buyer`; later calls return the
    /// transaction built the first time
    pub async fn request_transaction(
        &mut self,
        builder: &TransactionBuilder,
        buyer: Pubkey,
    ) -> Result<&CheckoutTransaction, CheckoutError> {
        if self.transaction.is_none() {
            let built = builder
                .build(&self.order, Some(buyer), Some(self.reference))
                .await?;
            self.transaction = Some(built);
        }
        self.transaction
            .as_ref()
            .ok_or_else(|| CheckoutError::internal("checkout transaction missing after build"))
    }

    /// Solana Pay transfer request for the wallet-less flow (no discount applies)
    pub fn transfer_request(
        &self,
        recipient: Pubkey,
        payment_mint: Pubkey,
        label: &str,
        message: &str,
    ) -> TransferRequest {
        TransferRequest::new(recipient)
            .amount(self.total())
            .spl_token(payment_mint)
            .reference(self.reference)
            .label(label)
            .message(message)
    }

    /// Start watching for `expectation`, replacing any running watcher
    pub fn watch(
        &mut self,
        ledger: Arc<dyn Ledger>,
        expectation: SettlementExpectation,
        period: Duration,
    ) {
        self.watch = Some(SettlementWatcher::new(ledger, expectation).spawn(period));
    }

    /// Watch for the transaction built by [`Self::request_transaction`]
    pub fn watch_transaction(
        &mut self,
        ledger: Arc<dyn Ledger>,
        period: Duration,
    ) -> Result<(), CheckoutError> {
        let expectation = self
            .transaction
            .as_ref()
            .map(CheckoutTransaction::settlement_expectation)
            .ok_or_else(|| CheckoutError::invalid_order("No transaction requested yet"))?;
        self.watch(ledger, expectation, period);
        Ok(())
    }

    pub fn is_watching(&self) -> bool {
        self.watch.as_ref().is_some_and(|w| !w.is_finished())
    }

    /// Wait until the watcher confirms; `None` when not watching or cancelled
    pub async fn wait_confirmed(&mut self) -> Option<Signature> {
        if self.confirmed.is_some() {
            return self.confirmed;
        }
        let signature = self.watch.as_mut()?.confirmed().await;
        self.confirmed = signature;
        signature
    }

    /// Stop the watcher; no ledger queries are issued afterwards
    pub fn cancel(&mut self) {
        if let Some(handle) = self.watch.take() {
            handle.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::InMemoryLedger;
    use crate::tx_builder::ShopAssets;
    use crate::wallet::ShopSigner;
    use rust_decimal_macros::dec;
    use solana_sdk::signature::{Keypair, Signer};

    fn setup() -> (Arc<InMemoryLedger>, TransactionBuilder, ShopAssets) {
        let ledger = Arc::new(InMemoryLedger::new());
        let assets = ShopAssets {
            payment_mint: Pubkey::new_unique(),
            coupon_mint: Pubkey::new_unique(),
        };
        ledger.create_mint(assets.payment_mint, 6);
        ledger.create_mint(assets.coupon_mint, 0);
        let shop = Keypair::new();
        ledger.mint_to(&shop.pubkey(), &assets.coupon_mint, 100);
        let builder =
            TransactionBuilder::new(ledger.clone(), Some(ShopSigner::from_keypair(shop)), assets);
        (ledger, builder, assets)
    }

    #[tokio::test]
    async fn test_transaction_is_built_once() {
        let (_ledger, builder, _) = setup();
        let mut session =
            CheckoutSession::new(OrderRequest::new().with_item("basket-of-fruit", "1"));
        let buyer = Pubkey::new_unique();

        let first = session
            .request_transaction(&builder, buyer)
            .await
            .unwrap()
            .tx
            .signatures
            .clone();
        let second = session
            .request_transaction(&builder, buyer)
            .await
            .unwrap()
            .tx
            .signatures
            .clone();
        assert_eq!(first, second);
        assert_eq!(
            session.transaction().unwrap().reference,
            *session.reference()
        );
    }

    #[tokio::test]
    async fn test_watch_requires_transaction() {
        let (ledger, _, _) = setup();
        let mut session = CheckoutSession::new(OrderRequest::new());
        assert!(session
            .watch_transaction(ledger, Duration::from_millis(500))
            .is_err());
        assert_eq!(session.wait_confirmed().await, None);
    }

    #[test]
    fn test_transfer_request_uses_undiscounted_total() {
        let session = CheckoutSession::new(
            OrderRequest::new()
                .with_item("box-of-cookies", "1")
                .with_item("basket-of-fruit", "1"),
        );
        let request = session.transfer_request(
            Pubkey::new_unique(),
            Pubkey::new_unique(),
            "Farm+Home",
            "Thanks for your order! 🛒",
        );
        assert_eq!(request.amount, Some(dec!(15)));
        assert_eq!(request.references, vec![*session.reference()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_watching() {
        let (ledger, builder, _) = setup();
        let mut session =
            CheckoutSession::new(OrderRequest::new().with_item("box-of-cookies", "1"));
        session
            .request_transaction(&builder, Pubkey::new_unique())
            .await
            .unwrap();
        session
            .watch_transaction(ledger.clone(), Duration::from_millis(500))
            .unwrap();
        assert!(session.is_watching());

        tokio::time::sleep(Duration::from_millis(1_100)).await;
        session.cancel();
        let lookups = ledger.signature_lookups();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(ledger.signature_lookups(), lookups);
        assert!(!session.is_watching());
    }
}
