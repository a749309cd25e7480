//! Checkout transaction builder
//!
//! Turns an order into a single atomic transaction: a payment transfer
//! tagged with the checkout reference plus one coupon exchange, with the
//! buyer as fee payer and the shop's signature already attached.

use crate::compat;
use crate::ledger::{associated_token_address, Ledger};
use crate::loyalty::LoyaltyReader;
use crate::metrics::{metrics, Timer};
use crate::observability::TraceContext;
use crate::pricing::{calculate_price, OrderRequest};
use crate::reference::Reference;
use crate::structured_logging::CheckoutLogger;
use crate::tx_builder::context::BuildContext;
use crate::tx_builder::errors::CheckoutError;
use crate::tx_builder::instructions::{
    coupon_instruction, payment_instruction, sanity_check_reference, to_base_units,
    LoyaltyOperation, ShopAssets,
};
use crate::tx_builder::output::CheckoutTransaction;
use crate::wallet::ShopSigner;
use futures::future::try_join_all;
use solana_sdk::{
    instruction::Instruction, message::Message, pubkey::Pubkey, signature::Signature,
    transaction::Transaction,
};
use spl_associated_token_account::instruction::create_associated_token_account_idempotent;
use std::sync::Arc;
use tracing::debug;

/// Builds shop co-signed checkout transactions
#[derive(Debug, Clone)]
pub struct TransactionBuilder {
    ledger: Arc<dyn Ledger>,
    signer: Option<ShopSigner>,
    assets: ShopAssets,
    loyalty: LoyaltyReader,
}

impl TransactionBuilder {
    /// `signer` may be absent; building then fails with a configuration error
    pub fn new(ledger: Arc<dyn Ledger>, signer: Option<ShopSigner>, assets: ShopAssets) -> Self {
        let loyalty = LoyaltyReader::new(Arc::clone(&ledger), assets.coupon_mint);
        Self {
            ledger,
            signer,
            assets,
            loyalty,
        }
    }

    pub fn shop(&self) -> Option<Pubkey> {
        self.signer.as_ref().map(ShopSigner::pubkey)
    }

    pub fn assets(&self) -> &ShopAssets {
        &self.assets
    }

    pub fn ledger(&self) -> &Arc<dyn Ledger> {
        &self.ledger
    }

    pub fn loyalty(&self) -> &LoyaltyReader {
        &self.loyalty
    }

    /// Build the checkout transaction for `order`
    pub async fn build(
        &self,
        order: &OrderRequest,
        buyer: Option<Pubkey>,
        reference: Option<Reference>,
    ) -> Result<CheckoutTransaction, CheckoutError> {
        let trace = TraceContext::new("build_checkout");
        let logger = CheckoutLogger::new(trace.correlation_id().clone());
        let timer = Timer::new();

        let result = self.build_inner(order, buyer, reference, &trace, &logger).await;
        timer.observe_duration(&metrics().build_latency);

        let latency_ms = (timer.elapsed_secs() * 1000.0) as u64;
        match &result {
            Ok(output) => {
                metrics().transactions_built.inc();
                if output.is_discounted() {
                    metrics().discounts_applied.inc();
                }
                logger.log_built(
                    &output.reference.to_string(),
                    output.payable_base_units,
                    latency_ms,
                );
            }
            Err(e) => {
                metrics().record_failure(e.category());
                logger.log_failure(e.category(), &e.to_string(), latency_ms);
            }
        }
        result
    }

    async fn build_inner(
        &self,
        order: &OrderRequest,
        buyer: Option<Pubkey>,
        reference: Option<Reference>,
        trace: &TraceContext,
        logger: &CheckoutLogger,
    ) -> Result<CheckoutTransaction, CheckoutError> {
        let total = calculate_price(order);
        if total.is_zero() {
            return Err(CheckoutError::zero_amount());
        }
        let reference = reference.ok_or_else(CheckoutError::missing_reference)?;
        let buyer = buyer.ok_or_else(CheckoutError::missing_account)?;
        let signer = self.signer.as_ref().ok_or_else(CheckoutError::missing_shop_key)?;
        let shop = signer.pubkey();

        logger.log_request(&reference.to_string(), &buyer.to_string(), order.entries().len());

        // The balance read strictly precedes assembly
        let balance = self.loyalty.read(Some(&buyer)).await;
        let operation = LoyaltyOperation::for_balance(&balance);
        let payable = operation.payable(total);
        logger.log_priced(&total.to_string(), &payable.to_string(), operation.is_discount());

        let setup_signature = self.ensure_token_accounts(&buyer, signer, logger).await?;

        let decimals = self.ledger.mint_decimals(&self.assets.payment_mint).await?;
        let base_units = to_base_units(payable, decimals).ok_or_else(|| {
            CheckoutError::invalid_order(format!("Amount {payable} cannot be represented"))
        })?;
        if base_units == 0 {
            return Err(CheckoutError::invalid_order(format!(
                "Amount {payable} is below the smallest unit of the payment token"
            )));
        }

        let instructions = [
            payment_instruction(
                &buyer,
                &shop,
                &self.assets.payment_mint,
                base_units,
                decimals,
                &reference,
            )?,
            coupon_instruction(operation, &buyer, &shop, &self.assets.coupon_mint)?,
        ];
        sanity_check_reference(&instructions, &reference)?;

        let blockhash = self.ledger.latest_blockhash().await?;
        let ctx = BuildContext::new(blockhash, trace.child_span("assemble"));

        let message = Message::new_with_blockhash(&instructions, Some(&buyer), &ctx.blockhash);
        let mut tx = Transaction::new_unsigned(message);
        signer
            .co_sign(&mut tx, ctx.blockhash)
            .map_err(|e| CheckoutError::internal(format!("shop co-sign failed: {e}")))?;
        if compat::present_signers(&tx) != [shop] {
            return Err(CheckoutError::internal(
                "co-signed transaction must carry the shop signature only",
            ));
        }

        debug!(
            correlation_id = %ctx.correlation_id(),
            trace_id = %ctx.trace_context.trace_id(),
            phase = ctx.trace_context.operation(),
            blockhash = %ctx.blockhash,
            elapsed_ms = ctx.elapsed_ms(),
            "Checkout transaction co-signed"
        );

        Ok(CheckoutTransaction {
            tx,
            message: operation.message(),
            total,
            payable,
            payable_base_units: base_units,
            loyalty: operation,
            reference,
            buyer,
            recipient: shop,
            payment_mint: self.assets.payment_mint,
            setup_signature,
        })
    }

    /// Create any missing buyer/shop token accounts in one shop-funded
    /// transaction. Returns the setup signature when one was needed.
    async fn ensure_token_accounts(
        &self,
        buyer: &Pubkey,
        signer: &ShopSigner,
        logger: &CheckoutLogger,
    ) -> Result<Option<Signature>, CheckoutError> {
        let shop = signer.pubkey();
        let wanted = [
            (*buyer, self.assets.payment_mint),
            (shop, self.assets.payment_mint),
            (*buyer, self.assets.coupon_mint),
            (shop, self.assets.coupon_mint),
        ];

        let lookups = try_join_all(wanted.iter().map(|(owner, mint)| {
            let address = associated_token_address(owner, mint);
            let ledger = Arc::clone(&self.ledger);
            async move { ledger.token_account(&address).await }
        }))
        .await?;

        let create: Vec<Instruction> = wanted
            .iter()
            .zip(lookups)
            .filter(|(_, account)| account.is_none())
            .map(|((owner, mint), _)| {
                create_associated_token_account_idempotent(&shop, owner, mint, &spl_token::id())
            })
            .collect();
        if create.is_empty() {
            return Ok(None);
        }

        let blockhash = self.ledger.latest_blockhash().await?;
        let mut tx = Transaction::new_with_payer(&create, Some(&shop));
        signer
            .sign(&mut tx, blockhash)
            .map_err(|e| CheckoutError::internal(format!("setup signing failed: {e}")))?;
        let signature = self.ledger.send_and_confirm(&tx).await?;

        metrics().setup_transactions.inc();
        logger.log_setup(create.len(), &signature.to_string());
        Ok(Some(signature))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::InMemoryLedger;
    use crate::tx_builder::instructions::THANKS_MESSAGE;
    use solana_sdk::signature::{Keypair, Signer};

    struct Shop {
        ledger: Arc<InMemoryLedger>,
        shop: Keypair,
        assets: ShopAssets,
    }

    fn shop() -> Shop {
        let ledger = Arc::new(InMemoryLedger::new());
        let assets = ShopAssets {
            payment_mint: Pubkey::new_unique(),
            coupon_mint: Pubkey::new_unique(),
        };
        ledger.create_mint(assets.payment_mint, 6);
        ledger.create_mint(assets.coupon_mint, 0);
        let shop = Keypair::new();
        ledger.mint_to(&shop.pubkey(), &assets.coupon_mint, 1_000_000);
        ledger.mint_to(&shop.pubkey(), &assets.payment_mint, 0);
        Shop {
            ledger,
            shop,
            assets,
        }
    }

    fn builder(s: &Shop) -> TransactionBuilder {
        let signer = ShopSigner::from_keypair(s.shop.insecure_clone());
        TransactionBuilder::new(s.ledger.clone(), Some(signer), s.assets)
    }

    fn cookies(n: &str) -> OrderRequest {
        OrderRequest::new().with_item("box-of-cookies", n)
    }

    #[tokio::test]
    async fn test_build_creates_missing_buyer_accounts() {
        let s = shop();
        let buyer = Pubkey::new_unique();

        let out = builder(&s)
            .build(&cookies("1"), Some(buyer), Some(Reference::generate()))
            .await
            .unwrap();

        assert!(out.setup_signature.is_some());
        assert!(s
            .ledger
            .account_exists(&associated_token_address(&buyer, &s.assets.coupon_mint)));
        assert!(s
            .ledger
            .account_exists(&associated_token_address(&buyer, &s.assets.payment_mint)));
        assert_eq!(out.message, THANKS_MESSAGE);
        assert_eq!(out.missing_signers(), vec![buyer]);
        assert_eq!(out.tx.message.account_keys[0], buyer);
    }

    #[tokio::test]
    async fn test_no_setup_when_accounts_exist() {
        let s = shop();
        let buyer = Pubkey::new_unique();
        s.ledger.mint_to(&buyer, &s.assets.payment_mint, 10_000_000);
        s.ledger.mint_to(&buyer, &s.assets.coupon_mint, 0);

        let out = builder(&s)
            .build(&cookies("1"), Some(buyer), Some(Reference::generate()))
            .await
            .unwrap();
        assert!(out.setup_signature.is_none());
    }

    #[tokio::test]
    async fn test_missing_shop_key_is_configuration_error() {
        let s = shop();
        let builder = TransactionBuilder::new(s.ledger.clone(), None, s.assets);
        let err = builder
            .build(&cookies("1"), Some(Pubkey::new_unique()), Some(Reference::generate()))
            .await
            .unwrap_err();
        assert!(matches!(err, CheckoutError::Configuration(_)));
        assert_eq!(err.status_code(), 500);
    }

    #[tokio::test]
    async fn test_validation_order() {
        let s = shop();
        let b = builder(&s);

        let err = b
            .build(&OrderRequest::new(), None, None)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Can't checkout with a value of 0");

        let err = b.build(&cookies("1"), None, None).await.unwrap_err();
        assert_eq!(err.to_string(), "No reference provided");

        let err = b
            .build(&cookies("1"), None, Some(Reference::generate()))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "No account provided");
    }

    #[tokio::test]
    async fn test_ledger_outage_fails_closed() {
        let s = shop();
        s.ledger.set_unavailable(true);
        let err = builder(&s)
            .build(&cookies("1"), Some(Pubkey::new_unique()), Some(Reference::generate()))
            .await
            .unwrap_err();
        assert!(matches!(err, CheckoutError::LedgerUnavailable(_)));
    }

    #[tokio::test]
    async fn test_dust_amount_is_rejected() {
        let s = shop();
        s.ledger.create_mint(s.assets.payment_mint, 0);
        let buyer = Pubkey::new_unique();
        s.ledger.mint_to(&buyer, &s.assets.coupon_mint, 5);

        // 5 USD halved with 0 decimals truncates to 2 whole units, still payable
        let out = builder(&s)
            .build(&cookies("1"), Some(buyer), Some(Reference::generate()))
            .await
            .unwrap();
        assert_eq!(out.payable_base_units, 2);

        // 0.01 cookies is 0.05 USD: below one whole unit
        let err = builder(&s)
            .build(&cookies("0.01"), Some(buyer), Some(Reference::generate()))
            .await
            .unwrap_err();
        assert!(matches!(err, CheckoutError::InvalidOrder(_)));
    }
}
