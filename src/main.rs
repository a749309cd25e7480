//! coupon-checkout service entry point
//!
//! - `serve`: HTTP transaction request endpoint plus metrics/health
//! - `checkout`: build a checkout transaction for a buyer and watch for it
//! - `pay-url`: print a Solana Pay transfer request URL and watch for it

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use coupon_checkout::{
    api::TransactionRequester,
    config::Config,
    endpoints,
    ledger::Ledger,
    pricing::OrderRequest,
    session::CheckoutSession,
    solana_pay::encode_transfer_url,
    tx_builder::{to_base_units, TransactionBuilder, THANKS_MESSAGE},
    watcher::SettlementExpectation,
};
use solana_sdk::pubkey::Pubkey;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the transaction request endpoint
    Serve {
        /// Override `server.bind`
        #[arg(long)]
        bind: Option<String>,
    },

    /// Build a checkout transaction for a buyer, then wait for it to settle
    Checkout {
        /// Buyer wallet address
        #[arg(long)]
        buyer: String,

        /// Order line as `<item-id>=<quantity>`, repeatable
        #[arg(long = "item", value_parser = parse_item, required = true)]
        items: Vec<(String, String)>,

        /// Print the transaction and exit without watching
        #[arg(long)]
        no_watch: bool,
    },

    /// Print a Solana Pay transfer request URL, then wait for the payment
    PayUrl {
        /// Order line as `<item-id>=<quantity>`, repeatable
        #[arg(long = "item", value_parser = parse_item, required = true)]
        items: Vec<(String, String)>,

        /// Recipient override; defaults to the shop key
        #[arg(long)]
        recipient: Option<String>,

        /// Print the URL and exit without watching
        #[arg(long)]
        no_watch: bool,
    },
}

fn parse_item(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(id, qty)| (id.trim().to_string(), qty.trim().to_string()))
        .filter(|(id, qty)| !id.is_empty() && !qty.is_empty())
        .ok_or_else(|| format!("expected <item-id>=<quantity>, got '{raw}'"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose)?;

    info!("Starting coupon-checkout {}", env!("CARGO_PKG_VERSION"));
    let config = Config::from_file_with_env(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config))?;

    let assets = config.shop.assets()?;
    let signer = config.shop.signer_from_env()?;
    match &signer {
        Some(signer) => info!("Shop address: {}", signer.pubkey()),
        None => warn!(
            "{} is not set, checkout requests will fail until it is",
            config.shop.secret_key_env
        ),
    }

    let ledger = config
        .ledger
        .connect(&assets, signer.as_ref().map(|s| s.pubkey()))?;
    let builder = TransactionBuilder::new(Arc::clone(&ledger), signer, assets);
    let period = config.watcher.poll_interval();

    match args.command {
        Command::Serve { bind } => {
            let bind = bind.unwrap_or_else(|| config.server.bind.clone());
            let requester = Arc::new(TransactionRequester::new(
                builder,
                config.shop.label.clone(),
                config.shop.icon.clone(),
            ));
            tokio::select! {
                result = endpoints::endpoint_server(&bind, requester) => result?,
                _ = tokio::signal::ctrl_c() => info!("Received shutdown signal"),
            }
        }
        Command::Checkout {
            buyer,
            items,
            no_watch,
        } => {
            let buyer = Pubkey::from_str(&buyer).context("Invalid buyer address")?;
            let mut session = CheckoutSession::new(OrderRequest::from_pairs(items));

            let built = session.request_transaction(&builder, buyer).await?;
            println!("reference:   {}", built.reference);
            println!("total:       {}", built.total);
            println!("payable:     {}", built.payable);
            println!("message:     {}", built.message);
            println!("transaction: {}", built.serialize_base64()?);

            if !no_watch {
                session.watch_transaction(Arc::clone(&ledger), period)?;
                wait_for_settlement(&mut session).await;
            }
        }
        Command::PayUrl {
            items,
            recipient,
            no_watch,
        } => {
            let recipient = match recipient {
                Some(r) => Pubkey::from_str(&r).context("Invalid recipient address")?,
                None => builder
                    .shop()
                    .context("No recipient given and the shop key is not available")?,
            };
            let mut session = CheckoutSession::new(OrderRequest::from_pairs(items));
            let total = session.total();
            if total.is_zero() {
                anyhow::bail!("Can't checkout with a value of 0");
            }

            let request = session.transfer_request(
                recipient,
                assets.payment_mint,
                &config.shop.label,
                THANKS_MESSAGE,
            );
            println!("{}", encode_transfer_url(&request)?);

            if !no_watch {
                let decimals = ledger.mint_decimals(&assets.payment_mint).await?;
                let amount = to_base_units(total, decimals)
                    .with_context(|| format!("Amount {total} cannot be represented"))?;
                session.watch(
                    Arc::clone(&ledger),
                    SettlementExpectation {
                        reference: *session.reference(),
                        recipient,
                        mint: assets.payment_mint,
                        amount,
                    },
                    period,
                );
                wait_for_settlement(&mut session).await;
            }
        }
    }

    Ok(())
}

async fn wait_for_settlement(session: &mut CheckoutSession) {
    info!(reference = %session.reference(), "Waiting for payment");
    tokio::select! {
        confirmed = session.wait_confirmed() => match confirmed {
            Some(signature) => println!("confirmed:   {signature}"),
            None => warn!("Watcher stopped without confirmation"),
        },
        _ = tokio::signal::ctrl_c() => {
            session.cancel();
            info!("Cancelled");
        }
    }
}

/// Initialize logging subsystem
fn init_logging(verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        "coupon_checkout=debug,info"
    } else {
        "coupon_checkout=info,warn"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| env_filter.into());

    #[cfg(feature = "json-logs")]
    let fmt_layer = tracing_subscriber::fmt::layer().json().with_target(true);
    #[cfg(not(feature = "json-logs"))]
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .context("Failed to initialize logging")?;

    Ok(())
}
