//! Configuration module for the checkout service
//!
//! Loaded from a TOML file with serde defaults for everything optional. The
//! shop secret never lives in the file: the config only names the environment
//! variable that holds it (loaded from `.env` when present).

use crate::ledger::{InMemoryLedger, Ledger, RpcLedger};
use crate::tx_builder::instructions::COUPON_DECIMALS;
use crate::tx_builder::ShopAssets;
use crate::wallet::ShopSigner;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use solana_sdk::{commitment_config::CommitmentConfig, pubkey::Pubkey};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Coupons credited to the shop by the in-memory ledger
pub const DEMO_COUPON_SUPPLY: u64 = 1_000_000;
/// Decimals of the in-memory payment mint (USDC)
pub const DEMO_PAYMENT_DECIMALS: u8 = 6;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub ledger: LedgerConfig,

    pub shop: ShopConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub watcher: WatcherConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerMode {
    /// Solana JSON-RPC
    Rpc,
    /// Offline in-process ledger (demo mode)
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    #[serde(default = "default_ledger_mode")]
    pub mode: LedgerMode,

    /// RPC endpoint
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,

    /// processed | confirmed | finalized
    #[serde(default = "default_commitment")]
    pub commitment: String,

    /// Request timeout in seconds
    #[serde(default = "default_rpc_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShopConfig {
    /// Label returned by the transaction request descriptor
    #[serde(default = "default_label")]
    pub label: String,

    /// Icon URL returned by the transaction request descriptor
    #[serde(default = "default_icon")]
    pub icon: String,

    /// Mint the shop is paid in (USDC)
    pub payment_mint: String,

    /// Loyalty coupon mint
    pub coupon_mint: String,

    /// Environment variable holding the base58 shop secret key
    #[serde(default = "default_secret_key_env")]
    pub secret_key_env: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

// Default value functions
fn default_ledger_mode() -> LedgerMode { LedgerMode::Rpc }
fn default_rpc_url() -> String { "https://api.devnet.solana.com".to_string() }
fn default_commitment() -> String { "confirmed".to_string() }
fn default_rpc_timeout() -> u64 { 30 }
fn default_label() -> String { "Farm+Home".to_string() }
fn default_icon() -> String { "https://i.imgur.com/j8dmEta.png".to_string() }
fn default_secret_key_env() -> String { "SHOP_PRIVATE_KEY".to_string() }
fn default_bind() -> String { "127.0.0.1:3000".to_string() }
fn default_poll_interval_ms() -> u64 { 500 }

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            mode: default_ledger_mode(),
            rpc_url: default_rpc_url(),
            commitment: default_commitment(),
            timeout_secs: default_rpc_timeout(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: default_bind() }
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl LedgerConfig {
    pub fn commitment(&self) -> anyhow::Result<CommitmentConfig> {
        CommitmentConfig::from_str(&self.commitment)
            .map_err(|e| anyhow::anyhow!("Invalid commitment '{}': {}", self.commitment, e))
    }

    /// Ledger selected by `mode`
    ///
    /// The in-memory ledger starts with the shop's mints registered and the
    /// demo coupon supply credited to `shop`, so checkouts work offline.
    pub fn connect(
        &self,
        assets: &ShopAssets,
        shop: Option<Pubkey>,
    ) -> anyhow::Result<Arc<dyn Ledger>> {
        match self.mode {
            LedgerMode::Rpc => {
                info!("Using RPC ledger at {}", self.rpc_url);
                Ok(Arc::new(RpcLedger::new(
                    &self.rpc_url,
                    self.commitment()?,
                    Duration::from_secs(self.timeout_secs),
                )))
            }
            LedgerMode::Memory => {
                warn!("Using the in-memory ledger, nothing is settled on chain");
                let ledger = InMemoryLedger::new();
                ledger.create_mint(assets.payment_mint, DEMO_PAYMENT_DECIMALS);
                ledger.create_mint(assets.coupon_mint, COUPON_DECIMALS);
                if let Some(shop) = shop {
                    ledger.mint_to(&shop, &assets.coupon_mint, DEMO_COUPON_SUPPLY);
                }
                Ok(Arc::new(ledger))
            }
        }
    }
}

impl ShopConfig {
    pub fn assets(&self) -> anyhow::Result<ShopAssets> {
        Ok(ShopAssets {
            payment_mint: Pubkey::from_str(&self.payment_mint)
                .with_context(|| format!("Invalid payment mint: {}", self.payment_mint))?,
            coupon_mint: Pubkey::from_str(&self.coupon_mint)
                .with_context(|| format!("Invalid coupon mint: {}", self.coupon_mint))?,
        })
    }

    /// Shop signer from the environment; `Ok(None)` when the variable is unset
    pub fn signer_from_env(&self) -> anyhow::Result<Option<ShopSigner>> {
        match std::env::var(&self.secret_key_env) {
            Ok(secret) if !secret.trim().is_empty() => {
                let signer = ShopSigner::from_base58(&secret)
                    .with_context(|| format!("Invalid secret key in {}", self.secret_key_env))?;
                Ok(Some(signer))
            }
            _ => Ok(None),
        }
    }
}

impl WatcherConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path))?;
        config.validate()?;
        Ok(config)
    }

    /// Load `.env` first, then the TOML file
    pub fn from_file_with_env(path: &str) -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_file(path)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.shop.assets()?;
        self.ledger.commitment()?;
        if self.watcher.poll_interval_ms == 0 {
            anyhow::bail!("watcher.poll_interval_ms must be greater than 0");
        }
        Ok(())
    }
}
