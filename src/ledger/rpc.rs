//! Solana JSON-RPC ledger

use super::{Ledger, LedgerError, SettlementRecord, TokenAccount, TokenBalanceChange};
use crate::compat;
use async_trait::async_trait;
use chrono::DateTime;
use solana_client::{
    nonblocking::rpc_client::RpcClient, rpc_client::GetConfirmedSignaturesForAddress2Config,
};
use solana_rpc_client_api::config::RpcTransactionConfig;
use solana_sdk::{
    commitment_config::CommitmentConfig,
    hash::Hash,
    pubkey::Pubkey,
    signature::Signature,
    transaction::Transaction,
};
use solana_transaction_status::{
    EncodedConfirmedTransactionWithStatusMeta, UiLoadedAddresses, UiTransactionEncoding,
    UiTransactionTokenBalance,
};
use spl_token::solana_program::program_pack::Pack;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

/// Page size of `getSignaturesForAddress`; references are single-use so one page is plenty
const SIGNATURE_PAGE_LIMIT: usize = 1000;

/// Ledger backed by a Solana RPC node
#[derive(Clone)]
pub struct RpcLedger {
    client: Arc<RpcClient>,
    endpoint: String,
    commitment: CommitmentConfig,
}

impl std::fmt::Debug for RpcLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcLedger")
            .field("endpoint", &self.endpoint)
            .field("commitment", &self.commitment.commitment)
            .finish()
    }
}

impl RpcLedger {
    pub fn new(endpoint: impl Into<String>, commitment: CommitmentConfig, timeout: Duration) -> Self {
        let endpoint = endpoint.into();
        let client =
            RpcClient::new_with_timeout_and_commitment(endpoint.clone(), timeout, commitment);
        Self {
            client: Arc::new(client),
            endpoint,
            commitment,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Underlying client, for shop-side tooling that needs raw RPC access
    pub fn client(&self) -> Arc<RpcClient> {
        Arc::clone(&self.client)
    }

    fn map_err(&self, err: solana_client::client_error::ClientError) -> LedgerError {
        LedgerError::from_client_error(err, &self.endpoint)
    }
}

#[async_trait]
impl Ledger for RpcLedger {
    #[instrument(skip(self), fields(endpoint = %self.endpoint))]
    async fn token_account(&self, address: &Pubkey) -> Result<Option<TokenAccount>, LedgerError> {
        let account = self
            .client
            .get_account_with_commitment(address, self.commitment)
            .await
            .map_err(|e| self.map_err(e))?
            .value;

        let Some(account) = account else {
            debug!(account = %address, "Token account not found");
            return Ok(None);
        };

        if account.owner != spl_token::id() {
            return Err(LedgerError::AccountDecode {
                account: address.to_string(),
                reason: format!("owned by {}, not the token program", account.owner),
            });
        }

        let state = spl_token::state::Account::unpack(&account.data).map_err(|e| {
            LedgerError::AccountDecode {
                account: address.to_string(),
                reason: e.to_string(),
            }
        })?;

        Ok(Some(TokenAccount {
            address: *address,
            mint: state.mint,
            owner: state.owner,
            amount: state.amount,
        }))
    }

    #[instrument(skip(self), fields(endpoint = %self.endpoint))]
    async fn mint_decimals(&self, mint: &Pubkey) -> Result<u8, LedgerError> {
        let account = self
            .client
            .get_account_with_commitment(mint, self.commitment)
            .await
            .map_err(|e| self.map_err(e))?
            .value
            .ok_or_else(|| LedgerError::AccountNotFound(mint.to_string()))?;

        let state = spl_token::state::Mint::unpack(&account.data).map_err(|e| {
            LedgerError::AccountDecode {
                account: mint.to_string(),
                reason: e.to_string(),
            }
        })?;

        Ok(state.decimals)
    }

    async fn latest_blockhash(&self) -> Result<Hash, LedgerError> {
        self.client
            .get_latest_blockhash()
            .await
            .map_err(|e| self.map_err(e))
    }

    #[instrument(skip(self, tx), fields(endpoint = %self.endpoint))]
    async fn send_and_confirm(&self, tx: &Transaction) -> Result<Signature, LedgerError> {
        self.client
            .send_and_confirm_transaction(tx)
            .await
            .map_err(|e| self.map_err(e))
    }

    async fn signatures_for_address(
        &self,
        address: &Pubkey,
    ) -> Result<Vec<Signature>, LedgerError> {
        let config = GetConfirmedSignaturesForAddress2Config {
            before: None,
            until: None,
            limit: Some(SIGNATURE_PAGE_LIMIT),
            commitment: Some(self.commitment),
        };

        let statuses = self
            .client
            .get_signatures_for_address_with_config(address, config)
            .await
            .map_err(|e| self.map_err(e))?;

        statuses
            .into_iter()
            .map(|status| {
                Signature::from_str(&status.signature).map_err(|e| {
                    LedgerError::Internal(format!(
                        "Invalid signature '{}' from RPC: {}",
                        status.signature, e
                    ))
                })
            })
            .collect()
    }

    #[instrument(skip(self), fields(endpoint = %self.endpoint))]
    async fn settlement_record(
        &self,
        signature: &Signature,
    ) -> Result<Option<SettlementRecord>, LedgerError> {
        let config = RpcTransactionConfig {
            encoding: Some(UiTransactionEncoding::Base64),
            commitment: Some(self.commitment),
            max_supported_transaction_version: Some(0),
        };

        match self.client.get_transaction_with_config(signature, config).await {
            Ok(confirmed) => decode_record(*signature, confirmed).map(Some),
            Err(e) => {
                let message = e.to_string();
                // The node answers `null` for signatures it has not indexed yet
                if message.contains("invalid type: null") {
                    debug!(signature = %signature, "Transaction not available yet");
                    Ok(None)
                } else {
                    Err(self.map_err(e))
                }
            }
        }
    }
}

fn decode_record(
    signature: Signature,
    confirmed: EncodedConfirmedTransactionWithStatusMeta,
) -> Result<SettlementRecord, LedgerError> {
    let EncodedConfirmedTransactionWithStatusMeta {
        slot,
        transaction,
        block_time,
    } = confirmed;

    let decoded = transaction.transaction.decode().ok_or_else(|| {
        LedgerError::Internal(format!("Undecodable transaction payload for {signature}"))
    })?;
    let meta = transaction
        .meta
        .ok_or_else(|| LedgerError::Internal(format!("Missing status meta for {signature}")))?;

    let mut account_keys = compat::get_static_account_keys(&decoded.message).to_vec();
    if let Some(loaded) = Option::<UiLoadedAddresses>::from(meta.loaded_addresses) {
        for key in loaded.writable.iter().chain(loaded.readonly.iter()) {
            account_keys.push(parse_pubkey(key)?);
        }
    }

    let pre = Option::<Vec<UiTransactionTokenBalance>>::from(meta.pre_token_balances)
        .unwrap_or_default();
    let post = Option::<Vec<UiTransactionTokenBalance>>::from(meta.post_token_balances)
        .unwrap_or_default();

    Ok(SettlementRecord {
        signature,
        slot,
        block_time: block_time.and_then(|t| DateTime::from_timestamp(t, 0)),
        token_balances: merge_token_balances(&account_keys, &pre, &post)?,
        account_keys,
        error: meta.err.as_ref().map(|e| format!("{e:?}")),
    })
}

/// Pair pre/post token balances by account index
fn merge_token_balances(
    account_keys: &[Pubkey],
    pre: &[UiTransactionTokenBalance],
    post: &[UiTransactionTokenBalance],
) -> Result<Vec<TokenBalanceChange>, LedgerError> {
    let mut merged: BTreeMap<u8, TokenBalanceChange> = BTreeMap::new();

    for (balance, is_post) in pre
        .iter()
        .map(|b| (b, false))
        .chain(post.iter().map(|b| (b, true)))
    {
        let account = account_keys
            .get(usize::from(balance.account_index))
            .copied()
            .ok_or_else(|| {
                LedgerError::Internal(format!(
                    "Token balance references unknown account index {}",
                    balance.account_index
                ))
            })?;
        let amount = balance.ui_token_amount.amount.parse::<u64>().map_err(|e| {
            LedgerError::Internal(format!(
                "Invalid token amount '{}': {}",
                balance.ui_token_amount.amount, e
            ))
        })?;
        let owner = Option::<String>::from(balance.owner.clone())
            .map(|o| parse_pubkey(&o))
            .transpose()?;

        let entry = merged
            .entry(balance.account_index)
            .or_insert(TokenBalanceChange {
                account,
                owner,
                mint: parse_pubkey(&balance.mint)?,
                decimals: balance.ui_token_amount.decimals,
                pre: 0,
                post: 0,
            });

        if is_post {
            entry.post = amount;
        } else {
            entry.pre = amount;
        }
        if entry.owner.is_none() {
            entry.owner = owner;
        }
    }

    Ok(merged.into_values().collect())
}

fn parse_pubkey(s: &str) -> Result<Pubkey, LedgerError> {
    Pubkey::from_str(s)
        .map_err(|e| LedgerError::Internal(format!("Invalid pubkey '{s}' from RPC: {e}")))
}
