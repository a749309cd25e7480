//! In-memory SPL token ledger
//!
//! Executes the subset of instructions a checkout produces (associated token
//! account creation and `transfer_checked`) against an in-process account map,
//! and keeps an append-only list of settlement records indexed by every
//! account key, the way an RPC node answers `getSignaturesForAddress`.
//!
//! Used for the offline demo mode and throughout the test suite. Fault
//! injection knobs let tests simulate an unavailable ledger or transient
//! lookup failures, and call counters make polling behaviour observable.

use super::{
    associated_token_address, Ledger, LedgerError, SettlementRecord, TokenAccount,
    TokenBalanceChange,
};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use solana_sdk::{
    hash::Hash,
    instruction::CompiledInstruction,
    pubkey::Pubkey,
    signature::Signature,
    transaction::Transaction,
};
use spl_token::instruction::TokenInstruction;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use tracing::debug;

const ATA_CREATE: u8 = 0;
const ATA_CREATE_IDEMPOTENT: u8 = 1;

#[derive(Debug, Default)]
struct State {
    mints: HashMap<Pubkey, u8>,
    accounts: HashMap<Pubkey, TokenAccount>,
    records: HashMap<Signature, SettlementRecord>,
    /// Signatures per address, oldest first
    address_index: HashMap<Pubkey, Vec<Signature>>,
}

/// Offline ledger implementing [`Ledger`]
#[derive(Debug)]
pub struct InMemoryLedger {
    state: Mutex<State>,
    blockhash: Hash,
    slot: AtomicU64,
    unavailable: AtomicBool,
    failing_lookups: AtomicUsize,
    signature_lookups: AtomicUsize,
    record_fetches: AtomicUsize,
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            blockhash: Hash::new_unique(),
            slot: AtomicU64::new(1),
            unavailable: AtomicBool::new(false),
            failing_lookups: AtomicUsize::new(0),
            signature_lookups: AtomicUsize::new(0),
            record_fetches: AtomicUsize::new(0),
        }
    }

    /// Register a mint with its decimal precision
    pub fn create_mint(&self, mint: Pubkey, decimals: u8) {
        self.state.lock().mints.insert(mint, decimals);
    }

    /// Credit `amount` base units to the owner's associated token account, creating it if needed
    pub fn mint_to(&self, owner: &Pubkey, mint: &Pubkey, amount: u64) -> Pubkey {
        let address = associated_token_address(owner, mint);
        let mut state = self.state.lock();
        let account = state.accounts.entry(address).or_insert(TokenAccount {
            address,
            mint: *mint,
            owner: *owner,
            amount: 0,
        });
        account.amount = account.amount.saturating_add(amount);
        address
    }

    /// Current balance of the owner's associated token account (0 when missing)
    pub fn balance_of(&self, owner: &Pubkey, mint: &Pubkey) -> u64 {
        let address = associated_token_address(owner, mint);
        self.state
            .lock()
            .accounts
            .get(&address)
            .map(|a| a.amount)
            .unwrap_or(0)
    }

    pub fn account_exists(&self, address: &Pubkey) -> bool {
        self.state.lock().accounts.contains_key(address)
    }

    /// Append an externally produced record (eg. a transfer that did not go through this ledger)
    pub fn insert_record(&self, record: SettlementRecord) {
        let mut state = self.state.lock();
        Self::index_record(&mut state, record);
    }

    /// Make every read and write fail until switched back
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Fail the next `count` signature lookups with a transient error
    pub fn fail_next_lookups(&self, count: usize) {
        self.failing_lookups.store(count, Ordering::SeqCst);
    }

    /// Number of `signatures_for_address` calls served so far
    pub fn signature_lookups(&self) -> usize {
        self.signature_lookups.load(Ordering::SeqCst)
    }

    /// Number of `settlement_record` calls served so far
    pub fn record_fetches(&self) -> usize {
        self.record_fetches.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<(), LedgerError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(LedgerError::Transport {
                endpoint: "memory".to_string(),
                message: "ledger unavailable".to_string(),
            });
        }
        Ok(())
    }

    fn index_record(state: &mut State, record: SettlementRecord) {
        let keys: BTreeSet<Pubkey> = record.account_keys.iter().copied().collect();
        for key in keys {
            state
                .address_index
                .entry(key)
                .or_default()
                .push(record.signature);
        }
        state.records.insert(record.signature, record);
    }

    fn execute(
        state: &mut State,
        tx: &Transaction,
        touched: &mut BTreeSet<Pubkey>,
    ) -> Result<(), LedgerError> {
        for (position, ix) in tx.message.instructions.iter().enumerate() {
            let program_id = key_at(tx, ix.program_id_index)?;
            let result = if program_id == spl_associated_token_account::id() {
                Self::execute_create_ata(state, tx, ix, touched)
            } else if program_id == spl_token::id() {
                Self::execute_token(state, tx, ix, touched)
            } else {
                Err(reject(format!("unsupported program {program_id}")))
            };
            result.map_err(|e| match e {
                LedgerError::TransactionRejected(reason) => LedgerError::TransactionRejected(
                    format!("instruction {position}: {reason}"),
                ),
                other => other,
            })?;
        }
        Ok(())
    }

    fn execute_create_ata(
        state: &mut State,
        tx: &Transaction,
        ix: &CompiledInstruction,
        touched: &mut BTreeSet<Pubkey>,
    ) -> Result<(), LedgerError> {
        let mode = ix.data.first().copied().unwrap_or(ATA_CREATE);
        let address = account_at(tx, ix, 1)?;
        let wallet = account_at(tx, ix, 2)?;
        let mint = account_at(tx, ix, 3)?;

        if !state.mints.contains_key(&mint) {
            return Err(reject(format!("unknown mint {mint}")));
        }
        if address != associated_token_address(&wallet, &mint) {
            return Err(reject(format!("{address} is not the associated account of {wallet}")));
        }
        if state.accounts.contains_key(&address) {
            return match mode {
                ATA_CREATE_IDEMPOTENT => Ok(()),
                _ => Err(reject(format!("account {address} already in use"))),
            };
        }

        state.accounts.insert(
            address,
            TokenAccount {
                address,
                mint,
                owner: wallet,
                amount: 0,
            },
        );
        touched.insert(address);
        Ok(())
    }

    fn execute_token(
        state: &mut State,
        tx: &Transaction,
        ix: &CompiledInstruction,
        touched: &mut BTreeSet<Pubkey>,
    ) -> Result<(), LedgerError> {
        let instruction =
            TokenInstruction::unpack(&ix.data).map_err(|e| reject(format!("bad token data: {e}")))?;

        let TokenInstruction::TransferChecked { amount, decimals } = instruction else {
            return Err(reject("only transfer_checked is supported".to_string()));
        };

        let source = account_at(tx, ix, 0)?;
        let mint = account_at(tx, ix, 1)?;
        let destination = account_at(tx, ix, 2)?;
        let authority_index = *ix
            .accounts
            .get(3)
            .ok_or_else(|| reject("missing authority".to_string()))?;
        let authority = key_at(tx, authority_index)?;

        let mint_decimals = *state
            .mints
            .get(&mint)
            .ok_or_else(|| reject(format!("unknown mint {mint}")))?;
        if mint_decimals != decimals {
            return Err(reject(format!(
                "decimals mismatch: mint has {mint_decimals}, instruction says {decimals}"
            )));
        }
        if !tx.message.is_signer(usize::from(authority_index)) {
            return Err(reject(format!("authority {authority} did not sign")));
        }

        let from = state
            .accounts
            .get(&source)
            .cloned()
            .ok_or_else(|| reject(format!("source account {source} not found")))?;
        let to = state
            .accounts
            .get(&destination)
            .cloned()
            .ok_or_else(|| reject(format!("destination account {destination} not found")))?;

        if from.owner != authority {
            return Err(reject(format!("{authority} does not own {source}")));
        }
        if from.mint != mint || to.mint != mint {
            return Err(reject("account mint mismatch".to_string()));
        }
        if from.amount < amount {
            return Err(reject(format!(
                "insufficient funds: {} < {}",
                from.amount, amount
            )));
        }

        if let Some(a) = state.accounts.get_mut(&source) {
            a.amount -= amount;
        }
        if let Some(a) = state.accounts.get_mut(&destination) {
            a.amount = a
                .amount
                .checked_add(amount)
                .ok_or_else(|| reject("destination overflow".to_string()))?;
        }
        touched.insert(source);
        touched.insert(destination);
        Ok(())
    }
}

fn reject(reason: String) -> LedgerError {
    LedgerError::TransactionRejected(reason)
}

fn key_at(tx: &Transaction, index: u8) -> Result<Pubkey, LedgerError> {
    tx.message
        .account_keys
        .get(usize::from(index))
        .copied()
        .ok_or_else(|| reject(format!("account index {index} out of range")))
}

fn account_at(tx: &Transaction, ix: &CompiledInstruction, position: usize) -> Result<Pubkey, LedgerError> {
    let index = *ix
        .accounts
        .get(position)
        .ok_or_else(|| reject(format!("instruction is missing account #{position}")))?;
    key_at(tx, index)
}

#[async_trait]
impl Ledger for InMemoryLedger {
    async fn token_account(&self, address: &Pubkey) -> Result<Option<TokenAccount>, LedgerError> {
        self.check_available()?;
        Ok(self.state.lock().accounts.get(address).cloned())
    }

    async fn mint_decimals(&self, mint: &Pubkey) -> Result<u8, LedgerError> {
        self.check_available()?;
        self.state
            .lock()
            .mints
            .get(mint)
            .copied()
            .ok_or_else(|| LedgerError::AccountNotFound(mint.to_string()))
    }

    async fn latest_blockhash(&self) -> Result<Hash, LedgerError> {
        self.check_available()?;
        Ok(self.blockhash)
    }

    async fn send_and_confirm(&self, tx: &Transaction) -> Result<Signature, LedgerError> {
        self.check_available()?;

        if tx.message.recent_blockhash != self.blockhash {
            return Err(reject("Blockhash not found".to_string()));
        }
        tx.verify()
            .map_err(|e| reject(format!("signature verification failed: {e}")))?;
        let signature = *tx
            .signatures
            .first()
            .ok_or_else(|| reject("transaction has no signatures".to_string()))?;

        let mut state = self.state.lock();
        if state.records.contains_key(&signature) {
            return Err(reject("transaction already processed".to_string()));
        }

        let snapshot = state.accounts.clone();
        let mut touched = BTreeSet::new();
        if let Err(e) = Self::execute(&mut state, tx, &mut touched) {
            // All-or-nothing: roll back every instruction of the transaction
            state.accounts = snapshot;
            debug!(error = %e, "In-memory transaction rejected");
            return Err(e);
        }

        let token_balances = touched
            .iter()
            .filter_map(|address| {
                let after = state.accounts.get(address)?;
                let decimals = state.mints.get(&after.mint).copied().unwrap_or(0);
                Some(TokenBalanceChange {
                    account: *address,
                    owner: Some(after.owner),
                    mint: after.mint,
                    decimals,
                    pre: snapshot.get(address).map(|a| a.amount).unwrap_or(0),
                    post: after.amount,
                })
            })
            .collect();

        let record = SettlementRecord {
            signature,
            slot: self.slot.fetch_add(1, Ordering::SeqCst),
            block_time: Some(Utc::now()),
            account_keys: tx.message.account_keys.clone(),
            token_balances,
            error: None,
        };
        Self::index_record(&mut state, record);

        debug!(signature = %signature, "In-memory transaction confirmed");
        Ok(signature)
    }

    async fn signatures_for_address(
        &self,
        address: &Pubkey,
    ) -> Result<Vec<Signature>, LedgerError> {
        self.signature_lookups.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;

        let pending_failures = self.failing_lookups.load(Ordering::SeqCst);
        if pending_failures > 0 {
            self.failing_lookups
                .store(pending_failures - 1, Ordering::SeqCst);
            return Err(LedgerError::Timeout {
                endpoint: "memory".to_string(),
            });
        }

        let state = self.state.lock();
        Ok(state
            .address_index
            .get(address)
            .map(|sigs| sigs.iter().rev().copied().collect())
            .unwrap_or_default())
    }

    async fn settlement_record(
        &self,
        signature: &Signature,
    ) -> Result<Option<SettlementRecord>, LedgerError> {
        self.record_fetches.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        Ok(self.state.lock().records.get(signature).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use solana_sdk::{
        message::Message,
        signature::{Keypair, Signer},
    };

    fn transfer(
        ledger: &InMemoryLedger,
        from: &Keypair,
        to: &Pubkey,
        mint: &Pubkey,
        amount: u64,
        decimals: u8,
    ) -> Transaction {
        let ix = spl_token::instruction::transfer_checked(
            &spl_token::id(),
            &associated_token_address(&from.pubkey(), mint),
            mint,
            &associated_token_address(to, mint),
            &from.pubkey(),
            &[],
            amount,
            decimals,
        )
        .unwrap();
        let message = Message::new_with_blockhash(&[ix], Some(&from.pubkey()), &ledger.blockhash);
        let mut tx = Transaction::new_unsigned(message);
        tx.sign(&[from], ledger.blockhash);
        tx
    }

    #[tokio::test]
    async fn test_transfer_moves_funds_and_records() {
        let ledger = InMemoryLedger::new();
        let mint = Pubkey::new_unique();
        let alice = Keypair::new();
        let bob = Pubkey::new_unique();
        ledger.create_mint(mint, 6);
        ledger.mint_to(&alice.pubkey(), &mint, 10_000_000);
        ledger.mint_to(&bob, &mint, 0);

        let tx = transfer(&ledger, &alice, &bob, &mint, 2_500_000, 6);
        let sig = ledger.send_and_confirm(&tx).await.unwrap();

        assert_eq!(ledger.balance_of(&alice.pubkey(), &mint), 7_500_000);
        assert_eq!(ledger.balance_of(&bob, &mint), 2_500_000);

        let record = ledger.settlement_record(&sig).await.unwrap().unwrap();
        assert!(record.succeeded());
        let credit = record
            .token_balances
            .iter()
            .find(|c| c.owner == Some(bob))
            .unwrap();
        assert_eq!(credit.delta(), 2_500_000);

        let found = ledger.signatures_for_address(&bob).await.unwrap();
        assert!(found.is_empty(), "wallet address is not a key of the transfer");
        let found = ledger
            .signatures_for_address(&associated_token_address(&bob, &mint))
            .await
            .unwrap();
        assert_eq!(found, vec![sig]);
    }

    #[tokio::test]
    async fn test_failed_transaction_rolls_back() {
        let ledger = InMemoryLedger::new();
        let mint = Pubkey::new_unique();
        let alice = Keypair::new();
        let bob = Pubkey::new_unique();
        ledger.create_mint(mint, 0);
        ledger.mint_to(&alice.pubkey(), &mint, 3);
        ledger.mint_to(&bob, &mint, 0);

        let tx = transfer(&ledger, &alice, &bob, &mint, 5, 0);
        let err = ledger.send_and_confirm(&tx).await.unwrap_err();
        assert!(matches!(err, LedgerError::TransactionRejected(_)));
        assert_eq!(ledger.balance_of(&alice.pubkey(), &mint), 3);
        assert_eq!(ledger.balance_of(&bob, &mint), 0);
    }

    #[tokio::test]
    async fn test_unsigned_transaction_is_rejected() {
        let ledger = InMemoryLedger::new();
        let mint = Pubkey::new_unique();
        let alice = Keypair::new();
        let bob = Pubkey::new_unique();
        ledger.create_mint(mint, 0);
        ledger.mint_to(&alice.pubkey(), &mint, 3);
        ledger.mint_to(&bob, &mint, 0);

        let mut tx = transfer(&ledger, &alice, &bob, &mint, 1, 0);
        tx.signatures[0] = Signature::default();
        assert!(ledger.send_and_confirm(&tx).await.is_err());
        assert_eq!(ledger.balance_of(&bob, &mint), 0);
    }

    #[tokio::test]
    async fn test_fault_injection() {
        let ledger = InMemoryLedger::new();
        let key = Pubkey::new_unique();

        ledger.fail_next_lookups(2);
        assert!(ledger.signatures_for_address(&key).await.is_err());
        assert!(ledger.signatures_for_address(&key).await.is_err());
        assert!(ledger.signatures_for_address(&key).await.is_ok());
        assert_eq!(ledger.signature_lookups(), 3);

        ledger.set_unavailable(true);
        assert!(ledger.token_account(&key).await.is_err());
        ledger.set_unavailable(false);
        assert!(ledger.token_account(&key).await.unwrap().is_none());
    }
}
