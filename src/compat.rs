//! Compatibility layer for Solana SDK message types
//!
//! Settlement records come back from RPC as `VersionedTransaction`s (legacy or
//! V0), while the checkout itself builds legacy `Transaction`s that leave the
//! server partially signed. This module gives one place to read account keys
//! and signer slots from either shape.

use solana_sdk::{
    message::VersionedMessage,
    pubkey::Pubkey,
    signature::Signature,
    transaction::Transaction,
};

/// Get the static account keys from a `VersionedMessage`.
///
/// For V0 messages this excludes addresses loaded from lookup tables; those
/// are reported separately in the transaction status meta.
#[inline]
#[must_use]
pub fn get_static_account_keys(message: &VersionedMessage) -> &[Pubkey] {
    match message {
        VersionedMessage::Legacy(legacy_msg) => &legacy_msg.account_keys,
        VersionedMessage::V0(v0_msg) => &v0_msg.account_keys,
    }
}

/// Signer keys of a legacy transaction whose signature slot is still empty
///
/// A checkout transaction leaves the server with exactly the buyer missing.
#[must_use]
pub fn missing_signers(tx: &Transaction) -> Vec<Pubkey> {
    let num_signers = tx.message.header.num_required_signatures as usize;
    tx.message
        .account_keys
        .iter()
        .take(num_signers)
        .zip(tx.signatures.iter())
        .filter(|(_, sig)| **sig == Signature::default())
        .map(|(key, _)| *key)
        .collect()
}

/// Signer keys of a legacy transaction that have already signed
#[must_use]
pub fn present_signers(tx: &Transaction) -> Vec<Pubkey> {
    let num_signers = tx.message.header.num_required_signatures as usize;
    tx.message
        .account_keys
        .iter()
        .take(num_signers)
        .zip(tx.signatures.iter())
        .filter(|(_, sig)| **sig != Signature::default())
        .map(|(key, _)| *key)
        .collect()
}
