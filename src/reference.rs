//! Checkout references
//!
//! A reference is a freshly generated public key with no known use on chain.
//! It is attached to the payment instruction as a readonly, non-signing
//! account so the settled transaction can be found by querying the ledger for
//! signatures involving that address. It carries no authority.

use serde::{Deserialize, Serialize};
use solana_sdk::{
    pubkey::{ParsePubkeyError, Pubkey},
    signature::{Keypair, Signer},
};
use std::fmt;
use std::str::FromStr;

/// Single-use correlation key for one checkout attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Reference(Pubkey);

impl Reference {
    /// Mint a new reference from a random ed25519 keypair (the secret half is discarded)
    pub fn generate() -> Self {
        Self(Keypair::new().pubkey())
    }

    pub fn pubkey(&self) -> Pubkey {
        self.0
    }
}

impl From<Pubkey> for Reference {
    fn from(pubkey: Pubkey) -> Self {
        Self(pubkey)
    }
}

impl FromStr for Reference {
    type Err = ParsePubkeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Pubkey::from_str(s.trim()).map(Self)
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
