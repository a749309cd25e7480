//! Shop signing authority
//!
//! Holds the shop's secret key and exposes only what the checkout needs:
//! the public identity, partial co-signing of a checkout transaction, and full
//! signing of the shop-funded setup transactions.

use anyhow::{Context, Result};
use solana_sdk::{
    hash::Hash,
    pubkey::Pubkey,
    signature::{Keypair, Signer, SignerError},
    transaction::Transaction,
};
use std::sync::Arc;
use zeroize::Zeroize;

/// Shop keypair wrapper
pub struct ShopSigner {
    keypair: Arc<Keypair>,
}

impl std::fmt::Debug for ShopSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShopSigner")
            .field("pubkey", &self.pubkey())
            .finish_non_exhaustive()
    }
}

impl ShopSigner {
    /// Decode a base58 secret key (the format wallets export)
    pub fn from_base58(secret: &str) -> Result<Self> {
        let mut bytes = bs58::decode(secret.trim())
            .into_vec()
            .context("Shop secret key is not valid base58")?;
        let keypair = Self::keypair_from_bytes(&bytes);
        bytes.zeroize();
        Ok(Self::from_keypair(keypair?))
    }

    /// Load from a keypair file (JSON byte array or 64 raw bytes)
    pub fn from_file(path: &str) -> Result<Self> {
        let mut keypair_bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read keypair file: {}", path))?;

        let keypair = if keypair_bytes.len() == 64 {
            Self::keypair_from_bytes(&keypair_bytes)
        } else {
            let mut json: Vec<u8> = serde_json::from_slice(&keypair_bytes)
                .context("Failed to parse keypair JSON")?;
            let keypair = Self::keypair_from_bytes(&json);
            json.zeroize();
            keypair
        };
        keypair_bytes.zeroize();

        Ok(Self::from_keypair(keypair?))
    }

    pub fn from_keypair(keypair: Keypair) -> Self {
        Self {
            keypair: Arc::new(keypair),
        }
    }

    fn keypair_from_bytes(bytes: &[u8]) -> Result<Keypair> {
        if bytes.len() != 64 {
            anyhow::bail!("Invalid keypair length: expected 64 bytes, got {}", bytes.len());
        }
        if bytes.iter().all(|&b| b == 0) {
            anyhow::bail!("Invalid keypair: all-zero key rejected");
        }
        Keypair::try_from(bytes).context("Invalid keypair bytes")
    }

    /// Public identity of the shop
    pub fn pubkey(&self) -> Pubkey {
        self.keypair.pubkey()
    }

    /// Add the shop signature, leaving other signer slots untouched
    pub fn co_sign(&self, tx: &mut Transaction, blockhash: Hash) -> Result<(), SignerError> {
        tx.try_partial_sign(&[self.keypair.as_ref()], blockhash)
    }

    /// Sign a transaction the shop is the only signer of
    pub fn sign(&self, tx: &mut Transaction, blockhash: Hash) -> Result<(), SignerError> {
        tx.try_sign(&[self.keypair.as_ref()], blockhash)
    }
}

impl Clone for ShopSigner {
    fn clone(&self) -> Self {
        Self {
            keypair: Arc::clone(&self.keypair),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_from_base58_roundtrip() {
        let keypair = Keypair::new();
        let encoded = bs58::encode(keypair.to_bytes()).into_string();
        let signer = ShopSigner::from_base58(&encoded).unwrap();
        assert_eq!(signer.pubkey(), keypair.pubkey());
    }

    #[test]
    fn test_rejects_bad_secrets() {
        assert!(ShopSigner::from_base58("0OIl").is_err());
        assert!(ShopSigner::from_base58(&bs58::encode([1u8; 32]).into_string()).is_err());
        assert!(ShopSigner::from_base58(&bs58::encode([0u8; 64]).into_string()).is_err());
    }

    #[test]
    fn test_from_json_file() {
        let keypair = Keypair::new();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let json = serde_json::to_string(&keypair.to_bytes().to_vec()).unwrap();
        file.write_all(json.as_bytes()).unwrap();

        let signer = ShopSigner::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(signer.pubkey(), keypair.pubkey());
    }

    #[test]
    fn test_debug_does_not_leak_secret() {
        let keypair = Keypair::new();
        let secret = bs58::encode(keypair.to_bytes()).into_string();
        let signer = ShopSigner::from_keypair(keypair);
        let rendered = format!("{signer:?}");
        assert!(!rendered.contains(&secret));
        assert!(rendered.contains(&signer.pubkey().to_string()));
    }
}
