//! Coupon mint bootstrap
//!
//! Creates the loyalty coupon mint (0 decimals, shop as mint and freeze
//! authority), the shop's coupon account, and mints the initial supply to it.
//! Run once per deployment; put the printed mint into `shop.coupon_mint`.

use anyhow::{Context, Result};
use clap::Parser;
use coupon_checkout::{ledger::RpcLedger, wallet::ShopSigner};
use solana_sdk::{
    commitment_config::CommitmentConfig,
    hash::Hash,
    instruction::Instruction,
    pubkey::Pubkey,
    signature::{Keypair, Signer},
    transaction::Transaction,
};
use spl_associated_token_account::{
    get_associated_token_address, instruction::create_associated_token_account_idempotent,
};
use spl_token::solana_program::program_pack::Pack;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::FmtSubscriber;

const COUPON_DECIMALS: u8 = 0;

#[derive(Parser, Debug)]
#[command(author, version, about = "Create the loyalty coupon mint", long_about = None)]
struct Args {
    /// RPC endpoint
    #[arg(long, env = "RPC_URL", default_value = "https://api.devnet.solana.com")]
    rpc_url: String,

    /// Environment variable holding the base58 shop secret key
    #[arg(long, default_value = "SHOP_PRIVATE_KEY")]
    secret_key_env: String,

    /// Coupons minted to the shop
    #[arg(long, default_value_t = 1_000_000)]
    supply: u64,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

/// Instructions creating the mint, the shop's coupon account and the supply
fn coupon_mint_instructions(
    shop: &Pubkey,
    mint: &Pubkey,
    rent_lamports: u64,
    supply: u64,
) -> Result<Vec<Instruction>> {
    let token_program = spl_token::id();
    let shop_account = get_associated_token_address(shop, mint);

    #[allow(deprecated)]
    let create_mint_account = solana_sdk::system_instruction::create_account(
        shop,
        mint,
        rent_lamports,
        spl_token::state::Mint::LEN as u64,
        &token_program,
    );

    Ok(vec![
        create_mint_account,
        spl_token::instruction::initialize_mint2(
            &token_program,
            mint,
            shop,
            Some(shop),
            COUPON_DECIMALS,
        )?,
        create_associated_token_account_idempotent(shop, shop, mint, &token_program),
        spl_token::instruction::mint_to_checked(
            &token_program,
            mint,
            &shop_account,
            shop,
            &[],
            supply,
            COUPON_DECIMALS,
        )?,
    ])
}

/// Shop-funded transaction signed by the new mint and co-signed by the shop
fn signed_coupon_mint_transaction(
    instructions: &[Instruction],
    shop: &ShopSigner,
    mint: &Keypair,
    blockhash: Hash,
) -> Result<Transaction> {
    let mut tx = Transaction::new_with_payer(instructions, Some(&shop.pubkey()));
    tx.try_partial_sign(&[mint], blockhash)
        .context("Mint keypair failed to sign")?;
    shop.co_sign(&mut tx, blockhash)
        .context("Shop failed to co-sign")?;
    Ok(tx)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    dotenvy::dotenv().ok();
    let secret = std::env::var(&args.secret_key_env)
        .with_context(|| format!("{} not set", args.secret_key_env))?;
    let shop = ShopSigner::from_base58(&secret)?;

    let ledger = RpcLedger::new(
        args.rpc_url.as_str(),
        CommitmentConfig::confirmed(),
        Duration::from_secs(60),
    );
    let client = ledger.client();

    let mint = Keypair::new();
    info!("Creating coupon mint {} on {}", mint.pubkey(), ledger.endpoint());

    let rent = client
        .get_minimum_balance_for_rent_exemption(spl_token::state::Mint::LEN)
        .await
        .context("Failed to fetch rent exemption")?;
    let instructions = coupon_mint_instructions(&shop.pubkey(), &mint.pubkey(), rent, args.supply)?;

    let blockhash = client
        .get_latest_blockhash()
        .await
        .context("Failed to fetch blockhash")?;
    let tx = signed_coupon_mint_transaction(&instructions, &shop, &mint, blockhash)?;
    let signature = client
        .send_and_confirm_transaction(&tx)
        .await
        .context("Coupon mint transaction failed")?;
    info!("Coupon mint created in {}", signature);

    let shop_account = get_associated_token_address(&shop.pubkey(), &mint.pubkey());
    let balance = client
        .get_token_account_balance(&shop_account)
        .await
        .context("Failed to read the shop coupon balance")?;

    println!("coupon mint:         {}", mint.pubkey());
    println!("shop coupon account: {}", shop_account);
    println!("balance:             {}", balance.ui_amount_string);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instructions_make_shop_the_authority() {
        let shop = Pubkey::new_unique();
        let mint = Pubkey::new_unique();
        let ixs = coupon_mint_instructions(&shop, &mint, 1_461_600, 1_000_000).unwrap();
        assert_eq!(ixs.len(), 4);

        match spl_token::instruction::TokenInstruction::unpack(&ixs[1].data).unwrap() {
            spl_token::instruction::TokenInstruction::InitializeMint2 {
                decimals,
                mint_authority,
                freeze_authority,
            } => {
                assert_eq!(decimals, 0);
                assert_eq!(mint_authority, shop);
                assert!(matches!(
                    freeze_authority,
                    spl_token::solana_program::program_option::COption::Some(key) if key == shop
                ));
            }
            other => panic!("unexpected instruction {other:?}"),
        }

        match spl_token::instruction::TokenInstruction::unpack(&ixs[3].data).unwrap() {
            spl_token::instruction::TokenInstruction::MintToChecked { amount, decimals } => {
                assert_eq!(amount, 1_000_000);
                assert_eq!(decimals, 0);
            }
            other => panic!("unexpected instruction {other:?}"),
        }
    }

    #[test]
    fn test_transaction_is_signed_by_mint_and_shop() {
        let shop = ShopSigner::from_keypair(Keypair::new());
        let mint = Keypair::new();
        let ixs = coupon_mint_instructions(&shop.pubkey(), &mint.pubkey(), 1_461_600, 10).unwrap();

        let tx = signed_coupon_mint_transaction(&ixs, &shop, &mint, Hash::new_unique()).unwrap();
        assert_eq!(tx.message.account_keys[0], shop.pubkey());
        assert_eq!(tx.signatures.len(), 2);
        assert!(tx.verify().is_ok());
    }
}
