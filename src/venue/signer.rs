//! EIP-712 order construction and signing.
//!
//! Purely functional: credentials and order arguments in, venue-shaped
//! signed payload out. The two settlement modes differ only in the
//! verifying contract baked into the domain separator.

use crate::models::Side;
use crate::store::Credentials;
use alloy_primitives::{address, Address, U256};
use alloy_signer::SignerSync;
use alloy_signer_local::PrivateKeySigner;
use alloy_sol_types::{eip712_domain, sol, SolStruct};
use anyhow::{anyhow, bail, Context, Result};
use rand::Rng;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::str::FromStr;

sol! {
    struct Order {
        uint256 salt;
        address maker;
        address signer;
        address taker;
        uint256 tokenId;
        uint256 makerAmount;
        uint256 takerAmount;
        uint256 expiration;
        uint256 nonce;
        uint256 feeRateBps;
        uint8 side;
        uint8 signatureType;
    }
}

/// Standard CTF exchange on Polygon.
pub const EXCHANGE: Address = address!("0x4bFb41d5B3570DeFd03C39a9A4D8dE6Bd8B8982E");
/// Neg-risk exchange on Polygon.
pub const NEG_RISK_EXCHANGE: Address = address!("0xC5d563A36AE78145C45a50134d48A1215220f80a");

const CHAIN_ID: u64 = 137;
const DOMAIN_NAME: &str = "Polymarket CTF Exchange";
const DOMAIN_VERSION: &str = "1";

const SIG_TYPE_EOA: u8 = 0;
const SIG_TYPE_PROXY: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderType {
    Gtc,
    Fok,
    Fak,
    Gtd,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Gtc => "GTC",
            OrderType::Fok => "FOK",
            OrderType::Fak => "FAK",
            OrderType::Gtd => "GTD",
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrderArgs {
    /// Decimal token id string as the venue hands it out.
    pub token_id: String,
    pub price: Decimal,
    /// Shares.
    pub size: Decimal,
    pub side: Side,
}

/// Resolve the verifying contract. A market whose settlement mode is
/// unknown cannot be traded live.
pub fn verifying_contract(neg_risk: Option<bool>) -> Result<Address> {
    match neg_risk {
        Some(true) => Ok(NEG_RISK_EXCHANGE),
        Some(false) => Ok(EXCHANGE),
        None => bail!("market_configuration_unavailable"),
    }
}

/// Amounts in 6-decimal fixed point. The size is rounded first (2 decimals
/// of token precision) and the stablecoin amount derived from the rounded
/// size (4 decimals), so maker/taker stays on the venue's price grid.
fn order_amounts(side: Side, price: Decimal, size: Decimal) -> Result<(U256, U256)> {
    if price <= Decimal::ZERO || size <= Decimal::ZERO {
        bail!("price and size must be positive");
    }
    let rounded_size = size.trunc_with_scale(2);
    if rounded_size <= Decimal::ZERO {
        bail!("size rounds to zero");
    }
    let token_amount = to_fixed6(rounded_size)?;
    let stable = (rounded_size * price).trunc_with_scale(4);
    let stable_amount = to_fixed6(stable)?;

    Ok(match side {
        Side::Buy => (stable_amount, token_amount),
        Side::Sell => (token_amount, stable_amount),
    })
}

fn hex_address(addr: Address) -> String {
    format!("0x{}", hex::encode(addr.as_slice()))
}

fn to_fixed6(d: Decimal) -> Result<U256> {
    let scaled = (d * Decimal::from(1_000_000)).round();
    let v = scaled
        .to_u128()
        .ok_or_else(|| anyhow!("amount {d} does not fit fixed-point encoding"))?;
    Ok(U256::from(v))
}

/// Build, hash and sign one order; returns the venue-shaped payload for
/// `POST /order`.
pub fn build_signed_order(
    creds: &Credentials,
    args: &OrderArgs,
    neg_risk: Option<bool>,
) -> Result<serde_json::Value> {
    if !creds.configured() {
        bail!("credentials_not_configured");
    }
    let contract = verifying_contract(neg_risk)?;

    let wallet: Address = creds
        .wallet_address
        .parse()
        .context("invalid wallet address")?;
    let signer_key: PrivateKeySigner = creds
        .private_key
        .parse()
        .map_err(|_| anyhow!("invalid private key"))?;

    // Proxy mode when a distinct signer address is configured: the wallet
    // (proxy) is the maker, the key holder signs.
    let (maker, signer_addr, sig_type) = match creds.signer_address.as_deref() {
        Some(s) if !s.is_empty() && !s.eq_ignore_ascii_case(&creds.wallet_address) => {
            let signer: Address = s.parse().context("invalid signer address")?;
            (wallet, signer, SIG_TYPE_PROXY)
        }
        _ => (wallet, wallet, SIG_TYPE_EOA),
    };

    let token_id =
        U256::from_str(args.token_id.trim()).map_err(|_| anyhow!("invalid_token_id"))?;
    let (maker_amount, taker_amount) = order_amounts(args.side, args.price, args.size)?;

    let salt: u32 = rand::thread_rng().gen::<u32>() & 0x7FFF_FFFF;

    let order = Order {
        salt: U256::from(salt),
        maker,
        signer: signer_addr,
        taker: Address::ZERO,
        tokenId: token_id,
        makerAmount: maker_amount,
        takerAmount: taker_amount,
        expiration: U256::ZERO,
        nonce: U256::ZERO,
        feeRateBps: U256::ZERO,
        side: args.side.order_value(),
        signatureType: sig_type,
    };

    let domain = eip712_domain! {
        name: DOMAIN_NAME,
        version: DOMAIN_VERSION,
        chain_id: CHAIN_ID,
        verifying_contract: contract,
    };
    let digest = order.eip712_signing_hash(&domain);
    let sig = signer_key
        .sign_hash_sync(&digest)
        .context("sign order digest")?;

    let mut sig_bytes = [0u8; 65];
    sig_bytes[..32].copy_from_slice(&sig.r().to_be_bytes::<32>());
    sig_bytes[32..64].copy_from_slice(&sig.s().to_be_bytes::<32>());
    sig_bytes[64] = 27 + sig.v() as u8;

    Ok(serde_json::json!({
        "salt": salt,
        "maker": hex_address(maker),
        "signer": hex_address(signer_addr),
        "taker": hex_address(Address::ZERO),
        "tokenId": args.token_id.trim(),
        "makerAmount": maker_amount.to_string(),
        "takerAmount": taker_amount.to_string(),
        "expiration": "0",
        "nonce": "0",
        "feeRateBps": "0",
        "side": args.side.as_str(),
        "signatureType": sig_type,
        "signature": format!("0x{}", hex::encode(sig_bytes)),
    }))
}
