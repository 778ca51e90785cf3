use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::ChainId;
use crate::error::BridgeError;

/// Stablecoins the orchestrator can move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Asset {
    Usdc,
}

impl Asset {
    pub fn symbol(&self) -> &'static str {
        match self {
            Asset::Usdc => "USDC",
        }
    }

    pub fn decimals(&self) -> u32 {
        match self {
            Asset::Usdc => 6,
        }
    }

    /// Native token contract (EVM) or mint (Solana) on `chain`.
    pub fn token_address(&self, chain: ChainId) -> Option<&'static str> {
        match (self, chain) {
            (Asset::Usdc, ChainId::Ethereum) => Some("0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48"),
            (Asset::Usdc, ChainId::Base) => Some("0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913"),
            (Asset::Usdc, ChainId::Arbitrum) => Some("0xaf88d065e77c8cC2239327C5EDb3A432268e5831"),
            (Asset::Usdc, ChainId::Optimism) => Some("0x0b2C639c533813f4Aa9D7837CAf62653d097Ff85"),
            (Asset::Usdc, ChainId::Polygon) => Some("0x3c499c542cEF5E3811e1192ce70d8cC03d5c3359"),
            (Asset::Usdc, ChainId::Avalanche) => Some("0xB97EF9Ef8734C71904D8002F8b6Bc66Dd9c48a6E"),
            (Asset::Usdc, ChainId::Solana) => Some("EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v"),
        }
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl FromStr for Asset {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "USDC" => Ok(Asset::Usdc),
            other => Err(BridgeError::InvalidRequest(format!("unsupported asset '{}'", other))),
        }
    }
}

/// Token amount in the asset's smallest unit.
///
/// Decimal text is converted exactly once, by [`Amount::parse`]; from then on
/// the value is only ever handled as an integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Amount(u128);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub const fn from_minor_units(units: u128) -> Self {
        Amount(units)
    }

    pub fn minor_units(&self) -> u128 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Parses a plain decimal string such as `"10.00"` into minor units of
    /// `asset`. Signs, exponents, separators and excess fractional digits are
    /// rejected rather than rounded.
    pub fn parse(text: &str, asset: Asset) -> Result<Self, BridgeError> {
        let invalid = |reason: &str| BridgeError::InvalidRequest(format!("amount '{}' {}", text, reason));
        let decimals = asset.decimals() as usize;

        let (whole, fraction) = match text.split_once('.') {
            Some((whole, fraction)) => (whole, fraction),
            None => (text, ""),
        };
        if whole.is_empty() && fraction.is_empty() {
            return Err(invalid("is empty"));
        }
        if !whole.chars().chain(fraction.chars()).all(|c| c.is_ascii_digit()) {
            return Err(invalid("must contain only digits and one decimal point"));
        }
        if text.ends_with('.') || text.starts_with('.') {
            return Err(invalid("must have digits on both sides of the decimal point"));
        }
        if fraction.len() > decimals {
            return Err(invalid(&format!(
                "has more than {} fractional digits for {}",
                decimals, asset
            )));
        }

        let scale = 10u128.pow(asset.decimals());
        let whole_units = if whole.is_empty() {
            0
        } else {
            whole.parse::<u128>().map_err(|_| invalid("is too large"))?
        };
        let padded = format!("{:0<width$}", fraction, width = decimals);
        let fraction_units = if padded.is_empty() {
            0
        } else {
            padded.parse::<u128>().map_err(|_| invalid("has an invalid fraction"))?
        };

        whole_units
            .checked_mul(scale)
            .and_then(|units| units.checked_add(fraction_units))
            .map(Amount)
            .ok_or_else(|| invalid("is too large"))
    }

    /// Renders the amount as a decimal string with all of the asset's
    /// fractional digits.
    pub fn display(&self, asset: Asset) -> String {
        let decimals = asset.decimals();
        let scale = 10u128.pow(decimals);
        format!(
            "{}.{:0width$}",
            self.0 / scale,
            self.0 % scale,
            width = decimals as usize
        )
    }

    pub fn checked_sub(&self, other: Amount) -> Option<Amount> {
        self.0.checked_sub(other.0).map(Amount)
    }

    pub fn saturating_sub(&self, other: Amount) -> Amount {
        Amount(self.0.saturating_sub(other.0))
    }

    /// `bps` basis points of this amount, rounded up so fees are never
    /// under-charged.
    pub fn basis_points(&self, bps: u32) -> Amount {
        let product = self.0.saturating_mul(bps as u128);
        Amount(product.div_ceil(10_000))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
