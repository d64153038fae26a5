//! Shared type definitions for the MeltyFi protocol core
//!
//! Canonical identifiers and value types used by every component, so the
//! ledger, the engine and the reward accounting agree on units.

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use uuid::Uuid;

/// Sequential lottery identifier, assigned at creation
pub type LotteryId = u64;

/// Native value in the smallest unit (wei-like, 18 decimals)
pub type Amount = u128;

/// Unix timestamp in seconds
pub type Timestamp = u64;

pub const SECONDS_PER_DAY: u64 = 86_400;

/// Denominator for every percentage expressed in basis points
pub const BASIS_POINTS: u32 = 10_000;

/// 20-byte account address, rendered as `0x`-prefixed hex
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address([u8; 20]);

impl Address {
    pub const ZERO: Address = Address([0u8; 20]);

    pub const fn new(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Address with every byte set to `byte`; handy for fixtures and demos
    pub const fn repeat_byte(byte: u8) -> Self {
        Self([byte; 20])
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressParseError {
    #[error("invalid address hex: {0}")]
    InvalidHex(String),

    #[error("address must be 20 bytes, got {0}")]
    InvalidLength(usize),
}

impl FromStr for Address {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(trimmed).map_err(|e| AddressParseError::InvalidHex(e.to_string()))?;
        let len = bytes.len();
        let array: [u8; 20] = bytes
            .try_into()
            .map_err(|_| AddressParseError::InvalidLength(len))?;
        Ok(Self(array))
    }
}

impl TryFrom<String> for Address {
    type Error = AddressParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.to_string()
    }
}

/// Reference to the NFT backing a lottery
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CollateralRef {
    pub contract: Address,
    pub token_id: u128,
}

impl CollateralRef {
    pub fn new(contract: Address, token_id: u128) -> Self {
        Self { contract, token_id }
    }
}

impl fmt::Display for CollateralRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.contract, self.token_id)
    }
}

/// Correlation id tying a randomness request to its later delivery
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// `floor(amount * bps / 10_000)` without intermediate overflow
pub fn bps_of(amount: Amount, bps: u32) -> Amount {
    let denominator = BASIS_POINTS as Amount;
    let bps = bps as Amount;
    (amount / denominator) * bps + (amount % denominator) * bps / denominator
}
