//! ChocoChip reward accrual
//!
//! Participants earn ChocoChips proportional to the native value they move
//! through the protocol. The conversion rate comes from a pluggable
//! [`RateSource`]; minting is clamped to a hard supply ceiling.

use crate::common::traits::Clock;
use crate::common::types::{bps_of, Address, Amount, Timestamp};
use crate::errors::ProtocolError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, warn};

/// ChocoChip uses 18 decimals like the native unit
pub const CHOCO_DECIMALS: u32 = 18;

/// One billion ChocoChips in the smallest unit
pub const CHOCO_MAX_SUPPLY: Amount = 1_000_000_000 * 10u128.pow(CHOCO_DECIMALS);

/// Native-to-ChocoChip conversion: `value * price / 10^decimals`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionRate {
    pub price: u128,
    pub decimals: u32,
}

impl ConversionRate {
    pub fn new(price: u128, decimals: u32) -> Self {
        Self { price, decimals }
    }

    pub fn convert(&self, value: Amount) -> Amount {
        let scale = 10u128.saturating_pow(self.decimals);
        match value.checked_mul(self.price) {
            Some(product) => product / scale,
            None => (value / scale).saturating_mul(self.price),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RewardError {
    #[error("no price has been published")]
    NoPrice,

    #[error("price published at {published_at} is older than {max_age_secs}s")]
    StalePrice { published_at: Timestamp, max_age_secs: u64 },
}

impl From<RewardError> for ProtocolError {
    fn from(e: RewardError) -> Self {
        ProtocolError::RateUnavailable(e.to_string())
    }
}

/// Where the native-to-ChocoChip rate comes from
pub trait RateSource: Send + Sync {
    fn current_rate(&self) -> Result<ConversionRate, RewardError>;

    fn describe(&self) -> String;
}

/// Constant rate, e.g. 1000 ChocoChips per native unit
#[derive(Debug, Clone, Copy)]
pub struct FixedRate {
    rate: ConversionRate,
}

impl FixedRate {
    pub fn new(rate: ConversionRate) -> Self {
        Self { rate }
    }
}

impl Default for FixedRate {
    fn default() -> Self {
        Self::new(ConversionRate::new(1_000, 0))
    }
}

impl RateSource for FixedRate {
    fn current_rate(&self) -> Result<ConversionRate, RewardError> {
        Ok(self.rate)
    }

    fn describe(&self) -> String {
        format!("fixed({}e-{})", self.rate.price, self.rate.decimals)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PricePoint {
    price: u128,
    published_at: Timestamp,
}

/// Externally fed price with a staleness limit
pub struct OracleRate {
    latest: RwLock<Option<PricePoint>>,
    decimals: u32,
    max_age_secs: u64,
    clock: Arc<dyn Clock>,
}

impl OracleRate {
    pub fn new(decimals: u32, max_age_secs: u64, clock: Arc<dyn Clock>) -> Self {
        Self {
            latest: RwLock::new(None),
            decimals,
            max_age_secs,
            clock,
        }
    }

    /// Publish a new price, stamped with the current time
    pub fn publish(&self, price: u128) {
        let published_at = self.clock.now();
        let mut latest = self.latest.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        *latest = Some(PricePoint { price, published_at });
        debug!(price, published_at, "Oracle price published");
    }
}

impl RateSource for OracleRate {
    fn current_rate(&self) -> Result<ConversionRate, RewardError> {
        let latest = *self.latest.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        let point = latest.ok_or(RewardError::NoPrice)?;
        if self.clock.now().saturating_sub(point.published_at) > self.max_age_secs {
            warn!(published_at = point.published_at, "Oracle price is stale");
            return Err(RewardError::StalePrice {
                published_at: point.published_at,
                max_age_secs: self.max_age_secs,
            });
        }
        Ok(ConversionRate::new(point.price, self.decimals))
    }

    fn describe(&self) -> String {
        format!("oracle(max_age={}s)", self.max_age_secs)
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct RewardState {
    pub balances: HashMap<Address, Amount>,
    pub total_minted: Amount,
}

/// ChocoChip balances and minting
pub struct RewardLedger {
    reward_bps: u32,
    max_supply: Amount,
    state: Mutex<RewardState>,
    source: Arc<dyn RateSource>,
}

impl RewardLedger {
    pub fn new(reward_bps: u32, max_supply: Amount, source: Arc<dyn RateSource>) -> Self {
        Self {
            reward_bps,
            max_supply,
            state: Mutex::new(RewardState::default()),
            source,
        }
    }

    /// Fetch the rate up front so callers can fail before mutating anything
    pub fn current_rate(&self) -> Result<ConversionRate, ProtocolError> {
        Ok(self.source.current_rate()?)
    }

    /// Uncapped mint amount for `value`
    pub fn compute(value: Amount, rate: &ConversionRate, reward_bps: u32) -> Amount {
        bps_of(rate.convert(value), reward_bps)
    }

    /// Mint rewards for `value`, clamped to the remaining supply
    pub fn accrue(&self, recipient: Address, value: Amount, rate: &ConversionRate) -> Amount {
        let wanted = Self::compute(value, rate, self.reward_bps);
        if wanted == 0 {
            return 0;
        }

        let mut state = self.lock();
        let remaining = self.max_supply.saturating_sub(state.total_minted);
        let minted = wanted.min(remaining);
        if minted < wanted {
            warn!(%recipient, wanted, minted, "ChocoChip supply ceiling reached");
        }
        if minted > 0 {
            *state.balances.entry(recipient).or_insert(0) += minted;
            state.total_minted += minted;
        }
        minted
    }

    pub fn balance_of(&self, holder: Address) -> Amount {
        self.lock().balances.get(&holder).copied().unwrap_or(0)
    }

    pub fn total_minted(&self) -> Amount {
        self.lock().total_minted
    }

    pub fn max_supply(&self) -> Amount {
        self.max_supply
    }

    pub fn remaining(&self) -> Amount {
        self.max_supply.saturating_sub(self.total_minted())
    }

    pub fn source_description(&self) -> String {
        self.source.describe()
    }

    pub(crate) fn export(&self) -> RewardState {
        self.lock().clone()
    }

    pub(crate) fn import(&self, state: RewardState) {
        *self.lock() = state;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RewardState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::traits::ManualClock;

    const HOLDER: Address = Address::repeat_byte(0x42);
    const ONE: Amount = 1_000_000_000_000_000_000;

    #[test]
    fn test_fixed_rate_mints_per_native_unit() {
        let ledger = RewardLedger::new(10_000, CHOCO_MAX_SUPPLY, Arc::new(FixedRate::default()));
        let rate = ledger.current_rate().unwrap();

        assert_eq!(ledger.accrue(HOLDER, 2 * ONE, &rate), 2_000 * ONE);
        assert_eq!(ledger.balance_of(HOLDER), 2_000 * ONE);
        assert_eq!(ledger.total_minted(), 2_000 * ONE);
    }

    #[test]
    fn test_reward_bps_scales_the_mint() {
        // 10 % of a 0.5 USD price
        let rate = ConversionRate::new(5_000, 4);
        assert_eq!(RewardLedger::compute(100 * ONE, &rate, 1_000), 5 * ONE);
    }

    #[test]
    fn test_ceiling_clamps_and_then_mints_zero() {
        let ledger = RewardLedger::new(10_000, 1_500, Arc::new(FixedRate::default()));
        let rate = ledger.current_rate().unwrap();

        assert_eq!(ledger.accrue(HOLDER, 1, &rate), 1_000);
        assert_eq!(ledger.accrue(HOLDER, 1, &rate), 500);
        assert_eq!(ledger.accrue(HOLDER, 1, &rate), 0);
        assert_eq!(ledger.total_minted(), 1_500);
        assert_eq!(ledger.remaining(), 0);
    }

    #[test]
    fn test_oracle_rate_requires_fresh_price() {
        let clock = Arc::new(ManualClock::new(1_000));
        let oracle = OracleRate::new(8, 60, clock.clone());
        assert_eq!(oracle.current_rate().unwrap_err(), RewardError::NoPrice);

        oracle.publish(250_000_000);
        assert_eq!(oracle.current_rate().unwrap(), ConversionRate::new(250_000_000, 8));

        clock.advance(61);
        assert!(matches!(oracle.current_rate(), Err(RewardError::StalePrice { .. })));

        let ledger = RewardLedger::new(1_000, CHOCO_MAX_SUPPLY, Arc::new(oracle));
        let err = ledger.current_rate().unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_convert_survives_large_values() {
        let rate = ConversionRate::new(u128::MAX / 2, 0);
        assert_eq!(rate.convert(4), u128::MAX);
    }
}
