//! Protocol parameters and their privileged updates
//!
//! Global knobs that bound every new lottery: protocol fee, supply range,
//! per-holder cap and maximum duration. Only the governor may change them;
//! changes affect lotteries created (or, for the fee, purchases made)
//! afterwards.

use crate::common::types::{bps_of, Address, Amount};
use crate::errors::ProtocolError;
use serde::{Deserialize, Serialize};
use std::sync::RwLock;
use tracing::info;

/// Highest protocol fee the governor may set (20 %)
pub const MAX_FEE_BPS: u32 = 2_000;

/// Absolute ceiling on `max_supply`
pub const SUPPLY_CEILING: u64 = 10_000;

/// Absolute ceiling on `max_duration_days`
pub const MAX_DURATION_CEILING: u32 = 365;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolParameters {
    pub fee_bps: u32,
    pub min_supply: u64,
    pub max_supply: u64,
    pub max_holder_percent: u32,
    pub max_duration_days: u32,
    pub treasury: Address,
}

impl Default for ProtocolParameters {
    fn default() -> Self {
        Self {
            fee_bps: 500,
            min_supply: 5,
            max_supply: 100,
            max_holder_percent: 25,
            max_duration_days: 90,
            treasury: Address::ZERO,
        }
    }
}

impl ProtocolParameters {
    pub fn validate(&self) -> Result<(), ProtocolError> {
        check_fee(self.fee_bps)?;
        check_supply_bounds(self.min_supply, self.max_supply)?;
        check_holder_percent(self.max_holder_percent)?;
        check_duration(self.max_duration_days)?;
        check_holder_cap(self.min_supply, self.max_holder_percent)?;
        Ok(())
    }

    pub fn fee_for(&self, payment: Amount) -> Amount {
        bps_of(payment, self.fee_bps)
    }

    /// Per-holder ticket cap for a lottery of `max_supply` tickets; zero when
    /// the percentage floors away
    pub fn holder_cap(&self, max_supply: u64) -> u64 {
        max_supply.saturating_mul(self.max_holder_percent as u64) / 100
    }
}

fn invalid(name: &'static str, reason: String) -> ProtocolError {
    ProtocolError::InvalidParameter { name, reason }
}

fn check_fee(fee_bps: u32) -> Result<(), ProtocolError> {
    if fee_bps > MAX_FEE_BPS {
        return Err(invalid("fee_bps", format!("{} exceeds {}", fee_bps, MAX_FEE_BPS)));
    }
    Ok(())
}

fn check_supply_bounds(min: u64, max: u64) -> Result<(), ProtocolError> {
    if min == 0 || min > max || max > SUPPLY_CEILING {
        return Err(invalid(
            "supply_bounds",
            format!("need 1 <= min ({}) <= max ({}) <= {}", min, max, SUPPLY_CEILING),
        ));
    }
    Ok(())
}

fn check_holder_percent(percent: u32) -> Result<(), ProtocolError> {
    if !(1..=100).contains(&percent) {
        return Err(invalid("max_holder_percent", format!("{} outside 1..=100", percent)));
    }
    Ok(())
}

// Even the smallest allowed lottery must let a holder buy one ticket.
fn check_holder_cap(min_supply: u64, percent: u32) -> Result<(), ProtocolError> {
    if min_supply.saturating_mul(percent as u64) / 100 == 0 {
        return Err(invalid(
            "max_holder_percent",
            format!("{}% of min_supply {} floors to zero tickets", percent, min_supply),
        ));
    }
    Ok(())
}

fn check_duration(days: u32) -> Result<(), ProtocolError> {
    if !(1..=MAX_DURATION_CEILING).contains(&days) {
        return Err(invalid(
            "max_duration_days",
            format!("{} outside 1..={}", days, MAX_DURATION_CEILING),
        ));
    }
    Ok(())
}

/// Record of an applied parameter update
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "parameter", rename_all = "snake_case")]
pub enum ParameterChange {
    FeeBps { old: u32, new: u32 },
    SupplyBounds { old: (u64, u64), new: (u64, u64) },
    HolderCapPercent { old: u32, new: u32 },
    MaxDurationDays { old: u32, new: u32 },
    Treasury { old: Address, new: Address },
    Governor { old: Address, new: Address },
}

/// Current parameters plus the governor allowed to change them
#[derive(Debug)]
pub struct ParameterStore {
    governor: RwLock<Address>,
    params: RwLock<ProtocolParameters>,
}

impl ParameterStore {
    pub fn new(governor: Address, params: ProtocolParameters) -> Result<Self, ProtocolError> {
        params.validate()?;
        Ok(Self {
            governor: RwLock::new(governor),
            params: RwLock::new(params),
        })
    }

    pub fn current(&self) -> ProtocolParameters {
        self.params
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn governor(&self) -> Address {
        *self.governor.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn ensure_governor(&self, caller: Address) -> Result<(), ProtocolError> {
        if caller != self.governor() {
            return Err(ProtocolError::Unauthorized(caller));
        }
        Ok(())
    }

    fn update<F>(&self, caller: Address, apply: F) -> Result<ParameterChange, ProtocolError>
    where
        F: FnOnce(&mut ProtocolParameters) -> Result<ParameterChange, ProtocolError>,
    {
        self.ensure_governor(caller)?;
        let mut params = self.params.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        let change = apply(&mut params)?;
        info!(governor = %caller, change = ?change, "Protocol parameter updated");
        Ok(change)
    }

    pub fn set_fee_bps(&self, caller: Address, fee_bps: u32) -> Result<ParameterChange, ProtocolError> {
        self.update(caller, |params| {
            check_fee(fee_bps)?;
            let old = std::mem::replace(&mut params.fee_bps, fee_bps);
            Ok(ParameterChange::FeeBps { old, new: fee_bps })
        })
    }

    pub fn set_supply_bounds(
        &self,
        caller: Address,
        min_supply: u64,
        max_supply: u64,
    ) -> Result<ParameterChange, ProtocolError> {
        self.update(caller, |params| {
            check_supply_bounds(min_supply, max_supply)?;
            check_holder_cap(min_supply, params.max_holder_percent)?;
            let old = (params.min_supply, params.max_supply);
            params.min_supply = min_supply;
            params.max_supply = max_supply;
            Ok(ParameterChange::SupplyBounds {
                old,
                new: (min_supply, max_supply),
            })
        })
    }

    pub fn set_holder_cap_percent(&self, caller: Address, percent: u32) -> Result<ParameterChange, ProtocolError> {
        self.update(caller, |params| {
            check_holder_percent(percent)?;
            check_holder_cap(params.min_supply, percent)?;
            let old = std::mem::replace(&mut params.max_holder_percent, percent);
            Ok(ParameterChange::HolderCapPercent { old, new: percent })
        })
    }

    pub fn set_max_duration_days(&self, caller: Address, days: u32) -> Result<ParameterChange, ProtocolError> {
        self.update(caller, |params| {
            check_duration(days)?;
            let old = std::mem::replace(&mut params.max_duration_days, days);
            Ok(ParameterChange::MaxDurationDays { old, new: days })
        })
    }

    pub fn set_treasury(&self, caller: Address, treasury: Address) -> Result<ParameterChange, ProtocolError> {
        self.update(caller, |params| {
            if treasury.is_zero() {
                return Err(invalid("treasury", "zero address".to_string()));
            }
            let old = std::mem::replace(&mut params.treasury, treasury);
            Ok(ParameterChange::Treasury { old, new: treasury })
        })
    }

    pub fn transfer_governance(&self, caller: Address, new_governor: Address) -> Result<ParameterChange, ProtocolError> {
        self.ensure_governor(caller)?;
        if new_governor.is_zero() {
            return Err(invalid("governor", "zero address".to_string()));
        }
        let mut governor = self.governor.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        let old = std::mem::replace(&mut *governor, new_governor);
        info!(old = %old, new = %new_governor, "Governance transferred");
        Ok(ParameterChange::Governor { old, new: new_governor })
    }
}
