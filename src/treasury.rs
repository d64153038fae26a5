//! Pull-payment vault
//!
//! The engine never pushes native value to accounts. Owner proceeds,
//! protocol fees and refunds are credited here and withdrawn by their
//! recipients; repayments of cancelled lotteries sit in a per-lottery escrow
//! until holders melt.

use crate::common::types::{Address, Amount, LotteryId};
use crate::errors::ProtocolError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct VaultState {
    pub balances: HashMap<Address, Amount>,
    pub escrow: HashMap<LotteryId, Amount>,
    pub fees_collected: Amount,
}

#[derive(Debug, Default)]
pub struct Vault {
    state: Mutex<VaultState>,
}

impl Vault {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn credit(&self, account: Address, amount: Amount) {
        if amount == 0 {
            return;
        }
        *self.lock().balances.entry(account).or_insert(0) += amount;
    }

    /// Credit a protocol fee to the treasury account
    pub fn credit_fee(&self, treasury: Address, fee: Amount) {
        if fee == 0 {
            return;
        }
        let mut state = self.lock();
        *state.balances.entry(treasury).or_insert(0) += fee;
        state.fees_collected += fee;
    }

    pub fn deposit_escrow(&self, lottery_id: LotteryId, amount: Amount) {
        *self.lock().escrow.entry(lottery_id).or_insert(0) += amount;
    }

    /// Move `amount` from a lottery's escrow to `to`
    pub fn release_escrow(&self, lottery_id: LotteryId, to: Address, amount: Amount) -> Result<(), ProtocolError> {
        let mut state = self.lock();
        let available = state.escrow.get(&lottery_id).copied().unwrap_or(0);
        if available < amount {
            return Err(ProtocolError::InsufficientEscrow {
                lottery_id,
                available,
                required: amount,
            });
        }
        state.escrow.insert(lottery_id, available - amount);
        if amount > 0 {
            *state.balances.entry(to).or_insert(0) += amount;
        }
        Ok(())
    }

    pub fn escrow_of(&self, lottery_id: LotteryId) -> Amount {
        self.lock().escrow.get(&lottery_id).copied().unwrap_or(0)
    }

    pub fn withdrawable(&self, account: Address) -> Amount {
        self.lock().balances.get(&account).copied().unwrap_or(0)
    }

    /// Pay out and zero the account's balance
    pub fn withdraw(&self, account: Address) -> Amount {
        let amount = self.lock().balances.remove(&account).unwrap_or(0);
        if amount > 0 {
            debug!(%account, amount, "Withdrawal");
        }
        amount
    }

    pub fn fees_collected(&self) -> Amount {
        self.lock().fees_collected
    }

    pub(crate) fn export(&self) -> VaultState {
        self.lock().clone()
    }

    pub(crate) fn import(&self, state: VaultState) {
        *self.lock() = state;
    }

    fn lock(&self) -> MutexGuard<'_, VaultState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
