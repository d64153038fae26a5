//! WonkaBar ticket ledger
//!
//! Multi-token balance table: one fungible ticket id per lottery, balances
//! per holder. The engine mutates a lottery's balances only while holding
//! that lottery's lock, which keeps holder-cap checks race-free.

use crate::common::types::{Address, LotteryId};
use dashmap::DashMap;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("{holder} holds {available} tickets of lottery {lottery_id}, cannot burn {requested}")]
    InsufficientBalance {
        lottery_id: LotteryId,
        holder: Address,
        available: u64,
        requested: u64,
    },

    #[error("ticket supply of lottery {0} would overflow")]
    Overflow(LotteryId),
}

#[derive(Debug, Default)]
pub struct TicketLedger {
    balances: DashMap<LotteryId, HashMap<Address, u64>>,
}

impl TicketLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue `amount` tickets of `lottery_id` to `holder`, returning the new balance
    pub fn credit(&self, lottery_id: LotteryId, holder: Address, amount: u64) -> Result<u64, LedgerError> {
        let mut table = self.balances.entry(lottery_id).or_default();
        let balance = table.entry(holder).or_insert(0);
        *balance = balance
            .checked_add(amount)
            .ok_or(LedgerError::Overflow(lottery_id))?;
        Ok(*balance)
    }

    /// Burn exactly `amount` tickets, returning the amount burned
    pub fn burn(&self, lottery_id: LotteryId, holder: Address, amount: u64) -> Result<u64, LedgerError> {
        let available = self.balance_of(lottery_id, holder);
        if available < amount {
            return Err(LedgerError::InsufficientBalance {
                lottery_id,
                holder,
                available,
                requested: amount,
            });
        }

        if let Some(mut table) = self.balances.get_mut(&lottery_id) {
            let remaining = available - amount;
            if remaining == 0 {
                table.remove(&holder);
            } else {
                table.insert(holder, remaining);
            }
        }

        Ok(amount)
    }

    /// Burn the holder's whole balance, returning how many tickets were burned
    pub fn burn_all(&self, lottery_id: LotteryId, holder: Address) -> u64 {
        self.balances
            .get_mut(&lottery_id)
            .and_then(|mut table| table.remove(&holder))
            .unwrap_or(0)
    }

    pub fn balance_of(&self, lottery_id: LotteryId, holder: Address) -> u64 {
        self.balances
            .get(&lottery_id)
            .and_then(|table| table.get(&holder).copied())
            .unwrap_or(0)
    }

    /// Holders with a non-zero balance, sorted by address
    pub fn holders(&self, lottery_id: LotteryId) -> Vec<(Address, u64)> {
        let mut holders: Vec<(Address, u64)> = self
            .balances
            .get(&lottery_id)
            .map(|table| table.iter().map(|(holder, balance)| (*holder, *balance)).collect())
            .unwrap_or_default();
        holders.sort_by_key(|(holder, _)| *holder);
        holders
    }

    /// Outstanding (unburned) tickets of a lottery
    pub fn total_supply(&self, lottery_id: LotteryId) -> u64 {
        self.balances
            .get(&lottery_id)
            .map(|table| table.values().sum())
            .unwrap_or(0)
    }

    /// Flat `(lottery, holder, balance)` rows for snapshots
    pub(crate) fn rows(&self) -> Vec<(LotteryId, Address, u64)> {
        let mut rows: Vec<(LotteryId, Address, u64)> = self
            .balances
            .iter()
            .flat_map(|entry| {
                let lottery_id = *entry.key();
                entry
                    .value()
                    .iter()
                    .map(|(holder, balance)| (lottery_id, *holder, *balance))
                    .collect::<Vec<_>>()
            })
            .collect();
        rows.sort();
        rows
    }

    pub(crate) fn from_rows(rows: impl IntoIterator<Item = (LotteryId, Address, u64)>) -> Self {
        let ledger = Self::new();
        for (lottery_id, holder, balance) in rows {
            if balance > 0 {
                ledger.balances.entry(lottery_id).or_default().insert(holder, balance);
            }
        }
        ledger
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALICE: Address = Address::repeat_byte(0xa1);
    const BOB: Address = Address::repeat_byte(0xb0);

    #[test]
    fn test_credit_accumulates_per_lottery() {
        let ledger = TicketLedger::new();
        assert_eq!(ledger.credit(0, ALICE, 3).unwrap(), 3);
        assert_eq!(ledger.credit(0, ALICE, 2).unwrap(), 5);
        ledger.credit(1, ALICE, 7).unwrap();
        ledger.credit(0, BOB, 1).unwrap();

        assert_eq!(ledger.balance_of(0, ALICE), 5);
        assert_eq!(ledger.balance_of(1, ALICE), 7);
        assert_eq!(ledger.total_supply(0), 6);
        assert_eq!(ledger.holders(0), vec![(ALICE, 5), (BOB, 1)]);
    }

    #[test]
    fn test_burn_reduces_supply_by_exact_amount() {
        let ledger = TicketLedger::new();
        ledger.credit(4, ALICE, 5).unwrap();
        ledger.credit(4, BOB, 2).unwrap();

        assert_eq!(ledger.burn(4, ALICE, 3).unwrap(), 3);
        assert_eq!(ledger.total_supply(4), 4);

        let err = ledger.burn(4, BOB, 3).unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientBalance { available: 2, .. }));
        assert_eq!(ledger.balance_of(4, BOB), 2);
    }

    #[test]
    fn test_burn_all_zeroes_the_holder() {
        let ledger = TicketLedger::new();
        ledger.credit(2, ALICE, 4).unwrap();

        assert_eq!(ledger.burn_all(2, ALICE), 4);
        assert_eq!(ledger.balance_of(2, ALICE), 0);
        assert_eq!(ledger.burn_all(2, ALICE), 0);
        assert!(ledger.holders(2).is_empty());
    }

    #[test]
    fn test_rows_rebuild_identical_ledger() {
        let ledger = TicketLedger::new();
        ledger.credit(0, ALICE, 1).unwrap();
        ledger.credit(3, BOB, 9).unwrap();

        let rebuilt = TicketLedger::from_rows(ledger.rows());
        assert_eq!(rebuilt.balance_of(0, ALICE), 1);
        assert_eq!(rebuilt.balance_of(3, BOB), 9);
        assert_eq!(rebuilt.rows(), ledger.rows());
    }
}
