//! Lottery records and operation results

use crate::common::types::{Address, Amount, CollateralRef, LotteryId, RequestId, Timestamp};
use crate::randomness::{RandomValue, VrfProof};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LotteryState {
    Active,
    Cancelled,
    Concluded,
    Trashed,
}

impl LotteryState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, LotteryState::Active)
    }
}

impl fmt::Display for LotteryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LotteryState::Active => "ACTIVE",
            LotteryState::Cancelled => "CANCELLED",
            LotteryState::Concluded => "CONCLUDED",
            LotteryState::Trashed => "TRASHED",
        };
        f.write_str(name)
    }
}

/// Winner selection progress of a concluded lottery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DrawStatus {
    AwaitingRandomness {
        request_id: RequestId,
        requested_at: Timestamp,
    },
    Drawn {
        request_id: RequestId,
        winning_ticket: u64,
        random_value: RandomValue,
        drawn_at: Timestamp,
        proof: Option<VrfProof>,
    },
}

/// Tickets `[start, end)` issued to `holder` by one purchase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketRange {
    pub holder: Address,
    pub start: u64,
    pub end: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lottery {
    pub id: LotteryId,
    pub owner: Address,
    pub collateral: CollateralRef,
    pub display_name: String,
    pub display_image: String,
    pub ticket_price: Amount,
    pub max_supply: u64,
    pub holder_cap: u64,
    pub sold: u64,
    pub total_raised: Amount,
    pub created_at: Timestamp,
    pub expiration: Timestamp,
    pub state: LotteryState,
    pub draw: Option<DrawStatus>,
    pub winner: Option<Address>,
    pub collateral_claimed: bool,
    pub purchases: Vec<TicketRange>,
}

impl Lottery {
    pub fn is_expired(&self, now: Timestamp) -> bool {
        now >= self.expiration
    }

    pub fn remaining(&self) -> u64 {
        self.max_supply - self.sold
    }

    pub fn is_pending_randomness(&self) -> bool {
        matches!(self.draw, Some(DrawStatus::AwaitingRandomness { .. }))
    }

    pub fn outstanding_request(&self) -> Option<(RequestId, Timestamp)> {
        match self.draw {
            Some(DrawStatus::AwaitingRandomness { request_id, requested_at }) => Some((request_id, requested_at)),
            _ => None,
        }
    }

    pub fn winning_ticket(&self) -> Option<u64> {
        match self.draw {
            Some(DrawStatus::Drawn { winning_ticket, .. }) => Some(winning_ticket),
            _ => None,
        }
    }

    /// Holder of ticket `index`, by binary search over the purchase ranges
    pub fn holder_of_ticket(&self, index: u64) -> Option<Address> {
        let position = self.purchases.partition_point(|range| range.end <= index);
        self.purchases
            .get(position)
            .filter(|range| range.start <= index && index < range.end)
            .map(|range| range.holder)
    }

    /// Append a purchase range and account for its payment
    pub(crate) fn record_purchase(&mut self, holder: Address, amount: u64, payment: Amount) {
        let start = self.sold;
        self.sold += amount;
        self.total_raised += payment;
        self.purchases.push(TicketRange {
            holder,
            start,
            end: self.sold,
        });
    }
}

/// Input to `create_lottery`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewLottery {
    pub owner: Address,
    pub collateral: CollateralRef,
    pub ticket_price: Amount,
    pub max_supply: u64,
    pub duration_days: u32,
    pub display_name: String,
    pub display_image: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseReceipt {
    pub lottery_id: LotteryId,
    pub buyer: Address,
    pub amount: u64,
    pub first_ticket: u64,
    pub fee: Amount,
    pub owner_proceeds: Amount,
    pub reward_minted: Amount,
    /// The purchase sold out the lottery and randomness was requested
    pub concluded: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeltOutcome {
    pub tickets_burned: u64,
    pub refund: Amount,
    pub reward_minted: Amount,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HolderLotteries {
    pub created: Vec<LotteryId>,
    pub participated: Vec<LotteryId>,
}

/// A concluded lottery still waiting for its randomness
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StalledDraw {
    pub lottery_id: LotteryId,
    pub request_id: RequestId,
    pub requested_at: Timestamp,
    pub waiting_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrawResult {
    pub lottery_id: LotteryId,
    pub winner: Address,
    pub winning_ticket: u64,
}

/// What a lazy or swept expiry did to a lottery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Settlement {
    Unchanged,
    Trashed,
    AwaitingRandomness,
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALICE: Address = Address::repeat_byte(0xa1);
    const BOB: Address = Address::repeat_byte(0xb0);

    fn lottery() -> Lottery {
        Lottery {
            id: 0,
            owner: Address::repeat_byte(0x0a),
            collateral: CollateralRef::new(Address::repeat_byte(0xc0), 1),
            display_name: "Bored Ape #1".into(),
            display_image: "ipfs://ape".into(),
            ticket_price: 10,
            max_supply: 10,
            holder_cap: 5,
            sold: 0,
            total_raised: 0,
            created_at: 0,
            expiration: 86_400,
            state: LotteryState::Active,
            draw: None,
            winner: None,
            collateral_claimed: false,
            purchases: Vec::new(),
        }
    }

    #[test]
    fn test_holder_of_ticket_follows_purchase_order() {
        let mut lottery = lottery();
        lottery.record_purchase(ALICE, 3, 30);
        lottery.record_purchase(BOB, 5, 50);
        lottery.record_purchase(ALICE, 2, 20);

        assert_eq!(lottery.sold, 10);
        assert_eq!(lottery.total_raised, 100);
        assert_eq!(lottery.holder_of_ticket(0), Some(ALICE));
        assert_eq!(lottery.holder_of_ticket(2), Some(ALICE));
        assert_eq!(lottery.holder_of_ticket(3), Some(BOB));
        assert_eq!(lottery.holder_of_ticket(7), Some(BOB));
        assert_eq!(lottery.holder_of_ticket(8), Some(ALICE));
        assert_eq!(lottery.holder_of_ticket(10), None);
    }

    #[test]
    fn test_expiry_is_inclusive() {
        let lottery = lottery();
        assert!(!lottery.is_expired(86_399));
        assert!(lottery.is_expired(86_400));
    }

    #[test]
    fn test_state_names() {
        assert_eq!(LotteryState::Concluded.to_string(), "CONCLUDED");
        assert!(LotteryState::Trashed.is_terminal());
        assert!(!LotteryState::Active.is_terminal());
    }
}
