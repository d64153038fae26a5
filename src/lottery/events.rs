//! Append-only log of lifecycle events
//!
//! Every successful engine operation appends its events synchronously,
//! under the same lottery lock that applied the mutation. Readers either
//! poll with a cursor or subscribe to the broadcast channel.

use crate::common::types::{Address, Amount, CollateralRef, LotteryId, RequestId, Timestamp};
use crate::params::ParameterChange;
use serde::{Deserialize, Serialize};
use std::sync::RwLock;
use tokio::sync::broadcast;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LotteryEvent {
    LotteryCreated {
        lottery_id: LotteryId,
        owner: Address,
        collateral: CollateralRef,
        ticket_price: Amount,
        max_supply: u64,
        expiration: Timestamp,
    },
    TicketsPurchased {
        lottery_id: LotteryId,
        buyer: Address,
        amount: u64,
        payment: Amount,
        fee: Amount,
    },
    LoanRepaid {
        lottery_id: LotteryId,
        owner: Address,
        amount: Amount,
    },
    RandomnessRequested {
        lottery_id: LotteryId,
        request_id: RequestId,
    },
    WinnerDrawn {
        lottery_id: LotteryId,
        winner: Address,
        winning_ticket: u64,
    },
    LotteryTrashed {
        lottery_id: LotteryId,
    },
    NftClaimed {
        lottery_id: LotteryId,
        winner: Address,
        collateral: CollateralRef,
    },
    TicketsMelted {
        lottery_id: LotteryId,
        holder: Address,
        amount: u64,
        refund: Amount,
        reward_minted: Amount,
    },
    FundsWithdrawn {
        account: Address,
        amount: Amount,
    },
    ParameterUpdated {
        change: ParameterChange,
    },
}

impl LotteryEvent {
    pub fn lottery_id(&self) -> Option<LotteryId> {
        use LotteryEvent::*;

        match self {
            LotteryCreated { lottery_id, .. }
            | TicketsPurchased { lottery_id, .. }
            | LoanRepaid { lottery_id, .. }
            | RandomnessRequested { lottery_id, .. }
            | WinnerDrawn { lottery_id, .. }
            | LotteryTrashed { lottery_id }
            | NftClaimed { lottery_id, .. }
            | TicketsMelted { lottery_id, .. } => Some(*lottery_id),
            FundsWithdrawn { .. } | ParameterUpdated { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedEvent {
    pub sequence: u64,
    pub timestamp: Timestamp,
    #[serde(flatten)]
    pub event: LotteryEvent,
}

pub struct EventLog {
    events: RwLock<Vec<RecordedEvent>>,
    publisher: broadcast::Sender<RecordedEvent>,
}

impl EventLog {
    pub fn new(channel_capacity: usize) -> Self {
        let (publisher, _) = broadcast::channel(channel_capacity.max(1));
        Self {
            events: RwLock::new(Vec::new()),
            publisher,
        }
    }

    pub fn append(&self, timestamp: Timestamp, event: LotteryEvent) -> u64 {
        let mut events = self.events.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        let sequence = events.len() as u64;
        let recorded = RecordedEvent {
            sequence,
            timestamp,
            event,
        };
        // no subscribers is fine
        let _ = self.publisher.send(recorded.clone());
        events.push(recorded);
        sequence
    }

    /// Events with `sequence >= cursor`, at most `limit` of them
    pub fn since(&self, cursor: u64, limit: usize) -> Vec<RecordedEvent> {
        let events = self.events.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        events
            .iter()
            .skip(cursor.min(events.len() as u64) as usize)
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RecordedEvent> {
        self.publisher.subscribe()
    }

    pub fn len(&self) -> usize {
        self.events.read().unwrap_or_else(|poisoned| poisoned.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
