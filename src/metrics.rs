//! Protocol-wide counters

use crate::common::types::{Amount, LotteryId};
use crate::lottery::types::{DrawStatus, Lottery, LotteryState};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

pub struct ProtocolMetrics {
    start_time: Instant,
    lotteries_created: AtomicU64,
    lotteries_cancelled: AtomicU64,
    lotteries_concluded: AtomicU64,
    lotteries_trashed: AtomicU64,
    tickets_sold: AtomicU64,
    tickets_melted: AtomicU64,
    draws_completed: AtomicU64,
    collateral_claims: AtomicU64,
}

impl ProtocolMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            lotteries_created: AtomicU64::new(0),
            lotteries_cancelled: AtomicU64::new(0),
            lotteries_concluded: AtomicU64::new(0),
            lotteries_trashed: AtomicU64::new(0),
            tickets_sold: AtomicU64::new(0),
            tickets_melted: AtomicU64::new(0),
            draws_completed: AtomicU64::new(0),
            collateral_claims: AtomicU64::new(0),
        }
    }

    pub fn record_created(&self) {
        self.lotteries_created.fetch_add(1, Ordering::SeqCst);
    }

    /// Count a lottery leaving ACTIVE
    pub fn record_transition(&self, to: LotteryState) {
        let counter = match to {
            LotteryState::Active => return,
            LotteryState::Cancelled => &self.lotteries_cancelled,
            LotteryState::Concluded => &self.lotteries_concluded,
            LotteryState::Trashed => &self.lotteries_trashed,
        };
        counter.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_tickets_sold(&self, count: u64) {
        self.tickets_sold.fetch_add(count, Ordering::SeqCst);
    }

    pub fn record_melt(&self, tickets: u64) {
        self.tickets_melted.fetch_add(tickets, Ordering::SeqCst);
    }

    pub fn record_draw(&self) {
        self.draws_completed.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_claim(&self) {
        self.collateral_claims.fetch_add(1, Ordering::SeqCst);
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Re-seed every counter from restored records
    ///
    /// `outstanding` reports the tickets still held for a lottery; whatever was
    /// sold and is no longer held has been melted.
    pub fn seed_from_records<'a>(
        &self,
        lotteries: impl IntoIterator<Item = &'a Lottery>,
        outstanding: impl Fn(LotteryId) -> u64,
    ) {
        for lottery in lotteries {
            self.record_created();
            self.record_transition(lottery.state);
            self.record_tickets_sold(lottery.sold);
            self.record_melt(lottery.sold.saturating_sub(outstanding(lottery.id)));
            if matches!(lottery.draw, Some(DrawStatus::Drawn { .. })) {
                self.record_draw();
            }
            if lottery.collateral_claimed {
                self.record_claim();
            }
        }
    }

    pub fn counters(&self) -> LifecycleCounters {
        LifecycleCounters {
            total_lotteries: self.lotteries_created.load(Ordering::SeqCst),
            cancelled: self.lotteries_cancelled.load(Ordering::SeqCst),
            concluded: self.lotteries_concluded.load(Ordering::SeqCst),
            trashed: self.lotteries_trashed.load(Ordering::SeqCst),
            tickets_sold: self.tickets_sold.load(Ordering::SeqCst),
            tickets_melted: self.tickets_melted.load(Ordering::SeqCst),
            draws_completed: self.draws_completed.load(Ordering::SeqCst),
            collateral_claims: self.collateral_claims.load(Ordering::SeqCst),
        }
    }
}

impl Default for ProtocolMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleCounters {
    pub total_lotteries: u64,
    pub cancelled: u64,
    pub concluded: u64,
    pub trashed: u64,
    pub tickets_sold: u64,
    pub tickets_melted: u64,
    pub draws_completed: u64,
    pub collateral_claims: u64,
}

impl LifecycleCounters {
    pub fn active(&self) -> u64 {
        self.total_lotteries
            .saturating_sub(self.cancelled + self.concluded + self.trashed)
    }
}

/// Snapshot returned by `LotteryEngine::protocol_stats`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolStats {
    #[serde(flatten)]
    pub counters: LifecycleCounters,
    pub active_lotteries: u64,
    pub pending_draws: u64,
    pub participants: u64,
    pub fees_collected: Amount,
    pub rewards_minted: Amount,
    pub uptime_secs: u64,
}
