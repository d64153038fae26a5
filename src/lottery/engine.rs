//! Lottery lifecycle engine
//!
//! Owns every lottery record and drives it through
//! ACTIVE -> {CANCELLED, CONCLUDED, TRASHED}. Each operation locks the target
//! lottery, applies any pending expiry as its own committed step, checks all
//! guards and fetches external inputs (reward rate, randomness request), and
//! only then mutates the ledger, vault, rewards and event log.
//!
//! Lock order: a lottery's mutex is always taken before the internal locks of
//! the ledger, vault, reward ledger and event log, and no operation holds two
//! lottery locks at once.

use crate::common::traits::{Clock, CollateralRegistry, CustodyError, SystemClock};
use crate::common::types::{Address, Amount, CollateralRef, LotteryId, RequestId, Timestamp, BASIS_POINTS, SECONDS_PER_DAY};
use crate::errors::{ConfigurationError, MeltyResult, ProtocolError, StorageError};
use crate::ledger::TicketLedger;
use crate::lottery::events::{EventLog, LotteryEvent, RecordedEvent};
use crate::lottery::types::{
    DrawResult, DrawStatus, HolderLotteries, Lottery, LotteryState, MeltOutcome, NewLottery, PurchaseReceipt,
    Settlement, StalledDraw,
};
use crate::metrics::{ProtocolMetrics, ProtocolStats};
use crate::params::{ParameterChange, ParameterStore, ProtocolParameters};
use crate::randomness::vrf::draw_input;
use crate::randomness::{DrawWaiters, PendingDraws, RandomValue, RandomnessProvider, VrfProof, VrfRandomnessProvider};
use crate::rewards::{FixedRate, RateSource, RewardLedger, CHOCO_MAX_SUPPLY};
use crate::store::{lock_lottery, LotteryStore, ProtocolSnapshot, SNAPSHOT_VERSION};
use crate::treasury::Vault;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

const DEFAULT_EVENT_CAPACITY: usize = 10_000;

fn custody_error(e: CustodyError) -> ProtocolError {
    ProtocolError::Custody(e.to_string())
}

/// Failure while awaiting a lottery's winner
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DrawWaitError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("winner of lottery {lottery_id} not drawn within {timeout_ms}ms")]
    Timeout { lottery_id: LotteryId, timeout_ms: u64 },

    #[error("lottery {0} ended without a draw")]
    NoDraw(LotteryId),

    #[error("draw waiter cancelled")]
    Cancelled,
}

pub struct LotteryEngine {
    params: ParameterStore,
    store: LotteryStore,
    ledger: TicketLedger,
    vault: Vault,
    rewards: RewardLedger,
    custody: Arc<dyn CollateralRegistry>,
    randomness: Arc<dyn RandomnessProvider>,
    clock: Arc<dyn Clock>,
    pending: PendingDraws,
    waiters: DrawWaiters,
    events: EventLog,
    metrics: ProtocolMetrics,
}

impl LotteryEngine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    fn now(&self) -> Timestamp {
        self.clock.now()
    }

    fn emit(&self, now: Timestamp, event: LotteryEvent) {
        self.events.append(now, event);
    }

    // ---------------------------------------------------------------------
    // Lifecycle operations
    // ---------------------------------------------------------------------

    /// Lock the collateral and open a lottery for it
    pub fn create_lottery(&self, request: NewLottery) -> Result<LotteryId, ProtocolError> {
        let params = self.params.current();

        if request.max_supply < params.min_supply || request.max_supply > params.max_supply {
            return Err(ProtocolError::InvalidSupply {
                requested: request.max_supply,
                min: params.min_supply,
                max: params.max_supply,
            });
        }
        if request.duration_days == 0 || request.duration_days > params.max_duration_days {
            return Err(ProtocolError::InvalidDuration {
                requested: request.duration_days,
                max: params.max_duration_days,
            });
        }
        if request.ticket_price == 0 || request.ticket_price.checked_mul(request.max_supply as Amount).is_none() {
            return Err(ProtocolError::InvalidPrice);
        }
        let holder_cap = params.holder_cap(request.max_supply);
        if holder_cap == 0 {
            return Err(ProtocolError::InvalidSupply {
                requested: request.max_supply,
                min: params.min_supply,
                max: params.max_supply,
            });
        }
        if self.custody.owner_of(&request.collateral) != Some(request.owner) {
            return Err(ProtocolError::NotCollateralOwner(request.owner));
        }

        self.custody
            .lock(&request.collateral, request.owner)
            .map_err(|e| match e {
                CustodyError::NotOwner { .. } => ProtocolError::NotCollateralOwner(request.owner),
                other => custody_error(other),
            })?;

        let now = self.now();
        let expiration = now + request.duration_days as u64 * SECONDS_PER_DAY;

        let (lottery_id, _) = self.store.insert_with(|id| Lottery {
            id,
            owner: request.owner,
            collateral: request.collateral,
            display_name: request.display_name,
            display_image: request.display_image,
            ticket_price: request.ticket_price,
            max_supply: request.max_supply,
            holder_cap,
            sold: 0,
            total_raised: 0,
            created_at: now,
            expiration,
            state: LotteryState::Active,
            draw: None,
            winner: None,
            collateral_claimed: false,
            purchases: Vec::new(),
        });

        self.metrics.record_created();
        self.emit(
            now,
            LotteryEvent::LotteryCreated {
                lottery_id,
                owner: request.owner,
                collateral: request.collateral,
                ticket_price: request.ticket_price,
                max_supply: request.max_supply,
                expiration,
            },
        );
        info!(
            lottery_id,
            owner = %request.owner,
            collateral = %request.collateral,
            max_supply = request.max_supply,
            holder_cap,
            "Lottery created"
        );

        Ok(lottery_id)
    }

    /// Buy `amount` tickets for exactly `amount * ticket_price`
    pub fn buy_tickets(
        &self,
        lottery_id: LotteryId,
        buyer: Address,
        amount: u64,
        payment: Amount,
    ) -> Result<PurchaseReceipt, ProtocolError> {
        let handle = self.store.get(lottery_id)?;
        let mut lottery = lock_lottery(&handle);
        let now = self.now();
        self.apply_expiry(&mut lottery, now)?;

        if lottery.is_pending_randomness() {
            return Err(ProtocolError::RandomnessPending(lottery_id));
        }
        if lottery.state != LotteryState::Active {
            return Err(ProtocolError::LotteryNotActive(lottery_id));
        }
        if amount == 0 {
            return Err(ProtocolError::InvalidAmount);
        }
        let remaining = lottery.remaining();
        if amount > remaining {
            return Err(ProtocolError::ExceedsMaxSupply {
                requested: amount,
                remaining,
            });
        }

        // cannot overflow: price * max_supply was checked at creation
        let required = lottery.ticket_price * amount as Amount;
        if payment < required {
            return Err(ProtocolError::InsufficientPayment {
                required,
                provided: payment,
            });
        }
        if payment > required {
            return Err(ProtocolError::Overpayment {
                required,
                provided: payment,
            });
        }

        let resulting = self.ledger.balance_of(lottery_id, buyer) + amount;
        if resulting > lottery.holder_cap {
            return Err(ProtocolError::ExceedsHolderCap {
                cap: lottery.holder_cap,
                resulting,
            });
        }

        let params = self.params.current();
        let fee = params.fee_for(payment);
        let owner_proceeds = payment - fee;
        let rate = self.rewards.current_rate()?;
        let sells_out = amount == remaining;
        let request_id = if sells_out {
            Some(self.randomness.request_randomness(lottery_id)?)
        } else {
            None
        };

        self.ledger
            .credit(lottery_id, buyer, amount)
            .map_err(|_| ProtocolError::LedgerInconsistent(lottery_id))?;
        let first_ticket = lottery.sold;
        lottery.record_purchase(buyer, amount, payment);
        self.store.record_participant(buyer, lottery_id);

        self.vault.credit(lottery.owner, owner_proceeds);
        self.vault.credit_fee(params.treasury, fee);
        let reward_minted = self.rewards.accrue(buyer, payment, &rate);

        self.metrics.record_tickets_sold(amount);
        self.emit(
            now,
            LotteryEvent::TicketsPurchased {
                lottery_id,
                buyer,
                amount,
                payment,
                fee,
            },
        );
        debug!(lottery_id, %buyer, amount, sold = lottery.sold, "Tickets purchased");

        if let Some(request_id) = request_id {
            self.await_randomness(&mut lottery, request_id, now);
        }

        Ok(PurchaseReceipt {
            lottery_id,
            buyer,
            amount,
            first_ticket,
            fee,
            owner_proceeds,
            reward_minted,
            concluded: sells_out,
        })
    }

    /// Owner cancels by repaying everything raised; collateral returns to them
    pub fn repay(&self, lottery_id: LotteryId, caller: Address, payment: Amount) -> Result<(), ProtocolError> {
        let handle = self.store.get(lottery_id)?;
        let mut lottery = lock_lottery(&handle);
        let now = self.now();
        self.apply_expiry(&mut lottery, now)?;

        if caller != lottery.owner {
            return Err(ProtocolError::NotLotteryOwner { lottery_id, caller });
        }
        if lottery.is_pending_randomness() {
            return Err(ProtocolError::RandomnessPending(lottery_id));
        }
        if lottery.state != LotteryState::Active {
            return Err(ProtocolError::LotteryNotActive(lottery_id));
        }
        if payment != lottery.total_raised {
            return Err(ProtocolError::IncorrectRepaymentAmount {
                required: lottery.total_raised,
                provided: payment,
            });
        }

        self.custody
            .release(&lottery.collateral, lottery.owner)
            .map_err(custody_error)?;
        self.vault.deposit_escrow(lottery_id, payment);
        lottery.state = LotteryState::Cancelled;
        self.store.mark_inactive(lottery_id);

        self.metrics.record_transition(LotteryState::Cancelled);
        self.emit(
            now,
            LotteryEvent::LoanRepaid {
                lottery_id,
                owner: caller,
                amount: payment,
            },
        );
        info!(lottery_id, owner = %caller, amount = payment, "Loan repaid, lottery cancelled");

        Ok(())
    }

    /// Winner takes the collateral out of custody
    pub fn claim_collateral(&self, lottery_id: LotteryId, caller: Address) -> Result<CollateralRef, ProtocolError> {
        let handle = self.store.get(lottery_id)?;
        let mut lottery = lock_lottery(&handle);
        let now = self.now();
        self.apply_expiry(&mut lottery, now)?;

        let winner = match (lottery.state, lottery.winner) {
            (LotteryState::Concluded, Some(winner)) => winner,
            _ => return Err(ProtocolError::LotteryNotFinalized(lottery_id)),
        };
        if caller != winner {
            return Err(ProtocolError::NotWinner { lottery_id, caller });
        }
        if lottery.collateral_claimed {
            return Err(ProtocolError::AlreadyClaimed(lottery_id));
        }

        self.custody
            .release(&lottery.collateral, winner)
            .map_err(custody_error)?;
        lottery.collateral_claimed = true;

        self.metrics.record_claim();
        self.emit(
            now,
            LotteryEvent::NftClaimed {
                lottery_id,
                winner,
                collateral: lottery.collateral,
            },
        );
        info!(lottery_id, %winner, collateral = %lottery.collateral, "Collateral claimed");

        Ok(lottery.collateral)
    }

    /// Burn all of `holder`'s tickets: refund plus rewards after a
    /// cancellation, rewards only for non-winners after a draw
    pub fn melt_tickets(&self, lottery_id: LotteryId, holder: Address) -> Result<MeltOutcome, ProtocolError> {
        let handle = self.store.get(lottery_id)?;
        let mut lottery = lock_lottery(&handle);
        let now = self.now();
        self.apply_expiry(&mut lottery, now)?;

        if lottery.is_pending_randomness() {
            return Err(ProtocolError::RandomnessPending(lottery_id));
        }
        let refundable = match (lottery.state, lottery.winner) {
            (LotteryState::Cancelled, _) => true,
            (LotteryState::Concluded, Some(winner)) if winner != holder => false,
            _ => return Err(ProtocolError::LotteryNotMeltable(lottery_id)),
        };

        let tickets = self.ledger.balance_of(lottery_id, holder);
        if tickets == 0 {
            return Err(ProtocolError::NoTicketsHeld(lottery_id));
        }

        let value = lottery.ticket_price * tickets as Amount;
        let refund = if refundable { value } else { 0 };
        let rate = self.rewards.current_rate()?;

        if refund > 0 {
            self.vault.release_escrow(lottery_id, holder, refund)?;
        }
        let burned = self.ledger.burn_all(lottery_id, holder);
        let reward_minted = self.rewards.accrue(holder, value, &rate);

        self.metrics.record_melt(burned);
        self.emit(
            now,
            LotteryEvent::TicketsMelted {
                lottery_id,
                holder,
                amount: burned,
                refund,
                reward_minted,
            },
        );
        debug!(lottery_id, %holder, burned, refund, reward_minted, "Tickets melted");

        Ok(MeltOutcome {
            tickets_burned: burned,
            refund,
            reward_minted,
        })
    }

    /// Pay out everything the vault holds for `account`
    pub fn withdraw(&self, account: Address) -> Amount {
        let amount = self.vault.withdraw(account);
        if amount > 0 {
            self.emit(self.now(), LotteryEvent::FundsWithdrawn { account, amount });
        }
        amount
    }

    // ---------------------------------------------------------------------
    // Expiry and randomness
    // ---------------------------------------------------------------------

    /// Apply expiry to an active lottery whose deadline has passed
    fn apply_expiry(&self, lottery: &mut Lottery, now: Timestamp) -> Result<Settlement, ProtocolError> {
        if lottery.state != LotteryState::Active || !lottery.is_expired(now) {
            return Ok(Settlement::Unchanged);
        }

        if lottery.sold == 0 {
            self.custody
                .release(&lottery.collateral, lottery.owner)
                .map_err(custody_error)?;
            lottery.state = LotteryState::Trashed;
            self.store.mark_inactive(lottery.id);
            self.metrics.record_transition(LotteryState::Trashed);
            self.emit(now, LotteryEvent::LotteryTrashed { lottery_id: lottery.id });
            info!(lottery_id = lottery.id, "Lottery expired unsold, collateral returned");
            return Ok(Settlement::Trashed);
        }

        let request_id = self.randomness.request_randomness(lottery.id)?;
        self.await_randomness(lottery, request_id, now);
        Ok(Settlement::AwaitingRandomness)
    }

    /// Conclude and park the lottery until `request_id` is fulfilled
    fn await_randomness(&self, lottery: &mut Lottery, request_id: RequestId, now: Timestamp) {
        lottery.state = LotteryState::Concluded;
        lottery.draw = Some(DrawStatus::AwaitingRandomness {
            request_id,
            requested_at: now,
        });
        self.pending.register(request_id, lottery.id, now);
        self.store.mark_inactive(lottery.id);

        self.metrics.record_transition(LotteryState::Concluded);
        self.emit(
            now,
            LotteryEvent::RandomnessRequested {
                lottery_id: lottery.id,
                request_id,
            },
        );
        info!(
            lottery_id = lottery.id,
            %request_id,
            sold = lottery.sold,
            provider = self.randomness.name(),
            "Lottery concluded, randomness requested"
        );
    }

    /// Apply expiry to one lottery if it is due
    pub fn settle(&self, lottery_id: LotteryId) -> Result<Settlement, ProtocolError> {
        let handle = self.store.get(lottery_id)?;
        let mut lottery = lock_lottery(&handle);
        self.apply_expiry(&mut lottery, self.now())
    }

    /// Sweep every active lottery; returns the ones that changed
    pub fn settle_expired(&self) -> Vec<(LotteryId, Settlement)> {
        let mut settled = Vec::new();
        for lottery_id in self.store.active_ids() {
            match self.settle(lottery_id) {
                Ok(Settlement::Unchanged) => {}
                Ok(settlement) => settled.push((lottery_id, settlement)),
                Err(e) => warn!(lottery_id, error = %e, "Failed to settle expired lottery"),
            }
        }
        settled
    }

    /// Finalize the winner from a delivered random value
    pub fn on_randomness_ready(&self, request_id: RequestId, value: RandomValue) -> Result<DrawResult, ProtocolError> {
        self.finalize_draw(request_id, value, None)
    }

    fn finalize_draw(
        &self,
        request_id: RequestId,
        value: RandomValue,
        proof: Option<VrfProof>,
    ) -> Result<DrawResult, ProtocolError> {
        let pending = self
            .pending
            .get(&request_id)
            .ok_or(ProtocolError::UnknownRandomnessRequest(request_id))?;
        let lottery_id = pending.lottery_id;
        let handle = self.store.get(lottery_id)?;
        let mut lottery = lock_lottery(&handle);

        // a concurrent delivery of the same id may have won the lock
        if self.pending.get(&request_id).is_none() {
            return Err(ProtocolError::UnknownRandomnessRequest(request_id));
        }
        match lottery.outstanding_request() {
            Some((outstanding, _)) if outstanding == request_id => {}
            _ => {
                self.pending.remove(&request_id);
                warn!(lottery_id, %request_id, "Discarding randomness for a superseded request");
                return Err(ProtocolError::StaleRandomness { request_id, lottery_id });
            }
        }

        let winning_ticket = value.reduce(lottery.sold);
        let winner = lottery
            .holder_of_ticket(winning_ticket)
            .ok_or(ProtocolError::LedgerInconsistent(lottery_id))?;

        let now = self.now();
        lottery.draw = Some(DrawStatus::Drawn {
            request_id,
            winning_ticket,
            random_value: value,
            drawn_at: now,
            proof,
        });
        lottery.winner = Some(winner);
        let dropped = self.pending.remove_lottery(lottery_id);
        if dropped > 1 {
            debug!(lottery_id, superseded = dropped - 1, "Dropped superseded randomness requests");
        }

        self.metrics.record_draw();
        self.emit(
            now,
            LotteryEvent::WinnerDrawn {
                lottery_id,
                winner,
                winning_ticket,
            },
        );
        info!(lottery_id, %winner, winning_ticket, "Winner drawn");

        let result = DrawResult {
            lottery_id,
            winner,
            winning_ticket,
        };
        self.waiters.complete(&result);
        Ok(result)
    }

    /// Hand every ready delivery from the provider to the engine
    pub fn deliver_ready(&self) -> usize {
        let mut finalized = 0;
        for delivery in self.randomness.poll_ready() {
            match self.finalize_draw(delivery.request_id, delivery.value, delivery.proof) {
                Ok(_) => finalized += 1,
                Err(e) => warn!(
                    lottery_id = delivery.lottery_id,
                    request_id = %delivery.request_id,
                    error = %e,
                    "Randomness delivery rejected"
                ),
            }
        }
        finalized
    }

    /// Issue a fresh request for a stalled draw; the previous id becomes stale
    pub fn retry_randomness(&self, caller: Address, lottery_id: LotteryId) -> Result<RequestId, ProtocolError> {
        self.params.ensure_governor(caller)?;
        let handle = self.store.get(lottery_id)?;
        let mut lottery = lock_lottery(&handle);

        let (previous, _) = lottery
            .outstanding_request()
            .ok_or(ProtocolError::NoPendingDraw(lottery_id))?;
        let request_id = self.randomness.request_randomness(lottery_id)?;

        let now = self.now();
        lottery.draw = Some(DrawStatus::AwaitingRandomness {
            request_id,
            requested_at: now,
        });
        self.pending.register(request_id, lottery_id, now);
        self.emit(now, LotteryEvent::RandomnessRequested { lottery_id, request_id });
        warn!(lottery_id, %previous, %request_id, "Randomness request reissued");

        Ok(request_id)
    }

    /// Check a drawn lottery's VRF proof against its request and stored value
    ///
    /// `None` when the value came from a provider that publishes no proof.
    pub fn verify_draw(&self, lottery_id: LotteryId) -> Result<Option<bool>, ProtocolError> {
        let lottery = self.store.read(lottery_id)?;
        let (request_id, random_value, proof) = match lottery.draw {
            Some(DrawStatus::Drawn {
                request_id,
                random_value,
                proof,
                ..
            }) => (request_id, random_value, proof),
            _ => return Err(ProtocolError::LotteryNotFinalized(lottery_id)),
        };
        let Some(proof) = proof else {
            return Ok(None);
        };

        let valid = VrfRandomnessProvider::verify(&proof, &draw_input(lottery_id, request_id))?
            && proof.value()? == random_value;
        if !valid {
            warn!(lottery_id, %request_id, "Draw proof failed verification");
        }
        Ok(Some(valid))
    }

    /// Draws outstanding for at least `max_age`, oldest first
    pub fn stalled_draws(&self, max_age: Duration) -> Vec<StalledDraw> {
        let now = self.now();
        let mut stalled: Vec<StalledDraw> = self
            .pending
            .entries()
            .into_iter()
            .filter_map(|(request_id, pending)| {
                let lottery = self.store.read(pending.lottery_id).ok()?;
                let (outstanding, requested_at) = lottery.outstanding_request()?;
                let waiting_secs = now.saturating_sub(requested_at);
                (outstanding == request_id && waiting_secs >= max_age.as_secs()).then_some(StalledDraw {
                    lottery_id: pending.lottery_id,
                    request_id,
                    requested_at,
                    waiting_secs,
                })
            })
            .collect();
        stalled.sort_by_key(|draw| (draw.requested_at, draw.lottery_id));
        stalled
    }

    /// Wait until the lottery's winner is drawn
    pub async fn wait_for_draw(&self, lottery_id: LotteryId, timeout: Duration) -> Result<DrawResult, DrawWaitError> {
        self.store.get(lottery_id)?;
        // register before reading so a concurrent draw cannot slip between
        let rx = self.waiters.register(lottery_id);

        let lottery = self.store.read(lottery_id)?;
        if let (Some(winner), Some(winning_ticket)) = (lottery.winner, lottery.winning_ticket()) {
            self.waiters.prune(lottery_id);
            return Ok(DrawResult {
                lottery_id,
                winner,
                winning_ticket,
            });
        }
        if matches!(lottery.state, LotteryState::Cancelled | LotteryState::Trashed) {
            self.waiters.prune(lottery_id);
            return Err(DrawWaitError::NoDraw(lottery_id));
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(_)) => Err(DrawWaitError::Cancelled),
            Err(_) => {
                self.waiters.prune(lottery_id);
                Err(DrawWaitError::Timeout {
                    lottery_id,
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    // ---------------------------------------------------------------------
    // Reads
    // ---------------------------------------------------------------------

    pub fn get_lottery(&self, lottery_id: LotteryId) -> Result<Lottery, ProtocolError> {
        self.store.read(lottery_id)
    }

    /// Lotteries still accepting purchases
    pub fn get_active_lotteries(&self) -> Vec<LotteryId> {
        let now = self.now();
        self.store
            .active_ids()
            .into_iter()
            .filter(|id| {
                self.store
                    .read(*id)
                    .map(|lottery| lottery.state == LotteryState::Active && !lottery.is_expired(now))
                    .unwrap_or(false)
            })
            .collect()
    }

    pub fn get_holder_balance(&self, lottery_id: LotteryId, holder: Address) -> Result<u64, ProtocolError> {
        self.store.get(lottery_id)?;
        Ok(self.ledger.balance_of(lottery_id, holder))
    }

    pub fn get_holders(&self, lottery_id: LotteryId) -> Result<Vec<(Address, u64)>, ProtocolError> {
        self.store.get(lottery_id)?;
        Ok(self.ledger.holders(lottery_id))
    }

    pub fn get_holder_lotteries(&self, holder: Address) -> HolderLotteries {
        HolderLotteries {
            created: self.store.created_by(holder),
            participated: self.store.participated_by(holder),
        }
    }

    /// Chance of `holder` winning, in basis points of tickets sold
    pub fn win_probability_bps(&self, lottery_id: LotteryId, holder: Address) -> Result<u32, ProtocolError> {
        let lottery = self.store.read(lottery_id)?;
        if lottery.sold == 0 {
            return Ok(0);
        }
        let balance = self.ledger.balance_of(lottery_id, holder);
        Ok((balance * BASIS_POINTS as u64 / lottery.sold) as u32)
    }

    pub fn ticket_supply(&self, lottery_id: LotteryId) -> Result<u64, ProtocolError> {
        self.store.get(lottery_id)?;
        Ok(self.ledger.total_supply(lottery_id))
    }

    pub fn escrow_of(&self, lottery_id: LotteryId) -> Amount {
        self.vault.escrow_of(lottery_id)
    }

    pub fn withdrawable(&self, account: Address) -> Amount {
        self.vault.withdrawable(account)
    }

    pub fn reward_balance(&self, holder: Address) -> Amount {
        self.rewards.balance_of(holder)
    }

    pub fn rewards(&self) -> &RewardLedger {
        &self.rewards
    }

    pub fn protocol_stats(&self) -> ProtocolStats {
        let counters = self.metrics.counters();
        ProtocolStats {
            counters,
            active_lotteries: counters.active(),
            pending_draws: self.stalled_draws(Duration::ZERO).len() as u64,
            participants: self.store.participant_count() as u64,
            fees_collected: self.vault.fees_collected(),
            rewards_minted: self.rewards.total_minted(),
            uptime_secs: self.metrics.uptime().as_secs(),
        }
    }

    pub fn events_since(&self, cursor: u64, limit: usize) -> Vec<RecordedEvent> {
        self.events.since(cursor, limit)
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<RecordedEvent> {
        self.events.subscribe()
    }

    pub fn is_randomness_secure(&self) -> bool {
        self.randomness.is_cryptographically_secure()
    }

    // ---------------------------------------------------------------------
    // Governance
    // ---------------------------------------------------------------------

    pub fn parameters(&self) -> ProtocolParameters {
        self.params.current()
    }

    pub fn governor(&self) -> Address {
        self.params.governor()
    }

    fn record_change(&self, change: ParameterChange) -> ParameterChange {
        self.emit(self.now(), LotteryEvent::ParameterUpdated { change: change.clone() });
        change
    }

    pub fn set_fee_bps(&self, caller: Address, fee_bps: u32) -> Result<ParameterChange, ProtocolError> {
        let change = self.params.set_fee_bps(caller, fee_bps)?;
        Ok(self.record_change(change))
    }

    pub fn set_supply_bounds(&self, caller: Address, min: u64, max: u64) -> Result<ParameterChange, ProtocolError> {
        let change = self.params.set_supply_bounds(caller, min, max)?;
        Ok(self.record_change(change))
    }

    pub fn set_holder_cap_percent(&self, caller: Address, percent: u32) -> Result<ParameterChange, ProtocolError> {
        let change = self.params.set_holder_cap_percent(caller, percent)?;
        Ok(self.record_change(change))
    }

    pub fn set_max_duration_days(&self, caller: Address, days: u32) -> Result<ParameterChange, ProtocolError> {
        let change = self.params.set_max_duration_days(caller, days)?;
        Ok(self.record_change(change))
    }

    pub fn set_treasury(&self, caller: Address, treasury: Address) -> Result<ParameterChange, ProtocolError> {
        let change = self.params.set_treasury(caller, treasury)?;
        Ok(self.record_change(change))
    }

    pub fn transfer_governance(&self, caller: Address, new_governor: Address) -> Result<ParameterChange, ProtocolError> {
        let change = self.params.transfer_governance(caller, new_governor)?;
        Ok(self.record_change(change))
    }

    // ---------------------------------------------------------------------
    // Snapshots
    // ---------------------------------------------------------------------

    /// Image of the protocol state; take it while no operations are running
    pub fn snapshot(&self) -> ProtocolSnapshot {
        ProtocolSnapshot {
            version: SNAPSHOT_VERSION,
            taken_at: self.now(),
            next_lottery_id: self.store.next_id(),
            lotteries: self.store.export(),
            tickets: self.ledger.rows(),
            vault: self.vault.export(),
            rewards: self.rewards.export(),
            params: self.params.current(),
            governor: self.params.governor(),
            pending: self.pending.entries(),
        }
    }
}

/// Assembles a [`LotteryEngine`] from its collaborators
pub struct EngineBuilder {
    governor: Address,
    params: ProtocolParameters,
    reward_bps: u32,
    reward_max_supply: Amount,
    rate_source: Option<Arc<dyn RateSource>>,
    custody: Option<Arc<dyn CollateralRegistry>>,
    randomness: Option<Arc<dyn RandomnessProvider>>,
    clock: Option<Arc<dyn Clock>>,
    event_capacity: usize,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self {
            governor: Address::ZERO,
            params: ProtocolParameters::default(),
            reward_bps: BASIS_POINTS,
            reward_max_supply: CHOCO_MAX_SUPPLY,
            rate_source: None,
            custody: None,
            randomness: None,
            clock: None,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl EngineBuilder {
    pub fn governor(mut self, governor: Address) -> Self {
        self.governor = governor;
        self
    }

    pub fn parameters(mut self, params: ProtocolParameters) -> Self {
        self.params = params;
        self
    }

    pub fn rewards(mut self, reward_bps: u32, max_supply: Amount) -> Self {
        self.reward_bps = reward_bps;
        self.reward_max_supply = max_supply;
        self
    }

    pub fn rate_source(mut self, source: Arc<dyn RateSource>) -> Self {
        self.rate_source = Some(source);
        self
    }

    pub fn custody(mut self, custody: Arc<dyn CollateralRegistry>) -> Self {
        self.custody = Some(custody);
        self
    }

    pub fn randomness(mut self, provider: Arc<dyn RandomnessProvider>) -> Self {
        self.randomness = Some(provider);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    pub fn build(self) -> MeltyResult<LotteryEngine> {
        let custody = self
            .custody
            .ok_or_else(|| ConfigurationError::MissingRequired("collateral registry".to_string()))?;
        let randomness = self
            .randomness
            .ok_or_else(|| ConfigurationError::MissingRequired("randomness provider".to_string()))?;
        let params = ParameterStore::new(self.governor, self.params)
            .map_err(|e| ConfigurationError::ValidationFailed(e.to_string()))?;

        if !randomness.is_cryptographically_secure() {
            warn!(provider = randomness.name(), "Randomness provider is not cryptographically secure");
        }

        Ok(LotteryEngine {
            params,
            store: LotteryStore::new(),
            ledger: TicketLedger::new(),
            vault: Vault::new(),
            rewards: RewardLedger::new(
                self.reward_bps,
                self.reward_max_supply,
                self.rate_source.unwrap_or_else(|| Arc::new(FixedRate::default())),
            ),
            custody,
            randomness,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            pending: PendingDraws::new(),
            waiters: DrawWaiters::new(),
            events: EventLog::new(self.event_capacity),
            metrics: ProtocolMetrics::new(),
        })
    }

    /// Build an engine holding the state captured in `snapshot`
    pub fn restore(self, snapshot: ProtocolSnapshot) -> MeltyResult<LotteryEngine> {
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(StorageError::CorruptedData(format!("unsupported snapshot version {}", snapshot.version)).into());
        }

        let mut engine = self
            .governor(snapshot.governor)
            .parameters(snapshot.params)
            .build()?;

        engine.ledger = TicketLedger::from_rows(snapshot.tickets);
        let ledger = &engine.ledger;
        engine
            .metrics
            .seed_from_records(&snapshot.lotteries, |lottery_id| ledger.total_supply(lottery_id));
        engine.store = LotteryStore::from_records(snapshot.lotteries, snapshot.next_lottery_id);
        engine.vault.import(snapshot.vault);
        engine.rewards.import(snapshot.rewards);
        for (request_id, pending) in snapshot.pending {
            engine
                .pending
                .register(request_id, pending.lottery_id, pending.requested_at);
        }

        info!(
            lotteries = engine.store.len(),
            pending_draws = engine.pending.len(),
            "Engine restored from snapshot"
        );
        Ok(engine)
    }
}
