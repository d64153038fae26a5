//! End-to-end lifecycle tests against the public engine API

use meltyfi::common::types::SECONDS_PER_DAY;
use meltyfi::custody::Custodian;
use meltyfi::lottery::{DrawStatus, LotteryEvent};
use meltyfi::randomness::RandomnessError;
use meltyfi::{
    load_snapshot, save_snapshot, Address, Amount, CollateralRef, CollateralRegistry, ErrorKind, InMemoryCollateral,
    LotteryEngine, LotteryId, LotteryState, ManualClock, NewLottery, ProtocolError, ProtocolParameters, RandomValue,
    RandomnessDelivery, RandomnessProvider, RequestId, Settlement,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

const GOVERNOR: Address = Address::repeat_byte(0x60);
const TREASURY: Address = Address::repeat_byte(0x7e);
const OWNER: Address = Address::repeat_byte(0x0a);
const X: Address = Address::repeat_byte(0xa1);
const Y: Address = Address::repeat_byte(0xb2);
const Z: Address = Address::repeat_byte(0xc3);
const NFT: Address = Address::repeat_byte(0xee);

/// Provider whose values are delivered by hand through `on_randomness_ready`
#[derive(Default)]
struct ManualRandomness {
    requests: Mutex<Vec<(RequestId, LotteryId)>>,
    offline: AtomicBool,
}

impl ManualRandomness {
    fn last_request(&self) -> Option<RequestId> {
        self.requests.lock().unwrap().last().map(|(id, _)| *id)
    }

    fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }
}

impl RandomnessProvider for ManualRandomness {
    fn request_randomness(&self, lottery_id: LotteryId) -> Result<RequestId, RandomnessError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(RandomnessError::Unavailable("coordinator offline".into()));
        }
        let request_id = RequestId::new();
        self.requests.lock().unwrap().push((request_id, lottery_id));
        Ok(request_id)
    }

    fn poll_ready(&self) -> Vec<RandomnessDelivery> {
        Vec::new()
    }

    fn is_cryptographically_secure(&self) -> bool {
        false
    }

    fn name(&self) -> &'static str {
        "manual"
    }
}

struct Harness {
    engine: LotteryEngine,
    clock: Arc<ManualClock>,
    custody: Arc<InMemoryCollateral>,
    randomness: Arc<ManualRandomness>,
}

impl Harness {
    fn new(max_holder_percent: u32) -> Self {
        let clock = Arc::new(ManualClock::new(1_700_000_000));
        let custody = Arc::new(InMemoryCollateral::new());
        let randomness = Arc::new(ManualRandomness::default());
        let engine = LotteryEngine::builder()
            .governor(GOVERNOR)
            .parameters(ProtocolParameters {
                treasury: TREASURY,
                max_holder_percent,
                ..ProtocolParameters::default()
            })
            .custody(custody.clone())
            .randomness(randomness.clone())
            .clock(clock.clone())
            .build()
            .unwrap();
        Self {
            engine,
            clock,
            custody,
            randomness,
        }
    }

    fn open(&self, token_id: u128, max_supply: u64, ticket_price: Amount) -> LotteryId {
        let collateral = CollateralRef::new(NFT, token_id);
        self.custody.mint(collateral, OWNER);
        self.engine
            .create_lottery(NewLottery {
                owner: OWNER,
                collateral,
                ticket_price,
                max_supply,
                duration_days: 7,
                display_name: format!("Bar #{}", token_id),
                display_image: String::new(),
            })
            .unwrap()
    }

    fn buy(&self, lottery_id: LotteryId, buyer: Address, amount: u64) -> Result<(), ProtocolError> {
        let price = self.engine.get_lottery(lottery_id)?.ticket_price;
        self.engine
            .buy_tickets(lottery_id, buyer, amount, price * amount as Amount)
            .map(|_| ())
    }
}

#[test]
fn scenario_sell_out_draws_a_real_holder() {
    for (value, expected) in [(2u64, X), (5, Y), (11, X), (19, Y)] {
        let h = Harness::new(100);
        let id = h.open(1, 10, 1);
        h.buy(id, X, 3).unwrap();
        h.buy(id, Y, 7).unwrap();

        let lottery = h.engine.get_lottery(id).unwrap();
        assert_eq!(lottery.state, LotteryState::Concluded);
        assert!(lottery.is_pending_randomness());

        let request = h.randomness.last_request().unwrap();
        let result = h
            .engine
            .on_randomness_ready(request, RandomValue::from_u64(value))
            .unwrap();
        assert_eq!(result.winner, expected);
        assert_eq!(result.winning_ticket, value % 10);
        assert!(h.engine.get_holder_balance(id, result.winner).unwrap() >= 1);
        assert_eq!(h.engine.get_lottery(id).unwrap().winner, Some(expected));
    }
}

#[test]
fn scenario_unsold_expiry_trashes_without_randomness() {
    let h = Harness::new(25);
    let id = h.open(1, 10, 10);
    h.clock.advance(7 * SECONDS_PER_DAY);

    assert_eq!(h.engine.settle(id).unwrap(), Settlement::Trashed);
    let lottery = h.engine.get_lottery(id).unwrap();
    assert_eq!(lottery.state, LotteryState::Trashed);
    assert_eq!(h.custody.owner_of(&lottery.collateral), Some(OWNER));
    assert_eq!(
        h.custody.custodian(&lottery.collateral),
        Some(Custodian::Account { owner: OWNER })
    );
    assert_eq!(h.randomness.request_count(), 0);
    assert_eq!(h.engine.withdrawable(OWNER), 0);
    assert_eq!(h.engine.withdrawable(TREASURY), 0);
}

#[test]
fn scenario_repay_then_melt_refunds_once() {
    let h = Harness::new(50);
    let id = h.open(1, 10, 100);
    h.buy(id, X, 4).unwrap();
    assert_eq!(h.engine.get_lottery(id).unwrap().total_raised, 400);

    assert_eq!(
        h.engine.repay(id, OWNER, 399).unwrap_err(),
        ProtocolError::IncorrectRepaymentAmount { required: 400, provided: 399 }
    );
    assert_eq!(
        h.engine.repay(id, X, 400).unwrap_err(),
        ProtocolError::NotLotteryOwner { lottery_id: id, caller: X }
    );
    h.engine.repay(id, OWNER, 400).unwrap();

    let lottery = h.engine.get_lottery(id).unwrap();
    assert_eq!(lottery.state, LotteryState::Cancelled);
    assert_eq!(h.custody.owner_of(&lottery.collateral), Some(OWNER));
    assert_eq!(h.engine.escrow_of(id), 400);

    let outcome = h.engine.melt_tickets(id, X).unwrap();
    assert_eq!(outcome.tickets_burned, 4);
    assert_eq!(outcome.refund, 400);
    assert_eq!(h.engine.get_holder_balance(id, X).unwrap(), 0);
    assert_eq!(h.engine.withdrawable(X), 400);
    assert_eq!(h.engine.escrow_of(id), 0);

    assert_eq!(h.engine.melt_tickets(id, X).unwrap_err(), ProtocolError::NoTicketsHeld(id));
    assert_eq!(h.engine.repay(id, OWNER, 400).unwrap_err(), ProtocolError::LotteryNotActive(id));
}

#[test]
fn scenario_oversell_is_rejected_without_change() {
    let h = Harness::new(100);
    let id = h.open(1, 10, 5);
    h.buy(id, X, 6).unwrap();

    assert_eq!(
        h.buy(id, Y, 5).unwrap_err(),
        ProtocolError::ExceedsMaxSupply { requested: 5, remaining: 4 }
    );
    let lottery = h.engine.get_lottery(id).unwrap();
    assert_eq!(lottery.sold, 6);
    assert_eq!(lottery.total_raised, 30);
    assert_eq!(h.engine.get_holder_balance(id, Y).unwrap(), 0);
}

#[test]
fn supply_and_accounting_hold_after_every_purchase() {
    let h = Harness::new(40);
    let id = h.open(1, 50, 7);
    let buyers = [X, Y, Z, Address::repeat_byte(0xd4)];
    let mut expected_sold = 0;

    for (round, amount) in [3u64, 1, 9, 20, 2, 5, 17, 4, 6].into_iter().enumerate() {
        let buyer = buyers[round % buyers.len()];
        let before = h.engine.get_lottery(id).unwrap();
        match h.buy(id, buyer, amount) {
            Ok(()) => expected_sold += amount,
            Err(e) => {
                assert_eq!(e.kind(), ErrorKind::Capacity);
                assert_eq!(h.engine.get_lottery(id).unwrap(), before);
            }
        }

        let lottery = h.engine.get_lottery(id).unwrap();
        assert_eq!(lottery.sold, expected_sold);
        assert!(lottery.sold <= lottery.max_supply);
        assert_eq!(lottery.total_raised, lottery.sold as Amount * lottery.ticket_price);
        assert_eq!(h.engine.ticket_supply(id).unwrap(), lottery.sold);
        for holder in buyers {
            assert!(h.engine.get_holder_balance(id, holder).unwrap() <= lottery.holder_cap);
        }
    }
}

#[test]
fn holder_cap_blocks_incremental_purchases() {
    let h = Harness::new(25);
    let id = h.open(1, 10, 10);
    h.buy(id, X, 1).unwrap();
    h.buy(id, X, 1).unwrap();

    assert_eq!(
        h.buy(id, X, 1).unwrap_err(),
        ProtocolError::ExceedsHolderCap { cap: 2, resulting: 3 }
    );
    assert_eq!(h.engine.get_holder_balance(id, X).unwrap(), 2);
}

#[test]
fn winner_claims_once_and_losers_melt_for_rewards() {
    let h = Harness::new(50);
    let id = h.open(1, 10, 100);
    h.buy(id, X, 5).unwrap();
    h.buy(id, Y, 5).unwrap();
    let request = h.randomness.last_request().unwrap();

    assert_eq!(h.engine.claim_collateral(id, X).unwrap_err(), ProtocolError::LotteryNotFinalized(id));
    assert_eq!(h.engine.melt_tickets(id, Y).unwrap_err(), ProtocolError::RandomnessPending(id));

    let result = h.engine.on_randomness_ready(request, RandomValue::from_u64(7)).unwrap();
    assert_eq!(result.winner, Y);

    assert_eq!(
        h.engine.claim_collateral(id, X).unwrap_err(),
        ProtocolError::NotWinner { lottery_id: id, caller: X }
    );
    let collateral = h.engine.claim_collateral(id, Y).unwrap();
    assert_eq!(h.custody.owner_of(&collateral), Some(Y));
    assert_eq!(h.engine.claim_collateral(id, Y).unwrap_err(), ProtocolError::AlreadyClaimed(id));

    assert_eq!(h.engine.melt_tickets(id, Y).unwrap_err(), ProtocolError::LotteryNotMeltable(id));
    let rewards_before = h.engine.reward_balance(X);
    let outcome = h.engine.melt_tickets(id, X).unwrap();
    assert_eq!(outcome.refund, 0);
    assert_eq!(outcome.tickets_burned, 5);
    assert!(outcome.reward_minted > 0);
    assert_eq!(h.engine.reward_balance(X), rewards_before + outcome.reward_minted);
    assert_eq!(h.engine.melt_tickets(id, X).unwrap_err(), ProtocolError::NoTicketsHeld(id));
}

#[test]
fn fees_route_to_treasury_and_proceeds_to_owner() {
    let h = Harness::new(100);
    let id = h.open(1, 20, 1_000);
    h.buy(id, X, 3).unwrap();
    h.buy(id, Y, 2).unwrap();

    assert_eq!(h.engine.withdrawable(TREASURY), 250);
    assert_eq!(h.engine.withdrawable(OWNER), 4_750);
    assert_eq!(h.engine.protocol_stats().fees_collected, 250);
    assert_eq!(h.engine.withdraw(OWNER), 4_750);
    assert_eq!(h.engine.withdrawable(OWNER), 0);
}

#[test]
fn randomness_deliveries_are_matched_to_outstanding_requests() {
    let h = Harness::new(100);
    let id = h.open(1, 10, 1);
    h.buy(id, X, 10).unwrap();
    let first = h.randomness.last_request().unwrap();

    let unknown = RequestId::new();
    assert_eq!(
        h.engine.on_randomness_ready(unknown, RandomValue::from_u64(1)).unwrap_err(),
        ProtocolError::UnknownRandomnessRequest(unknown)
    );

    assert_eq!(
        h.engine.retry_randomness(X, id).unwrap_err(),
        ProtocolError::Unauthorized(X)
    );
    h.clock.advance(3_600);
    assert_eq!(h.engine.stalled_draws(std::time::Duration::from_secs(3_600)).len(), 1);
    let second = h.engine.retry_randomness(GOVERNOR, id).unwrap();
    assert_ne!(first, second);

    assert_eq!(
        h.engine.on_randomness_ready(first, RandomValue::from_u64(1)).unwrap_err(),
        ProtocolError::StaleRandomness { request_id: first, lottery_id: id }
    );
    let result = h.engine.on_randomness_ready(second, RandomValue::from_u64(4)).unwrap();
    assert_eq!(result.winner, X);
    assert_eq!(
        h.engine.on_randomness_ready(second, RandomValue::from_u64(4)).unwrap_err(),
        ProtocolError::UnknownRandomnessRequest(second)
    );
    assert_eq!(h.engine.retry_randomness(GOVERNOR, id).unwrap_err(), ProtocolError::NoPendingDraw(id));
    assert!(h.engine.stalled_draws(std::time::Duration::ZERO).is_empty());

    match h.engine.get_lottery(id).unwrap().draw {
        Some(DrawStatus::Drawn { request_id, winning_ticket, .. }) => {
            assert_eq!(request_id, second);
            assert_eq!(winning_ticket, 4);
        }
        other => panic!("unexpected draw status {:?}", other),
    }
}

#[test]
fn drawing_forgets_every_superseded_request() {
    let h = Harness::new(100);
    let id = h.open(1, 10, 1);
    h.buy(id, X, 10).unwrap();
    let first = h.randomness.last_request().unwrap();
    let second = h.engine.retry_randomness(GOVERNOR, id).unwrap();
    let third = h.engine.retry_randomness(GOVERNOR, id).unwrap();
    assert_eq!(h.engine.snapshot().pending.len(), 3);

    h.engine.on_randomness_ready(third, RandomValue::from_u64(2)).unwrap();
    assert!(h.engine.snapshot().pending.is_empty());

    for late in [first, second] {
        assert_eq!(
            h.engine.on_randomness_ready(late, RandomValue::from_u64(7)).unwrap_err(),
            ProtocolError::UnknownRandomnessRequest(late)
        );
    }
    assert_eq!(h.engine.get_lottery(id).unwrap().winner, Some(X));
}

#[test]
fn provider_outage_leaves_sell_out_purchase_unapplied() {
    let h = Harness::new(100);
    let id = h.open(1, 10, 10);
    h.buy(id, X, 6).unwrap();
    h.randomness.set_offline(true);

    let err = h.buy(id, Y, 4).unwrap_err();
    assert!(matches!(err, ProtocolError::RandomnessUnavailable(_)));
    assert!(err.is_retryable());
    let lottery = h.engine.get_lottery(id).unwrap();
    assert_eq!((lottery.sold, lottery.state), (6, LotteryState::Active));

    h.randomness.set_offline(false);
    h.buy(id, Y, 4).unwrap();
    assert!(h.engine.get_lottery(id).unwrap().is_pending_randomness());
}

#[test]
fn event_log_records_the_lifecycle_in_order() {
    let h = Harness::new(100);
    let id = h.open(1, 5, 10);
    h.buy(id, X, 5).unwrap();
    let request = h.randomness.last_request().unwrap();
    h.engine.on_randomness_ready(request, RandomValue::from_u64(0)).unwrap();
    h.engine.claim_collateral(id, X).unwrap();

    let kinds: Vec<&'static str> = h
        .engine
        .events_since(0, 100)
        .iter()
        .map(|recorded| match recorded.event {
            LotteryEvent::LotteryCreated { .. } => "created",
            LotteryEvent::TicketsPurchased { .. } => "purchased",
            LotteryEvent::RandomnessRequested { .. } => "requested",
            LotteryEvent::WinnerDrawn { .. } => "drawn",
            LotteryEvent::NftClaimed { .. } => "claimed",
            _ => "other",
        })
        .collect();
    assert_eq!(kinds, vec!["created", "purchased", "requested", "drawn", "claimed"]);
    assert_eq!(h.engine.events_since(3, 100).len(), 2);
}

#[test]
fn snapshot_round_trips_through_disk() {
    let h = Harness::new(50);
    let drawn = h.open(1, 10, 10);
    h.buy(drawn, X, 5).unwrap();
    h.buy(drawn, Y, 5).unwrap();
    let pending = h.open(2, 10, 10);
    h.buy(pending, Z, 2).unwrap();
    h.clock.advance(7 * SECONDS_PER_DAY);
    h.engine.settle_expired();

    let outstanding = h.randomness.last_request().unwrap();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("state.json");
    save_snapshot(&path, &h.engine.snapshot()).unwrap();

    let snapshot = load_snapshot(&path).unwrap();
    let restored = LotteryEngine::builder()
        .custody(h.custody.clone())
        .randomness(h.randomness.clone())
        .clock(h.clock.clone())
        .restore(snapshot)
        .unwrap();

    assert_eq!(restored.get_lottery(drawn).unwrap(), h.engine.get_lottery(drawn).unwrap());
    assert_eq!(restored.get_holders(drawn).unwrap(), h.engine.get_holders(drawn).unwrap());
    assert_eq!(restored.withdrawable(OWNER), h.engine.withdrawable(OWNER));
    assert_eq!(restored.governor(), GOVERNOR);
    assert_eq!(restored.parameters().treasury, TREASURY);

    // both draws survive the restart and can still be fulfilled
    let result = restored.on_randomness_ready(outstanding, RandomValue::from_u64(1)).unwrap();
    assert_eq!(result.winner, Z);
    assert_eq!(restored.stalled_draws(std::time::Duration::ZERO).len(), 1);
}

#[test]
fn corrupted_snapshot_is_a_storage_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("state.json");
    std::fs::write(&path, "{ not json").unwrap();
    assert!(load_snapshot(&path).is_err());
}
