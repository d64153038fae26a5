//! Concurrent buyers and the background randomness worker

use meltyfi::lottery::DrawWaitError;
use meltyfi::{
    Address, Amount, CollateralRef, InMemoryCollateral, LotteryEngine, LotteryId, LotteryState, ManualClock,
    NewLottery, ProtocolError, ProtocolParameters, PseudoRandomProvider, RandomnessWorker, VrfRandomnessProvider,
};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const OWNER: Address = Address::repeat_byte(0x0a);
const PRICE: Amount = 3;

fn engine_with(provider: Arc<dyn meltyfi::RandomnessProvider>, max_holder_percent: u32) -> (Arc<LotteryEngine>, Arc<InMemoryCollateral>) {
    let custody = Arc::new(InMemoryCollateral::new());
    let engine = LotteryEngine::builder()
        .governor(Address::repeat_byte(0x60))
        .parameters(ProtocolParameters {
            treasury: Address::repeat_byte(0x7e),
            max_holder_percent,
            ..ProtocolParameters::default()
        })
        .custody(custody.clone())
        .randomness(provider)
        .clock(Arc::new(ManualClock::new(1_700_000_000)))
        .build()
        .unwrap();
    (Arc::new(engine), custody)
}

fn open(engine: &LotteryEngine, custody: &InMemoryCollateral, token_id: u128, max_supply: u64) -> LotteryId {
    let collateral = CollateralRef::new(Address::repeat_byte(0xc0), token_id);
    custody.mint(collateral, OWNER);
    engine
        .create_lottery(NewLottery {
            owner: OWNER,
            collateral,
            ticket_price: PRICE,
            max_supply,
            duration_days: 30,
            display_name: String::new(),
            display_image: String::new(),
        })
        .unwrap()
}

fn buyer(index: usize) -> Address {
    let mut bytes = [0x11u8; 20];
    bytes[16..].copy_from_slice(&(index as u32).to_be_bytes());
    Address::new(bytes)
}

#[test]
fn concurrent_buyers_never_oversell() {
    let (engine, custody) = engine_with(Arc::new(PseudoRandomProvider::new(64)), 20);
    let id = open(&engine, &custody, 1, 100);

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let engine = engine.clone();
            thread::spawn(move || {
                let holder = buyer(i);
                let mut bought = 0u64;
                for _ in 0..20 {
                    match engine.buy_tickets(id, holder, 3, 3 * PRICE) {
                        Ok(_) => bought += 3,
                        Err(ProtocolError::ExceedsHolderCap { .. })
                        | Err(ProtocolError::ExceedsMaxSupply { .. })
                        | Err(ProtocolError::LotteryNotActive(_))
                        | Err(ProtocolError::RandomnessPending(_)) => {}
                        Err(other) => panic!("unexpected error {other}"),
                    }
                }
                (holder, bought)
            })
        })
        .collect();

    let results: Vec<(Address, u64)> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let lottery = engine.get_lottery(id).unwrap();
    let total: u64 = results.iter().map(|(_, bought)| bought).sum();

    assert_eq!(lottery.sold, total);
    assert!(lottery.sold <= lottery.max_supply);
    assert_eq!(lottery.total_raised, lottery.sold as Amount * PRICE);
    for (holder, bought) in results {
        assert_eq!(engine.get_holder_balance(id, holder).unwrap(), bought);
        assert!(bought <= lottery.holder_cap);
    }
}

#[test]
fn concurrent_sell_out_requests_randomness_once() {
    let (engine, custody) = engine_with(Arc::new(PseudoRandomProvider::new(64)), 100);
    let id = open(&engine, &custody, 1, 50);

    let handles: Vec<_> = (0..10)
        .map(|i| {
            let engine = engine.clone();
            thread::spawn(move || {
                let mut concluded = 0;
                for _ in 0..10 {
                    if let Ok(receipt) = engine.buy_tickets(id, buyer(i), 1, PRICE) {
                        concluded += receipt.concluded as usize;
                    }
                }
                concluded
            })
        })
        .collect();

    let concluded: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(concluded, 1);
    let lottery = engine.get_lottery(id).unwrap();
    assert_eq!(lottery.sold, 50);
    assert_eq!(lottery.state, LotteryState::Concluded);
    assert_eq!(engine.deliver_ready(), 1);
    assert!(engine.get_holder_balance(id, engine.get_lottery(id).unwrap().winner.unwrap()).unwrap() >= 1);
}

#[tokio::test]
async fn worker_completes_draws_for_waiters() {
    let (engine, custody) = engine_with(Arc::new(VrfRandomnessProvider::new_random(64)), 100);
    let worker = RandomnessWorker::spawn(engine.clone(), Duration::from_millis(5), Duration::from_secs(3_600));

    let ids: Vec<LotteryId> = (0..4).map(|token| open(&engine, &custody, token, 5)).collect();
    let waiters: Vec<_> = ids
        .iter()
        .map(|&id| {
            let engine = engine.clone();
            tokio::spawn(async move { engine.wait_for_draw(id, Duration::from_secs(5)).await })
        })
        .collect();

    for &id in &ids {
        engine.buy_tickets(id, buyer(id as usize), 5, 5 * PRICE).unwrap();
    }

    for (waiter, &id) in waiters.into_iter().zip(&ids) {
        let result = waiter.await.unwrap().unwrap();
        assert_eq!(result.lottery_id, id);
        assert_eq!(result.winner, buyer(id as usize));
        assert_eq!(engine.verify_draw(id), Ok(Some(true)));
    }
    worker.stop();
}

#[tokio::test]
async fn waiting_on_an_undrawn_lottery_times_out() {
    let (engine, custody) = engine_with(Arc::new(PseudoRandomProvider::new(8)), 100);
    let id = open(&engine, &custody, 1, 5);

    let err = engine.wait_for_draw(id, Duration::from_millis(20)).await.unwrap_err();
    assert_eq!(err, DrawWaitError::Timeout { lottery_id: id, timeout_ms: 20 });

    let owed = engine.get_lottery(id).unwrap().total_raised;
    engine.repay(id, OWNER, owed).unwrap();
    assert_eq!(
        engine.wait_for_draw(id, Duration::from_millis(20)).await.unwrap_err(),
        DrawWaitError::NoDraw(id)
    );
    assert_eq!(
        engine.wait_for_draw(99, Duration::from_millis(20)).await.unwrap_err(),
        DrawWaitError::Protocol(ProtocolError::LotteryNotFound(99))
    );
}
