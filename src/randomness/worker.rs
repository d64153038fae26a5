use crate::lottery::LotteryEngine;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, warn};

/// Background worker that settles expired lotteries and feeds ready
/// randomness back into the engine.
///
/// Runs off the request path so callers only ever see the two-phase
/// request/fulfil contract.
pub struct RandomnessWorker {
    engine: Arc<LotteryEngine>,
    interval: Duration,
    stall_alert: Duration,
    running: Arc<AtomicBool>,
    shutdown: Notify,
    draws_delivered: AtomicU64,
}

impl RandomnessWorker {
    pub fn spawn(engine: Arc<LotteryEngine>, interval: Duration, stall_alert: Duration) -> Arc<Self> {
        let worker = Arc::new(Self {
            engine,
            interval: interval.max(Duration::from_millis(1)),
            stall_alert,
            running: Arc::new(AtomicBool::new(true)),
            shutdown: Notify::new(),
            draws_delivered: AtomicU64::new(0),
        });

        worker.clone().spawn_task();
        worker
    }

    fn spawn_task(self: Arc<Self>) {
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(self.interval);
            let mut last_stalled = 0usize;

            while self.running.load(Ordering::SeqCst) {
                tokio::select! {
                    biased;
                    _ = self.shutdown.notified() => break,
                    _ = tick.tick() => {
                        self.run_once();

                        let stalled = self.engine.stalled_draws(self.stall_alert);
                        if stalled.len() > last_stalled {
                            for draw in &stalled {
                                warn!(
                                    lottery_id = draw.lottery_id,
                                    request_id = %draw.request_id,
                                    waiting_secs = draw.waiting_secs,
                                    "Draw still waiting for randomness"
                                );
                            }
                        }
                        last_stalled = stalled.len();
                    }
                }
            }
            debug!("Randomness worker stopped");
        });
    }

    /// One settle-and-deliver pass; returns the number of draws finalized
    pub fn run_once(&self) -> usize {
        let settled = self.engine.settle_expired();
        if !settled.is_empty() {
            debug!(count = settled.len(), "Settled expired lotteries");
        }

        let delivered = self.engine.deliver_ready();
        self.draws_delivered.fetch_add(delivered as u64, Ordering::SeqCst);
        delivered
    }

    pub fn draws_delivered(&self) -> u64 {
        self.draws_delivered.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.shutdown.notify_one();
    }
}
