use crate::common::types::{LotteryId, RequestId, Timestamp};
use crate::lottery::types::DrawResult;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::oneshot;

/// Lottery a randomness request was issued for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingDraw {
    pub lottery_id: LotteryId,
    pub requested_at: Timestamp,
}

/// Request id to lottery map for issued randomness requests
///
/// Superseded requests stay in the map until their value arrives or the
/// lottery is drawn, so a late delivery can be told apart from an unknown id.
#[derive(Debug, Default)]
pub struct PendingDraws {
    requests: DashMap<RequestId, PendingDraw>,
}

impl PendingDraws {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, request_id: RequestId, lottery_id: LotteryId, requested_at: Timestamp) {
        self.requests.insert(request_id, PendingDraw { lottery_id, requested_at });
    }

    pub fn get(&self, request_id: &RequestId) -> Option<PendingDraw> {
        self.requests.get(request_id).map(|entry| *entry)
    }

    pub fn remove(&self, request_id: &RequestId) -> Option<PendingDraw> {
        self.requests.remove(request_id).map(|(_, pending)| pending)
    }

    /// Forget every request issued for the lottery; returns how many were dropped
    pub fn remove_lottery(&self, lottery_id: LotteryId) -> usize {
        let before = self.requests.len();
        self.requests.retain(|_, pending| pending.lottery_id != lottery_id);
        before.saturating_sub(self.requests.len())
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub(crate) fn entries(&self) -> Vec<(RequestId, PendingDraw)> {
        self.requests.iter().map(|entry| (*entry.key(), *entry.value())).collect()
    }
}

/// Async callers waiting for a lottery's winner
#[derive(Debug, Default, Clone)]
pub struct DrawWaiters {
    waiting: Arc<DashMap<LotteryId, Vec<oneshot::Sender<DrawResult>>>>,
}

impl DrawWaiters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, lottery_id: LotteryId) -> oneshot::Receiver<DrawResult> {
        let (tx, rx) = oneshot::channel();
        self.waiting.entry(lottery_id).or_default().push(tx);
        rx
    }

    /// Wake every waiter of the lottery; returns how many were still listening
    pub fn complete(&self, result: &DrawResult) -> usize {
        match self.waiting.remove(&result.lottery_id) {
            Some((_, senders)) => senders
                .into_iter()
                .map(|sender| sender.send(result.clone()).is_ok())
                .filter(|delivered| *delivered)
                .count(),
            None => 0,
        }
    }

    /// Drop waiters whose receivers were dropped (e.g. timed out)
    pub fn prune(&self, lottery_id: LotteryId) {
        let now_empty = match self.waiting.get_mut(&lottery_id) {
            Some(mut senders) => {
                senders.retain(|sender| !sender.is_closed());
                senders.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.waiting.remove_if(&lottery_id, |_, senders| senders.is_empty());
        }
    }

    pub fn waiting_count(&self, lottery_id: LotteryId) -> usize {
        self.waiting.get(&lottery_id).map(|senders| senders.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::Address;

    #[test]
    fn test_pending_draw_lifecycle() {
        let pending = PendingDraws::new();
        let request_id = RequestId::new();

        pending.register(request_id, 7, 1_000);
        assert_eq!(pending.len(), 1);
        assert_eq!(pending.get(&request_id).map(|p| p.lottery_id), Some(7));

        assert!(pending.remove(&request_id).is_some());
        assert!(pending.remove(&request_id).is_none());
        assert!(pending.is_empty());
    }

    #[test]
    fn test_remove_lottery_drops_superseded_requests() {
        let pending = PendingDraws::new();
        let superseded = RequestId::new();
        let outstanding = RequestId::new();
        let other = RequestId::new();

        pending.register(superseded, 7, 1_000);
        pending.register(outstanding, 7, 2_000);
        pending.register(other, 8, 2_000);

        assert_eq!(pending.remove_lottery(7), 2);
        assert!(pending.get(&superseded).is_none());
        assert!(pending.get(&outstanding).is_none());
        assert_eq!(pending.get(&other).map(|p| p.lottery_id), Some(8));
        assert_eq!(pending.remove_lottery(7), 0);
    }

    #[tokio::test]
    async fn test_waiters_receive_draw_result() {
        let waiters = DrawWaiters::new();
        let first = waiters.register(3);
        let second = waiters.register(3);
        assert_eq!(waiters.waiting_count(3), 2);

        let result = DrawResult {
            lottery_id: 3,
            winner: Address::repeat_byte(1),
            winning_ticket: 4,
        };
        assert_eq!(waiters.complete(&result), 2);

        assert_eq!(first.await.unwrap(), result);
        assert_eq!(second.await.unwrap(), result);
        assert_eq!(waiters.waiting_count(3), 0);
    }

    #[test]
    fn test_prune_drops_abandoned_waiters() {
        let waiters = DrawWaiters::new();
        let abandoned = waiters.register(1);
        drop(abandoned);

        waiters.prune(1);
        assert_eq!(waiters.waiting_count(1), 0);
    }
}
