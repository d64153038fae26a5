//! Hash-based fallback randomness
//!
//! Not verifiable and not cryptographically secure: whoever runs the
//! provider could grind values. Every request is logged at warn level.

use super::{DeliveryQueue, RandomValue, RandomnessDelivery, RandomnessError, RandomnessProvider};
use crate::common::types::{LotteryId, RequestId};
use rand::RngCore;
use sha2::{Digest, Sha256};
use tracing::warn;

pub struct PseudoRandomProvider {
    queue: DeliveryQueue,
}

impl PseudoRandomProvider {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            queue: DeliveryQueue::new(queue_capacity),
        }
    }

    fn derive(lottery_id: LotteryId, request_id: RequestId) -> RandomValue {
        let mut entropy = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut entropy);
        let timestamp = chrono::Utc::now().timestamp_micros();

        let mut hasher = Sha256::new();
        hasher.update(lottery_id.to_be_bytes());
        hasher.update(request_id.as_bytes());
        hasher.update(timestamp.to_be_bytes());
        hasher.update(entropy);
        RandomValue::new(hasher.finalize().into())
    }
}

impl RandomnessProvider for PseudoRandomProvider {
    fn request_randomness(&self, lottery_id: LotteryId) -> Result<RequestId, RandomnessError> {
        let request_id = RequestId::new();
        warn!(
            lottery_id,
            %request_id,
            "Drawing with pseudo-randomness; result is not cryptographically secure"
        );

        self.queue.push(RandomnessDelivery {
            request_id,
            lottery_id,
            value: Self::derive(lottery_id, request_id),
            proof: None,
        })?;
        Ok(request_id)
    }

    fn poll_ready(&self) -> Vec<RandomnessDelivery> {
        self.queue.drain()
    }

    fn is_cryptographically_secure(&self) -> bool {
        false
    }

    fn name(&self) -> &'static str {
        "pseudo"
    }
}
