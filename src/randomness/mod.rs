//! Randomness for winner selection
//!
//! Two-phase contract: the engine requests a value for a lottery and gets a
//! [`RequestId`] back; the value arrives later as a [`RandomnessDelivery`],
//! picked up by [`worker::RandomnessWorker`] and handed to the engine.

pub mod pending;
pub mod pseudo;
pub mod vrf;
pub mod worker;

pub use pending::{DrawWaiters, PendingDraw, PendingDraws};
pub use pseudo::PseudoRandomProvider;
pub use vrf::{VrfProof, VrfRandomnessProvider};
pub use worker::RandomnessWorker;

use crate::common::types::{LotteryId, RequestId};
use crate::errors::ProtocolError;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Mutex;

/// 256-bit random value, big-endian
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RandomValue([u8; 32]);

impl RandomValue {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Value whose reduction modulo any `m` equals `value % m`
    pub fn from_u64(value: u64) -> Self {
        let mut bytes = [0u8; 32];
        bytes[24..].copy_from_slice(&value.to_be_bytes());
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Exact `self mod modulus` over the full 256 bits
    pub fn reduce(&self, modulus: u64) -> u64 {
        if modulus == 0 {
            return 0;
        }
        let m = modulus as u128;
        let reduced = self
            .0
            .iter()
            .fold(0u128, |acc, byte| (acc * 256 + *byte as u128) % m);
        reduced as u64
    }
}

impl fmt::Display for RandomValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for RandomValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl TryFrom<String> for RandomValue {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let bytes = hex::decode(value.strip_prefix("0x").unwrap_or(&value)).map_err(|e| e.to_string())?;
        let array: [u8; 32] = bytes
            .try_into()
            .map_err(|_| "random value must be 32 bytes".to_string())?;
        Ok(Self(array))
    }
}

impl From<RandomValue> for String {
    fn from(value: RandomValue) -> Self {
        value.to_string()
    }
}

/// A fulfilled request, ready for the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RandomnessDelivery {
    pub request_id: RequestId,
    pub lottery_id: LotteryId,
    pub value: RandomValue,
    pub proof: Option<VrfProof>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RandomnessError {
    #[error("randomness source unavailable: {0}")]
    Unavailable(String),

    #[error("delivery queue is full ({0} outstanding)")]
    QueueFull(usize),

    #[error("invalid proof: {0}")]
    InvalidProof(String),
}

impl From<RandomnessError> for ProtocolError {
    fn from(e: RandomnessError) -> Self {
        ProtocolError::RandomnessUnavailable(e.to_string())
    }
}

/// Source of randomness for lottery draws
pub trait RandomnessProvider: Send + Sync {
    /// Queue a request for `lottery_id`; the value is delivered later
    fn request_randomness(&self, lottery_id: LotteryId) -> Result<RequestId, RandomnessError>;

    /// Drain deliveries that are ready
    fn poll_ready(&self) -> Vec<RandomnessDelivery>;

    fn is_cryptographically_secure(&self) -> bool;

    fn name(&self) -> &'static str;
}

/// Bounded FIFO of fulfilled requests shared by the providers
#[derive(Debug)]
pub(crate) struct DeliveryQueue {
    ready: Mutex<VecDeque<RandomnessDelivery>>,
    capacity: usize,
}

impl DeliveryQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            ready: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&self, delivery: RandomnessDelivery) -> Result<(), RandomnessError> {
        let mut ready = self.ready.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if ready.len() >= self.capacity {
            return Err(RandomnessError::QueueFull(ready.len()));
        }
        ready.push_back(delivery);
        Ok(())
    }

    pub fn drain(&self) -> Vec<RandomnessDelivery> {
        self.ready
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .drain(..)
            .collect()
    }
}
