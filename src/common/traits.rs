//! Shared traits and interfaces
//!
//! Seams between the lifecycle engine and the collaborators it does not own:
//! wall-clock time and the NFT contracts holding collateral.

use crate::common::types::{Address, CollateralRef, Timestamp};
use std::sync::atomic::{AtomicU64, Ordering};

/// Source of the current time, in unix seconds
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Wall clock backed by `chrono`
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        chrono::Utc::now().timestamp().max(0) as Timestamp
    }
}

/// Manually driven clock for simulations and tests
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: AtomicU64::new(start),
        }
    }

    pub fn set(&self, timestamp: Timestamp) {
        self.now.store(timestamp, Ordering::SeqCst);
    }

    pub fn advance(&self, seconds: u64) -> Timestamp {
        self.now.fetch_add(seconds, Ordering::SeqCst) + seconds
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        self.now.load(Ordering::SeqCst)
    }
}

/// Collateral custody failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CustodyError {
    #[error("token {0} is not known to the registry")]
    UnknownToken(CollateralRef),

    #[error("{caller} does not own token {token}")]
    NotOwner { token: CollateralRef, caller: Address },

    #[error("token {0} is not held in protocol custody")]
    NotInCustody(CollateralRef),
}

/// NFT ownership registry the protocol locks collateral into
///
/// `lock` moves a token from its owner into protocol custody, `release`
/// moves it out to any recipient. Implementations must make both moves
/// all-or-nothing.
pub trait CollateralRegistry: Send + Sync {
    /// Current owner, `None` while the token sits in protocol custody
    fn owner_of(&self, token: &CollateralRef) -> Option<Address>;

    fn lock(&self, token: &CollateralRef, from: Address) -> Result<(), CustodyError>;

    fn release(&self, token: &CollateralRef, to: Address) -> Result<(), CustodyError>;

    fn in_custody(&self, token: &CollateralRef) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::new(1_000);
        assert_eq!(clock.now(), 1_000);
        assert_eq!(clock.advance(86_400), 87_400);
        clock.set(5);
        assert_eq!(clock.now(), 5);
    }

    #[test]
    fn test_system_clock_is_after_2020() {
        assert!(SystemClock.now() > 1_577_836_800);
    }
}
