//! Common utilities and shared functionality
//!
//! Identifiers, value types and the traits used across the MeltyFi core.

pub mod types;
pub mod traits;

pub use traits::{Clock, CollateralRegistry, CustodyError, ManualClock, SystemClock};
pub use types::{Address, Amount, CollateralRef, LotteryId, RequestId, Timestamp};
