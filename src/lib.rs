//! MeltyFi - NFT-collateralized lending through lotteries
//!
//! An owner locks an NFT and sells WonkaBar tickets against it. Proceeds are
//! the loan. Repaying everything raised cancels the lottery and returns the
//! NFT; otherwise the lottery concludes on sell-out or expiry and a random
//! ticket holder wins the NFT. Every holder who does not win the NFT is
//! compensated in ChocoChip rewards, plus a refund after a repayment.

pub mod common;
pub mod config;
pub mod custody;
pub mod errors;
pub mod ledger;
pub mod lottery;
pub mod metrics;
pub mod params;
pub mod randomness;
pub mod rewards;
pub mod store;
pub mod treasury;

pub use common::{Address, Amount, Clock, CollateralRef, CollateralRegistry, LotteryId, ManualClock, RequestId, SystemClock};
pub use config::{ConfigLoader, MeltyConfig};
pub use custody::InMemoryCollateral;
pub use errors::{ErrorKind, MeltyError, MeltyResult, ProtocolError};
pub use lottery::{
    DrawResult, DrawWaitError, EngineBuilder, Lottery, LotteryEngine, LotteryEvent, LotteryState, MeltOutcome,
    NewLottery, PurchaseReceipt, Settlement,
};
pub use params::{ParameterChange, ProtocolParameters};
pub use randomness::{
    PseudoRandomProvider, RandomValue, RandomnessDelivery, RandomnessProvider, RandomnessWorker, VrfProof,
    VrfRandomnessProvider,
};
pub use store::{load_snapshot, save_snapshot, ProtocolSnapshot};
