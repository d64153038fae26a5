//! Lottery lifecycle: records, events and the engine that drives them

pub mod engine;
pub mod events;
pub mod types;

pub use engine::{DrawWaitError, EngineBuilder, LotteryEngine};
pub use events::{EventLog, LotteryEvent, RecordedEvent};
pub use types::{
    DrawResult, DrawStatus, HolderLotteries, Lottery, LotteryState, MeltOutcome, NewLottery, PurchaseReceipt,
    Settlement, StalledDraw, TicketRange,
};
