//! Error types for the MeltyFi protocol core
//!
//! `ProtocolError` covers every rejected lifecycle operation and carries its
//! taxonomy through [`ErrorKind`]. `MeltyError` is the root type for the
//! ambient layers (configuration, snapshots) and wraps protocol errors.

use crate::common::types::{Address, Amount, LotteryId, RequestId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Error taxonomy: only `External` failures are worth retrying as-is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    /// Malformed or out-of-range input
    Validation,
    /// Caller lacks the required relationship to the entity
    Authorization,
    /// Operation invalid for the current lifecycle state
    State,
    /// Would violate a supply or holder-cap bound
    Capacity,
    /// Randomness provider, rate source or custody failure
    External,
}

/// Rejections produced by lifecycle, parameter and settlement operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("ticket price must be positive and the full supply must be representable")]
    InvalidPrice,

    #[error("max supply {requested} outside bounds [{min}, {max}]")]
    InvalidSupply { requested: u64, min: u64, max: u64 },

    #[error("duration of {requested} days outside [1, {max}]")]
    InvalidDuration { requested: u32, max: u32 },

    #[error("ticket amount must be at least 1")]
    InvalidAmount,

    #[error("payment {provided} is below the required {required}")]
    InsufficientPayment { required: Amount, provided: Amount },

    #[error("payment {provided} exceeds the required {required}")]
    Overpayment { required: Amount, provided: Amount },

    #[error("repayment {provided} does not match total raised {required}")]
    IncorrectRepaymentAmount { required: Amount, provided: Amount },

    #[error("invalid parameter {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("{0} does not own the collateral")]
    NotCollateralOwner(Address),

    #[error("{caller} is not the owner of lottery {lottery_id}")]
    NotLotteryOwner { lottery_id: LotteryId, caller: Address },

    #[error("{caller} is not the winner of lottery {lottery_id}")]
    NotWinner { lottery_id: LotteryId, caller: Address },

    #[error("{0} is not authorized to perform this operation")]
    Unauthorized(Address),

    #[error("lottery {0} not found")]
    LotteryNotFound(LotteryId),

    #[error("lottery {0} is not active")]
    LotteryNotActive(LotteryId),

    #[error("lottery {0} has no finalized winner")]
    LotteryNotFinalized(LotteryId),

    #[error("collateral of lottery {0} was already claimed")]
    AlreadyClaimed(LotteryId),

    #[error("tickets of lottery {0} cannot be melted in its current state")]
    LotteryNotMeltable(LotteryId),

    #[error("no tickets held in lottery {0}")]
    NoTicketsHeld(LotteryId),

    #[error("lottery {0} is waiting for randomness")]
    RandomnessPending(LotteryId),

    #[error("lottery {0} is not awaiting randomness")]
    NoPendingDraw(LotteryId),

    #[error("randomness request {0} is unknown or already fulfilled")]
    UnknownRandomnessRequest(RequestId),

    #[error("randomness request {request_id} is not the outstanding request of lottery {lottery_id}")]
    StaleRandomness { request_id: RequestId, lottery_id: LotteryId },

    #[error("ticket ranges of lottery {0} do not cover the drawn index")]
    LedgerInconsistent(LotteryId),

    #[error("purchase of {requested} tickets exceeds the {remaining} remaining")]
    ExceedsMaxSupply { requested: u64, remaining: u64 },

    #[error("holder balance would reach {resulting}, above the cap of {cap}")]
    ExceedsHolderCap { cap: u64, resulting: u64 },

    #[error("escrow of lottery {lottery_id} holds {available}, refund needs {required}")]
    InsufficientEscrow { lottery_id: LotteryId, available: Amount, required: Amount },

    #[error("randomness provider unavailable: {0}")]
    RandomnessUnavailable(String),

    #[error("reward rate unavailable: {0}")]
    RateUnavailable(String),

    #[error("collateral custody failed: {0}")]
    Custody(String),
}

impl ProtocolError {
    pub fn kind(&self) -> ErrorKind {
        use ProtocolError::*;

        match self {
            InvalidPrice
            | InvalidSupply { .. }
            | InvalidDuration { .. }
            | InvalidAmount
            | InsufficientPayment { .. }
            | Overpayment { .. }
            | IncorrectRepaymentAmount { .. }
            | InvalidParameter { .. } => ErrorKind::Validation,

            NotCollateralOwner(_) | NotLotteryOwner { .. } | NotWinner { .. } | Unauthorized(_) => {
                ErrorKind::Authorization
            }

            LotteryNotFound(_)
            | LotteryNotActive(_)
            | LotteryNotFinalized(_)
            | AlreadyClaimed(_)
            | LotteryNotMeltable(_)
            | NoTicketsHeld(_)
            | RandomnessPending(_)
            | NoPendingDraw(_)
            | UnknownRandomnessRequest(_)
            | StaleRandomness { .. }
            | LedgerInconsistent(_) => ErrorKind::State,

            ExceedsMaxSupply { .. } | ExceedsHolderCap { .. } | InsufficientEscrow { .. } => {
                ErrorKind::Capacity
            }

            RandomnessUnavailable(_) | RateUnavailable(_) | Custody(_) => ErrorKind::External,
        }
    }

    /// Whether the same call may succeed later without changing its input
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::External
    }
}

/// Root error type for the ambient layers
#[derive(Debug)]
pub enum MeltyError {
    /// Configuration related errors
    Configuration(ConfigurationError),

    /// Rejected protocol operations
    Protocol(ProtocolError),

    /// Snapshot persistence errors
    Storage(StorageError),
}

/// Configuration and validation errors
#[derive(Debug)]
pub enum ConfigurationError {
    ValidationFailed(String),
    MissingRequired(String),
    InvalidValue { field: String, value: String, reason: String },
    LoadFailed(String),
    SaveFailed(String),
}

/// Snapshot storage errors
#[derive(Debug)]
pub enum StorageError {
    ReadFailed(String),
    WriteFailed(String),
    CorruptedData(String),
    PermissionDenied(String),
}

impl fmt::Display for MeltyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MeltyError::Configuration(e) => write!(f, "Configuration error: {}", e),
            MeltyError::Protocol(e) => write!(f, "Protocol error: {}", e),
            MeltyError::Storage(e) => write!(f, "Storage error: {}", e),
        }
    }
}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigurationError::ValidationFailed(msg) => write!(f, "Validation failed: {}", msg),
            ConfigurationError::MissingRequired(field) => write!(f, "Missing required field: {}", field),
            ConfigurationError::InvalidValue { field, value, reason } => {
                write!(f, "Invalid value for {}: '{}' ({})", field, value, reason)
            }
            ConfigurationError::LoadFailed(msg) => write!(f, "Failed to load configuration: {}", msg),
            ConfigurationError::SaveFailed(msg) => write!(f, "Failed to save configuration: {}", msg),
        }
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::ReadFailed(msg) => write!(f, "Read failed: {}", msg),
            StorageError::WriteFailed(msg) => write!(f, "Write failed: {}", msg),
            StorageError::CorruptedData(msg) => write!(f, "Corrupted data: {}", msg),
            StorageError::PermissionDenied(path) => write!(f, "Permission denied: {}", path),
        }
    }
}

impl std::error::Error for MeltyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MeltyError::Configuration(e) => Some(e),
            MeltyError::Protocol(e) => Some(e),
            MeltyError::Storage(e) => Some(e),
        }
    }
}

impl std::error::Error for ConfigurationError {}
impl std::error::Error for StorageError {}

impl From<ConfigurationError> for MeltyError {
    fn from(e: ConfigurationError) -> Self {
        MeltyError::Configuration(e)
    }
}

impl From<ProtocolError> for MeltyError {
    fn from(e: ProtocolError) -> Self {
        MeltyError::Protocol(e)
    }
}

impl From<StorageError> for MeltyError {
    fn from(e: StorageError) -> Self {
        MeltyError::Storage(e)
    }
}

impl From<std::io::Error> for MeltyError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::PermissionDenied => {
                MeltyError::Storage(StorageError::PermissionDenied(e.to_string()))
            }
            _ => MeltyError::Storage(StorageError::ReadFailed(e.to_string())),
        }
    }
}

impl From<serde_json::Error> for MeltyError {
    fn from(e: serde_json::Error) -> Self {
        MeltyError::Storage(StorageError::CorruptedData(e.to_string()))
    }
}

pub type MeltyResult<T> = Result<T, MeltyError>;
