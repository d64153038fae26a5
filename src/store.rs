//! Lottery records and their secondary indices
//!
//! Records live in an arena keyed by id, each behind its own mutex so
//! operations on one lottery serialize while distinct lotteries proceed in
//! parallel. Owner, participant and active indices are updated by the engine
//! together with the record they describe, and rebuilt from the records on
//! restore.

use crate::common::types::{Address, LotteryId, RequestId, Timestamp};
use crate::errors::{MeltyResult, ProtocolError, StorageError};
use crate::lottery::types::{Lottery, LotteryState};
use crate::params::ProtocolParameters;
use crate::randomness::PendingDraw;
use crate::rewards::RewardState;
use crate::treasury::VaultState;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tracing::info;

pub const SNAPSHOT_VERSION: u32 = 1;

pub type LotteryHandle = Arc<Mutex<Lottery>>;

/// Lock a lottery record, recovering the data if a previous holder panicked
pub fn lock_lottery(handle: &LotteryHandle) -> MutexGuard<'_, Lottery> {
    handle.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Default)]
pub struct LotteryStore {
    lotteries: DashMap<LotteryId, LotteryHandle>,
    next_id: AtomicU64,
    by_owner: DashMap<Address, BTreeSet<LotteryId>>,
    by_participant: DashMap<Address, BTreeSet<LotteryId>>,
    active: RwLock<BTreeSet<LotteryId>>,
}

impl LotteryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign the next sequential id and insert the record built for it
    pub fn insert_with<F>(&self, build: F) -> (LotteryId, LotteryHandle)
    where
        F: FnOnce(LotteryId) -> Lottery,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let lottery = build(id);
        let owner = lottery.owner;
        let is_active = lottery.state == LotteryState::Active;

        let handle = Arc::new(Mutex::new(lottery));
        self.lotteries.insert(id, handle.clone());
        self.by_owner.entry(owner).or_default().insert(id);
        if is_active {
            self.active_set().insert(id);
        }
        (id, handle)
    }

    pub fn get(&self, id: LotteryId) -> Result<LotteryHandle, ProtocolError> {
        self.lotteries
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or(ProtocolError::LotteryNotFound(id))
    }

    /// Copy of a record
    pub fn read(&self, id: LotteryId) -> Result<Lottery, ProtocolError> {
        let handle = self.get(id)?;
        let lottery = lock_lottery(&handle).clone();
        Ok(lottery)
    }

    pub fn record_participant(&self, holder: Address, id: LotteryId) {
        self.by_participant.entry(holder).or_default().insert(id);
    }

    /// Drop a lottery from the active index once it leaves ACTIVE
    pub fn mark_inactive(&self, id: LotteryId) {
        self.active_set().remove(&id);
    }

    pub fn active_ids(&self) -> Vec<LotteryId> {
        self.active
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .copied()
            .collect()
    }

    pub fn created_by(&self, owner: Address) -> Vec<LotteryId> {
        self.by_owner
            .get(&owner)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn participated_by(&self, holder: Address) -> Vec<LotteryId> {
        self.by_participant
            .get(&holder)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn participant_count(&self) -> usize {
        self.by_participant.len()
    }

    pub fn ids(&self) -> Vec<LotteryId> {
        let mut ids: Vec<LotteryId> = self.lotteries.iter().map(|entry| *entry.key()).collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.lotteries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lotteries.is_empty()
    }

    pub fn next_id(&self) -> LotteryId {
        self.next_id.load(Ordering::SeqCst)
    }

    /// Copies of every record, ordered by id
    pub fn export(&self) -> Vec<Lottery> {
        self.ids()
            .into_iter()
            .filter_map(|id| self.read(id).ok())
            .collect()
    }

    /// Rebuild a store and all indices from primary records
    pub fn from_records(records: Vec<Lottery>, next_id: LotteryId) -> Self {
        let store = Self::new();
        let mut highest = None;

        for lottery in records {
            let id = lottery.id;
            highest = highest.max(Some(id));
            store.by_owner.entry(lottery.owner).or_default().insert(id);
            for range in &lottery.purchases {
                store.record_participant(range.holder, id);
            }
            if lottery.state == LotteryState::Active {
                store.active_set().insert(id);
            }
            store.lotteries.insert(id, Arc::new(Mutex::new(lottery)));
        }

        let floor = highest.map(|id| id + 1).unwrap_or(0);
        store.next_id.store(next_id.max(floor), Ordering::SeqCst);
        store
    }

    fn active_set(&self) -> std::sync::RwLockWriteGuard<'_, BTreeSet<LotteryId>> {
        self.active.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Serializable image of the whole protocol state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolSnapshot {
    pub version: u32,
    pub taken_at: Timestamp,
    pub next_lottery_id: LotteryId,
    pub lotteries: Vec<Lottery>,
    pub tickets: Vec<(LotteryId, Address, u64)>,
    pub vault: VaultState,
    pub rewards: RewardState,
    pub params: ProtocolParameters,
    pub governor: Address,
    pub pending: Vec<(RequestId, PendingDraw)>,
}

pub fn save_snapshot(path: impl AsRef<Path>, snapshot: &ProtocolSnapshot) -> MeltyResult<()> {
    let path = path.as_ref();
    let json = serde_json::to_string_pretty(snapshot)?;
    std::fs::write(path, json)
        .map_err(|e| StorageError::WriteFailed(format!("{}: {}", path.display(), e)))?;
    info!(path = %path.display(), lotteries = snapshot.lotteries.len(), "Snapshot saved");
    Ok(())
}

pub fn load_snapshot(path: impl AsRef<Path>) -> MeltyResult<ProtocolSnapshot> {
    let path = path.as_ref();
    let json = std::fs::read_to_string(path)?;
    let snapshot: ProtocolSnapshot = serde_json::from_str(&json)?;
    if snapshot.version != SNAPSHOT_VERSION {
        return Err(StorageError::CorruptedData(format!(
            "unsupported snapshot version {} (expected {})",
            snapshot.version, SNAPSHOT_VERSION
        ))
        .into());
    }
    Ok(snapshot)
}
