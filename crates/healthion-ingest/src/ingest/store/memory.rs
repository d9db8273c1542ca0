//! In-memory import store
//!
//! Used by tests in place of PostgreSQL. Claims behave like the unique
//! index of the PostgreSQL store: a second session claiming an in-flight key
//! waits until the first one commits or rolls back.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;

use super::{ImportClaim, ImportSession, ImportStore, StoreError};
use crate::ingest::models::{NewRecord, NewStatistic, NewWorkout};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClaimState {
    InFlight,
    Committed,
}

#[derive(Default)]
struct MemoryState {
    claims: HashMap<String, ClaimState>,
    records: Vec<NewRecord>,
    workouts: Vec<NewWorkout>,
    statistics: Vec<NewStatistic>,
    commits: u64,
    rollbacks: u64,
    /// Reject the insert following this many successful inserts in a session
    #[cfg(test)]
    fail_after: Option<usize>,
}

#[derive(Default)]
struct Shared {
    state: Mutex<MemoryState>,
    released: Notify,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn release(&self, key: &str, committed: bool) {
        {
            let mut state = self.lock();
            if committed {
                state.claims.insert(key.to_string(), ClaimState::Committed);
            } else {
                state.claims.remove(key);
            }
        }
        self.released.notify_waiters();
    }
}

/// Committed contents of a [`MemoryImportStore`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemorySnapshot {
    pub records: usize,
    pub workouts: usize,
    pub statistics: usize,
    pub committed_claims: usize,
    pub commits: u64,
    pub rollbacks: u64,
}

#[derive(Clone, Default)]
pub struct MemoryImportStore {
    shared: Arc<Shared>,
}

impl MemoryImportStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose sessions reject the insert after `inserts` successful ones
    #[cfg(test)]
    pub(crate) fn failing_after(inserts: usize) -> Self {
        let store = Self::default();
        store.shared.lock().fail_after = Some(inserts);
        store
    }

    pub fn snapshot(&self) -> MemorySnapshot {
        let state = self.shared.lock();
        MemorySnapshot {
            records: state.records.len(),
            workouts: state.workouts.len(),
            statistics: state.statistics.len(),
            committed_claims: state
                .claims
                .values()
                .filter(|c| **c == ClaimState::Committed)
                .count(),
            commits: state.commits,
            rollbacks: state.rollbacks,
        }
    }

    pub fn records(&self) -> Vec<NewRecord> {
        self.shared.lock().records.clone()
    }

    pub fn workouts(&self) -> Vec<NewWorkout> {
        self.shared.lock().workouts.clone()
    }

    pub fn statistics(&self) -> Vec<NewStatistic> {
        self.shared.lock().statistics.clone()
    }
}

#[async_trait]
impl ImportStore for MemoryImportStore {
    async fn begin(&self) -> Result<Box<dyn ImportSession>, StoreError> {
        Ok(Box::new(MemorySession {
            shared: self.shared.clone(),
            claimed: None,
            records: Vec::new(),
            workouts: Vec::new(),
            statistics: Vec::new(),
            #[cfg(test)]
            inserts: 0,
        }))
    }
}

pub struct MemorySession {
    shared: Arc<Shared>,
    claimed: Option<String>,
    records: Vec<NewRecord>,
    workouts: Vec<NewWorkout>,
    statistics: Vec<NewStatistic>,
    #[cfg(test)]
    inserts: usize,
}

impl MemorySession {
    #[cfg(not(test))]
    fn check_write(&mut self) -> Result<(), StoreError> {
        Ok(())
    }

    #[cfg(test)]
    fn check_write(&mut self) -> Result<(), StoreError> {
        let fail_after = self.shared.lock().fail_after;
        if fail_after.is_some_and(|limit| self.inserts >= limit) {
            return Err(StoreError::Rejected(format!(
                "insert {} rejected by store",
                self.inserts + 1
            )));
        }
        self.inserts += 1;
        Ok(())
    }
}

#[async_trait]
impl ImportSession for MemorySession {
    async fn claim(&mut self, claim: &ImportClaim) -> Result<bool, StoreError> {
        let key = claim.key.as_str().to_string();

        loop {
            let released = {
                let mut state = self.shared.lock();
                match state.claims.get(&key).copied() {
                    None => {
                        state.claims.insert(key.clone(), ClaimState::InFlight);
                        self.claimed = Some(key);
                        return Ok(true);
                    },
                    Some(ClaimState::Committed) => return Ok(false),
                    // Registered before the lock is released so a concurrent
                    // release cannot be missed.
                    Some(ClaimState::InFlight) => self.shared.released.notified(),
                }
            };
            released.await;
        }
    }

    async fn insert_record(&mut self, record: &NewRecord) -> Result<(), StoreError> {
        self.check_write()?;
        self.records.push(record.clone());
        Ok(())
    }

    async fn insert_workout(&mut self, workout: &NewWorkout) -> Result<(), StoreError> {
        self.check_write()?;
        self.workouts.push(workout.clone());
        Ok(())
    }

    async fn insert_statistic(&mut self, statistic: &NewStatistic) -> Result<(), StoreError> {
        self.check_write()?;
        self.statistics.push(statistic.clone());
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> Result<(), StoreError> {
        {
            let mut state = self.shared.lock();
            state.records.append(&mut self.records);
            state.workouts.append(&mut self.workouts);
            state.statistics.append(&mut self.statistics);
            state.commits += 1;
        }
        if let Some(key) = self.claimed.take() {
            self.shared.release(&key, true);
        }
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<(), StoreError> {
        self.shared.lock().rollbacks += 1;
        if let Some(key) = self.claimed.take() {
            self.shared.release(&key, false);
        }
        Ok(())
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        if let Some(key) = self.claimed.take() {
            self.shared.release(&key, false);
        }
    }
}
