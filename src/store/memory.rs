//! In-process coordination store
//!
//! Mirrors the Redis semantics closely enough for several nodes in one
//! process to contend on the same lease. Expiry follows the tokio clock, so
//! tests running with a paused clock observe deterministic TTLs.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::{generation_key, CoordinationStore, StoreError, StoreResult};

#[derive(Debug)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    values: HashMap<String, Entry>,
    counters: HashMap<String, u64>,
    lists: HashMap<String, VecDeque<String>>,
}

impl MemoryState {
    fn live_value(&mut self, key: &str) -> Option<&mut Entry> {
        let now = Instant::now();
        if self.values.get(key).is_some_and(|e| !e.is_live(now)) {
            self.values.remove(key);
        }
        self.values.get_mut(key)
    }
}

/// Coordination store held entirely in memory
#[derive(Debug)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    available: AtomicBool,
    calls: AtomicU64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            available: AtomicBool::new(true),
            calls: AtomicU64::new(0),
        }
    }

    /// Simulate an outage: while unavailable every call fails with
    /// [`StoreError::Connection`]
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of store calls made so far (including failed ones)
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Remove a key regardless of holder, as an operator would with `DEL`
    pub async fn force_delete(&self, key: &str) {
        self.state.lock().await.values.remove(key);
    }

    /// Overwrite a key, as if another process had taken it
    pub async fn force_set(&self, key: &str, value: &str, ttl: Duration) {
        self.state.lock().await.values.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
    }

    /// Current length of a list
    pub async fn list_len(&self, list_key: &str) -> usize {
        self.state
            .lock()
            .await
            .lists
            .get(list_key)
            .map_or(0, VecDeque::len)
    }

    fn check(&self) -> StoreResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Connection("memory store marked unavailable".to_string()))
        }
    }
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    async fn acquire(&self, key: &str, holder: &str, ttl: Duration) -> StoreResult<bool> {
        self.check()?;
        let mut state = self.state.lock().await;
        if state.live_value(key).is_some() {
            return Ok(false);
        }
        state.values.insert(
            key.to_string(),
            Entry {
                value: holder.to_string(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(true)
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.check()?;
        let mut state = self.state.lock().await;
        Ok(state.live_value(key).map(|e| e.value.clone()))
    }

    async fn refresh(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        self.check()?;
        let mut state = self.state.lock().await;
        match state.live_value(key) {
            Some(entry) => {
                entry.expires_at = Some(Instant::now() + ttl);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn release(&self, key: &str, holder: &str) -> StoreResult<bool> {
        self.check()?;
        let mut state = self.state.lock().await;
        let owned = state.live_value(key).is_some_and(|e| e.value == holder);
        if owned {
            state.values.remove(key);
        }
        Ok(owned)
    }

    async fn next_generation(&self, key: &str) -> StoreResult<u64> {
        self.check()?;
        let mut state = self.state.lock().await;
        let counter = state.counters.entry(generation_key(key)).or_insert(0);
        *counter += 1;
        Ok(*counter)
    }

    async fn push_batch(&self, list_key: &str, items: &[String]) -> StoreResult<usize> {
        self.check()?;
        let mut state = self.state.lock().await;
        state
            .lists
            .entry(list_key.to_string())
            .or_default()
            .extend(items.iter().cloned());
        Ok(items.len())
    }

    async fn pop_one(&self, list_key: &str) -> StoreResult<Option<String>> {
        self.check()?;
        let mut state = self.state.lock().await;
        Ok(state.lists.get_mut(list_key).and_then(VecDeque::pop_front))
    }

    async fn ping(&self) -> StoreResult<()> {
        self.check()
    }
}
