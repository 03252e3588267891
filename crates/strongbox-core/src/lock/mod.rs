//! Per-resource shared/exclusive locking.
//!
//! Every resource key maps to a fair `tokio::sync::RwLock`. Slots are
//! created on first use and removed again once no holder or waiter
//! references them, so the table only grows with live contention.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

use crate::error::{Result, StoreError};
use crate::types::ResourceKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockMode {
    Shared,
    Exclusive,
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockMode::Shared => write!(f, "shared"),
            LockMode::Exclusive => write!(f, "exclusive"),
        }
    }
}

type Slot = Arc<RwLock<()>>;

#[derive(Default)]
struct LockTable {
    slots: Mutex<HashMap<ResourceKey, Slot>>,
}

impl LockTable {
    fn slot(&self, key: &ResourceKey) -> Slot {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.entry(key.clone()).or_default().clone()
    }

    /// Drop the slot if the table holds the last reference to it.
    fn reap(&self, key: &ResourceKey) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        if slots
            .get(key)
            .is_some_and(|slot| Arc::strong_count(slot) == 1)
        {
            slots.remove(key);
        }
    }

    fn len(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

enum Guard {
    Shared(#[allow(dead_code)] OwnedRwLockReadGuard<()>),
    Exclusive(#[allow(dead_code)] OwnedRwLockWriteGuard<()>),
}

/// Grants shared/exclusive access per resource key.
#[derive(Clone, Default)]
pub struct LockManager {
    table: Arc<LockTable>,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait up to `timeout` for `mode` access to `key`.
    ///
    /// On timeout nothing is held and `StoreError::LockTimeout` is returned.
    pub async fn acquire(
        &self,
        key: &ResourceKey,
        mode: LockMode,
        holder: &str,
        timeout: Duration,
    ) -> Result<LockHandle> {
        let started = Instant::now();
        let slot = self.table.slot(key);

        let guard = match mode {
            LockMode::Shared => tokio::time::timeout(timeout, slot.read_owned())
                .await
                .map(Guard::Shared),
            LockMode::Exclusive => tokio::time::timeout(timeout, slot.write_owned())
                .await
                .map(Guard::Exclusive),
        };

        match guard {
            Ok(guard) => {
                tracing::debug!(resource = %key, %mode, holder, "lock acquired");
                Ok(LockHandle {
                    key: key.clone(),
                    mode,
                    holder: holder.to_string(),
                    acquired_at: Utc::now(),
                    guard: Some(guard),
                    table: self.table.clone(),
                })
            }
            Err(_) => {
                self.table.reap(key);
                let waited_ms = started.elapsed().as_millis() as u64;
                tracing::debug!(resource = %key, %mode, holder, waited_ms, "lock timed out");
                Err(StoreError::LockTimeout {
                    resource: key.to_string(),
                    mode,
                    waited_ms,
                })
            }
        }
    }

    /// Acquire several locks under one deadline, in `ResourceKey` order.
    ///
    /// Duplicate keys collapse to the strongest requested mode. If any
    /// acquisition times out, the locks taken so far are released.
    pub async fn acquire_all(
        &self,
        requests: impl IntoIterator<Item = (ResourceKey, LockMode)>,
        holder: &str,
        timeout: Duration,
    ) -> Result<LockSet> {
        let mut wanted: Vec<(ResourceKey, LockMode)> = Vec::new();
        for (key, mode) in requests {
            match wanted.iter_mut().find(|(k, _)| *k == key) {
                Some(existing) => existing.1 = existing.1.max(mode),
                None => wanted.push((key, mode)),
            }
        }
        wanted.sort_by(|a, b| a.0.cmp(&b.0));

        let deadline = Instant::now() + timeout;
        let mut handles = Vec::with_capacity(wanted.len());
        for (key, mode) in wanted {
            let remaining = deadline.saturating_duration_since(Instant::now());
            // Dropping `handles` on the error path releases what was taken.
            handles.push(self.acquire(&key, mode, holder, remaining).await?);
        }
        Ok(LockSet { handles })
    }

    /// Number of resource keys currently held or waited on.
    pub fn active_keys(&self) -> usize {
        self.table.len()
    }
}

/// Proof of a granted lock. Released on drop or by [`LockHandle::release`].
pub struct LockHandle {
    key: ResourceKey,
    mode: LockMode,
    holder: String,
    acquired_at: DateTime<Utc>,
    guard: Option<Guard>,
    table: Arc<LockTable>,
}

impl LockHandle {
    pub fn key(&self) -> &ResourceKey {
        &self.key
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }

    pub fn holder(&self) -> &str {
        &self.holder
    }

    pub fn acquired_at(&self) -> DateTime<Utc> {
        self.acquired_at
    }

    /// Release explicitly. Consumes the handle, so it can happen only once.
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if let Some(guard) = self.guard.take() {
            drop(guard);
            self.table.reap(&self.key);
            tracing::debug!(resource = %self.key, mode = %self.mode, holder = %self.holder, "lock released");
        }
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        self.release_inner();
    }
}

impl fmt::Debug for LockHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockHandle")
            .field("key", &self.key)
            .field("mode", &self.mode)
            .field("holder", &self.holder)
            .field("acquired_at", &self.acquired_at)
            .finish()
    }
}

/// Locks taken together by [`LockManager::acquire_all`], released together.
#[derive(Debug)]
pub struct LockSet {
    handles: Vec<LockHandle>,
}

impl LockSet {
    pub fn handles(&self) -> &[LockHandle] {
        &self.handles
    }

    pub fn release(self) {
        // Reverse acquisition order.
        for handle in self.handles.into_iter().rev() {
            handle.release();
        }
    }
}
