//! Per-key mutual exclusion for lifecycle requests.
//!
//! Requests touching the same volume, node, name or mount path serialise in
//! arrival order; requests on distinct keys never block each other. Guards
//! release on drop, so every exit path (including a cancelled future)
//! frees the key.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::time::timeout;
use tracing::debug;

use crate::error::DriverError;

type LockTable = Mutex<HashMap<String, Arc<AsyncMutex<()>>>>;

/// Namespaced lock key.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LockKey<'a> {
    /// A volume identifier.
    Volume(&'a str),
    /// A node identifier.
    Node(&'a str),
    /// A volume name, used to serialise creates.
    Name(&'a str),
    /// A host mount path.
    Path(&'a str),
}

impl fmt::Display for LockKey<'_> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Volume(id) => write!(formatter, "volume/{id}"),
            Self::Node(id) => write!(formatter, "node/{id}"),
            Self::Name(name) => write!(formatter, "name/{name}"),
            Self::Path(path) => write!(formatter, "path/{path}"),
        }
    }
}

/// Grants exclusive access per key.
#[derive(Clone, Debug)]
pub struct KeyedLocks {
    table: Arc<LockTable>,
    wait_bound: Duration,
}

/// Scoped ownership of one key.
#[derive(Debug)]
pub struct KeyGuard {
    key: String,
    table: Arc<LockTable>,
    entry: Arc<AsyncMutex<()>>,
    _held: OwnedMutexGuard<()>,
}

/// A volume guard together with the guards of the nodes it binds to.
#[derive(Debug)]
pub struct AttachmentGuard {
    _volume: KeyGuard,
    _nodes: Vec<KeyGuard>,
}

impl KeyedLocks {
    /// Creates a lock manager whose waiters give up after `wait_bound`.
    #[must_use]
    pub fn new(wait_bound: Duration) -> Self {
        Self {
            table: Arc::new(Mutex::new(HashMap::new())),
            wait_bound,
        }
    }

    /// Waits for exclusive ownership of `key`.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::LockTimeout`] when the key stays held for
    /// longer than the configured bound.
    pub async fn acquire(&self, key: LockKey<'_>) -> Result<KeyGuard, DriverError> {
        let name = key.to_string();
        let entry = {
            let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(table.entry(name.clone()).or_default())
        };

        let started = Instant::now();
        let held = timeout(self.wait_bound, Arc::clone(&entry).lock_owned())
            .await
            .map_err(|_| DriverError::LockTimeout {
                key: name.clone(),
                waited_ms: started.elapsed().as_millis(),
            })?;

        debug!(key = %name, "lock acquired");
        Ok(KeyGuard {
            key: name,
            table: Arc::clone(&self.table),
            entry,
            _held: held,
        })
    }

    /// Acquires the volume key and then the node key. Every caller holding
    /// volume and node keys goes through here or [`Self::add_nodes`], so a
    /// node key is never taken before its volume key.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::LockTimeout`] when either key stays contended.
    pub async fn acquire_attachment(
        &self,
        volume_id: &str,
        node_id: &str,
    ) -> Result<AttachmentGuard, DriverError> {
        let volume = self.acquire(LockKey::Volume(volume_id)).await?;
        self.add_nodes(volume, &[node_id]).await
    }

    /// Takes node keys on top of a held volume key, in sorted order and
    /// without duplicates.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::LockTimeout`] when a node key stays contended;
    /// keys taken so far are released.
    pub async fn add_nodes(
        &self,
        volume: KeyGuard,
        node_ids: &[&str],
    ) -> Result<AttachmentGuard, DriverError> {
        let mut ordered = node_ids.to_vec();
        ordered.sort_unstable();
        ordered.dedup();
        let mut nodes = Vec::with_capacity(ordered.len());
        for node_id in ordered {
            nodes.push(self.acquire(LockKey::Node(node_id)).await?);
        }
        Ok(AttachmentGuard {
            _volume: volume,
            _nodes: nodes,
        })
    }

    /// Number of keys currently tracked (held or awaited).
    #[must_use]
    pub fn tracked_keys(&self) -> usize {
        self.table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl KeyGuard {
    /// Rendered key held by this guard.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        // table + this guard's entry + the owned guard; anything more is a waiter.
        if Arc::strong_count(&self.entry) <= 3 {
            table.remove(&self.key);
        }
    }
}
