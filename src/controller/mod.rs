//! Controller-side volume lifecycle orchestration.
//!
//! The orchestrator owns the registry, the node capacity tracker and the
//! keyed locks. Mutating operations take their locks in the caller's task
//! and then run to completion in a spawned task that owns the guards, so a
//! caller that goes away never leaves a provider job half-recorded.

mod attach;
mod lifecycle;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info};

use crate::capacity::NodeCapacityTracker;
use crate::config::{ConfigError, DriverConfig};
use crate::error::{DriverError, require_field};
use crate::lock::{KeyedLocks, LockKey};
use crate::provider::CloudStorageClient;
use crate::registry::VolumeRegistry;
use crate::retry::{RetryPolicy, retry_transient};
use crate::volume::{Volume, VolumeCapability, VolumeStatus, require_single_node};
use crate::wait::OperationWaiter;

pub use attach::{PublishVolumeRequest, PublishedVolume};

/// Tunables of the controller.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ControllerSettings {
    /// Smallest size handed to the provider.
    pub min_volume_size_gb: u32,
    /// Size used when a request names none.
    pub default_volume_size_gb: u32,
    /// Location used when a request names none.
    pub default_location: Option<String>,
    /// Per-node attachment ceiling.
    pub max_volumes_per_node: usize,
    /// Interval between job polls.
    pub poll_interval: Duration,
    /// Bound on a single job wait.
    pub wait_timeout: Duration,
    /// Bound on waiting for a lock.
    pub lock_timeout: Duration,
    /// Retry budget for provider calls.
    pub retry: RetryPolicy,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self::from(&DriverConfig::default())
    }
}

impl From<&DriverConfig> for ControllerSettings {
    fn from(config: &DriverConfig) -> Self {
        Self {
            min_volume_size_gb: config.min_volume_size_gb,
            default_volume_size_gb: config.default_volume_size_gb,
            default_location: config.node_location().ok().map(str::to_owned),
            max_volumes_per_node: config.max_volumes_per_node,
            poll_interval: config.poll_interval(),
            wait_timeout: config.wait_timeout(),
            lock_timeout: config.lock_timeout(),
            retry: RetryPolicy::with_max_attempts(config.retry_attempts),
        }
    }
}

/// Optional controller capabilities.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub enum ControllerCapability {
    /// `create_volume` and `delete_volume`.
    CreateDeleteVolume,
    /// `publish_volume` and `unpublish_volume`.
    PublishUnpublishVolume,
    /// `list_volumes`.
    ListVolumes,
    /// `list_volumes` reports the publishing node.
    ListVolumesPublishedNodes,
    /// `get_capacity`.
    GetCapacity,
}

/// Outcome of a capability check.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct CapabilityValidation {
    /// Whether every capability can be served.
    pub confirmed: bool,
    /// Reason for a refusal.
    pub message: Option<String>,
}

/// One page of `list_volumes`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct VolumePage {
    /// Volumes on this page, ordered by identifier.
    pub entries: Vec<Volume>,
    /// Token for the following page, absent on the last one.
    pub next_token: Option<String>,
}

/// Provisioning summary answered by `get_capacity`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct CapacitySummary {
    /// Remaining provider quota; the provider does not expose one.
    pub available_capacity_gb: Option<u64>,
    /// Volumes counted by the query.
    pub volume_count: usize,
    /// Sum of their sizes.
    pub provisioned_gb: u64,
}

pub(crate) struct ControllerCore<C> {
    client: C,
    registry: VolumeRegistry,
    capacity: NodeCapacityTracker,
    locks: KeyedLocks,
    waiter: OperationWaiter,
    settings: ControllerSettings,
}

/// Coordinates volume lifecycle calls against a [`CloudStorageClient`].
pub struct ControllerOrchestrator<C> {
    core: Arc<ControllerCore<C>>,
}

impl<C> Clone for ControllerOrchestrator<C> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

/// Runs `operation` on its own task so it completes even when the caller's
/// future is dropped. Lock guards moved into `operation` release when it
/// finishes.
async fn run_detached<T, F>(operation: F) -> Result<T, DriverError>
where
    T: Send + 'static,
    F: Future<Output = Result<T, DriverError>> + Send + 'static,
{
    match tokio::spawn(operation).await {
        Ok(result) => result,
        Err(err) => Err(DriverError::Internal {
            message: format!("lifecycle task did not complete: {err}"),
        }),
    }
}

impl<C: CloudStorageClient + 'static> ControllerOrchestrator<C> {
    /// Creates an orchestrator with an empty registry.
    #[must_use]
    pub fn new(client: C, settings: ControllerSettings) -> Self {
        let waiter = OperationWaiter::new(
            settings.poll_interval,
            settings.wait_timeout,
            settings.retry.clone(),
        );
        Self {
            core: Arc::new(ControllerCore {
                client,
                registry: VolumeRegistry::new(),
                capacity: NodeCapacityTracker::new(settings.max_volumes_per_node),
                locks: KeyedLocks::new(settings.lock_timeout),
                waiter,
                settings,
            }),
        }
    }

    /// Creates an orchestrator from validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when validation fails.
    pub fn from_config(client: C, config: &DriverConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::new(client, ControllerSettings::from(config)))
    }

    /// Provider client in use.
    #[must_use]
    pub fn client(&self) -> &C {
        &self.core.client
    }

    /// Registry of known volumes.
    #[must_use]
    pub fn registry(&self) -> &VolumeRegistry {
        &self.core.registry
    }

    /// Per-node attachment accounting.
    #[must_use]
    pub fn capacity(&self) -> &NodeCapacityTracker {
        &self.core.capacity
    }

    /// Records the location of a node so attachments across locations are
    /// refused.
    pub fn register_node(&self, node_id: &str, location: &str) {
        self.core.capacity.register_node(node_id, location);
    }

    /// Optional capabilities this controller implements.
    #[must_use]
    pub fn capabilities() -> Vec<ControllerCapability> {
        vec![
            ControllerCapability::CreateDeleteVolume,
            ControllerCapability::PublishUnpublishVolume,
            ControllerCapability::ListVolumes,
            ControllerCapability::ListVolumesPublishedNodes,
            ControllerCapability::GetCapacity,
        ]
    }

    /// Confirms whether the capabilities can be served by `volume_id`.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::InvalidArgument`] for a blank id or an empty
    /// capability list and [`DriverError::VolumeNotFound`] for unknown
    /// volumes.
    pub fn validate_volume_capabilities(
        &self,
        volume_id: &str,
        capabilities: &[VolumeCapability],
    ) -> Result<CapabilityValidation, DriverError> {
        require_field(volume_id, "volume_id")?;
        if capabilities.is_empty() {
            return Err(DriverError::invalid("volume_capabilities must not be empty"));
        }
        self.core.registry.get(volume_id)?;
        Ok(match require_single_node(capabilities) {
            Ok(()) => CapabilityValidation {
                confirmed: true,
                message: None,
            },
            Err(err) => CapabilityValidation {
                confirmed: false,
                message: Some(err.to_string()),
            },
        })
    }

    /// Returns a page of volumes ordered by identifier.
    ///
    /// The token is the offset of the first entry. `max_entries` of `None`
    /// or zero returns everything after the token.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::InvalidToken`] when the token is not an offset
    /// within the registry.
    pub fn list_volumes(
        &self,
        max_entries: Option<usize>,
        starting_token: Option<&str>,
    ) -> Result<VolumePage, DriverError> {
        let volumes = self.core.registry.list();
        let total = volumes.len();
        let start = match starting_token.map(str::trim).filter(|token| !token.is_empty()) {
            None => 0,
            Some(token) => token
                .parse::<usize>()
                .ok()
                .filter(|offset| *offset <= total)
                .ok_or_else(|| DriverError::InvalidToken {
                    token: token.to_owned(),
                })?,
        };
        let limit = max_entries.filter(|max| *max > 0).unwrap_or(total);
        let entries: Vec<Volume> = volumes.into_iter().skip(start).take(limit).collect();
        let next = start + entries.len();
        Ok(VolumePage {
            entries,
            next_token: (next < total).then(|| next.to_string()),
        })
    }

    /// Summarises provisioned volumes, optionally restricted to a location.
    #[must_use]
    pub fn get_capacity(&self, location: Option<&str>) -> CapacitySummary {
        let wanted = location.map(str::trim).filter(|loc| !loc.is_empty());
        let volumes: Vec<Volume> = self
            .core
            .registry
            .list()
            .into_iter()
            .filter(|volume| wanted.is_none_or(|loc| volume.location == loc))
            .collect();
        CapacitySummary {
            available_capacity_gb: None,
            volume_count: volumes.len(),
            provisioned_gb: volumes.iter().map(|volume| u64::from(volume.size_gb)).sum(),
        }
    }

    /// Rebuilds the registry and attachment counts from the provider.
    /// Returns the number of volumes recorded.
    ///
    /// # Errors
    ///
    /// Returns the provider error when listing fails after retries, and
    /// [`DriverError::NodeAtCapacity`] when the provider reports more
    /// attachments on a node than the ceiling allows.
    pub async fn hydrate(&self) -> Result<usize, DriverError> {
        let core = &self.core;
        let remote = retry_transient(&core.settings.retry, "list_volumes", || {
            core.client.list_volumes()
        })
        .await?;
        let count = remote.len();

        for provider_volume in remote {
            let status = if provider_volume.server_id.is_some() {
                VolumeStatus::Attached
            } else {
                VolumeStatus::Available
            };
            let volume = Volume::from_provider(provider_volume, status);
            let volume_guard = core.locks.acquire(LockKey::Volume(&volume.id)).await?;
            let previous_node = core
                .registry
                .find(&volume.id)
                .and_then(|previous| previous.attached_node().map(str::to_owned));
            let nodes: Vec<&str> = previous_node
                .as_deref()
                .into_iter()
                .chain(volume.attached_node())
                .collect();
            let _guard = core.locks.add_nodes(volume_guard, &nodes).await?;
            core.record_hydrated(volume)?;
        }

        info!(volumes = count, "registry hydrated from provider");
        Ok(count)
    }
}

impl<C: CloudStorageClient> ControllerCore<C> {
    /// Replaces the record for `volume` and moves its capacity slot to the
    /// node the provider reports. Callers hold the volume key and the keys of
    /// both the previous and the reported node.
    fn record_hydrated(&self, volume: Volume) -> Result<(), DriverError> {
        let limit = self.capacity.limit();
        self.registry.with_volumes(|volumes| {
            self.capacity.with_table(|table| {
                if let Some(previous) = volumes.get(&volume.id)
                    && let Some(node_id) = previous.attached_node()
                    && Some(node_id) != volume.attached_node()
                {
                    table.release(node_id, &volume.id);
                }
                if let Some(node_id) = volume.attached_node() {
                    table.reserve(limit, node_id, &volume.id)?;
                    table.set_location(node_id, &volume.location);
                }
                debug!(volume_id = %volume.id, status = ?volume.status, "hydrated volume");
                volumes.insert(volume.id.clone(), volume);
                Ok(())
            })
        })
    }

    fn retry_policy(&self) -> &RetryPolicy {
        self.waiter.retry_policy()
    }
}
