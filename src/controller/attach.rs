//! Attaching volumes to nodes and detaching them again.
//!
//! The capacity slot is reserved in the same critical section that marks the
//! volume `Attaching`, before the provider is called. Rollback and detach
//! commit release the slot in the same section that rewrites the record.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{DriverError, require_field};
use crate::provider::{CloudStorageClient, ProviderError};
use crate::retry::retry_transient;
use crate::volume::{Attachment, Volume, VolumeCapability, VolumeStatus, require_single_node};

use super::{ControllerCore, ControllerOrchestrator, run_detached};

/// Parameters of a controller publish request.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PublishVolumeRequest {
    /// Volume to attach.
    pub volume_id: String,
    /// Server to attach to.
    pub node_id: String,
    /// Capability the workload needs. Read-only workloads ask for a
    /// reader access mode.
    pub capability: VolumeCapability,
}

/// Publish context handed to the node plugin.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct PublishedVolume {
    /// Device path the volume appears under on the node.
    pub device_path: String,
}

impl<C: CloudStorageClient + 'static> ControllerOrchestrator<C> {
    /// Attaches a volume to a node. Publishing to the node that already
    /// holds the volume returns the existing device path.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::VolumeNotFound`] for unknown volumes,
    /// [`DriverError::VolumeAttached`] when another node holds the volume,
    /// [`DriverError::LocationMismatch`] across locations,
    /// [`DriverError::NodeAtCapacity`] when the node is full, and provider
    /// or timeout errors from the attach job.
    pub async fn publish_volume(
        &self,
        request: &PublishVolumeRequest,
    ) -> Result<PublishedVolume, DriverError> {
        require_field(&request.volume_id, "volume_id")?;
        require_field(&request.node_id, "node_id")?;
        require_single_node(std::slice::from_ref(&request.capability))?;

        let guard = self
            .core
            .locks
            .acquire_attachment(&request.volume_id, &request.node_id)
            .await?;
        let core = Arc::clone(&self.core);
        let volume_id = request.volume_id.clone();
        let node_id = request.node_id.clone();
        run_detached(async move {
            let _guard = guard;
            core.attach_locked(&volume_id, &node_id).await
        })
        .await
    }

    /// Detaches a volume from a node. Unknown volumes and volumes not bound
    /// to `node_id` succeed without a provider call.
    ///
    /// # Errors
    ///
    /// Returns provider or timeout errors from the detach job; the
    /// attachment is kept in that case.
    pub async fn unpublish_volume(&self, volume_id: &str, node_id: &str) -> Result<(), DriverError> {
        require_field(volume_id, "volume_id")?;
        require_field(node_id, "node_id")?;

        let guard = self
            .core
            .locks
            .acquire_attachment(volume_id, node_id)
            .await?;
        let core = Arc::clone(&self.core);
        let volume = volume_id.to_owned();
        let node = node_id.to_owned();
        run_detached(async move {
            let _guard = guard;
            core.detach_locked(&volume, &node).await
        })
        .await
    }
}

impl<C: CloudStorageClient> ControllerCore<C> {
    async fn attach_locked(
        &self,
        volume_id: &str,
        node_id: &str,
    ) -> Result<PublishedVolume, DriverError> {
        let volume = self.registry.get(volume_id)?;
        if let Some(attachment) = &volume.attachment {
            if attachment.node_id == node_id {
                debug!(volume_id, node_id, "volume already attached to node");
                return Ok(PublishedVolume {
                    device_path: attachment.device_path.clone(),
                });
            }
            return Err(DriverError::VolumeAttached {
                volume_id: volume_id.to_owned(),
                node_id: attachment.node_id.clone(),
            });
        }
        if volume.status != VolumeStatus::Available {
            return Err(DriverError::OperationPending {
                volume_id: volume_id.to_owned(),
                status: volume.status.as_str().to_owned(),
            });
        }
        if let Some(node_location) = self.capacity.node_location(node_id)
            && node_location != volume.location
        {
            return Err(DriverError::LocationMismatch {
                volume_id: volume_id.to_owned(),
                volume_location: volume.location.clone(),
                node_id: node_id.to_owned(),
                node_location,
            });
        }

        let attaching = self.reserve_attachment(&volume, node_id)?;
        match self.attach_remote(volume_id, node_id).await {
            Ok(()) => {
                let attached = attaching.with_status(VolumeStatus::Attached);
                self.registry.put(attached.clone());
                info!(
                    volume_id,
                    node_id,
                    device_path = %attached.device_path,
                    attached = self.capacity.attached_count(node_id),
                    "volume attached"
                );
                Ok(PublishedVolume {
                    device_path: attached.device_path,
                })
            }
            Err(err) => {
                self.rollback_attachment(&volume, node_id);
                warn!(volume_id, node_id, error = %err, "volume attach failed");
                Err(err)
            }
        }
    }

    async fn detach_locked(&self, volume_id: &str, node_id: &str) -> Result<(), DriverError> {
        let Some(volume) = self.registry.find(volume_id) else {
            debug!(volume_id, node_id, "unknown volume; nothing to detach");
            return Ok(());
        };
        if volume.attached_node() != Some(node_id) {
            debug!(volume_id, node_id, "volume not attached to node");
            return Ok(());
        }

        self.registry.put(volume.with_status(VolumeStatus::Detaching));
        match self.detach_remote(volume_id).await {
            Ok(()) => {
                self.commit_detach(&volume, node_id);
                info!(volume_id, node_id, "volume detached");
                Ok(())
            }
            Err(err) => {
                self.registry.put(volume);
                warn!(volume_id, node_id, error = %err, "volume detach failed");
                Err(err)
            }
        }
    }

    /// Claims the node slot and records the `Attaching` binding together.
    fn reserve_attachment(&self, volume: &Volume, node_id: &str) -> Result<Volume, DriverError> {
        let limit = self.capacity.limit();
        self.registry.with_volumes(|volumes| {
            self.capacity.with_table(|table| {
                table.reserve(limit, node_id, &volume.id)?;
                let attaching = Volume {
                    status: VolumeStatus::Attaching,
                    attachment: Some(Attachment {
                        node_id: node_id.to_owned(),
                        device_path: volume.device_path.clone(),
                    }),
                    ..volume.clone()
                };
                volumes.insert(volume.id.clone(), attaching.clone());
                Ok(attaching)
            })
        })
    }

    /// Restores the pre-attach record and frees the slot.
    fn rollback_attachment(&self, previous: &Volume, node_id: &str) {
        self.registry.with_volumes(|volumes| {
            self.capacity.with_table(|table| {
                table.release(node_id, &previous.id);
                volumes.insert(previous.id.clone(), previous.clone());
            });
        });
    }

    /// Clears the binding and frees the slot.
    fn commit_detach(&self, attached: &Volume, node_id: &str) {
        self.registry.with_volumes(|volumes| {
            self.capacity.with_table(|table| {
                table.release(node_id, &attached.id);
                volumes.insert(
                    attached.id.clone(),
                    Volume {
                        status: VolumeStatus::Available,
                        attachment: None,
                        ..attached.clone()
                    },
                );
            });
        });
    }

    async fn attach_remote(&self, volume_id: &str, node_id: &str) -> Result<(), DriverError> {
        let operation = retry_transient(self.retry_policy(), "attach_volume", || {
            self.client.attach_volume(volume_id, node_id)
        })
        .await?;
        self.waiter
            .await_completion(&self.client, &operation, "attach", volume_id)
            .await
    }

    /// Detaches on the provider; a volume the provider no longer knows is
    /// treated as detached.
    async fn detach_remote(&self, volume_id: &str) -> Result<(), DriverError> {
        let operation = match retry_transient(self.retry_policy(), "detach_volume", || {
            self.client.detach_volume(volume_id)
        })
        .await
        {
            Ok(operation) => operation,
            Err(ProviderError::NotFound { .. }) => return Ok(()),
            Err(err) => return Err(err.into()),
        };
        self.waiter
            .await_completion(&self.client, &operation, "detach", volume_id)
            .await
    }
}
