//! Volume creation and deletion.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::{DriverError, require_field};
use crate::lock::LockKey;
use crate::provider::{CloudStorageClient, CreateVolumeSpec, ProviderError};
use crate::retry::retry_transient;
use crate::volume::{
    CreateVolumeRequest, Volume, VolumeStatus, normalise_size_gb, require_single_node,
};

use super::{ControllerCore, ControllerOrchestrator, run_detached};

impl<C: CloudStorageClient + 'static> ControllerOrchestrator<C> {
    /// Creates a volume, or returns the existing one when a volume with the
    /// same name, size and location is already registered.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::InvalidArgument`] for a blank name, a
    /// multi-node capability or an unresolvable location,
    /// [`DriverError::AlreadyExists`] when the name is taken with other
    /// parameters, and provider or timeout errors from the create job.
    pub async fn create_volume(&self, request: &CreateVolumeRequest) -> Result<Volume, DriverError> {
        let name = request.name.trim();
        require_field(name, "name")?;
        require_single_node(&request.capabilities)?;
        let settings = &self.core.settings;
        let size_gb = normalise_size_gb(
            request.size_gb,
            settings.min_volume_size_gb,
            settings.default_volume_size_gb,
        );
        let location = request
            .location
            .as_deref()
            .map(str::trim)
            .filter(|loc| !loc.is_empty())
            .or(settings.default_location.as_deref())
            .ok_or_else(|| {
                DriverError::invalid("location is required when no node location is configured")
            })?
            .to_owned();

        let guard = self.core.locks.acquire(LockKey::Name(name)).await?;
        let core = Arc::clone(&self.core);
        let spec = CreateVolumeSpec {
            name: name.to_owned(),
            size_gb,
            location,
        };
        run_detached(async move {
            let _guard = guard;
            core.create_locked(spec).await
        })
        .await
    }

    /// Deletes a detached volume. Deleting an unknown volume succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::VolumeAttached`] while the volume is bound to
    /// a node, and provider errors from the delete call.
    pub async fn delete_volume(&self, volume_id: &str) -> Result<(), DriverError> {
        require_field(volume_id, "volume_id")?;
        let Some(known) = self.core.registry.find(volume_id) else {
            debug!(volume_id, "volume already absent");
            return Ok(());
        };

        let name_guard = self.core.locks.acquire(LockKey::Name(&known.name)).await?;
        let volume_guard = self.core.locks.acquire(LockKey::Volume(volume_id)).await?;
        let core = Arc::clone(&self.core);
        let id = volume_id.to_owned();
        run_detached(async move {
            let _guards = (name_guard, volume_guard);
            core.delete_locked(&id).await
        })
        .await
    }
}

impl<C: CloudStorageClient> ControllerCore<C> {
    async fn create_locked(&self, spec: CreateVolumeSpec) -> Result<Volume, DriverError> {
        if let Some(existing) = self.registry.find_by_name(&spec.name) {
            if existing.size_gb == spec.size_gb && existing.location == spec.location {
                debug!(volume_id = %existing.id, name = %spec.name, "volume already exists");
                return Ok(existing);
            }
            return Err(DriverError::AlreadyExists {
                name: spec.name,
                existing_size_gb: existing.size_gb,
                existing_location: existing.location,
            });
        }

        let creation = retry_transient(self.retry_policy(), "create_volume", || {
            self.client.create_volume(&spec)
        })
        .await?;
        let creating = Volume::from_provider(creation.volume, VolumeStatus::Creating);
        self.registry.put(creating.clone());

        if let Some(operation) = creation.operation
            && let Err(err) = self
                .waiter
                .await_completion(&self.client, &operation, "create", &creating.id)
                .await
        {
            self.registry.delete(&creating.id);
            match self.delete_remote(&creating.id).await {
                Ok(()) => warn!(
                    volume_id = %creating.id,
                    error = %err,
                    "volume create failed; provider volume removed"
                ),
                Err(teardown) => warn!(
                    volume_id = %creating.id,
                    error = %err,
                    teardown_error = %teardown,
                    "volume create failed; provider volume may remain"
                ),
            }
            return Err(err);
        }

        let available = creating.with_status(VolumeStatus::Available);
        self.registry.put(available.clone());
        info!(
            volume_id = %available.id,
            name = %available.name,
            size_gb = available.size_gb,
            location = %available.location,
            "volume created"
        );
        Ok(available)
    }

    async fn delete_locked(&self, volume_id: &str) -> Result<(), DriverError> {
        let Some(volume) = self.registry.find(volume_id) else {
            debug!(volume_id, "volume removed while waiting for lock");
            return Ok(());
        };
        if let Some(node_id) = volume.attached_node() {
            return Err(DriverError::VolumeAttached {
                volume_id: volume.id.clone(),
                node_id: node_id.to_owned(),
            });
        }

        self.registry.put(volume.with_status(VolumeStatus::Deleting));
        match self.delete_remote(volume_id).await {
            Ok(()) => {
                self.registry.delete(volume_id);
                info!(volume_id, name = %volume.name, "volume deleted");
                Ok(())
            }
            Err(err) => {
                warn!(volume_id, error = %err, "volume delete failed");
                self.registry.put(volume);
                Err(err)
            }
        }
    }

    /// Deletes the provider volume; an already missing volume counts as
    /// deleted.
    async fn delete_remote(&self, volume_id: &str) -> Result<(), DriverError> {
        match retry_transient(self.retry_policy(), "delete_volume", || {
            self.client.delete_volume(volume_id)
        })
        .await
        {
            Ok(Some(operation)) => {
                self.waiter
                    .await_completion(&self.client, &operation, "delete", volume_id)
                    .await
            }
            Ok(None) | Err(ProviderError::NotFound { .. }) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
