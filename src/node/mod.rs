//! Node-side volume operations: staging, publishing and their inverses.
//!
//! Every operation locks the mount path it touches, so concurrent calls for
//! one target serialise while distinct targets proceed in parallel. All
//! operations are idempotent: repeating a completed call succeeds without
//! touching the host again.

mod command;
mod mount;
mod target;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tokio::task;
use tracing::{debug, info};

use crate::config::{ConfigError, DriverConfig};
use crate::error::{DriverError, require_field};
use crate::lock::{KeyedLocks, LockKey};
use crate::volume::{AccessType, VolumeCapability, require_single_node};

pub use command::{CommandOutput, CommandRunner, ProcessCommandRunner};
pub use mount::{CommandMounter, MountError, MountExecutor};

/// Static facts about the node this process runs on.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NodeIdentity {
    /// Server identifier.
    pub node_id: String,
    /// Location the server runs in.
    pub location: String,
    /// Attachment ceiling advertised to the scheduler.
    pub max_volumes_per_node: usize,
    /// Topology segment key for the location.
    pub topology_key: String,
}

impl NodeIdentity {
    /// Reads the node identity from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when the node id or location is
    /// unset.
    pub fn from_config(config: &DriverConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            node_id: config.node_id()?.to_owned(),
            location: config.node_location()?.to_owned(),
            max_volumes_per_node: config.max_volumes_per_node,
            topology_key: config.topology_key(),
        })
    }
}

/// Answer to a node info query.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct NodeInfo {
    /// Server identifier.
    pub node_id: String,
    /// Attachment ceiling.
    pub max_volumes_per_node: usize,
    /// Topology segments the node can reach.
    pub accessible_topology: BTreeMap<String, String>,
}

/// Optional node capabilities.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub enum NodeCapability {
    /// Volumes are staged once per node before per-workload publishing.
    StageUnstageVolume,
}

/// Parameters of a stage request.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StageVolumeRequest {
    /// Volume identifier.
    pub volume_id: String,
    /// Device path returned by the controller publish.
    pub device_path: String,
    /// Node-global staging directory.
    pub staging_path: Utf8PathBuf,
    /// Requested capability.
    pub capability: VolumeCapability,
}

/// Parameters of a node publish request.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NodePublishRequest {
    /// Volume identifier.
    pub volume_id: String,
    /// Device path returned by the controller publish.
    pub device_path: String,
    /// Staging directory the filesystem is mounted at.
    pub staging_path: Utf8PathBuf,
    /// Workload-specific target path.
    pub target_path: Utf8PathBuf,
    /// Requested capability.
    pub capability: VolumeCapability,
    /// Whether the workload gets a read-only view.
    pub readonly: bool,
}

/// Runs node operations through a [`MountExecutor`].
///
/// Host helpers run on tokio's blocking pool while the path lock is held.
#[derive(Debug)]
pub struct NodeOrchestrator<M: MountExecutor> {
    mounter: Arc<M>,
    identity: NodeIdentity,
    default_fs_type: String,
    locks: KeyedLocks,
}

impl<M: MountExecutor + 'static> NodeOrchestrator<M> {
    /// Creates an orchestrator for the given node.
    #[must_use]
    pub fn new(
        mounter: M,
        identity: NodeIdentity,
        default_fs_type: impl Into<String>,
        lock_timeout: Duration,
    ) -> Self {
        Self {
            mounter: Arc::new(mounter),
            identity,
            default_fs_type: default_fs_type.into(),
            locks: KeyedLocks::new(lock_timeout),
        }
    }

    /// Builds an orchestrator from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the node identity is incomplete.
    pub fn from_config(mounter: M, config: &DriverConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(
            mounter,
            NodeIdentity::from_config(config)?,
            config.default_fs_type.clone(),
            config.lock_timeout(),
        ))
    }

    async fn on_host<T, F>(&self, job: F) -> Result<T, DriverError>
    where
        T: Send + 'static,
        F: FnOnce(&M) -> Result<T, MountError> + Send + 'static,
    {
        let mounter = Arc::clone(&self.mounter);
        let outcome = task::spawn_blocking(move || job(&mounter))
            .await
            .map_err(|err| DriverError::Internal {
                message: format!("host mount task did not complete: {err}"),
            })?;
        outcome.map_err(DriverError::from)
    }

    /// Formats the device if needed and mounts it at the staging path.
    /// Block volumes need no staging.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::InvalidArgument`] for missing fields or
    /// multi-node capabilities, and [`DriverError::Mount`] when the host
    /// operation fails.
    pub async fn stage_volume(&self, request: &StageVolumeRequest) -> Result<(), DriverError> {
        require_field(&request.volume_id, "volume_id")?;
        require_field(request.staging_path.as_str(), "staging_target_path")?;
        require_single_node(std::slice::from_ref(&request.capability))?;
        let AccessType::Mount {
            fs_type,
            mount_flags,
        } = &request.capability.access_type
        else {
            debug!(volume_id = %request.volume_id, "block volume needs no staging");
            return Ok(());
        };
        require_field(&request.device_path, "device_path")?;

        let _guard = self
            .locks
            .acquire(LockKey::Path(request.staging_path.as_str()))
            .await?;
        let filesystem = fs_type
            .as_deref()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or(&self.default_fs_type)
            .to_owned();
        let device = request.device_path.clone();
        let staging = request.staging_path.clone();
        let fs_for_host = filesystem.clone();
        let options = mount_flags.clone();
        let mounted_now = self
            .on_host(move |mounter| {
                if mounter.is_mounted(&staging)? {
                    return Ok(false);
                }
                target::ensure_directory(&staging)?;
                mounter.format_and_mount(&device, &staging, &fs_for_host, &options)?;
                Ok(true)
            })
            .await?;
        if !mounted_now {
            debug!(volume_id = %request.volume_id, path = %request.staging_path, "already staged");
            return Ok(());
        }
        info!(
            volume_id = %request.volume_id,
            device = %request.device_path,
            path = %request.staging_path,
            fs_type = %filesystem,
            "volume staged"
        );
        Ok(())
    }

    /// Unmounts the staging path when mounted.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Mount`] when `umount` fails.
    pub async fn unstage_volume(
        &self,
        volume_id: &str,
        staging_path: &Utf8Path,
    ) -> Result<(), DriverError> {
        require_field(volume_id, "volume_id")?;
        require_field(staging_path.as_str(), "staging_target_path")?;
        let _guard = self.locks.acquire(LockKey::Path(staging_path.as_str())).await?;
        let staging = staging_path.to_path_buf();
        let unmounted = self
            .on_host(move |mounter| {
                if !mounter.is_mounted(&staging)? {
                    return Ok(false);
                }
                mounter.unmount(&staging)?;
                Ok(true)
            })
            .await?;
        if unmounted {
            info!(volume_id, path = %staging_path, "volume unstaged");
        } else {
            debug!(volume_id, path = %staging_path, "not staged");
        }
        Ok(())
    }

    /// Bind-mounts the staged filesystem, or the raw device for block
    /// volumes, at the workload target path.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::InvalidArgument`] for missing fields and
    /// [`DriverError::Mount`] when preparing or mounting the target fails.
    pub async fn publish_volume(&self, request: &NodePublishRequest) -> Result<(), DriverError> {
        require_field(&request.volume_id, "volume_id")?;
        require_field(request.target_path.as_str(), "target_path")?;
        require_single_node(std::slice::from_ref(&request.capability))?;
        let block = matches!(request.capability.access_type, AccessType::Block);
        let source = if block {
            require_field(&request.device_path, "device_path")?;
            Utf8PathBuf::from(request.device_path.as_str())
        } else {
            require_field(request.staging_path.as_str(), "staging_target_path")?;
            request.staging_path.clone()
        };

        let _guard = self
            .locks
            .acquire(LockKey::Path(request.target_path.as_str()))
            .await?;
        let target_path = request.target_path.clone();
        let bind_source = source.clone();
        let readonly = request.readonly;
        let mounted_now = self
            .on_host(move |mounter| {
                if mounter.is_mounted(&target_path)? {
                    return Ok(false);
                }
                if block {
                    target::ensure_file(&target_path)?;
                } else {
                    target::ensure_directory(&target_path)?;
                }
                mounter.bind_mount(&bind_source, &target_path, readonly)?;
                Ok(true)
            })
            .await?;
        if !mounted_now {
            debug!(volume_id = %request.volume_id, path = %request.target_path, "already published");
            return Ok(());
        }
        info!(
            volume_id = %request.volume_id,
            source = %source,
            path = %request.target_path,
            readonly = request.readonly,
            "volume published"
        );
        Ok(())
    }

    /// Unmounts the target path when mounted and removes it.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Mount`] when unmounting or removal fails.
    pub async fn unpublish_volume(
        &self,
        volume_id: &str,
        target_path: &Utf8Path,
    ) -> Result<(), DriverError> {
        require_field(volume_id, "volume_id")?;
        require_field(target_path.as_str(), "target_path")?;
        let _guard = self.locks.acquire(LockKey::Path(target_path.as_str())).await?;
        let path = target_path.to_path_buf();
        self.on_host(move |mounter| {
            if mounter.is_mounted(&path)? {
                mounter.unmount(&path)?;
            }
            target::remove_target(&path)
        })
        .await?;
        info!(volume_id, path = %target_path, "volume unpublished");
        Ok(())
    }

    /// Node identity, attachment ceiling and topology.
    #[must_use]
    pub fn get_info(&self) -> NodeInfo {
        NodeInfo {
            node_id: self.identity.node_id.clone(),
            max_volumes_per_node: self.identity.max_volumes_per_node,
            accessible_topology: BTreeMap::from([(
                self.identity.topology_key.clone(),
                self.identity.location.clone(),
            )]),
        }
    }

    /// Optional capabilities this node implements.
    #[must_use]
    pub fn capabilities() -> Vec<NodeCapability> {
        vec![NodeCapability::StageUnstageVolume]
    }
}
