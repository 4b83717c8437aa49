//! Block-volume lifecycle orchestration for Hetzner Cloud.
//!
//! The controller side creates, deletes, attaches and detaches provider
//! volumes while keeping an in-memory registry and per-node attachment
//! counts consistent under concurrent requests. The node side formats,
//! stages and bind-mounts attached devices on the host.

pub mod capacity;
pub mod config;
pub mod controller;
pub mod error;
pub mod hcloud;
pub mod lock;
pub mod node;
pub mod provider;
pub mod registry;
pub mod retry;
pub mod test_support;
pub mod volume;
pub mod wait;

pub use capacity::NodeCapacityTracker;
pub use config::{ConfigError, DriverConfig, PluginInfo};
pub use controller::{
    CapabilityValidation, CapacitySummary, ControllerCapability, ControllerOrchestrator,
    ControllerSettings, PublishVolumeRequest, PublishedVolume, VolumePage,
};
pub use error::{DriverError, ErrorCode};
pub use hcloud::HcloudClient;
pub use lock::{KeyedLocks, LockKey};
pub use node::{
    CommandMounter, CommandOutput, CommandRunner, MountError, MountExecutor, NodeCapability,
    NodeIdentity, NodeInfo, NodeOrchestrator, NodePublishRequest, ProcessCommandRunner,
    StageVolumeRequest,
};
pub use provider::{
    CloudStorageClient, CreateVolumeSpec, OperationHandle, OperationStatus, ProviderError,
    ProviderVolume, VolumeCreation,
};
pub use registry::VolumeRegistry;
pub use retry::RetryPolicy;
pub use volume::{
    AccessMode, AccessType, Attachment, CreateVolumeRequest, Volume, VolumeCapability,
    VolumeStatus,
};
pub use wait::OperationWaiter;
