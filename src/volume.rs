//! Volume data model and request types.

use serde::Serialize;

use crate::error::DriverError;
use crate::provider::ProviderVolume;

/// Lifecycle position of a registered volume.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeStatus {
    /// Provider create job still running.
    Creating,
    /// Ready and detached.
    Available,
    /// Provider attach job running; the node slot is already reserved.
    Attaching,
    /// Attached to exactly one node.
    Attached,
    /// Provider detach job running.
    Detaching,
    /// Provider delete running.
    Deleting,
}

impl VolumeStatus {
    /// Lower-case name used in logs and errors.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Creating => "creating",
            Self::Available => "available",
            Self::Attaching => "attaching",
            Self::Attached => "attached",
            Self::Detaching => "detaching",
            Self::Deleting => "deleting",
        }
    }
}

/// Binding between one volume and one node.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct Attachment {
    /// Node holding the volume.
    pub node_id: String,
    /// Device path assigned by the provider.
    pub device_path: String,
}

/// Volume as tracked by the registry.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct Volume {
    /// Provider identifier; immutable.
    pub id: String,
    /// Display name; unique across the registry.
    pub name: String,
    /// Size in whole gigabytes; immutable.
    pub size_gb: u32,
    /// Location label; immutable.
    pub location: String,
    /// Current lifecycle status.
    pub status: VolumeStatus,
    /// Device path the provider exposes once attached.
    pub device_path: String,
    /// Node binding, present while attaching or attached.
    pub attachment: Option<Attachment>,
}

impl Volume {
    /// Builds a registry record from a provider volume.
    #[must_use]
    pub fn from_provider(volume: ProviderVolume, status: VolumeStatus) -> Self {
        let attachment = volume.server_id.map(|node_id| Attachment {
            node_id,
            device_path: volume.linux_device.clone(),
        });
        Self {
            id: volume.id,
            name: volume.name,
            size_gb: volume.size_gb,
            location: volume.location,
            status,
            device_path: volume.linux_device,
            attachment,
        }
    }

    /// Returns a copy of the record in another status.
    #[must_use]
    pub fn with_status(&self, status: VolumeStatus) -> Self {
        Self {
            status,
            ..self.clone()
        }
    }

    /// Returns the node the volume is bound to, if any.
    #[must_use]
    pub fn attached_node(&self) -> Option<&str> {
        self.attachment.as_ref().map(|att| att.node_id.as_str())
    }
}

/// Access modes a workload may request.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub enum AccessMode {
    /// Read-write on one node.
    SingleNodeWriter,
    /// Read-only on one node.
    SingleNodeReaderOnly,
    /// Read-only on many nodes.
    MultiNodeReaderOnly,
    /// One writer among many nodes.
    MultiNodeSingleWriter,
    /// Many writers on many nodes.
    MultiNodeMultiWriter,
}

impl AccessMode {
    /// Whether the mode can be served by a single-writer attachment.
    #[must_use]
    pub const fn is_single_node(self) -> bool {
        matches!(self, Self::SingleNodeWriter | Self::SingleNodeReaderOnly)
    }
}

/// How the volume is presented to a workload.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub enum AccessType {
    /// Formatted filesystem mounted at a directory.
    Mount {
        /// Filesystem to create when the device is blank.
        fs_type: Option<String>,
        /// Extra mount options.
        mount_flags: Vec<String>,
    },
    /// Raw block device bind-mounted at a file.
    Block,
}

/// Capability requested for a volume.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct VolumeCapability {
    /// Requested access mode.
    pub access_mode: AccessMode,
    /// Requested presentation.
    pub access_type: AccessType,
}

impl VolumeCapability {
    /// Single-node-writer filesystem mount with default options.
    #[must_use]
    pub const fn single_writer_mount() -> Self {
        Self {
            access_mode: AccessMode::SingleNodeWriter,
            access_type: AccessType::Mount {
                fs_type: None,
                mount_flags: Vec::new(),
            },
        }
    }

    /// Single-node-writer raw block access.
    #[must_use]
    pub const fn single_writer_block() -> Self {
        Self {
            access_mode: AccessMode::SingleNodeWriter,
            access_type: AccessType::Block,
        }
    }
}

/// Rejects any capability that would need more than one node.
pub(crate) fn require_single_node(capabilities: &[VolumeCapability]) -> Result<(), DriverError> {
    if let Some(capability) = capabilities
        .iter()
        .find(|cap| !cap.access_mode.is_single_node())
    {
        return Err(DriverError::invalid(format!(
            "access mode {:?} is not supported; volumes attach to a single node",
            capability.access_mode
        )));
    }
    Ok(())
}

/// Parameters of a create request.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CreateVolumeRequest {
    /// Name used for idempotency.
    pub name: String,
    /// Requested size in gigabytes; the configured default when absent.
    pub size_gb: Option<u32>,
    /// Requested location; the node location when absent.
    pub location: Option<String>,
    /// Capabilities the volume must support.
    pub capabilities: Vec<VolumeCapability>,
}

impl CreateVolumeRequest {
    /// Creates a request for a single-writer filesystem volume, trimming the
    /// name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into().trim().to_owned(),
            size_gb: None,
            location: None,
            capabilities: vec![VolumeCapability::single_writer_mount()],
        }
    }

    /// Sets the requested size.
    #[must_use]
    pub const fn size_gb(mut self, value: Option<u32>) -> Self {
        self.size_gb = value;
        self
    }

    /// Sets the requested location.
    #[must_use]
    pub fn location(mut self, value: Option<String>) -> Self {
        self.location = value.map(|loc| loc.trim().to_owned());
        self
    }

    /// Replaces the requested capabilities.
    #[must_use]
    pub fn capabilities(mut self, value: Vec<VolumeCapability>) -> Self {
        self.capabilities = value;
        self
    }
}

/// Raises sizes below `min_gb` to the minimum and substitutes `default_gb`
/// when no size was requested.
#[must_use]
pub const fn normalise_size_gb(requested: Option<u32>, min_gb: u32, default_gb: u32) -> u32 {
    match requested {
        None => default_gb,
        Some(size) if size < min_gb => min_gb,
        Some(size) => size,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(None, 10)]
    #[case(Some(1), 10)]
    #[case(Some(10), 10)]
    #[case(Some(11), 11)]
    #[case(Some(500), 500)]
    fn sizes_are_normalised(#[case] requested: Option<u32>, #[case] expected: u32) {
        assert_eq!(normalise_size_gb(requested, 10, 10), expected);
    }

    #[test]
    fn multi_writer_capability_is_rejected() {
        let caps = vec![
            VolumeCapability::single_writer_mount(),
            VolumeCapability {
                access_mode: AccessMode::MultiNodeMultiWriter,
                access_type: AccessType::Block,
            },
        ];
        let err = require_single_node(&caps).expect_err("multi writer");
        assert!(err.to_string().contains("MultiNodeMultiWriter"));
    }

    #[test]
    fn provider_volume_with_server_becomes_attachment() {
        let volume = Volume::from_provider(
            ProviderVolume {
                id: String::from("7"),
                name: String::from("data"),
                size_gb: 10,
                location: String::from("fsn1"),
                server_id: Some(String::from("42")),
                linux_device: String::from("/dev/disk/by-id/scsi-0HC_Volume_7"),
            },
            VolumeStatus::Attached,
        );
        assert_eq!(volume.attached_node(), Some("42"));
        assert_eq!(
            volume.attachment.map(|att| att.device_path),
            Some(String::from("/dev/disk/by-id/scsi-0HC_Volume_7"))
        );
    }

    #[test]
    fn request_builder_trims_fields() {
        let request = CreateVolumeRequest::new("  data ").location(Some(String::from(" nbg1 ")));
        assert_eq!(request.name, "data");
        assert_eq!(request.location.as_deref(), Some("nbg1"));
    }
}
