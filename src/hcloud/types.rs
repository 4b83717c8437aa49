//! Wire types for the Hetzner Cloud volumes and actions API.

use serde::{Deserialize, Serialize};

use crate::provider::{OperationHandle, OperationStatus, ProviderVolume};

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub(super) struct ApiLocation {
    pub(super) name: String,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub(super) struct ApiVolume {
    pub(super) id: u64,
    pub(super) name: String,
    pub(super) size: u32,
    pub(super) location: ApiLocation,
    #[serde(default)]
    pub(super) server: Option<u64>,
    #[serde(default)]
    pub(super) linux_device: Option<String>,
}

impl From<ApiVolume> for ProviderVolume {
    fn from(value: ApiVolume) -> Self {
        let linux_device = value
            .linux_device
            .filter(|device| !device.is_empty())
            .unwrap_or_else(|| format!("/dev/disk/by-id/scsi-0HC_Volume_{}", value.id));
        Self {
            id: value.id.to_string(),
            name: value.name,
            size_gb: value.size,
            location: value.location.name,
            server_id: value.server.map(|server| server.to_string()),
            linux_device,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub(super) struct ApiActionError {
    pub(super) code: String,
    pub(super) message: String,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub(super) struct ApiAction {
    pub(super) id: u64,
    pub(super) status: String,
    #[serde(default)]
    pub(super) error: Option<ApiActionError>,
}

impl ApiAction {
    pub(super) fn handle(&self) -> OperationHandle {
        OperationHandle::new(self.id.to_string())
    }

    pub(super) fn operation_status(&self) -> OperationStatus {
        match self.status.as_str() {
            "success" => OperationStatus::Succeeded,
            "error" => OperationStatus::Failed {
                message: self.error.as_ref().map_or_else(
                    || String::from("action failed without details"),
                    |err| format!("{}: {}", err.code, err.message),
                ),
            },
            _ => OperationStatus::Running,
        }
    }
}

/// Request body for `POST /volumes`.
#[derive(Clone, Debug, Serialize)]
pub(super) struct CreateVolumeBody<'a> {
    pub(super) name: &'a str,
    pub(super) size: u32,
    pub(super) location: &'a str,
}

/// Request body for `POST /volumes/{id}/actions/attach`.
#[derive(Clone, Debug, Serialize)]
pub(super) struct AttachVolumeBody {
    pub(super) server: u64,
    pub(super) automount: bool,
}

#[derive(Clone, Debug, Deserialize)]
pub(super) struct CreateVolumeResponse {
    pub(super) volume: ApiVolume,
    #[serde(default)]
    pub(super) action: Option<ApiAction>,
}

#[derive(Clone, Debug, Deserialize)]
pub(super) struct ActionResponse {
    pub(super) action: ApiAction,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub(super) struct ApiPagination {
    #[serde(default)]
    pub(super) next_page: Option<u32>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub(super) struct ApiMeta {
    #[serde(default)]
    pub(super) pagination: ApiPagination,
}

#[derive(Clone, Debug, Deserialize)]
pub(super) struct VolumeListResponse {
    pub(super) volumes: Vec<ApiVolume>,
    #[serde(default)]
    pub(super) meta: ApiMeta,
}

#[derive(Clone, Debug, Deserialize)]
pub(super) struct ApiErrorBody {
    pub(super) code: String,
    pub(super) message: String,
}

#[derive(Clone, Debug, Deserialize)]
pub(super) struct ApiErrorEnvelope {
    pub(super) error: ApiErrorBody,
}
