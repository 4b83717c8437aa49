//! Controller builders shared by the integration tests.
//!
//! Included with `#[path = "common/controller_harness.rs"] mod controller_harness;`
//! so no extra test binary is produced.

use std::time::Duration;

use hcsi::test_support::FakeCloud;
use hcsi::{
    ControllerOrchestrator, ControllerSettings, CreateVolumeRequest, PublishVolumeRequest,
    RetryPolicy, Volume, VolumeCapability,
};

/// Location every harness volume and node lives in.
pub const LOCATION: &str = "fsn1";

/// Settings with millisecond polling and retry delays.
pub fn fast_settings(max_volumes_per_node: usize) -> ControllerSettings {
    ControllerSettings {
        min_volume_size_gb: 10,
        default_volume_size_gb: 10,
        default_location: Some(String::from(LOCATION)),
        max_volumes_per_node,
        poll_interval: Duration::from_millis(1),
        wait_timeout: Duration::from_secs(5),
        lock_timeout: Duration::from_secs(10),
        retry: RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
        },
    }
}

/// Controller over `cloud` with the given per-node ceiling.
pub fn controller_with(
    cloud: FakeCloud,
    max_volumes_per_node: usize,
) -> ControllerOrchestrator<FakeCloud> {
    ControllerOrchestrator::new(cloud, fast_settings(max_volumes_per_node))
}

/// Single-writer mount publish of `volume_id` to `node_id`.
pub fn publish_request(volume_id: &str, node_id: &str) -> PublishVolumeRequest {
    PublishVolumeRequest {
        volume_id: volume_id.to_owned(),
        node_id: node_id.to_owned(),
        capability: VolumeCapability::single_writer_mount(),
    }
}

/// Creates a volume with defaults, panicking on failure.
pub async fn create_named(controller: &ControllerOrchestrator<FakeCloud>, name: &str) -> Volume {
    controller
        .create_volume(&CreateVolumeRequest::new(name))
        .await
        .unwrap_or_else(|err| panic!("create {name}: {err}"))
}
