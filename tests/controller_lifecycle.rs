//! Behavioural tests for the controller volume lifecycle.

#[path = "common/controller_harness.rs"]
mod controller_harness;

use hcsi::test_support::{FakeCall, FakeCloud};
use hcsi::{
    ControllerOrchestrator, CreateVolumeRequest, DriverError, ErrorCode, OperationStatus,
    ProviderError, ProviderVolume, VolumeStatus,
};
use rstest::*;

use controller_harness::{LOCATION, controller_with, create_named, publish_request};

#[fixture]
fn controller() -> ControllerOrchestrator<FakeCloud> {
    controller_with(FakeCloud::new(), 16)
}

#[rstest]
#[case::below_minimum(Some(1), 10)]
#[case::zero(Some(0), 10)]
#[case::unspecified(None, 10)]
#[case::at_minimum(Some(10), 10)]
#[case::above_minimum(Some(250), 250)]
#[tokio::test]
async fn create_normalises_requested_size(
    controller: ControllerOrchestrator<FakeCloud>,
    #[case] requested: Option<u32>,
    #[case] expected: u32,
) {
    let volume = controller
        .create_volume(&CreateVolumeRequest::new("sized").size_gb(requested))
        .await
        .unwrap_or_else(|err| panic!("create: {err}"));

    assert_eq!(volume.size_gb, expected);
    let remote = controller
        .client()
        .volume(&volume.id)
        .unwrap_or_else(|| panic!("provider should hold volume {}", volume.id));
    assert_eq!(remote.size_gb, expected);
}

#[rstest]
#[tokio::test]
async fn concurrent_creates_with_one_name_share_a_single_volume(
    controller: ControllerOrchestrator<FakeCloud>,
) {
    let mut handles = Vec::new();
    for _ in 0..8 {
        let worker = controller.clone();
        handles.push(tokio::spawn(async move {
            worker
                .create_volume(&CreateVolumeRequest::new("shared").size_gb(Some(20)))
                .await
        }));
    }

    let mut ids = Vec::new();
    for handle in handles {
        let volume = handle
            .await
            .unwrap_or_else(|err| panic!("join: {err}"))
            .unwrap_or_else(|err| panic!("create: {err}"));
        ids.push(volume.id);
    }

    ids.dedup();
    assert_eq!(ids.len(), 1, "every caller should see the same volume");
    assert_eq!(controller.client().calls(FakeCall::Create), 1);
    assert_eq!(controller.registry().len(), 1);
}

#[rstest]
#[tokio::test]
async fn delete_requires_detach_first(controller: ControllerOrchestrator<FakeCloud>) {
    let volume = create_named(&controller, "pgdata").await;
    let published = controller
        .publish_volume(&publish_request(&volume.id, "42"))
        .await
        .unwrap_or_else(|err| panic!("publish: {err}"));
    assert_eq!(published.device_path, volume.device_path);

    let err = controller
        .delete_volume(&volume.id)
        .await
        .expect_err("attached volume must not be deleted");
    assert_eq!(err.code(), ErrorCode::FailedPrecondition);
    assert_eq!(controller.client().calls(FakeCall::Delete), 0);

    controller
        .unpublish_volume(&volume.id, "42")
        .await
        .unwrap_or_else(|err| panic!("unpublish: {err}"));
    controller
        .delete_volume(&volume.id)
        .await
        .unwrap_or_else(|err| panic!("delete: {err}"));

    let missing = controller
        .publish_volume(&publish_request(&volume.id, "42"))
        .await
        .expect_err("deleted volume should be unknown");
    assert_eq!(missing.code(), ErrorCode::NotFound);
    assert_eq!(controller.client().volume_count(), 0);
    assert_eq!(controller.capacity().attached_count("42"), 0);
}

#[rstest]
#[tokio::test]
async fn attach_elsewhere_fails_without_provider_call(
    controller: ControllerOrchestrator<FakeCloud>,
) {
    let volume = create_named(&controller, "logs").await;
    controller
        .publish_volume(&publish_request(&volume.id, "1"))
        .await
        .unwrap_or_else(|err| panic!("publish: {err}"));

    let err = controller
        .publish_volume(&publish_request(&volume.id, "2"))
        .await
        .expect_err("second node must be refused");

    assert_eq!(
        err,
        DriverError::VolumeAttached {
            volume_id: volume.id.clone(),
            node_id: String::from("1"),
        }
    );
    assert_eq!(controller.client().calls(FakeCall::Attach), 1);
    assert_eq!(controller.capacity().attached_count("2"), 0);
}

#[rstest]
#[tokio::test]
async fn detach_of_unattached_volume_skips_provider(controller: ControllerOrchestrator<FakeCloud>) {
    let volume = create_named(&controller, "idle").await;

    controller
        .unpublish_volume(&volume.id, "7")
        .await
        .unwrap_or_else(|err| panic!("first unpublish: {err}"));
    controller
        .unpublish_volume(&volume.id, "7")
        .await
        .unwrap_or_else(|err| panic!("second unpublish: {err}"));
    controller
        .unpublish_volume("does-not-exist", "7")
        .await
        .unwrap_or_else(|err| panic!("unknown unpublish: {err}"));

    assert_eq!(controller.client().calls(FakeCall::Detach), 0);
}

#[rstest]
#[tokio::test]
async fn failed_attach_job_leaves_volume_unchanged(controller: ControllerOrchestrator<FakeCloud>) {
    let volume = create_named(&controller, "flaky").await;
    controller.client().script_operations(vec![
        OperationStatus::Running,
        OperationStatus::Failed {
            message: String::from("server_locked: server is busy"),
        },
    ]);

    let err = controller
        .publish_volume(&publish_request(&volume.id, "9"))
        .await
        .expect_err("failed job should surface");
    assert_eq!(err.code(), ErrorCode::Internal);

    let recorded = controller
        .registry()
        .get(&volume.id)
        .unwrap_or_else(|err| panic!("registry: {err}"));
    assert_eq!(recorded, volume);
    assert_eq!(controller.capacity().attached_count("9"), 0);

    controller.client().script_operations(vec![OperationStatus::Succeeded]);
    let published = controller
        .publish_volume(&publish_request(&volume.id, "9"))
        .await
        .unwrap_or_else(|err| panic!("retry publish: {err}"));
    assert_eq!(published.device_path, volume.device_path);
}

#[rstest]
#[tokio::test]
async fn transient_provider_errors_are_retried(controller: ControllerOrchestrator<FakeCloud>) {
    controller.client().fail_next(
        FakeCall::Create,
        ProviderError::RateLimited {
            message: String::from("slow down"),
        },
    );
    controller.client().fail_next(
        FakeCall::Create,
        ProviderError::Unavailable {
            message: String::from("502 bad gateway"),
        },
    );

    let volume = create_named(&controller, "patient").await;

    assert_eq!(volume.status, VolumeStatus::Available);
    assert_eq!(controller.client().calls(FakeCall::Create), 3);
}

#[rstest]
#[tokio::test]
async fn hydrated_attachments_count_against_the_ceiling() {
    let cloud = FakeCloud::new();
    for id in 1..=2 {
        cloud.seed_volume(ProviderVolume {
            id: id.to_string(),
            name: format!("seeded-{id}"),
            size_gb: 10,
            location: String::from(LOCATION),
            server_id: Some(String::from("5")),
            linux_device: format!("/dev/disk/by-id/scsi-0HC_Volume_{id}"),
        });
    }
    let controller = controller_with(cloud, 2);

    let count = controller
        .hydrate()
        .await
        .unwrap_or_else(|err| panic!("hydrate: {err}"));
    assert_eq!(count, 2);

    let volume = create_named(&controller, "third").await;
    let err = controller
        .publish_volume(&publish_request(&volume.id, "5"))
        .await
        .expect_err("node already full");
    assert_eq!(err.code(), ErrorCode::ResourceExhausted);
    assert_eq!(controller.client().calls(FakeCall::Attach), 0);
}
