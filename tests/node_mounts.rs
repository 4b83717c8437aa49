//! Node-side staging and publishing driven through the host mount helpers.

use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use hcsi::test_support::{RecordingMounter, ScriptedRunner};
use hcsi::{
    CommandMounter, ErrorCode, MountExecutor, NodeIdentity, NodeOrchestrator, NodePublishRequest,
    StageVolumeRequest, VolumeCapability,
};
use rstest::*;
use tempfile::TempDir;

const DEVICE: &str = "/dev/disk/by-id/scsi-0HC_Volume_1001";

fn identity() -> NodeIdentity {
    NodeIdentity {
        node_id: String::from("4711"),
        location: String::from("nbg1"),
        max_volumes_per_node: 16,
        topology_key: String::from("csi.hetzner.cloud/location"),
    }
}

fn node<M: MountExecutor + 'static>(mounter: M) -> NodeOrchestrator<M> {
    NodeOrchestrator::new(mounter, identity(), "ext4", Duration::from_secs(5))
}

struct Workspace {
    _dir: TempDir,
    root: Utf8PathBuf,
}

impl Workspace {
    fn path(&self, relative: &str) -> Utf8PathBuf {
        self.root.join(relative)
    }
}

#[fixture]
fn workspace() -> Workspace {
    let dir = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf())
        .unwrap_or_else(|path| panic!("temp dir should be utf8: {}", path.display()));
    Workspace { _dir: dir, root }
}

fn commands(runner: &ScriptedRunner) -> Vec<String> {
    runner
        .invocations()
        .iter()
        .map(hcsi::test_support::CommandInvocation::command_string)
        .collect()
}

fn mount_publish(staging: &Utf8Path, target: &Utf8Path) -> NodePublishRequest {
    NodePublishRequest {
        volume_id: String::from("1001"),
        device_path: String::from(DEVICE),
        staging_path: staging.to_path_buf(),
        target_path: target.to_path_buf(),
        capability: VolumeCapability::single_writer_mount(),
        readonly: false,
    }
}

#[rstest]
#[tokio::test]
async fn blank_volume_is_formatted_staged_and_published(workspace: Workspace) {
    let runner = ScriptedRunner::new();
    let orchestrator = node(CommandMounter::new(runner.clone()));
    let staging = workspace.path("staging/1001");
    let target = workspace.path("pods/web/volume");

    // stage: findmnt, blkid (blank), mkfs, mount
    runner.push_exit_code(1);
    runner.push_exit_code(2);
    runner.push_success();
    runner.push_success();
    orchestrator
        .stage_volume(&StageVolumeRequest {
            volume_id: String::from("1001"),
            device_path: String::from(DEVICE),
            staging_path: staging.clone(),
            capability: VolumeCapability::single_writer_mount(),
        })
        .await
        .unwrap_or_else(|err| panic!("stage: {err}"));
    assert!(staging.is_dir(), "staging directory should be created");

    // publish: findmnt, bind mount
    runner.push_exit_code(1);
    runner.push_success();
    orchestrator
        .publish_volume(&mount_publish(&staging, &target))
        .await
        .unwrap_or_else(|err| panic!("publish: {err}"));
    assert!(target.is_dir(), "target directory should be created");

    // unpublish: findmnt (mounted), umount
    runner.push_exit_code(0);
    runner.push_success();
    orchestrator
        .unpublish_volume("1001", &target)
        .await
        .unwrap_or_else(|err| panic!("unpublish: {err}"));
    assert!(!target.exists(), "target should be removed");

    // unstage: findmnt (mounted), umount
    runner.push_exit_code(0);
    runner.push_success();
    orchestrator
        .unstage_volume("1001", &staging)
        .await
        .unwrap_or_else(|err| panic!("unstage: {err}"));

    let findmnt = |path: &Utf8Path| {
        format!("findmnt --noheadings --output TARGET --mountpoint {path}")
    };
    assert_eq!(
        commands(&runner),
        vec![
            findmnt(&staging),
            format!("blkid -p -s TYPE -o value {DEVICE}"),
            format!("mkfs.ext4 -F -m0 {DEVICE}"),
            format!("mount -t ext4 {DEVICE} {staging}"),
            findmnt(&target),
            format!("mount --bind {staging} {target}"),
            findmnt(&target),
            format!("umount {target}"),
            findmnt(&staging),
            format!("umount {staging}"),
        ]
    );
}

#[rstest]
#[tokio::test]
async fn restaging_a_mounted_path_runs_no_mount(workspace: Workspace) {
    let runner = ScriptedRunner::new();
    let orchestrator = node(CommandMounter::new(runner.clone()));
    let staging = workspace.path("staging/1001");

    runner.push_exit_code(0);
    orchestrator
        .stage_volume(&StageVolumeRequest {
            volume_id: String::from("1001"),
            device_path: String::from(DEVICE),
            staging_path: staging.clone(),
            capability: VolumeCapability::single_writer_mount(),
        })
        .await
        .unwrap_or_else(|err| panic!("stage: {err}"));

    assert_eq!(commands(&runner).len(), 1);
}

#[rstest]
#[tokio::test]
async fn failed_mkfs_surfaces_as_internal(workspace: Workspace) {
    let runner = ScriptedRunner::new();
    let orchestrator = node(CommandMounter::new(runner.clone()));

    runner.push_exit_code(1);
    runner.push_exit_code(2);
    runner.push_failure(1);
    let err = orchestrator
        .stage_volume(&StageVolumeRequest {
            volume_id: String::from("1001"),
            device_path: String::from(DEVICE),
            staging_path: workspace.path("staging/1001"),
            capability: VolumeCapability::single_writer_mount(),
        })
        .await
        .expect_err("mkfs failure should surface");

    assert_eq!(err.code(), ErrorCode::Internal);
    assert!(
        err.to_string().contains("simulated failure"),
        "stderr should be reported: {err}"
    );
}

#[rstest]
#[tokio::test]
async fn raw_block_volume_is_published_as_a_device_file(workspace: Workspace) {
    let mounter = RecordingMounter::new();
    let orchestrator = node(mounter.clone());
    let target = workspace.path("pods/db/dev/block");
    let request = NodePublishRequest {
        capability: VolumeCapability::single_writer_block(),
        readonly: true,
        ..mount_publish(Utf8Path::new(""), &target)
    };

    orchestrator
        .publish_volume(&request)
        .await
        .unwrap_or_else(|err| panic!("publish: {err}"));
    assert!(target.is_file(), "block target should be a file");
    assert_eq!(mounter.source_of(&target).as_deref(), Some(DEVICE));

    orchestrator
        .unpublish_volume("1001", &target)
        .await
        .unwrap_or_else(|err| panic!("unpublish: {err}"));
    assert!(!target.exists(), "block target should be removed");
    assert_eq!(
        mounter.calls(),
        vec![
            format!("bind_mount {DEVICE} {target} ro"),
            format!("unmount {target}"),
        ]
    );
}

#[rstest]
#[tokio::test]
async fn unpublish_of_missing_target_succeeds(workspace: Workspace) {
    let mounter = RecordingMounter::new();
    let orchestrator = node(mounter.clone());

    orchestrator
        .unpublish_volume("1001", &workspace.path("never/published"))
        .await
        .unwrap_or_else(|err| panic!("unpublish: {err}"));

    assert!(mounter.calls().is_empty());
}

#[test]
fn node_info_advertises_location_topology() {
    let info = node(RecordingMounter::new()).get_info();

    assert_eq!(info.node_id, "4711");
    assert_eq!(info.max_volumes_per_node, 16);
    assert_eq!(
        info.accessible_topology.get("csi.hetzner.cloud/location"),
        Some(&String::from("nbg1"))
    );
}
