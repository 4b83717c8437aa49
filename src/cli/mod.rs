//! Command-line interface definitions for the `hcsi` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::{Args, Parser};

/// Top-level CLI for the `hcsi` binary.
#[derive(Debug, Parser)]
#[command(
    name = "hcsi",
    about = "Manage Hetzner Cloud block volumes for container workloads",
    version,
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Create a volume, or return the existing volume with the same name.
    #[command(name = "create")]
    Create(CreateCommand),
    /// Delete a detached volume.
    #[command(name = "delete")]
    Delete(VolumeArg),
    /// Attach a volume to a server.
    #[command(name = "attach")]
    Attach(AttachCommand),
    /// Detach a volume from a server.
    #[command(name = "detach")]
    Detach(DetachCommand),
    /// List volumes, one page at a time.
    #[command(name = "list")]
    List(ListCommand),
    /// Summarise provisioned volumes.
    #[command(name = "capacity")]
    Capacity(CapacityCommand),
    /// Format if needed and mount a device at a staging path on this node.
    #[command(name = "stage")]
    Stage(StageCommand),
    /// Unmount a staging path on this node.
    #[command(name = "unstage")]
    Unstage(PathCommand),
    /// Bind-mount a staged volume at a workload path on this node.
    #[command(name = "publish")]
    Publish(PublishCommand),
    /// Unmount and remove a workload path on this node.
    #[command(name = "unpublish")]
    Unpublish(PathCommand),
    /// Print this node's identity, ceiling and topology.
    #[command(name = "node-info")]
    NodeInfo,
    /// Print the plugin name and version.
    #[command(name = "plugin-info")]
    PluginInfo,
}

/// Volume identifier argument.
#[derive(Debug, Args)]
pub(crate) struct VolumeArg {
    /// Provider volume identifier.
    #[arg(value_name = "VOLUME_ID")]
    pub(crate) volume_id: String,
}

/// Arguments for `hcsi create`.
#[derive(Debug, Args)]
pub(crate) struct CreateCommand {
    /// Volume name; repeated creates with the same name are idempotent.
    #[arg(long, value_name = "NAME")]
    pub(crate) name: String,
    /// Size in gigabytes; raised to the configured minimum.
    #[arg(long, value_name = "GB")]
    pub(crate) size_gb: Option<u32>,
    /// Location to create the volume in; defaults to the node location.
    #[arg(long, value_name = "LOCATION")]
    pub(crate) location: Option<String>,
}

/// Arguments for `hcsi attach`.
#[derive(Debug, Args)]
pub(crate) struct AttachCommand {
    /// Provider volume identifier.
    #[arg(value_name = "VOLUME_ID")]
    pub(crate) volume_id: String,
    /// Server identifier to attach to.
    #[arg(long, value_name = "NODE_ID")]
    pub(crate) node: String,
    /// Request read-only access.
    #[arg(long)]
    pub(crate) readonly: bool,
    /// Request raw block access instead of a filesystem.
    #[arg(long)]
    pub(crate) block: bool,
}

/// Arguments for `hcsi detach`.
#[derive(Debug, Args)]
pub(crate) struct DetachCommand {
    /// Provider volume identifier.
    #[arg(value_name = "VOLUME_ID")]
    pub(crate) volume_id: String,
    /// Server identifier to detach from.
    #[arg(long, value_name = "NODE_ID")]
    pub(crate) node: String,
}

/// Arguments for `hcsi list`.
#[derive(Debug, Args)]
pub(crate) struct ListCommand {
    /// Maximum number of entries to print.
    #[arg(long, value_name = "N")]
    pub(crate) max_entries: Option<usize>,
    /// Token returned by a previous page.
    #[arg(long, value_name = "TOKEN")]
    pub(crate) starting_token: Option<String>,
}

/// Arguments for `hcsi capacity`.
#[derive(Debug, Args)]
pub(crate) struct CapacityCommand {
    /// Only count volumes in this location.
    #[arg(long, value_name = "LOCATION")]
    pub(crate) location: Option<String>,
}

/// Arguments for `hcsi stage`.
#[derive(Debug, Args)]
pub(crate) struct StageCommand {
    /// Provider volume identifier.
    #[arg(value_name = "VOLUME_ID")]
    pub(crate) volume_id: String,
    /// Device path reported by `attach`.
    #[arg(long, value_name = "DEVICE")]
    pub(crate) device: String,
    /// Node-global staging directory.
    #[arg(long, value_name = "PATH")]
    pub(crate) staging_path: String,
    /// Filesystem to create on a blank device.
    #[arg(long, value_name = "FS")]
    pub(crate) fs_type: Option<String>,
    /// Extra mount option; may be repeated.
    #[arg(long = "mount-flag", value_name = "FLAG")]
    pub(crate) mount_flags: Vec<String>,
}

/// Arguments for `hcsi publish`.
#[derive(Debug, Args)]
pub(crate) struct PublishCommand {
    /// Provider volume identifier.
    #[arg(value_name = "VOLUME_ID")]
    pub(crate) volume_id: String,
    /// Workload target path.
    #[arg(long, value_name = "PATH")]
    pub(crate) target_path: String,
    /// Staging directory holding the mounted filesystem.
    #[arg(long, value_name = "PATH", required_unless_present = "block")]
    pub(crate) staging_path: Option<String>,
    /// Device path; required for raw block volumes.
    #[arg(long, value_name = "DEVICE", required_if_eq("block", "true"))]
    pub(crate) device: Option<String>,
    /// Publish the raw block device instead of a filesystem.
    #[arg(long)]
    pub(crate) block: bool,
    /// Publish read-only.
    #[arg(long)]
    pub(crate) readonly: bool,
}

/// Arguments for `hcsi unstage` and `hcsi unpublish`.
#[derive(Debug, Args)]
pub(crate) struct PathCommand {
    /// Provider volume identifier.
    #[arg(value_name = "VOLUME_ID")]
    pub(crate) volume_id: String,
    /// Mount path to release.
    #[arg(long, value_name = "PATH")]
    pub(crate) path: String,
}
