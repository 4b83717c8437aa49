//! Binary entry point for the `hcsi` CLI.

mod cli;

use std::io::{self, Write};
use std::process;

use camino::Utf8PathBuf;
use clap::Parser;
use serde::Serialize;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use hcsi::{
    AccessMode, AccessType, CommandMounter, ConfigError, ControllerOrchestrator,
    CreateVolumeRequest, DriverConfig, DriverError, HcloudClient, NodeOrchestrator,
    NodePublishRequest, ProcessCommandRunner, PublishVolumeRequest, StageVolumeRequest,
    VolumeCapability,
};

use cli::{
    AttachCommand, CapacityCommand, Cli, CreateCommand, DetachCommand, ListCommand, PathCommand,
    PublishCommand, StageCommand,
};

type HostNode = NodeOrchestrator<CommandMounter<ProcessCommandRunner>>;

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("{}: {0}", .0.code())]
    Driver(#[from] DriverError),
    #[error("failed to write output: {0}")]
    Output(String),
}

/// Printed by commands whose orchestrator call returns nothing.
#[derive(Debug, Serialize)]
struct Outcome<'a> {
    action: &'a str,
    volume_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    node_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    path: Option<&'a str>,
}

#[tokio::main]
async fn main() {
    init_logging();
    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

async fn dispatch(cli: Cli) -> Result<(), CliError> {
    let config = DriverConfig::load_without_cli_args()?;
    config.validate()?;

    match cli {
        Cli::Create(command) => create(&config, command).await,
        Cli::Delete(arg) => {
            controller(&config)
                .await?
                .delete_volume(&arg.volume_id)
                .await?;
            print_json(&Outcome {
                action: "deleted",
                volume_id: &arg.volume_id,
                node_id: None,
                path: None,
            })
        }
        Cli::Attach(command) => attach(&config, command).await,
        Cli::Detach(command) => detach(&config, &command).await,
        Cli::List(command) => list(&config, &command).await,
        Cli::Capacity(command) => capacity(&config, &command).await,
        Cli::Stage(command) => stage(&config, command).await,
        Cli::Unstage(command) => {
            let path = Utf8PathBuf::from(&command.path);
            host_node(&config)?
                .unstage_volume(&command.volume_id, &path)
                .await?;
            print_path_outcome("unstaged", &command)
        }
        Cli::Publish(command) => publish(&config, command).await,
        Cli::Unpublish(command) => {
            let path = Utf8PathBuf::from(&command.path);
            host_node(&config)?
                .unpublish_volume(&command.volume_id, &path)
                .await?;
            print_path_outcome("unpublished", &command)
        }
        Cli::NodeInfo => print_json(&host_node(&config)?.get_info()),
        Cli::PluginInfo => print_json(&config.plugin_info()),
    }
}

async fn controller(config: &DriverConfig) -> Result<ControllerOrchestrator<HcloudClient>, CliError> {
    let client = HcloudClient::from_config(config)?;
    let controller = ControllerOrchestrator::from_config(client, config)?;
    if let (Ok(node_id), Ok(location)) = (config.node_id(), config.node_location()) {
        controller.register_node(node_id, location);
    }
    controller.hydrate().await?;
    Ok(controller)
}

fn host_node(config: &DriverConfig) -> Result<HostNode, CliError> {
    Ok(NodeOrchestrator::from_config(
        CommandMounter::new(ProcessCommandRunner),
        config,
    )?)
}

async fn create(config: &DriverConfig, command: CreateCommand) -> Result<(), CliError> {
    let request = CreateVolumeRequest::new(command.name)
        .size_gb(command.size_gb)
        .location(command.location);
    let volume = controller(config).await?.create_volume(&request).await?;
    print_json(&volume)
}

async fn attach(config: &DriverConfig, command: AttachCommand) -> Result<(), CliError> {
    let request = PublishVolumeRequest {
        capability: capability(command.block, command.readonly),
        volume_id: command.volume_id,
        node_id: command.node,
    };
    let published = controller(config).await?.publish_volume(&request).await?;
    print_json(&published)
}

async fn detach(config: &DriverConfig, command: &DetachCommand) -> Result<(), CliError> {
    controller(config)
        .await?
        .unpublish_volume(&command.volume_id, &command.node)
        .await?;
    print_json(&Outcome {
        action: "detached",
        volume_id: &command.volume_id,
        node_id: Some(&command.node),
        path: None,
    })
}

async fn list(config: &DriverConfig, command: &ListCommand) -> Result<(), CliError> {
    let page = controller(config)
        .await?
        .list_volumes(command.max_entries, command.starting_token.as_deref())?;
    print_json(&page)
}

async fn capacity(config: &DriverConfig, command: &CapacityCommand) -> Result<(), CliError> {
    let summary = controller(config)
        .await?
        .get_capacity(command.location.as_deref());
    print_json(&summary)
}

async fn stage(config: &DriverConfig, command: StageCommand) -> Result<(), CliError> {
    let request = StageVolumeRequest {
        volume_id: command.volume_id,
        device_path: command.device,
        staging_path: Utf8PathBuf::from(command.staging_path),
        capability: VolumeCapability {
            access_mode: AccessMode::SingleNodeWriter,
            access_type: AccessType::Mount {
                fs_type: command.fs_type,
                mount_flags: command.mount_flags,
            },
        },
    };
    host_node(config)?.stage_volume(&request).await?;
    print_json(&Outcome {
        action: "staged",
        volume_id: &request.volume_id,
        node_id: None,
        path: Some(request.staging_path.as_str()),
    })
}

async fn publish(config: &DriverConfig, command: PublishCommand) -> Result<(), CliError> {
    let request = NodePublishRequest {
        volume_id: command.volume_id,
        device_path: command.device.unwrap_or_default(),
        staging_path: command.staging_path.map(Utf8PathBuf::from).unwrap_or_default(),
        target_path: Utf8PathBuf::from(command.target_path),
        capability: capability(command.block, command.readonly),
        readonly: command.readonly,
    };
    host_node(config)?.publish_volume(&request).await?;
    print_json(&Outcome {
        action: "published",
        volume_id: &request.volume_id,
        node_id: None,
        path: Some(request.target_path.as_str()),
    })
}

fn capability(block: bool, readonly: bool) -> VolumeCapability {
    let access_mode = if readonly {
        AccessMode::SingleNodeReaderOnly
    } else {
        AccessMode::SingleNodeWriter
    };
    let access_type = if block {
        AccessType::Block
    } else {
        AccessType::Mount {
            fs_type: None,
            mount_flags: Vec::new(),
        }
    };
    VolumeCapability {
        access_mode,
        access_type,
    }
}

fn print_path_outcome(action: &str, command: &PathCommand) -> Result<(), CliError> {
    print_json(&Outcome {
        action,
        volume_id: &command.volume_id,
        node_id: None,
        path: Some(&command.path),
    })
}

fn print_json<T: Serialize>(value: &T) -> Result<(), CliError> {
    let rendered =
        serde_json::to_string_pretty(value).map_err(|err| CliError::Output(err.to_string()))?;
    writeln!(io::stdout(), "{rendered}").map_err(|err| CliError::Output(err.to_string()))
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn driver_errors_render_with_status_code() {
        let mut buffer = Vec::new();
        write_error(
            &mut buffer,
            &CliError::Driver(DriverError::VolumeNotFound {
                volume_id: String::from("7"),
            }),
        );
        assert_eq!(
            String::from_utf8_lossy(&buffer),
            "NOT_FOUND: volume 7 not found\n"
        );
    }

    #[test]
    fn readonly_block_capability_is_single_node_reader() {
        let cap = capability(true, true);
        assert_eq!(cap.access_mode, AccessMode::SingleNodeReaderOnly);
        assert_eq!(cap.access_type, AccessType::Block);
    }

    #[test]
    fn outcome_omits_absent_fields() {
        let rendered = serde_json::to_string(&Outcome {
            action: "deleted",
            volume_id: "7",
            node_id: None,
            path: None,
        })
        .expect("serialise");
        assert_eq!(rendered, r#"{"action":"deleted","volume_id":"7"}"#);
    }
}
