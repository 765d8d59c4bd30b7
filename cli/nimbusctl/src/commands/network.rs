//! Network commands.
//!
//! Availability is gated on the catalog probe: deployments without a
//! network service reject these commands up front instead of failing on a
//! missing endpoint mid-request.

use anyhow::Result;
use clap::{Args, Subcommand};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tabled::Tabled;

use crate::error::CliError;
use crate::output::{print_output, print_single, print_success, OutputFormat};
use crate::resolve::{delete_resources, find_resource, ResourceKind};

use super::CommandContext;

pub const NETWORK: ResourceKind = ResourceKind {
    singular: "network",
    plural: "networks",
    path: "/networks",
};

/// Network commands.
#[derive(Debug, Args)]
pub struct NetworkCommand {
    #[command(subcommand)]
    command: NetworkSubcommand,
}

#[derive(Debug, Subcommand)]
enum NetworkSubcommand {
    /// List networks.
    List,

    /// Show network details.
    Show(ShowNetworkArgs),

    /// Create a network.
    Create(CreateNetworkArgs),

    /// Delete one or more networks (name or ID).
    Delete(DeleteNetworkArgs),
}

#[derive(Debug, Args)]
struct ShowNetworkArgs {
    /// Network name or ID.
    network: String,
}

#[derive(Debug, Args)]
struct CreateNetworkArgs {
    /// Network name.
    name: String,

    /// Share the network across projects.
    #[arg(long)]
    shared: bool,
}

#[derive(Debug, Args)]
struct DeleteNetworkArgs {
    /// Network names or IDs.
    #[arg(required = true)]
    networks: Vec<String>,
}

impl NetworkCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        if !ctx.registry.session().is_network_service_enabled().await? {
            return Err(
                CliError::Command("Network service is not enabled in this deployment".into())
                    .into(),
            );
        }

        match self.command {
            NetworkSubcommand::List => list_networks(ctx).await,
            NetworkSubcommand::Show(args) => show_network(ctx, args).await,
            NetworkSubcommand::Create(args) => create_network(ctx, args).await,
            NetworkSubcommand::Delete(args) => delete_networks(ctx, args).await,
        }
    }
}

/// Network response from the network API.
#[derive(Debug, Clone, Serialize, Deserialize, Tabled)]
struct NetworkResponse {
    #[tabled(rename = "ID")]
    id: String,

    #[tabled(rename = "Name")]
    name: String,

    #[tabled(rename = "Shared")]
    #[serde(default)]
    shared: bool,
}

#[derive(Debug, Deserialize)]
struct ListNetworksResponse {
    networks: Vec<NetworkResponse>,
}

#[derive(Debug, Deserialize)]
struct NetworkEnvelope {
    network: NetworkResponse,
}

async fn list_networks(ctx: CommandContext) -> Result<()> {
    let client = ctx.registry.network()?;

    let response: ListNetworksResponse = client.get(NETWORK.path).await?;

    print_output(&response.networks, ctx.format);
    Ok(())
}

async fn show_network(ctx: CommandContext, args: ShowNetworkArgs) -> Result<()> {
    let client = ctx.registry.network()?;

    let network: Value = find_resource(&client, &NETWORK, &args.network, &[]).await?;

    print_single(&network, ctx.format);
    Ok(())
}

async fn create_network(ctx: CommandContext, args: CreateNetworkArgs) -> Result<()> {
    let client = ctx.registry.network()?;

    let request = json!({
        "network": {
            "name": args.name,
            "shared": args.shared,
        }
    });
    let response: NetworkEnvelope = client.post(NETWORK.path, &request).await?;

    match ctx.format {
        OutputFormat::Json => print_single(&response.network, ctx.format),
        OutputFormat::Table => {
            print_success(&format!(
                "Created network '{}' ({})",
                response.network.name, response.network.id
            ));
        }
    }
    Ok(())
}

async fn delete_networks(ctx: CommandContext, args: DeleteNetworkArgs) -> Result<()> {
    let client = ctx.registry.network()?;

    delete_resources(&client, &NETWORK, &args.networks).await?;

    if let OutputFormat::Table = ctx.format {
        print_success(&format!("Deleted {} network(s)", args.networks.len()));
    }
    Ok(())
}
