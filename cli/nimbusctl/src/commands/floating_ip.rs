//! Floating IP commands.

use anyhow::Result;
use clap::{Args, Subcommand};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tabled::Tabled;

use crate::output::{print_output, print_single, print_success, OutputFormat};
use crate::resolve::{delete_resources, find_resource, ResourceKind};

use super::network::NETWORK;
use super::CommandContext;

pub const FLOATING_IP: ResourceKind = ResourceKind {
    singular: "floating_ip",
    plural: "floating_ips",
    path: "/floating_ips",
};

/// Floating IP commands.
#[derive(Debug, Args)]
pub struct FloatingIpCommand {
    #[command(subcommand)]
    command: FloatingIpSubcommand,
}

#[derive(Debug, Subcommand)]
enum FloatingIpSubcommand {
    /// List floating IPs.
    List,

    /// Allocate a floating IP from a network.
    Create(CreateFloatingIpArgs),

    /// Release one or more floating IPs (IP address or ID).
    Delete(DeleteFloatingIpArgs),
}

#[derive(Debug, Args)]
struct CreateFloatingIpArgs {
    /// External network name or ID to allocate from.
    network: String,
}

#[derive(Debug, Args)]
struct DeleteFloatingIpArgs {
    /// Floating IP addresses or IDs.
    #[arg(required = true)]
    floating_ips: Vec<String>,
}

impl FloatingIpCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        match self.command {
            FloatingIpSubcommand::List => list_floating_ips(ctx).await,
            FloatingIpSubcommand::Create(args) => create_floating_ip(ctx, args).await,
            FloatingIpSubcommand::Delete(args) => delete_floating_ips(ctx, args).await,
        }
    }
}

/// Floating IP response from the network API.
#[derive(Debug, Clone, Serialize, Deserialize, Tabled)]
struct FloatingIpResponse {
    #[tabled(rename = "ID")]
    id: String,

    #[tabled(rename = "Address")]
    #[serde(default)]
    ip: String,

    #[tabled(rename = "Network")]
    #[serde(default)]
    network_id: String,
}

#[derive(Debug, Deserialize)]
struct ListFloatingIpsResponse {
    floating_ips: Vec<FloatingIpResponse>,
}

#[derive(Debug, Deserialize)]
struct FloatingIpEnvelope {
    floating_ip: FloatingIpResponse,
}

async fn list_floating_ips(ctx: CommandContext) -> Result<()> {
    let client = ctx.registry.network()?;

    let response: ListFloatingIpsResponse = client.get(FLOATING_IP.path).await?;

    print_output(&response.floating_ips, ctx.format);
    Ok(())
}

async fn create_floating_ip(ctx: CommandContext, args: CreateFloatingIpArgs) -> Result<()> {
    let client = ctx.registry.network()?;

    // The network argument is itself a name-or-ID token.
    let network: Value = find_resource(&client, &NETWORK, &args.network, &[]).await?;
    let network_id = network["id"].as_str().unwrap_or_default();

    let request = json!({
        "floating_ip": {
            "network_id": network_id,
        }
    });
    let response: FloatingIpEnvelope = client.post(FLOATING_IP.path, &request).await?;

    match ctx.format {
        OutputFormat::Json => print_single(&response.floating_ip, ctx.format),
        OutputFormat::Table => {
            print_success(&format!(
                "Allocated floating IP {} ({})",
                response.floating_ip.ip, response.floating_ip.id
            ));
        }
    }
    Ok(())
}

async fn delete_floating_ips(ctx: CommandContext, args: DeleteFloatingIpArgs) -> Result<()> {
    let client = ctx.registry.network()?;

    delete_resources(&client, &FLOATING_IP, &args.floating_ips).await?;

    if let OutputFormat::Table = ctx.format {
        print_success(&format!(
            "Released {} floating IP(s)",
            args.floating_ips.len()
        ));
    }
    Ok(())
}
