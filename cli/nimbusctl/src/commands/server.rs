//! Server commands.

use anyhow::Result;
use clap::{Args, Subcommand};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tabled::Tabled;

use crate::client::ServiceClient;
use crate::error::CliError;
use crate::output::{print_output, print_single, print_success, OutputFormat};
use crate::resolve::{delete_resources, find_resource, ResourceKind};

use super::CommandContext;

pub const SERVER: ResourceKind = ResourceKind {
    singular: "server",
    plural: "servers",
    path: "/servers",
};

/// Server commands.
#[derive(Debug, Args)]
pub struct ServerCommand {
    #[command(subcommand)]
    command: ServerSubcommand,
}

#[derive(Debug, Subcommand)]
enum ServerSubcommand {
    /// List servers.
    List,

    /// Show server details.
    Show(ShowServerArgs),

    /// Delete one or more servers (name or ID).
    Delete(DeleteServerArgs),

    /// Manage share attachments on a server.
    Share(ShareCommand),

    /// Manage server backups.
    Backup(BackupCommand),
}

#[derive(Debug, Args)]
struct ShowServerArgs {
    /// Server name or ID.
    server: String,
}

#[derive(Debug, Args)]
struct DeleteServerArgs {
    /// Server names or IDs.
    #[arg(required = true)]
    servers: Vec<String>,
}

impl ServerCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        match self.command {
            ServerSubcommand::List => list_servers(ctx).await,
            ServerSubcommand::Show(args) => show_server(ctx, args).await,
            ServerSubcommand::Delete(args) => delete_servers(ctx, args).await,
            ServerSubcommand::Share(cmd) => cmd.run(ctx).await,
            ServerSubcommand::Backup(cmd) => cmd.run(ctx).await,
        }
    }
}

/// Server response from the compute API.
#[derive(Debug, Clone, Serialize, Deserialize, Tabled)]
struct ServerResponse {
    #[tabled(rename = "ID")]
    id: String,

    #[tabled(rename = "Name")]
    name: String,

    #[tabled(rename = "Status")]
    #[serde(default)]
    status: String,
}

#[derive(Debug, Deserialize)]
struct ListServersResponse {
    servers: Vec<ServerResponse>,
}

async fn list_servers(ctx: CommandContext) -> Result<()> {
    let client = ctx.registry.compute()?;

    let response: ListServersResponse = client.get(SERVER.path).await?;

    print_output(&response.servers, ctx.format);
    Ok(())
}

async fn show_server(ctx: CommandContext, args: ShowServerArgs) -> Result<()> {
    let client = ctx.registry.compute()?;

    let server: Value = find_resource(&client, &SERVER, &args.server, &[]).await?;

    print_single(&server, ctx.format);
    Ok(())
}

async fn delete_servers(ctx: CommandContext, args: DeleteServerArgs) -> Result<()> {
    let client = ctx.registry.compute()?;

    delete_resources(&client, &SERVER, &args.servers).await?;

    if let OutputFormat::Table = ctx.format {
        print_success(&format!("Deleted {} server(s)", args.servers.len()));
    }
    Ok(())
}

// =============================================================================
// Share attachments
// =============================================================================

/// Share attachment commands. Attachments live under the server resource;
/// the server argument is a name-or-ID token, the share is always an ID.
#[derive(Debug, Args)]
pub struct ShareCommand {
    #[command(subcommand)]
    command: ShareSubcommand,
}

#[derive(Debug, Subcommand)]
enum ShareSubcommand {
    /// List shares attached to a server.
    List(ListSharesArgs),

    /// Show one share attachment.
    Show(ShowShareArgs),

    /// Attach a share to a server.
    Add(AddShareArgs),

    /// Detach a share from a server.
    Remove(RemoveShareArgs),
}

#[derive(Debug, Args)]
struct ListSharesArgs {
    /// Server name or ID.
    server: String,
}

#[derive(Debug, Args)]
struct ShowShareArgs {
    /// Server name or ID.
    server: String,

    /// Share ID.
    share_id: String,
}

#[derive(Debug, Args)]
struct AddShareArgs {
    /// Server name or ID.
    server: String,

    /// Share ID to attach.
    share_id: String,

    /// Tag used to mount the share. Defaults to the share ID.
    #[arg(long)]
    tag: Option<String>,
}

#[derive(Debug, Args)]
struct RemoveShareArgs {
    /// Server name or ID.
    server: String,

    /// Share ID to detach.
    share_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Tabled)]
pub struct ShareResponse {
    #[tabled(rename = "Share ID")]
    pub share_id: String,

    #[tabled(rename = "Status")]
    #[serde(default)]
    pub status: String,

    #[tabled(rename = "Tag")]
    #[serde(default)]
    pub tag: String,
}

#[derive(Debug, Deserialize)]
struct ListSharesResponse {
    shares: Vec<ShareResponse>,
}

impl ShareCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        let client = ctx.registry.compute()?;
        match self.command {
            ShareSubcommand::List(args) => {
                let shares = list_shares(&client, &args.server).await?;
                print_output(&shares, ctx.format);
            }
            ShareSubcommand::Show(args) => {
                let share = show_share(&client, &args.server, &args.share_id).await?;
                print_single(&share, ctx.format);
            }
            ShareSubcommand::Add(args) => {
                let share = add_share(&client, &args.server, &args.share_id, args.tag.as_deref())
                    .await?;
                match ctx.format {
                    OutputFormat::Json => print_single(&share, ctx.format),
                    OutputFormat::Table => print_success(&format!(
                        "Attached share {} to server {}",
                        args.share_id, args.server
                    )),
                }
            }
            ShareSubcommand::Remove(args) => {
                remove_share(&client, &args.server, &args.share_id).await?;
                if let OutputFormat::Table = ctx.format {
                    print_success(&format!(
                        "Detached share {} from server {}",
                        args.share_id, args.server
                    ));
                }
            }
        }
        Ok(())
    }
}

fn shares_path(server_id: &str) -> String {
    format!("{}/{}/shares", SERVER.path, server_id)
}

/// Build the attach request. The mount tag falls back to the share ID
/// when the caller did not pick one.
pub fn build_share_request(share_id: &str, tag: Option<&str>) -> Value {
    json!({
        "share": {
            "share_id": share_id,
            "tag": tag.unwrap_or(share_id),
        }
    })
}

async fn resolve_server_id(client: &ServiceClient, token: &str) -> Result<String, CliError> {
    let server = find_resource(client, &SERVER, token, &[]).await?;
    server["id"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| CliError::NotFound(format!("server '{token}' resolved without an id")))
}

pub async fn list_shares(
    client: &ServiceClient,
    server: &str,
) -> Result<Vec<ShareResponse>, CliError> {
    let server_id = resolve_server_id(client, server).await?;
    let response: ListSharesResponse = client.get(&shares_path(&server_id)).await?;
    Ok(response.shares)
}

pub async fn show_share(
    client: &ServiceClient,
    server: &str,
    share_id: &str,
) -> Result<Value, CliError> {
    let server_id = resolve_server_id(client, server).await?;
    let body: Value = client
        .get(&format!("{}/{}", shares_path(&server_id), share_id))
        .await?;
    Ok(body["share"].clone())
}

pub async fn add_share(
    client: &ServiceClient,
    server: &str,
    share_id: &str,
    tag: Option<&str>,
) -> Result<Value, CliError> {
    let server_id = resolve_server_id(client, server).await?;
    let request = build_share_request(share_id, tag);
    let body: Value = client.post(&shares_path(&server_id), &request).await?;
    Ok(body["share"].clone())
}

pub async fn remove_share(
    client: &ServiceClient,
    server: &str,
    share_id: &str,
) -> Result<(), CliError> {
    let server_id = resolve_server_id(client, server).await?;
    client
        .delete(&format!("{}/{}", shares_path(&server_id), share_id))
        .await
}

// =============================================================================
// Backups
// =============================================================================

#[derive(Debug, Args)]
pub struct BackupCommand {
    #[command(subcommand)]
    command: BackupSubcommand,
}

#[derive(Debug, Subcommand)]
enum BackupSubcommand {
    /// Create a backup image of a server.
    Create(CreateBackupArgs),
}

#[derive(Debug, Args)]
struct CreateBackupArgs {
    /// Server name or ID.
    server: String,

    /// Backup image name. Defaults to the server's display name.
    #[arg(long)]
    name: Option<String>,

    /// Backup type label (e.g. daily, weekly).
    #[arg(long = "type", default_value = "")]
    backup_type: String,

    /// Number of backups to keep.
    #[arg(long, default_value_t = 1)]
    rotate: u32,
}

impl BackupCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        match self.command {
            BackupSubcommand::Create(args) => {
                let client = ctx.registry.compute()?;
                let name = create_backup(
                    &client,
                    &args.server,
                    args.name.as_deref(),
                    &args.backup_type,
                    args.rotate,
                )
                .await?;
                if let OutputFormat::Table = ctx.format {
                    print_success(&format!(
                        "Created backup '{}' of server {}",
                        name, args.server
                    ));
                }
                Ok(())
            }
        }
    }
}

/// Build the createBackup action body. The image name falls back to the
/// server's display name.
pub fn build_backup_request(
    server_name: &str,
    name: Option<&str>,
    backup_type: &str,
    rotate: u32,
) -> Value {
    json!({
        "createBackup": {
            "name": name.unwrap_or(server_name),
            "backup_type": backup_type,
            "rotation": rotate,
        }
    })
}

/// Issue the backup action. Returns the backup image name.
pub async fn create_backup(
    client: &ServiceClient,
    server: &str,
    name: Option<&str>,
    backup_type: &str,
    rotate: u32,
) -> Result<String, CliError> {
    let resolved = find_resource(client, &SERVER, server, &[]).await?;
    let server_id = resolved["id"]
        .as_str()
        .ok_or_else(|| CliError::NotFound(format!("server '{server}' resolved without an id")))?;
    let server_name = resolved["name"].as_str().unwrap_or(server_id);

    let request = build_backup_request(server_name, name, backup_type, rotate);
    client
        .post_empty(&format!("{}/{}/action", SERVER.path, server_id), &request)
        .await?;

    Ok(name.unwrap_or(server_name).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn share_request_tag_defaults_to_share_id() {
        let request = build_share_request("share-1", None);
        assert_eq!(request["share"]["share_id"], "share-1");
        assert_eq!(request["share"]["tag"], "share-1");
    }

    #[test]
    fn share_request_keeps_an_explicit_tag() {
        let request = build_share_request("share-1", Some("data"));
        assert_eq!(request["share"]["tag"], "data");
    }

    #[test]
    fn backup_request_defaults_to_server_name_and_rotation_one() {
        let request = build_backup_request("web-1", None, "", 1);
        let action = &request["createBackup"];
        assert_eq!(action["name"], "web-1");
        assert_eq!(action["backup_type"], "");
        assert_eq!(action["rotation"], 1);
    }

    #[test]
    fn backup_request_carries_explicit_options() {
        let request = build_backup_request("web-1", Some("image"), "daily", 2);
        let action = &request["createBackup"];
        assert_eq!(action["name"], "image");
        assert_eq!(action["backup_type"], "daily");
        assert_eq!(action["rotation"], 2);
    }
}
