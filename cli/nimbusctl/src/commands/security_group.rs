//! Security group and security group rule commands.

use anyhow::Result;
use clap::{Args, Subcommand};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tabled::Tabled;

use crate::client::ServiceClient;
use crate::error::CliError;
use crate::output::{print_output, print_single, print_success, OutputFormat};
use crate::resolve::{delete_resources, find_resource, validate_int_range, ResourceKind};

use super::CommandContext;

pub const SECURITY_GROUP: ResourceKind = ResourceKind {
    singular: "security_group",
    plural: "security_groups",
    path: "/security_groups",
};

const RULES_PATH: &str = "/security_group_rules";

/// Security group commands.
#[derive(Debug, Args)]
pub struct SecurityGroupCommand {
    #[command(subcommand)]
    command: SecurityGroupSubcommand,
}

#[derive(Debug, Subcommand)]
enum SecurityGroupSubcommand {
    /// List security groups.
    List,

    /// Show security group details.
    Show(ShowGroupArgs),

    /// Create a security group.
    Create(CreateGroupArgs),

    /// Delete one or more security groups (name or ID).
    Delete(DeleteGroupArgs),

    /// Update a security group's name or description.
    Set(SetGroupArgs),

    /// Manage security group rules.
    Rule(RuleCommand),
}

#[derive(Debug, Args)]
struct ShowGroupArgs {
    /// Security group name or ID.
    group: String,
}

#[derive(Debug, Args)]
struct CreateGroupArgs {
    /// Security group name.
    name: String,

    /// Security group description.
    #[arg(long, default_value = "")]
    description: String,
}

#[derive(Debug, Args)]
struct DeleteGroupArgs {
    /// Security group names or IDs.
    #[arg(required = true)]
    groups: Vec<String>,
}

#[derive(Debug, Args)]
struct SetGroupArgs {
    /// Security group name or ID.
    group: String,

    /// New security group name.
    #[arg(long)]
    name: Option<String>,

    /// New security group description.
    #[arg(long)]
    description: Option<String>,
}

impl SecurityGroupCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        match self.command {
            SecurityGroupSubcommand::List => list_groups(ctx).await,
            SecurityGroupSubcommand::Show(args) => show_group(ctx, args).await,
            SecurityGroupSubcommand::Create(args) => create_group(ctx, args).await,
            SecurityGroupSubcommand::Delete(args) => delete_groups(ctx, args).await,
            SecurityGroupSubcommand::Set(args) => set_group(ctx, args).await,
            SecurityGroupSubcommand::Rule(cmd) => cmd.run(ctx).await,
        }
    }
}

/// Security group response from the network API.
#[derive(Debug, Clone, Serialize, Deserialize, Tabled)]
struct SecurityGroupResponse {
    #[tabled(rename = "ID")]
    id: String,

    #[tabled(rename = "Name")]
    name: String,

    #[tabled(rename = "Description")]
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct ListGroupsResponse {
    security_groups: Vec<SecurityGroupResponse>,
}

#[derive(Debug, Deserialize)]
struct GroupEnvelope {
    security_group: SecurityGroupResponse,
}

async fn list_groups(ctx: CommandContext) -> Result<()> {
    let client = ctx.registry.network()?;

    let response: ListGroupsResponse = client.get(SECURITY_GROUP.path).await?;

    print_output(&response.security_groups, ctx.format);
    Ok(())
}

async fn show_group(ctx: CommandContext, args: ShowGroupArgs) -> Result<()> {
    let client = ctx.registry.network()?;

    let group: Value = find_resource(&client, &SECURITY_GROUP, &args.group, &[]).await?;

    print_single(&group, ctx.format);
    Ok(())
}

async fn create_group(ctx: CommandContext, args: CreateGroupArgs) -> Result<()> {
    let client = ctx.registry.network()?;

    let request = json!({
        "security_group": {
            "name": args.name,
            "description": args.description,
        }
    });
    let response: GroupEnvelope = client.post(SECURITY_GROUP.path, &request).await?;

    match ctx.format {
        OutputFormat::Json => print_single(&response.security_group, ctx.format),
        OutputFormat::Table => {
            print_success(&format!(
                "Created security group '{}' ({})",
                response.security_group.name, response.security_group.id
            ));
        }
    }
    Ok(())
}

async fn set_group(ctx: CommandContext, args: SetGroupArgs) -> Result<()> {
    let client = ctx.registry.network()?;

    let group = update_security_group(
        &client,
        &args.group,
        args.name.as_deref(),
        args.description.as_deref(),
    )
    .await?;

    match ctx.format {
        OutputFormat::Json => print_single(&group, ctx.format),
        OutputFormat::Table => {
            print_success(&format!("Updated security group {}", args.group));
        }
    }
    Ok(())
}

/// Resolve a security group by name or ID and PUT the updated resource.
/// Fields the caller leaves out keep their current server-side values.
pub async fn update_security_group(
    client: &ServiceClient,
    token: &str,
    name: Option<&str>,
    description: Option<&str>,
) -> Result<Value, CliError> {
    let group = find_resource(client, &SECURITY_GROUP, token, &[]).await?;
    let id = group["id"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| {
            CliError::NotFound(format!("security_group '{token}' resolved without an id"))
        })?;

    let mut fields = json!({
        "name": group["name"],
        "description": group["description"],
    });
    if let Some(name) = name {
        fields["name"] = json!(name);
    }
    if let Some(description) = description {
        fields["description"] = json!(description);
    }

    let body: Value = client
        .put(
            &format!("{}/{}", SECURITY_GROUP.path, id),
            &json!({ "security_group": fields }),
        )
        .await?;
    Ok(body["security_group"].clone())
}

async fn delete_groups(ctx: CommandContext, args: DeleteGroupArgs) -> Result<()> {
    let client = ctx.registry.network()?;

    delete_resources(&client, &SECURITY_GROUP, &args.groups).await?;

    if let OutputFormat::Table = ctx.format {
        print_success(&format!("Deleted {} security group(s)", args.groups.len()));
    }
    Ok(())
}

// =============================================================================
// Security Group Rules
// =============================================================================

#[derive(Debug, Args)]
pub struct RuleCommand {
    #[command(subcommand)]
    command: RuleSubcommand,
}

#[derive(Debug, Subcommand)]
enum RuleSubcommand {
    /// List rules for a security group.
    List(ListRulesArgs),

    /// Create a security group rule.
    Create(CreateRuleArgs),
}

#[derive(Debug, Args)]
struct ListRulesArgs {
    /// Security group name or ID.
    group: String,
}

#[derive(Debug, Args)]
pub struct CreateRuleArgs {
    /// Security group name or ID.
    pub group: String,

    /// IP protocol (tcp, udp, icmp).
    #[arg(long, default_value = "tcp")]
    pub protocol: String,

    /// Start of the port range.
    #[arg(long)]
    pub from_port: String,

    /// End of the port range.
    #[arg(long)]
    pub to_port: String,

    /// Source CIDR.
    #[arg(long, default_value = "0.0.0.0/0")]
    pub cidr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Tabled)]
struct RuleResponse {
    #[tabled(rename = "ID")]
    id: String,

    #[tabled(rename = "Protocol")]
    #[serde(default)]
    protocol: String,

    #[tabled(rename = "From")]
    #[serde(default)]
    from_port: i64,

    #[tabled(rename = "To")]
    #[serde(default)]
    to_port: i64,

    #[tabled(rename = "CIDR")]
    #[serde(default)]
    cidr: String,
}

#[derive(Debug, Deserialize)]
struct ListRulesResponse {
    security_group_rules: Vec<RuleResponse>,
}

#[derive(Debug, Deserialize)]
struct RuleEnvelope {
    security_group_rule: RuleResponse,
}

impl RuleCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        match self.command {
            RuleSubcommand::List(args) => list_rules(ctx, args).await,
            RuleSubcommand::Create(args) => create_rule(ctx, args).await,
        }
    }
}

/// Build the rule-create request body. Port validation runs here so a
/// malformed field fails before any request is constructed.
pub fn build_rule_request(group_id: &str, args: &CreateRuleArgs) -> Result<Value, CliError> {
    let from_port = validate_int_range("from_port", &args.from_port, 0, 65535)?;
    let to_port = validate_int_range("to_port", &args.to_port, 0, 65535)?;

    Ok(json!({
        "security_group_rule": {
            "security_group_id": group_id,
            "protocol": args.protocol,
            "from_port": from_port,
            "to_port": to_port,
            "cidr": args.cidr,
        }
    }))
}

async fn list_rules(ctx: CommandContext, args: ListRulesArgs) -> Result<()> {
    let client = ctx.registry.network()?;

    let group: Value = find_resource(&client, &SECURITY_GROUP, &args.group, &[]).await?;
    let group_id = group["id"].as_str().unwrap_or_default();

    let response: ListRulesResponse = client
        .get(&format!("{RULES_PATH}?security_group_id={group_id}"))
        .await?;

    print_output(&response.security_group_rules, ctx.format);
    Ok(())
}

async fn create_rule(ctx: CommandContext, args: CreateRuleArgs) -> Result<()> {
    let client = ctx.registry.network()?;

    let group: Value = find_resource(&client, &SECURITY_GROUP, &args.group, &[]).await?;
    let group_id = group["id"].as_str().unwrap_or_default();

    let request = build_rule_request(group_id, &args)?;
    let response: RuleEnvelope = client.post(RULES_PATH, &request).await?;

    match ctx.format {
        OutputFormat::Json => print_single(&response.security_group_rule, ctx.format),
        OutputFormat::Table => {
            print_success(&format!(
                "Created rule {} on security group {}",
                response.security_group_rule.id, args.group
            ));
        }
    }
    Ok(())
}
