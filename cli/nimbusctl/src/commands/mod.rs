//! CLI commands.

mod catalog;
mod configuration;
mod floating_ip;
mod network;
pub mod security_group;
pub mod server;
mod token;

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tabled::Tabled;

use crate::auth::{AuthField, AuthParams};
use crate::config::{CliOptions, Config, TlsVerify};
use crate::error::CliError;
use crate::output::{print_output, OutputFormat};
use crate::registry::ClientRegistry;
use crate::session::{PasswordPrompt, SessionManager};

/// nimbus CLI - manage resources on the Nimbus cloud platform.
#[derive(Debug, Parser)]
#[command(name = "nimbus")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Output format (table or json).
    #[arg(long, global = true, default_value = "table")]
    format: String,

    /// Identity service URL.
    #[arg(long, global = true, env = "NIMBUS_AUTH_URL")]
    auth_url: Option<String>,

    /// Service endpoint URL (token/endpoint auth).
    #[arg(long, global = true, env = "NIMBUS_URL")]
    url: Option<String>,

    /// Authentication token.
    #[arg(long, global = true, env = "NIMBUS_TOKEN")]
    token: Option<String>,

    /// Username.
    #[arg(long, global = true, env = "NIMBUS_USERNAME")]
    username: Option<String>,

    /// User ID (alternative to username).
    #[arg(long, global = true, env = "NIMBUS_USER_ID")]
    user_id: Option<String>,

    /// Password. Prompted for if password auth is selected and this is
    /// not supplied.
    #[arg(long, global = true, env = "NIMBUS_PASSWORD")]
    password: Option<String>,

    /// Project scope by ID.
    #[arg(long, global = true, env = "NIMBUS_PROJECT_ID")]
    project_id: Option<String>,

    /// Project scope by name.
    #[arg(long, global = true, env = "NIMBUS_PROJECT_NAME")]
    project_name: Option<String>,

    /// Domain scope by ID.
    #[arg(long, global = true, env = "NIMBUS_DOMAIN_ID")]
    domain_id: Option<String>,

    /// Domain scope by name.
    #[arg(long, global = true, env = "NIMBUS_DOMAIN_NAME")]
    domain_name: Option<String>,

    #[arg(long, global = true, env = "NIMBUS_USER_DOMAIN_ID")]
    user_domain_id: Option<String>,

    #[arg(long, global = true, env = "NIMBUS_USER_DOMAIN_NAME")]
    user_domain_name: Option<String>,

    #[arg(long, global = true, env = "NIMBUS_PROJECT_DOMAIN_ID")]
    project_domain_id: Option<String>,

    #[arg(long, global = true, env = "NIMBUS_PROJECT_DOMAIN_NAME")]
    project_domain_name: Option<String>,

    /// Explicit auth plugin name.
    #[arg(long, global = true, env = "NIMBUS_AUTH_TYPE")]
    auth_type: Option<String>,

    /// Identity API version.
    #[arg(long, global = true, env = "NIMBUS_IDENTITY_API_VERSION")]
    identity_api_version: Option<String>,

    /// Region name.
    #[arg(long, global = true, env = "NIMBUS_REGION_NAME")]
    region: Option<String>,

    /// Endpoint interface (public/internal/admin).
    #[arg(long, global = true, env = "NIMBUS_INTERFACE")]
    interface: Option<String>,

    /// Disable TLS server certificate verification.
    #[arg(long, global = true)]
    insecure: bool,

    /// CA certificate bundle (implies verification).
    #[arg(long, global = true, env = "NIMBUS_CACERT")]
    cacert: Option<PathBuf>,

    /// Client certificate (PEM).
    #[arg(long, global = true, env = "NIMBUS_CERT")]
    cert: Option<PathBuf>,

    /// Client certificate key (PEM).
    #[arg(long, global = true, env = "NIMBUS_KEY")]
    key: Option<PathBuf>,

    /// Record and report wall-clock duration per API call.
    #[arg(long, global = true)]
    timing: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Manage servers.
    Server(server::ServerCommand),

    /// Manage networks.
    Network(network::NetworkCommand),

    /// Manage security groups and rules.
    SecurityGroup(security_group::SecurityGroupCommand),

    /// Manage floating IPs.
    FloatingIp(floating_ip::FloatingIpCommand),

    /// Show the service catalog.
    Catalog(catalog::CatalogCommand),

    /// Issue and inspect tokens.
    Token(token::TokenCommand),

    /// Show the resolved client configuration.
    Configuration(configuration::ConfigurationCommand),

    /// Show CLI version.
    Version,
}

impl Cli {
    /// Run the CLI command.
    pub async fn run(self) -> Result<()> {
        let format = match self.format.as_str() {
            "json" => OutputFormat::Json,
            _ => OutputFormat::Table,
        };

        let config = Config::load()?;
        let timing = self.timing;
        let options = self.build_options(&config);

        let session = Arc::new(SessionManager::new(options, stdin_password_prompt()));
        let registry = ClientRegistry::new(session.clone(), &config.extensions);

        let ctx = CommandContext { registry, format };

        let result = match self.command {
            Commands::Server(cmd) => cmd.run(ctx).await,
            Commands::Network(cmd) => cmd.run(ctx).await,
            Commands::SecurityGroup(cmd) => cmd.run(ctx).await,
            Commands::FloatingIp(cmd) => cmd.run(ctx).await,
            Commands::Catalog(cmd) => cmd.run(ctx).await,
            Commands::Token(cmd) => cmd.run(ctx).await,
            Commands::Configuration(cmd) => cmd.run(ctx).await,
            Commands::Version => {
                println!("nimbus {}", env!("CARGO_PKG_VERSION"));
                Ok(())
            }
        };

        if timing {
            print_timing_report(&session);
        }

        result
    }

    /// Merge command-line flags, environment, and the config file into the
    /// static options. Flags win over the file.
    fn build_options(&self, config: &Config) -> CliOptions {
        let mut auth = AuthParams::new();
        auth.set_opt(
            AuthField::AuthUrl,
            self.auth_url.as_deref().or(config.auth_url.as_deref()),
        );
        auth.set_opt(AuthField::Url, self.url.as_deref());
        auth.set_opt(AuthField::Token, self.token.as_deref());
        auth.set_opt(AuthField::Username, self.username.as_deref());
        auth.set_opt(AuthField::UserId, self.user_id.as_deref());
        auth.set_opt(AuthField::Password, self.password.as_deref());
        auth.set_opt(AuthField::ProjectId, self.project_id.as_deref());
        auth.set_opt(AuthField::ProjectName, self.project_name.as_deref());
        auth.set_opt(AuthField::DomainId, self.domain_id.as_deref());
        auth.set_opt(AuthField::DomainName, self.domain_name.as_deref());
        auth.set_opt(AuthField::UserDomainId, self.user_domain_id.as_deref());
        auth.set_opt(AuthField::UserDomainName, self.user_domain_name.as_deref());
        auth.set_opt(
            AuthField::ProjectDomainId,
            self.project_domain_id.as_deref(),
        );
        auth.set_opt(
            AuthField::ProjectDomainName,
            self.project_domain_name.as_deref(),
        );

        CliOptions {
            auth,
            auth_type: self.auth_type.clone(),
            identity_api_version: self
                .identity_api_version
                .clone()
                .or_else(|| config.identity_api_version.clone())
                .unwrap_or_else(|| "3".to_string()),
            region_name: self.region.clone().or_else(|| config.region_name.clone()),
            interface: self
                .interface
                .clone()
                .or_else(|| config.interface.clone()),
            default_domain: config.default_domain.clone(),
            verify: TlsVerify::from_flags(self.insecure, self.cacert.clone()),
            client_cert: self.cert.clone(),
            client_key: self.key.clone(),
            timing: self.timing,
        }
    }
}

/// Shared command context.
pub struct CommandContext {
    pub registry: ClientRegistry,
    pub format: OutputFormat,
}

/// Default password prompt: ask on stderr, read one line from stdin.
fn stdin_password_prompt() -> PasswordPrompt {
    Box::new(|prompt| {
        let prompt = prompt.unwrap_or("Password: ");
        eprint!("{prompt}");
        std::io::stderr()
            .flush()
            .map_err(|e| CliError::Config(format!("Failed to prompt for password: {e}")))?;
        let mut line = String::new();
        std::io::stdin()
            .read_line(&mut line)
            .map_err(|e| CliError::Config(format!("Failed to read password: {e}")))?;
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    })
}

#[derive(serde::Serialize, Tabled)]
struct TimingRow {
    #[tabled(rename = "Call")]
    label: String,

    #[tabled(rename = "Elapsed (ms)")]
    elapsed_ms: u128,
}

fn print_timing_report(session: &SessionManager) {
    let rows: Vec<TimingRow> = session
        .timing_report()
        .into_iter()
        .map(|t| TimingRow {
            label: t.label,
            elapsed_ms: t.elapsed_ms,
        })
        .collect();
    print_output(&rows, OutputFormat::Table);
}
