//! Token commands.

use anyhow::Result;
use clap::{Args, Subcommand};
use serde::Serialize;

use crate::output::print_single;

use super::CommandContext;

/// Token commands.
#[derive(Debug, Args)]
pub struct TokenCommand {
    #[command(subcommand)]
    command: TokenSubcommand,
}

#[derive(Debug, Subcommand)]
enum TokenSubcommand {
    /// Issue a scoped token and show its authorization context.
    Issue,
}

#[derive(Debug, Serialize)]
struct TokenView {
    token: String,
    project_id: Option<String>,
    domain_id: Option<String>,
}

impl TokenCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        match self.command {
            TokenSubcommand::Issue => issue_token(ctx).await,
        }
    }
}

async fn issue_token(ctx: CommandContext) -> Result<()> {
    let session = ctx.registry.session();

    // Issuing a token requires an explicit scope.
    session.validate_scope().await?;
    let auth_ref = session.auth_ref().await?;

    let view = TokenView {
        token: auth_ref.token.clone(),
        project_id: auth_ref.project_id.clone(),
        domain_id: auth_ref.domain_id.clone(),
    };
    print_single(&view, ctx.format);
    Ok(())
}
