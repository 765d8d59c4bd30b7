//! Service catalog commands.

use anyhow::Result;
use clap::{Args, Subcommand};
use serde::Serialize;
use tabled::Tabled;

use crate::output::{print_info, print_output};

use super::CommandContext;

/// Service catalog commands.
#[derive(Debug, Args)]
pub struct CatalogCommand {
    #[command(subcommand)]
    command: CatalogSubcommand,
}

#[derive(Debug, Subcommand)]
enum CatalogSubcommand {
    /// List catalog entries.
    List,
}

#[derive(Debug, Serialize, Tabled)]
struct CatalogRow {
    #[tabled(rename = "Name")]
    name: String,

    #[tabled(rename = "Type")]
    service_type: String,

    #[tabled(rename = "Endpoints")]
    endpoints: String,
}

impl CatalogCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        match self.command {
            CatalogSubcommand::List => list_catalog(ctx).await,
        }
    }
}

async fn list_catalog(ctx: CommandContext) -> Result<()> {
    let session = ctx.registry.session();
    let auth_ref = session.auth_ref().await?;

    let Some(catalog) = &auth_ref.catalog else {
        print_info("No service catalog available for this auth type.");
        return Ok(());
    };

    let rows: Vec<CatalogRow> = catalog
        .entries
        .iter()
        .map(|entry| CatalogRow {
            name: entry.name.clone(),
            service_type: entry.service_type.clone(),
            endpoints: entry
                .endpoints
                .iter()
                .map(|ep| {
                    let region = ep.region.as_deref().unwrap_or("-");
                    format!("{region}/{}: {}", ep.interface, ep.url)
                })
                .collect::<Vec<_>>()
                .join("\n"),
        })
        .collect();

    print_output(&rows, ctx.format);
    Ok(())
}
