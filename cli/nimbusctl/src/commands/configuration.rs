//! Configuration display commands.

use anyhow::Result;
use clap::{Args, Subcommand};

use crate::output::print_single;

use super::CommandContext;

/// Configuration commands.
#[derive(Debug, Args)]
pub struct ConfigurationCommand {
    #[command(subcommand)]
    command: ConfigurationSubcommand,
}

#[derive(Debug, Subcommand)]
enum ConfigurationSubcommand {
    /// Show the resolved client configuration (secrets masked).
    Show,
}

impl ConfigurationCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        match self.command {
            ConfigurationSubcommand::Show => {
                // Always a fresh deep copy, never the live options.
                let view = ctx.registry.session().get_configuration();
                print_single(&view, ctx.format);
                Ok(())
            }
        }
    }
}
