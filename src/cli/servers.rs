//! Servers command: list the block servers a retrieval would use

use clap::Args;

use super::{Cli, CliError, OutputFormat};

/// Servers command arguments
#[derive(Args, Debug)]
pub struct ServersArgs {}

impl ServersArgs {
    /// Execute the servers command
    ///
    /// Prints the shards given with `--shard`, or discovers them through the
    /// load balancer.
    pub async fn execute(&self, cli: &Cli) -> Result<(), CliError> {
        let backend = cli.backend.resolve().await?;

        match cli.output_format {
            OutputFormat::Json => {
                let urls: Vec<String> = backend.shards.iter().map(|s| s.base_url()).collect();
                let json = serde_json::to_string(&urls).map_err(|e| {
                    CliError::InvalidArgument(format!("Failed to serialize servers: {e}"))
                })?;
                println!("{json}");
            }
            OutputFormat::Human => {
                println!("Found {} block servers:\n", backend.shards.len());
                for shard in &backend.shards {
                    println!("{}", shard.base_url());
                }
            }
        }
        Ok(())
    }
}
