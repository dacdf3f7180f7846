//! Implementation of the `weft config` commands.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Subcommand};
use serde::Serialize;

use crate::cli::output::{output, CommandOutput};
use crate::domain::models::Config;
use crate::infrastructure::config::ConfigLoader;

/// Arguments of `weft config`.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Selected subcommand.
    #[command(subcommand)]
    pub command: ConfigCommand,
}

/// `weft config` subcommands.
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print the effective configuration
    Show,
    /// Load and validate configuration
    Validate {
        /// Validate this file instead of the layered project config
        #[arg(long)]
        file: Option<PathBuf>,
    },
}

/// Output of `config show`.
#[derive(Debug, Serialize)]
pub struct ShowOutput {
    /// Effective configuration.
    pub config: Config,
}

impl CommandOutput for ShowOutput {
    fn to_human(&self) -> String {
        serde_yaml::to_string(&self.config).unwrap_or_else(|e| format!("<unprintable: {e}>"))
    }
}

/// Output of `config validate`.
#[derive(Debug, Serialize)]
pub struct ValidateOutput {
    /// Always true; failures surface as errors.
    pub success: bool,
    /// Validated file, or the layered sources.
    pub source: String,
    /// Configured agent name.
    pub agent_name: String,
    /// Configured topic namespace.
    pub namespace: String,
}

impl CommandOutput for ValidateOutput {
    fn to_human(&self) -> String {
        format!(
            "Configuration from {} is valid (agent '{}' in namespace '{}')",
            self.source, self.agent_name, self.namespace
        )
    }
}

/// Run a `weft config` subcommand.
pub fn execute(args: ConfigArgs, json_mode: bool) -> Result<()> {
    match args.command {
        ConfigCommand::Show => {
            let config = ConfigLoader::load()?;
            output(&ShowOutput { config }, json_mode);
        }
        ConfigCommand::Validate { file } => {
            let (config, source) = match file {
                Some(path) => (ConfigLoader::load_from_file(&path)?, path.display().to_string()),
                None => (ConfigLoader::load()?, "weft.yaml + .weft/local.yaml + WEFT_*".to_string()),
            };
            output(
                &ValidateOutput {
                    success: true,
                    source,
                    agent_name: config.agent_name,
                    namespace: config.namespace,
                },
                json_mode,
            );
        }
    }
    Ok(())
}
