//! Command-line interface for the `weft` binary.

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};

use crate::cli::commands::config::ConfigArgs;

/// Top-level arguments.
#[derive(Parser, Debug)]
#[command(name = "weft", version, about = "Agent task orchestration engine")]
pub struct Cli {
    /// Emit machine-readable JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Selected command.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Inspect or validate configuration
    Config(ConfigArgs),
}

/// Print `err` in the requested format and exit non-zero.
pub fn handle_error(err: anyhow::Error, json_mode: bool) -> ! {
    if json_mode {
        let body = serde_json::json!({ "success": false, "error": format!("{err:#}") });
        eprintln!("{}", serde_json::to_string_pretty(&body).unwrap_or_default());
    } else {
        eprintln!("Error: {err:#}");
    }
    std::process::exit(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::commands::config::ConfigCommand;

    #[test]
    fn test_parse_config_show() {
        let cli = Cli::try_parse_from(["weft", "--json", "config", "show"]).unwrap();
        assert!(cli.json);
        let Commands::Config(args) = cli.command;
        assert!(matches!(args.command, ConfigCommand::Show));
    }

    #[test]
    fn test_parse_config_validate_with_file() {
        let cli = Cli::try_parse_from(["weft", "config", "validate", "--file", "agent.yaml"]).unwrap();
        let Commands::Config(args) = cli.command;
        match args.command {
            ConfigCommand::Validate { file } => {
                assert_eq!(file.as_deref(), Some(std::path::Path::new("agent.yaml")));
            }
            ConfigCommand::Show => panic!("expected validate"),
        }
    }

    #[test]
    fn test_unknown_subcommand_rejected() {
        assert!(Cli::try_parse_from(["weft", "serve"]).is_err());
    }
}
