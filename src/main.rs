//! weft CLI entry point.

use clap::Parser;

use weft::cli::{Cli, Commands};
use weft::infrastructure::config::ConfigLoader;
use weft::infrastructure::logging::{LogConfig, LoggerImpl};

fn main() {
    let cli = Cli::parse();

    // Fall back to default logging when the config itself is what's broken.
    let mut log_config = ConfigLoader::load()
        .map(|config| LogConfig::from(&config.logging))
        .unwrap_or_default();
    // stdout carries command output; logs go to the configured files only
    log_config.enable_stdout = false;
    let _logger = match LoggerImpl::init(&log_config) {
        Ok(logger) => Some(logger),
        Err(err) => {
            eprintln!("Warning: logging disabled: {err:#}");
            None
        }
    };

    let result = match cli.command {
        Commands::Config(args) => weft::cli::commands::config::execute(args, cli.json),
    };

    if let Err(err) = result {
        weft::cli::handle_error(err, cli.json);
    }
}
