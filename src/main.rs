//! layered-config command-line tool.

use anyhow::{Context, Result};
use clap::Parser;
use layered_config::cli::{Cli, Command, DumpFormat, lookup};
use layered_config::logging::{self, LogTarget};
use layered_config::{ConfigNode, Key};
use tracing::debug;

fn main() -> Result<()> {
    let cli = Cli::parse();

    let target: LogTarget = cli.log.parse()?;
    logging::init(&target, cli.verbose)?;

    let options = cli.options();
    debug!(
        "Root: {}, environment: {}",
        options.root.display(),
        options.environment
    );
    let config = cli.configuration(options)?;

    match &cli.command {
        Command::Get { path, strict } => {
            let node = lookup(&config, path, *strict)?;
            println!("{}", render(&node)?);
        }
        Command::Source { path } => {
            println!("{}", config.source(Key::path(path))?);
        }
        Command::Dump { format } => {
            let tree = config.snapshot()?;
            match format {
                DumpFormat::Json => println!("{}", serde_json::to_string_pretty(&*tree)?),
                DumpFormat::Yaml => print!("{}", serde_yaml::to_string(&*tree)?),
            }
        }
        Command::Backends => {
            for name in config.backend_names()? {
                println!("{}", name);
            }
        }
    }

    Ok(())
}

/// Scalars print raw; containers print as pretty JSON.
fn render(node: &ConfigNode) -> Result<String> {
    match node {
        ConfigNode::Scalar(_) => Ok(node.to_string()),
        _ => serde_json::to_string_pretty(node).context("Failed to render value"),
    }
}
