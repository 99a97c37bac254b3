//! `batches config`: effective reconciler settings.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Subcommand;

use batches_reconciler::config;

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print the effective configuration as YAML, defaults filled in.
    Show,
}

pub fn run(command: ConfigCommand) -> Result<()> {
    match command {
        ConfigCommand::Show => show(),
    }
}

fn show() -> Result<()> {
    let home: PathBuf = dirs::home_dir().context("could not determine home directory")?;
    let path = config::config_path_at(&home);
    let effective = config::load_at(&home)
        .with_context(|| format!("failed to load config from {}", path.display()))?;
    tracing::debug!(path = %path.display(), exists = path.exists(), "loaded config");

    let yaml = config::to_yaml(&effective).context("failed to render config")?;
    println!("# {}", path.display());
    print!("{yaml}");
    Ok(())
}
