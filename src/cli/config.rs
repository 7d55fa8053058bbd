use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use tokio::fs;

use crate::cli::context::CliContext;
use crate::config::GoldpathConfig;

#[derive(Args, Clone, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Clone, Debug)]
pub enum ConfigAction {
    /// Show the effective configuration
    Show,

    /// Write the default configuration to the resolved config path
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Check that the config file parses
    Validate,
}

pub async fn cmd_config(args: ConfigArgs, ctx: &CliContext) -> Result<()> {
    let path = ctx.config_path();
    match args.action {
        ConfigAction::Show => {
            println!("Current configuration ({}):", path.display());
            println!("{}", serde_yaml::to_string(ctx.config())?);
        }
        ConfigAction::Init { force } => {
            if path.exists() && !force {
                anyhow::bail!("{} already exists; pass --force to overwrite", path.display());
            }
            if let Some(parent) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
                fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
            let yaml = serde_yaml::to_string(&GoldpathConfig::default())?;
            fs::write(path, yaml)
                .await
                .with_context(|| format!("writing {}", path.display()))?;
            println!("Wrote default configuration to {}", path.display());
        }
        ConfigAction::Validate => {
            // Loading already parsed the file; reaching here means it is valid.
            if path.exists() {
                println!("{} is valid", path.display());
            } else {
                println!("No config file at {}; defaults apply", path.display());
            }
        }
    }
    Ok(())
}
