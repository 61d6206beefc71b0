use anyhow::Result;
use clap::{Args, Subcommand};

use tablecloth::config::{Config, SettingsStore};

#[derive(Args)]
pub struct SettingsArgs {
    #[command(subcommand)]
    pub command: SettingsCommands,
}

#[derive(Subcommand)]
pub enum SettingsCommands {
    /// Show current launch settings
    Show,

    /// Set a toggle (e.g., useMicrophone true)
    Set {
        /// Settings key (useMicrophone, useWebCamera, sharePrinters,
        /// mountCredentialStore, mountSpecificFolders)
        key: String,

        /// true or false
        value: String,
    },

    /// Add a folder to share with the sandbox
    AddFolder { path: String },

    /// Stop sharing a folder
    RemoveFolder { path: String },

    /// Record acceptance of the usage disclaimer
    AcceptDisclaimer,

    /// Show settings file path
    Path,
}

pub async fn run(args: SettingsArgs) -> Result<()> {
    let config = Config::load()?;
    let store = SettingsStore::new(config.paths.settings_file());

    match args.command {
        SettingsCommands::Show => {
            let settings = store.load().await;
            println!("{}", serde_json::to_string_pretty(&settings)?);
        }
        SettingsCommands::Set { key, value } => {
            let mut settings = store.load().await;
            settings.set_value(&key, &value)?;
            store.save(&settings).await?;
            println!("Set {} = {}", key, value);
        }
        SettingsCommands::AddFolder { path } => {
            let mut settings = store.load().await;
            if settings.add_folder(&path) {
                store.save(&settings).await?;
                println!("Added {}", path);
            } else {
                println!("{} is already shared", path);
            }
            if !settings.mount_specific_folders {
                println!("Note: folder sharing is off (settings set mountSpecificFolders true)");
            }
        }
        SettingsCommands::RemoveFolder { path } => {
            let mut settings = store.load().await;
            if settings.remove_folder(&path) {
                store.save(&settings).await?;
                println!("Removed {}", path);
            } else {
                anyhow::bail!("{} is not in the shared folder list", path);
            }
        }
        SettingsCommands::AcceptDisclaimer => {
            let mut settings = store.load().await;
            settings.accept_disclaimer();
            store.save(&settings).await?;
            println!("Disclaimer accepted");
        }
        SettingsCommands::Path => println!("{}", store.path().display()),
    }

    Ok(())
}
