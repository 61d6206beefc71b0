use anyhow::Result;
use clap::Args;

use tablecloth::config::{Config, SettingsStore};
use tablecloth::sandbox::ProfileComposer;

use super::launch::print_warnings;

#[derive(Args)]
pub struct ProfileArgs {
    /// Site the bootstrap script should open
    #[arg(short, long)]
    pub url: Option<String>,

    /// Print the generated profile
    #[arg(short, long)]
    pub print: bool,
}

pub async fn run(args: ProfileArgs) -> Result<()> {
    let config = Config::load()?;
    let composer = ProfileComposer::from_config(&config)?;
    let settings = SettingsStore::new(config.paths.settings_file()).load().await;

    let mut warnings = Vec::new();
    let profile = composer
        .compose(&settings, &mut warnings, args.url.as_deref())
        .await?;

    println!("Profile: {}", profile.display());
    println!("Script:  {}", config.paths.bootstrap_script().display());

    if args.print {
        println!();
        println!("{}", tokio::fs::read_to_string(&profile).await?);
    }

    print_warnings(&warnings);
    Ok(())
}
