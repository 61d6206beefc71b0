pub mod config;
pub mod launch;
pub mod paths;
pub mod profile;
pub mod serve;
pub mod settings;
pub mod status;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "tablecloth")]
#[command(
    author,
    version,
    about = "Open untrusted sites in a disposable Windows Sandbox session"
)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Launch a sandbox session and wait for it to end
    Launch(launch::LaunchArgs),

    /// Write the sandbox profile without starting a session
    Profile(profile::ProfileArgs),

    /// Manage launch settings
    Settings(settings::SettingsArgs),

    /// Run the reverse proxy and status poller until Ctrl+C
    Serve(serve::ServeArgs),

    /// Check control plane and proxy reachability once
    Status(status::StatusArgs),

    /// Configuration management
    Config(config::ConfigArgs),

    /// Show resolved directory paths
    Paths,
}
