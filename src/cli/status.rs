use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Args;

use tablecloth::config::Config;
use tablecloth::proxy::ProxyHost;
use tablecloth::sandbox::AppLocations;
use tablecloth::status::{StatusService, client_config_json};

#[derive(Args)]
pub struct StatusArgs {
    /// Control-plane server address to probe
    #[arg(short = 'c', long = "control-plane")]
    pub control_plane: Option<SocketAddr>,

    /// Print the full status as JSON
    #[arg(long)]
    pub json: bool,

    /// Print client configuration for the proxy (requires a healthy status)
    #[arg(long, conflicts_with = "json")]
    pub client_config: bool,
}

pub async fn run(args: StatusArgs) -> Result<()> {
    let config = Config::load()?;
    let proxy = Arc::new(ProxyHost::from_config(&config.proxy)?);
    let service = StatusService::new(
        args.control_plane,
        proxy,
        Duration::from_millis(config.status.probe_timeout_ms),
    );

    let health = service.check_status().await;

    if args.client_config {
        let app = AppLocations::current()?;
        println!("{}", client_config_json(Some(&health), &app.install_dir)?);
    } else if args.json {
        println!("{}", serde_json::to_string_pretty(&health)?);
    } else {
        println!("{}", health.summary());
    }

    Ok(())
}
