use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use clap::Args;
use tokio_util::sync::CancellationToken;
use tracing::info;

use tablecloth::concurrency::InstanceLock;
use tablecloth::config::Config;
use tablecloth::proxy::ProxyHost;
use tablecloth::status::{PollSchedule, StatusPoller, StatusService, first_address};

#[derive(Args)]
pub struct ServeArgs {
    /// Address(es) the control-plane server bound; the first one is used
    #[arg(short = 'c', long = "control-plane", required = true, num_args = 1..)]
    pub control_plane: Vec<SocketAddr>,

    /// Override the proxy port from config.toml
    #[arg(short, long)]
    pub port: Option<u16>,
}

pub async fn run(args: ServeArgs) -> Result<()> {
    let config = Config::load()?;

    let lock = InstanceLock::new(&config.paths)?;
    let Some(_guard) = lock.try_acquire()? else {
        bail!(
            "TableCloth is already running (lock held: {})",
            lock.path().display()
        );
    };

    let Some(control_plane) = first_address(&args.control_plane) else {
        bail!("No control-plane address given");
    };

    let mut proxy_config = config.proxy.clone();
    if let Some(port) = args.port {
        proxy_config.port = port;
    }
    let proxy = Arc::new(ProxyHost::from_config(&proxy_config)?);
    let status = Arc::new(StatusService::new(
        Some(control_plane),
        proxy.clone(),
        Duration::from_millis(config.status.probe_timeout_ms),
    ));

    let cancel = CancellationToken::new();
    let mut tasks = vec![
        status.spawn_transition_watcher(cancel.clone()),
        spawn_status_line(&status, cancel.clone()),
    ];

    let target = upstream_url(control_plane);
    tasks.push({
        let proxy = proxy.clone();
        tokio::spawn(async move {
            proxy.start(&target).await;
        })
    });

    status.refresh().await;
    tasks.push(StatusPoller::new(status.clone(), PollSchedule::default()).spawn(cancel.clone()));

    info!(
        control_plane = %control_plane,
        port = proxy_config.port,
        "Serving; press Ctrl+C to stop"
    );
    tokio::signal::ctrl_c().await?;

    info!("Shutting down");
    cancel.cancel();
    for task in tasks {
        let _ = task.await;
    }
    proxy.dispose().await;

    Ok(())
}

/// `http://<addr>`, with a wildcard bind address replaced by loopback.
fn upstream_url(addr: SocketAddr) -> String {
    let addr = if addr.ip().is_unspecified() {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), addr.port())
    } else {
        addr
    };
    format!("http://{}", addr)
}

/// Print the status line whenever it changes.
fn spawn_status_line(
    status: &Arc<StatusService>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    let mut latest = status.watch();
    tokio::spawn(async move {
        let mut shown = String::new();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                changed = latest.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }

            let line = latest
                .borrow_and_update()
                .as_ref()
                .map(|health| health.summary());
            if let Some(line) = line
                && line != shown
            {
                println!("[status] {}", line);
                shown = line;
            }
        }
    })
}
