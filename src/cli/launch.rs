use anyhow::Result;
use clap::Args;
use tokio_util::sync::CancellationToken;

use tablecloth::config::Config;
use tablecloth::sandbox::SandboxLauncher;

#[derive(Args)]
pub struct LaunchArgs {
    /// Site to open inside the sandbox
    #[arg(short, long)]
    pub url: Option<String>,
}

pub async fn run(args: LaunchArgs) -> Result<()> {
    let config = Config::load()?;
    let launcher = SandboxLauncher::from_config(&config)?;

    let cancel = CancellationToken::new();
    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };

    println!("Starting Windows Sandbox...");
    let mut warnings = Vec::new();
    let result = launcher
        .launch_collecting(None, args.url.as_deref(), &mut warnings, &cancel)
        .await;
    ctrl_c.abort();

    print_warnings(&warnings);

    match result {
        Ok(()) => {
            println!("Sandbox session ended.");
            Ok(())
        }
        Err(e) if e.is_cancelled() => {
            println!("Launch cancelled; the sandbox was closed.");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

pub(crate) fn print_warnings(warnings: &[String]) {
    if warnings.is_empty() {
        return;
    }
    println!();
    println!("Warnings:");
    for warning in warnings {
        println!("  - {}", warning);
    }
}
