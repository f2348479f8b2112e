use certscan::cli::Cli;
use certscan::engine::Scheduler;
use certscan::error::SinkError;
use certscan::input::resolve_targets;
use certscan::model::Config;
use certscan::output::{AgentIdentity, ResultSink, StdoutSink, WebhookSink, REGISTRATION_HINT};
use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let daemon = cli.daemon;
    let cfg = cli.into_config()?;

    let default_level = if cfg.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .with_level(true)
        .init();

    let cfg = Arc::new(cfg);
    let identity = AgentIdentity::detect(&cfg);
    info!(
        primary_ip = %identity.primary_ip,
        machine_id = %identity.machine_id,
        "certificate discovery started"
    );

    let (sink, stdout): (Arc<dyn ResultSink>, Option<StdoutSink>) = match &cfg.webhook_url {
        Some(url) => {
            let webhook = WebhookSink::new(
                url.clone(),
                cfg.token.clone(),
                identity,
                cfg.webhook_timeout,
            )?;
            (Arc::new(webhook), None)
        }
        None => {
            info!(format = %cfg.output.format, "no webhook configured, writing results to stdout");
            let stdout = StdoutSink::new(cfg.output.clone(), identity);
            (Arc::new(stdout.clone()), Some(stdout))
        }
    };
    let scheduler = Scheduler::new(cfg.clone(), sink);

    let outcome = tokio::select! {
        res = run_cycles(&scheduler, &cfg, daemon) => res,
        _ = shutdown_signal() => {
            info!("shutting down");
            Ok(())
        }
    };

    if let Some(stdout) = stdout {
        stdout.shutdown().await?;
    }

    if let Err(err) = outcome {
        error!(error = %err, "stopping scan");
        if matches!(err, SinkError::Unauthorized { .. }) {
            println!("\n\n{REGISTRATION_HINT}");
        }
        std::process::exit(1);
    }
    Ok(())
}

async fn run_cycles(scheduler: &Scheduler, cfg: &Config, daemon: bool) -> Result<(), SinkError> {
    loop {
        let targets = resolve_targets(cfg).await;
        if targets.is_empty() {
            error!("no scannable targets after resolution");
        }
        scheduler.run(&targets).await?;

        if !daemon {
            return Ok(());
        }
        info!(seconds = cfg.scan_interval.as_secs(), "scan cycle complete, sleeping");
        tokio::time::sleep(cfg.scan_interval).await;
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => info!("received SIGTERM"),
                    _ = tokio::signal::ctrl_c() => info!("received Ctrl-C"),
                }
            }
            Err(err) => {
                error!(error = %err, "cannot install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("received Ctrl-C");
    }
}
