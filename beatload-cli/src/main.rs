mod cli;
mod output;

use crate::{
    cli::{Args, OutputFormat},
    output::OutputManager,
};
use beatload::{Orchestrator, RunConfig};
use clap::Parser;
use std::process;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(&args.to_config());

    let output = OutputManager::new(!args.no_color);
    if let Err(e) = run(&args, &output).await {
        error!("Load test failed: {e:#}");
        let rate_limited = e
            .downcast_ref::<beatload::Error>()
            .is_some_and(|e| e.is_rate_limited());

        match args.output {
            OutputFormat::Json => {
                let error_json = serde_json::json!({
                    "status": "error",
                    "rate_limited": rate_limited,
                    "message": format!("{e:#}"),
                });
                println!("{error_json}");
            }
            OutputFormat::Pretty => {
                if rate_limited {
                    println!("{}", output.rate_limit_banner());
                }
                eprintln!("{} {e:#}", output.error_prefix());
            }
        }
        process::exit(1);
    }
}

async fn run(args: &Args, output: &OutputManager) -> anyhow::Result<()> {
    let config = args.to_config();
    let pretty = args.output == OutputFormat::Pretty;

    if pretty {
        println!("{}", output.banner());
        println!("{}", output.format_config(&config));
    }
    info!(
        url = %config.base_url,
        users = config.users,
        rpm = config.requests_per_minute,
        "Starting load test"
    );

    let orchestrator = Orchestrator::http(config)?;
    let mut events = orchestrator.subscribe();
    let printer = tokio::spawn({
        let output = OutputManager::new(!args.no_color);
        async move {
            loop {
                match events.recv().await {
                    Ok(event) if pretty => {
                        if let Some(line) = output.format_event(&event) {
                            println!("{line}");
                        }
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => break,
                }
            }
        }
    });

    let result = orchestrator.run(shutdown_signal()).await;
    drop(orchestrator);
    let _ = printer.await;
    let report = result?;

    match args.output {
        OutputFormat::Pretty => println!("{}", output.format_report(&report)),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
    }
    Ok(())
}

/// Resolves on Ctrl-C or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C, stopping"),
        _ = terminate => info!("Received SIGTERM, stopping"),
    }
}

fn init_logging(config: &RunConfig) {
    let filter = match config.log_directive() {
        Some(directive) => EnvFilter::new(directive),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}
