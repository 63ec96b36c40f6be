//! probe-sync CLI entry point

use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tokio::sync::mpsc;
use url::Url;

use probe_sync::rpc::discovery;
use probe_sync::{Cli, ClientConfig, ClientSession, Commands, SyncError};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            return e.exit_code();
        }
    };
    cli.apply(&mut config);
    init_tracing(&config.logging.level);

    match run(cli, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            match e.downcast_ref::<SyncError>() {
                Some(err) => err.exit_code(),
                None => ExitCode::FAILURE,
            }
        }
    }
}

fn load_config(cli: &Cli) -> probe_sync::Result<ClientConfig> {
    match &cli.config {
        Some(path) => ClientConfig::load_from(path),
        None => ClientConfig::load(),
    }
}

fn init_tracing(level: &str) {
    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    match format!("probe_sync={}", level).parse() {
        Ok(directive) => filter = filter.add_directive(directive),
        Err(e) => eprintln!("Ignoring log level '{}': {}", level, e),
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli, config: ClientConfig) -> anyhow::Result<()> {
    match cli.command {
        Commands::Discover(_) => {
            let base = Url::parse(&config.server.url)
                .with_context(|| format!("invalid server url '{}'", config.server.url))?;
            let choice = discovery::discover(&reqwest::Client::new(), &base).await?;
            match choice {
                discovery::TransportChoice::WebSocket { url } => println!("websocket {}", url),
                discovery::TransportChoice::Http { base } => println!("http {}", base),
            }
        }
        Commands::Call(args) => {
            let payload: serde_json::Value =
                serde_json::from_str(&args.payload).context("payload is not valid JSON")?;
            let session = ClientSession::connect(config).await?;
            let result = session.call(payload).await;
            session.close().await;
            println!("{}", serde_json::to_string_pretty(&result?)?);
        }
        Commands::Workers(args) => {
            let session = ClientSession::connect(config).await?;
            let (tx, mut rx) = mpsc::unbounded_channel::<Vec<String>>();
            let subscription = session
                .subscribe_worker_status(move |statuses| {
                    let _ = tx.send(statuses.to_vec());
                })
                .await?;

            let mut seen = 0usize;
            loop {
                tokio::select! {
                    statuses = rx.recv() => {
                        let Some(statuses) = statuses else { break };
                        println!("{}", statuses.join(" | "));
                        seen += 1;
                        if args.count.is_some_and(|count| seen >= count) {
                            break;
                        }
                    }
                    _ = tokio::signal::ctrl_c() => break,
                }
            }

            if let Err(e) = session.unsubscribe_worker_status(subscription).await {
                tracing::warn!("Unsubscribe failed: {}", e);
            }
            session.close().await;
        }
    }
    Ok(())
}
