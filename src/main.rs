use std::{
    fs,
    path::PathBuf,
    process::ExitCode,
    sync::{Arc, Mutex},
};

use clap::{Parser, Subcommand};
use ide_bridge::{
    config::{self, ClientConfig},
    ClientBuilder, CorrelationMode, HeadlessHost, TransportError,
};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ide-bridge")]
#[command(about = "Keep an editor connected to a remote agent over WebSocket")]
struct Cli {
    /// Agent endpoint (defaults to $IDE_BRIDGE_URL, then ws://localhost:65432/ide/ws)
    #[arg(long, global = true)]
    url: Option<String>,

    /// Workspace root reported to the agent
    #[arg(long, global = true, default_value = ".")]
    workspace: PathBuf,

    /// Log at debug level
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Correlate replies by message type only, without request ids
    #[arg(long, global = true)]
    by_type: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stay connected and serve agent requests until the connection drops
    Connect,
    /// Print the agent's session id and exit
    SessionId,
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "ide_bridge=debug"
    } else {
        "ide_bridge=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    let path = config::log_file_path();
    let log_file = path
        .parent()
        .map_or(Ok(()), fs::create_dir_all)
        .and_then(|()| fs::File::create(&path));
    match log_file {
        Ok(file) => builder.with_writer(Mutex::new(file)).with_ansi(false).init(),
        Err(e) => {
            builder.with_writer(std::io::stderr).init();
            tracing::warn!("Logging to stderr, {} not writable: {e}", path.display());
        }
    }
}

async fn connect(cli: &Cli) -> ide_bridge::Result<()> {
    let workspace = fs::canonicalize(&cli.workspace).unwrap_or_else(|_| cli.workspace.clone());
    let mut config = ClientConfig::from_env();
    if let Some(url) = &cli.url {
        config = config.with_url(url.clone());
    }
    if cli.by_type {
        config = config.with_correlation(CorrelationMode::MessageType);
    }

    let client = ClientBuilder::new(Arc::new(HeadlessHost::new(workspace)))
        .config(config)
        .connect()
        .await?;

    match cli.command {
        Commands::SessionId => {
            let session_id = client.get_session_id().await;
            client.disconnect();
            match session_id {
                Some(id) => println!("{id}"),
                None => eprintln!("Agent did not report a session id"),
            }
            Ok(())
        }
        Commands::Connect => {
            let (failed_tx, mut failed_rx) = mpsc::unbounded_channel();
            client.add_event_listener(move |error: &TransportError| {
                let _ = failed_tx.send(error.clone());
            });

            if let Some(id) = client.get_session_id().await {
                eprintln!("Connected, session {id}");
            }

            tokio::select! {
                failure = failed_rx.recv() => {
                    client.disconnect();
                    failure.map_or(Ok(()), |error| Err(error.into()))
                }
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Interrupted, disconnecting");
                    client.disconnect();
                    Ok(())
                }
            }
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = connect(&cli).await {
        tracing::error!("{e}");
        eprintln!("Error: {e}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
