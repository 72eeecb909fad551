//! `falcon-daemon`: aria2-compatible JSON-RPC frontend for the engine.

use anyhow::Result;
use clap::Parser;

use falcon_core::{config, logging, DownloadEngine};

use falcon_daemon::rpc::{RpcServer, RpcServerConfig};

/// aria2-compatible JSON-RPC daemon for the falcon download engine.
#[derive(Debug, Parser)]
#[command(name = "falcon-daemon", version)]
struct Args {
    /// Bind address (default from config, normally 127.0.0.1).
    #[arg(long, value_name = "ADDR")]
    bind: Option<String>,

    /// Listen port (default from config, normally 6800).
    #[arg(long, short = 'p', value_name = "PORT")]
    port: Option<u16>,

    /// Shared secret; clients must send "token:<secret>" as the first
    /// params element.
    #[arg(long, value_name = "SECRET")]
    secret: Option<String>,

    /// Emit CORS headers for browser clients.
    #[arg(long)]
    enable_cors: bool,

    /// Override the configured concurrent-task cap.
    #[arg(long, value_name = "N")]
    max_concurrent: Option<usize>,
}

fn main() {
    if logging::init_logging().is_err() {
        logging::init_logging_stderr();
    }

    if let Err(err) = run(Args::parse()) {
        eprintln!("falcon-daemon error: {:#}", err);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    let mut file_config = config::load_or_init()?;
    if let Some(max) = args.max_concurrent {
        file_config.max_concurrent_tasks = max;
    }

    let rpc_config = RpcServerConfig {
        bind_address: args.bind.unwrap_or(file_config.rpc.bind_address.clone()),
        listen_port: args.port.unwrap_or(file_config.rpc.listen_port),
        secret: args.secret.unwrap_or(file_config.rpc.secret.clone()),
        enable_cors: args.enable_cors || file_config.rpc.enable_cors,
    };

    let engine = DownloadEngine::with_default_handlers(file_config.engine_config());
    let server = RpcServer::new(engine.clone(), rpc_config);
    let addr = server.start()?;
    println!("falcon-daemon listening on {}", addr);

    let (shutdown_tx, shutdown_rx) = std::sync::mpsc::channel::<()>();
    ctrlc::set_handler(move || {
        let _ = shutdown_tx.send(());
    })?;

    // Block until SIGINT/SIGTERM, then cancel everything before exit.
    let _ = shutdown_rx.recv();
    tracing::info!("shutdown signal received");
    server.stop();
    engine.shutdown();
    Ok(())
}
