use affina_overlay::{
    api::HttpBackend,
    config::{load_config, Args},
    connection::spawn_connection,
    controller::SessionController,
    engine::{Engine, EngineContext, DEFAULT_SHUTDOWN_GRACE},
    host::{read_commands, write_outputs, HostCommand},
    logging::init_logging,
    profile::ProfileStore,
};
use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use tokio::io::BufReader;
use tokio::sync::mpsc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = load_config(args).context("invalid configuration")?;
    let _log_guard = init_logging(&config);
    info!(
        "affina_overlay_start: backend={} stream={} state_dir={}",
        config.backend_url,
        config.stream_url,
        config.state_dir.display()
    );

    let profile = ProfileStore::new(&config.state_dir);
    let user_name = match profile.load_user_name() {
        Ok(name) => name,
        Err(err) => {
            warn!("profile_load_error: {err}");
            None
        }
    };
    let controller = SessionController::new(user_name);

    let backend = Arc::new(HttpBackend::new(
        config.backend_url.clone(),
        config.request_timeout,
    ));
    let (stream, updates) = spawn_connection(config.stream_url.clone(), config.reconnect);

    let (command_tx, command_rx) = mpsc::channel::<HostCommand>(64);
    let (output_tx, output_rx) = mpsc::channel(256);

    let stdin_tx = command_tx.clone();
    tokio::spawn(async move {
        read_commands(BufReader::new(tokio::io::stdin()), stdin_tx.clone()).await;
        let _ = stdin_tx.send(HostCommand::CloseApp).await;
    });

    let signal_tx = command_tx;
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("signal_received: closing");
            let _ = signal_tx.send(HostCommand::CloseApp).await;
        }
    });

    let writer = tokio::spawn(write_outputs(tokio::io::stdout(), output_rx));

    let ctx = EngineContext {
        backend,
        stream,
        profile,
        shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
    };
    let controller = Engine::run(ctx, controller, command_rx, updates, output_tx).await;
    let _ = writer.await;
    info!("affina_overlay_exit: lifecycle={}", controller.lifecycle());

    // The stdin reader can stay parked in a blocking read; don't wait for it.
    std::process::exit(0)
}
