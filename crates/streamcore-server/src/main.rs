//! Binary entry point: loads configuration, builds the shared application
//! state, wires the router, and serves with graceful shutdown.

use std::net::SocketAddr;

use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use streamcore_server::config::{LogFormat, ProducerConfig};

fn init_tracing(format: LogFormat) {
    let env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(tracing::Level::INFO.into());

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        LogFormat::Compact => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().compact())
                .init();
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for sigterm");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Tracing needs the resolved format before it can init, but building
    // the rest of the app state can fail loudly once a subscriber exists.
    let bootstrap_config = match streamcore_server::config::ServerConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("fatal configuration error: {e}");
            return Err(e.into());
        }
    };
    init_tracing(bootstrap_config.log_format);

    let bind_addr = bootstrap_config.bind_addr();
    let state = match streamcore_server::build_app_state(bootstrap_config).await {
        Ok(v) => v,
        Err(e) => {
            error!(error = %e, "fatal configuration error, refusing to start");
            return Err(e);
        }
    };

    let producer_config = ProducerConfig::from_env();
    let producer_handle = streamcore_server::spawn_producer(state.broker.clone(), &producer_config);

    let app = streamcore_server::build_router(state);

    let addr: SocketAddr = bind_addr
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid bind address {bind_addr}: {e}"))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, "streamcore-server listening");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some((shutdown_tx, join_handle)) = producer_handle {
        let _ = shutdown_tx.send(());
        let _ = join_handle.await;
    }

    info!("streamcore-server shut down cleanly");
    Ok(())
}
