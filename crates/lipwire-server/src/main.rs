use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use lipwire_media::scripted::{ScriptedMediaFactory, ScriptedTranscriberFactory};
use lipwire_server::{connection, tls, AppState, ServerConfig};
use lipwire_server::tokens::load_signing_key;
use lipwire_store::Store;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,lipwire_server=debug")),
        )
        .init();

    info!("Starting lipwire signaling server v{}", env!("CARGO_PKG_VERSION"));

    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    let store = Arc::new(match &config.database_path {
        Some(path) => Store::open_at(path)?,
        None => Store::open_default()?,
    });

    let signing_key = load_signing_key(config.token_key_path.as_deref())?;

    // The captioning backends plug in here; the scripted pipeline negotiates
    // media and emits nothing, which keeps caption-less deployments honest.
    let media = Arc::new(ScriptedMediaFactory::new());
    let transcribers = Arc::new(ScriptedTranscriberFactory::new());

    let state = AppState::new(config.clone(), store, signing_key, media, transcribers);

    // Evict rate-limit buckets idle for >10 min, every 5 min.
    let limiter = state.limiter.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(300));
        loop {
            interval.tick().await;
            limiter.purge_stale(600.0).await;
        }
    });

    let tls_acceptor = match (&config.tls_cert, &config.tls_key) {
        (Some(cert), Some(key)) => {
            let tls_config = tls::load_tls_config(cert, key)?;
            info!(cert = %cert.display(), "TLS enabled");
            Some(TlsAcceptor::from(tls_config))
        }
        _ => {
            warn!("TLS cert/key not configured; serving plaintext websockets");
            None
        }
    };

    let listener = TcpListener::bind(config.listen_addr()).await?;
    info!(addr = %config.listen_addr(), tls = tls_acceptor.is_some(), "listening");

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, remote) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        continue;
                    }
                };

                let state = state.clone();
                let acceptor = tls_acceptor.clone();
                tokio::spawn(async move {
                    match acceptor {
                        Some(acceptor) => match acceptor.accept(stream).await {
                            Ok(tls_stream) => connection::serve(state, tls_stream, remote).await,
                            Err(e) => {
                                warn!(remote = %remote, error = %e, "TLS accept failed");
                            }
                        },
                        None => connection::serve(state, stream, remote).await,
                    }
                });
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down");
                break;
            }
        }
    }

    Ok(())
}
