//! Ephemeral Rooms relay server.
//!
//! A cryptographically blind router: it registers rooms for hosts, admits
//! clients, forwards opaque encrypted frames, and destroys rooms the moment
//! their host goes silent. It stores nothing - no files, no database, no
//! message bytes beyond the in-flight queues.
//!
//! ```bash
//! # Development (plain HTTP/WS)
//! rooms-relay --insecure --addr 127.0.0.1:8080
//!
//! # Production (TLS)
//! rooms-relay --cert relay.pem --key relay-key.pem --addr 0.0.0.0:443
//! ```
//!
//! Exit codes: 0 normal, 1 startup failure, 2 configuration error.

mod http;
mod invite;
mod metrics;
mod ratelimit;
mod room;
mod router;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use axum_server::tls_rustls::RustlsConfig;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use rooms_protocol::core::{DEFAULT_MAX_CLIENTS_PER_ROOM, DEFAULT_MAX_ROOMS};

use http::build_router;
use router::AppState;

/// Limiter garbage-collection cadence.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Parser)]
#[command(name = "rooms-relay", version, about = "Ephemeral Rooms blind relay")]
struct Args {
    /// TLS certificate chain (PEM). Required unless --insecure.
    #[arg(long, env = "ROOMS_RELAY_CERT")]
    cert: Option<PathBuf>,

    /// TLS private key (PEM). Required unless --insecure.
    #[arg(long, env = "ROOMS_RELAY_KEY")]
    key: Option<PathBuf>,

    /// Serve plain HTTP. Development only.
    #[arg(long)]
    insecure: bool,

    /// Listen address.
    #[arg(long, default_value = "0.0.0.0:8443", env = "ROOMS_RELAY_ADDR")]
    addr: SocketAddr,

    /// Server-wide room cap.
    #[arg(long, default_value_t = DEFAULT_MAX_ROOMS)]
    max_rooms: usize,

    /// Participants per room.
    #[arg(long, default_value_t = DEFAULT_MAX_CLIENTS_PER_ROOM)]
    max_clients_per_room: usize,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if !args.insecure && (args.cert.is_none() || args.key.is_none()) {
        error!("TLS requires both --cert and --key (or pass --insecure for development)");
        std::process::exit(2);
    }
    if args.max_rooms == 0 || args.max_clients_per_room == 0 {
        error!("capacity limits must be nonzero");
        std::process::exit(2);
    }

    if let Err(e) = run(args).await {
        error!("startup failed: {e:#}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let state = AppState::new(args.max_rooms, args.max_clients_per_room);

    // Periodic limiter GC.
    {
        let conn_limiter = state.conn_limiter.clone();
        let msg_limiter = state.msg_limiter.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                tick.tick().await;
                conn_limiter.sweep();
                msg_limiter.sweep();
            }
        });
    }

    let registry = state.registry.clone();
    let app = build_router(state)
        .into_make_service_with_connect_info::<SocketAddr>();

    let served = async {
        if args.insecure {
            warn!("serving WITHOUT TLS (--insecure); development only");
            info!("relay listening on http://{}", args.addr);
            axum_server::bind(args.addr)
                .serve(app)
                .await
                .context("server error")
        } else {
            let cert = args.cert.expect("checked in main");
            let key = args.key.expect("checked in main");
            let tls = RustlsConfig::from_pem_file(&cert, &key)
                .await
                .context("loading TLS certificate/key")?;
            info!("relay listening on https://{}", args.addr);
            axum_server::bind_rustls(args.addr, tls)
                .serve(app)
                .await
                .context("server error")
        }
    };

    tokio::select! {
        result = served => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received, destroying all rooms");
            registry.destroy_all("server_evicted");
        }
    }
    Ok(())
}
