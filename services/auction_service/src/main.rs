//! Binary entry point: wires the store, the transactional components, the
//! background sweeps and the HTTP API, then runs until SIGINT.

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use auction_service::auction_closer::AuctionCloser;
use auction_service::bid_ledger::BidLedger;
use auction_service::config;
use auction_service::events::EventBus;
use auction_service::notifier::{spawn_delivery_worker, LogSink};
use auction_service::offer_desk::OfferDesk;
use auction_service::rest_api::{self, AppState};
use auction_service::scheduler::spawn_sweeps;
use auction_service::store::MemoryAuctionStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Optional config file as the first CLI argument.
    let cfg = config::init(std::env::args().nth(1)).context("failed to load configuration")?;
    info!(service = %cfg.service.name, "starting auction service");

    let store = Arc::new(MemoryAuctionStore::new());
    let bus = EventBus::new();

    let ledger = Arc::new(BidLedger::new(
        store.clone(),
        bus.clone(),
        cfg.ledger_policy(),
    ));
    let closer = Arc::new(AuctionCloser::new(
        store.clone(),
        bus.clone(),
        cfg.closer_policy(),
    ));
    let desk = Arc::new(OfferDesk::new(store.clone(), bus.clone(), cfg.desk_policy()));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeps = spawn_sweeps(closer.clone(), &cfg.sweeps, shutdown_rx.clone());
    let delivery = spawn_delivery_worker(&bus, LogSink, shutdown_rx);

    let app = rest_api::router(AppState {
        store,
        ledger,
        closer,
        desk,
        bus,
    });

    let addr = SocketAddr::from((cfg.network.host, cfg.network.http_port));
    info!(%addr, "listening");
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for shutdown signal");
            }
            info!("shutdown signal received");
        })
        .await
        .context("http server failed")?;

    // Stop the background workers and give them a bounded grace period.
    let _ = shutdown_tx.send(true);
    let drain = async {
        let _ = sweeps.closer.await;
        let _ = sweeps.notifier.await;
        let _ = delivery.await;
    };
    if tokio::time::timeout(cfg.service.shutdown_timeout, drain)
        .await
        .is_err()
    {
        warn!("background workers did not drain in time");
    }

    info!("auction service stopped");
    Ok(())
}
