//! Background sweep scheduling.
//!
//! Two independent tickers drive [`AuctionCloser`]: the closing sweep and
//! the ending-soon notifier.  The same operations stay callable on demand
//! through the cron endpoints, so a deployment can disable the internal
//! scheduler and drive the sweeps externally instead.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::auction_closer::AuctionCloser;
use crate::config::SweepConfig;
use crate::store::AuctionStore;

pub struct SweepHandles {
    pub closer: JoinHandle<()>,
    pub notifier: JoinHandle<()>,
}

/// Spawn both sweep loops; they run until the shutdown flag flips.
pub fn spawn_sweeps<S: AuctionStore>(
    closer: Arc<AuctionCloser<S>>,
    cfg: &SweepConfig,
    shutdown: watch::Receiver<bool>,
) -> SweepHandles {
    let close_loop = {
        let closer = closer.clone();
        let mut shutdown = shutdown.clone();
        let mut tick = interval(cfg.close_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        let summary = closer.close_expired_auctions().await;
                        if summary.closed > 0 {
                            info!(closed = summary.closed, "closing sweep settled lots");
                        } else {
                            debug!("closing sweep idle");
                        }
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            debug!("closing sweep shutting down");
                            break;
                        }
                    }
                }
            }
        })
    };

    let notify_loop = {
        let mut shutdown = shutdown;
        let mut tick = interval(cfg.ending_soon_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        let summary = closer.notify_ending_soon().await;
                        if summary.notified > 0 {
                            info!(notified = summary.notified, "ending-soon notices sent");
                        }
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            debug!("ending-soon sweep shutting down");
                            break;
                        }
                    }
                }
            }
        })
    };

    SweepHandles {
        closer: close_loop,
        notifier: notify_loop,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auction_closer::CloserPolicy;
    use crate::domain::Lot;
    use crate::events::EventBus;
    use crate::store::MemoryAuctionStore;
    use chrono::{Duration as ChronoDuration, Utc};
    use rust_decimal_macros::dec;
    use std::time::Duration;

    #[tokio::test]
    async fn sweeps_run_and_stop_cleanly() {
        let store = Arc::new(MemoryAuctionStore::new());
        let now = Utc::now();
        let lot = Lot::open(
            "Bin of toroid cores",
            dec!(10),
            dec!(20),
            dec!(1),
            now - ChronoDuration::hours(1),
            now - ChronoDuration::minutes(1),
        );
        let lot_id = lot.id;
        store.insert_lot(lot).await.unwrap();

        let closer = Arc::new(AuctionCloser::new(
            store.clone(),
            EventBus::new(),
            CloserPolicy::default(),
        ));
        let cfg = SweepConfig {
            close_interval: Duration::from_millis(10),
            ending_soon_interval: Duration::from_millis(10),
            ending_soon_horizon: Duration::from_secs(600),
        };
        let (tx, rx) = watch::channel(false);
        let handles = spawn_sweeps(closer, &cfg, rx);

        tokio::time::sleep(Duration::from_millis(100)).await;
        let stored = store.lot(lot_id).await.unwrap().unwrap();
        assert!(stored.status.is_terminal(), "expired lot should be settled");

        tx.send(true).unwrap();
        handles.closer.await.unwrap();
        handles.notifier.await.unwrap();
    }
}
