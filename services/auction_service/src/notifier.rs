//! Delivery worker for auction events.
//!
//! Subscribes to the [`EventBus`](crate::events::EventBus) and hands events
//! to downstream delivery (email, push, websockets).  The stub here logs
//! each event; a real sink implements [`DeliverySink`] and gets plugged in
//! at startup.  The worker is strictly downstream of the transactional
//! paths: it can lag, drop events, or die without affecting a single bid.

use async_trait::async_trait;
use tokio::sync::{broadcast::error::RecvError, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::events::{AuctionEvent, EventBus};

#[async_trait]
pub trait DeliverySink: Send + Sync + 'static {
    async fn deliver(&self, event: &AuctionEvent);
}

/// Default sink: structured log lines only.
pub struct LogSink;

#[async_trait]
impl DeliverySink for LogSink {
    async fn deliver(&self, event: &AuctionEvent) {
        match event {
            AuctionEvent::BidPlaced {
                lot_id,
                bidder_id,
                amount,
                extended,
                ..
            } => {
                info!(%lot_id, %bidder_id, %amount, extended, "bid placed");
            }
            AuctionEvent::LotSold {
                lot_id,
                winner,
                price,
                sale_id,
            } => {
                info!(%lot_id, %winner, %price, %sale_id, "lot sold");
            }
            AuctionEvent::LotUnsold { lot_id } => {
                info!(%lot_id, "lot closed unsold");
            }
            AuctionEvent::EndingSoon { lot_id, end_time } => {
                info!(%lot_id, %end_time, "lot ending soon");
            }
            AuctionEvent::OfferReceived {
                lot_id,
                offer_id,
                amount,
                ..
            } => {
                info!(%lot_id, %offer_id, %amount, "offer received");
            }
            AuctionEvent::OfferAccepted {
                lot_id,
                offer_id,
                buyer,
                amount,
            } => {
                info!(%lot_id, %offer_id, %buyer, %amount, "offer accepted");
            }
        }
    }
}

/// Run the delivery loop until the shutdown flag flips.
pub fn spawn_delivery_worker<D: DeliverySink>(
    bus: &EventBus,
    sink: D,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                event = rx.recv() => match event {
                    Ok(event) => sink.deliver(&event).await,
                    Err(RecvError::Lagged(missed)) => {
                        // Advisory stream: dropping under load is acceptable.
                        warn!(missed, "delivery worker lagged, events dropped");
                    }
                    Err(RecvError::Closed) => break,
                },
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        debug!("delivery worker shutting down");
                        break;
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use cg_common::{LotId, UserId};
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingSink(Arc<AtomicUsize>);

    #[async_trait]
    impl DeliverySink for CountingSink {
        async fn deliver(&self, _event: &AuctionEvent) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn worker_consumes_events_and_stops_on_shutdown() {
        let bus = EventBus::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = watch::channel(false);
        let handle = spawn_delivery_worker(&bus, CountingSink(seen.clone()), rx);

        bus.publish(AuctionEvent::LotUnsold { lot_id: LotId::new() });
        bus.publish(AuctionEvent::BidPlaced {
            lot_id: LotId::new(),
            bidder_id: UserId::new(),
            amount: dec!(55),
            previous_bidder: None,
            extended: false,
            end_time: chrono::Utc::now(),
        });

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(seen.load(Ordering::SeqCst), 2);

        tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
