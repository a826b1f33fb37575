//! HTTP surface of the auction service.
//!
//! Thin by design: handlers do syntactic validation and identity extraction,
//! then delegate to [`BidLedger`], [`OfferDesk`] and [`AuctionCloser`].
//! Every rejection is a JSON envelope `{ "code", "message" }` with the
//! stable codes from [`AuctionError::code`], so the bidding UI can react to
//! `BID_TOO_LOW` versus `AUCTION_ENDED` without string matching.
//!
//! The cron endpoints expose the sweeps for deployments that prefer an
//! external scheduler over the built-in tickers; both paths call the same
//! idempotent operations.
//!
//! A note about (missing) authentication: in production the service sits
//! behind a service mesh that authenticates callers and injects identity in
//! the `x-user-id` / `x-user-name` request headers.  To keep the service
//! self-contained, authn/authz layers are purposely omitted.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::{error, instrument};

use cg_common::{Amount, LotId, OfferId, Timestamp, UserId};

use crate::auction_closer::AuctionCloser;
use crate::bid_ledger::{BidAccepted, BidLedger};
use crate::domain::{Bid, BidderIdentity, Lot, Notification, Offer, RequestMeta, SalesRecord};
use crate::error::AuctionError;
use crate::events::EventBus;
use crate::offer_desk::OfferDesk;
use crate::store::AuctionStore;

// ---------------------------------------------------------------------------
// Router and shared state
// ---------------------------------------------------------------------------

/// Everything a handler needs, cheap to clone per request.
pub struct AppState<S: AuctionStore> {
    pub store: Arc<S>,
    pub ledger: Arc<BidLedger<S>>,
    pub closer: Arc<AuctionCloser<S>>,
    pub desk: Arc<OfferDesk<S>>,
    pub bus: EventBus,
}

impl<S: AuctionStore> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            ledger: self.ledger.clone(),
            closer: self.closer.clone(),
            desk: self.desk.clone(),
            bus: self.bus.clone(),
        }
    }
}

pub fn router<S: AuctionStore>(state: AppState<S>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/bids", post(place_bid::<S>))
        .route("/api/lots/:lot_id", get(get_lot::<S>))
        .route("/api/lots/:lot_id/bids", get(list_bids::<S>))
        .route("/api/lots/:lot_id/sale", get(get_sale::<S>))
        .route("/api/offers", post(submit_offer::<S>))
        .route("/api/offers/:offer_id/withdraw", post(withdraw_offer::<S>))
        .route("/api/admin/lots", post(create_lot::<S>))
        .route("/api/admin/offers/:offer_id", put(respond_to_offer::<S>))
        .route("/api/notifications", get(list_notifications::<S>))
        .route("/api/cron/close-auctions", post(run_close_sweep::<S>))
        .route(
            "/api/cron/ending-soon-notifications",
            post(run_ending_soon_sweep::<S>),
        )
        .with_state(state)
}

// ---------------------------------------------------------------------------
// REST models
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct PlaceBidRequest {
    lot_id: LotId,
    // Optional at the wire level so absence maps onto the taxonomy code
    // instead of a generic deserialization rejection.
    amount: Option<Amount>,
}

#[derive(Debug, Serialize)]
struct BidResponse {
    bid: Bid,
    lot: Lot,
    #[serde(skip_serializing_if = "Option::is_none")]
    reserve_warning: Option<String>,
}

impl From<BidAccepted> for BidResponse {
    fn from(accepted: BidAccepted) -> Self {
        Self {
            bid: accepted.bid,
            lot: accepted.lot,
            reserve_warning: accepted.reserve_warning,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SubmitOfferRequest {
    lot_id: LotId,
    amount: Option<Amount>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum OfferAction {
    Accept,
    Reject,
    Counter,
}

#[derive(Debug, Deserialize)]
struct OfferResponseRequest {
    action: OfferAction,
    counter_amount: Option<Amount>,
    response: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreateLotRequest {
    title: String,
    mpn: Option<String>,
    starting_price: Amount,
    reserve_price: Amount,
    bid_increment: Amount,
    start_time: Timestamp,
    end_time: Timestamp,
    #[serde(default)]
    allow_offers: bool,
    minimum_offer: Option<Amount>,
}

// ---------------------------------------------------------------------------
// Error envelope
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum ApiError {
    Auction(AuctionError),
    Unauthenticated,
    BadRequest(String),
}

impl From<AuctionError> for ApiError {
    fn from(e: AuctionError) -> Self {
        ApiError::Auction(e)
    }
}

impl From<crate::store::StoreError> for ApiError {
    fn from(e: crate::store::StoreError) -> Self {
        ApiError::Auction(AuctionError::Store(e))
    }
}

fn status_for(e: &AuctionError) -> StatusCode {
    match e {
        AuctionError::LotNotFound(_) | AuctionError::OfferNotFound(_) => StatusCode::NOT_FOUND,
        AuctionError::Contention(_) | AuctionError::Timeout(_) => StatusCode::SERVICE_UNAVAILABLE,
        AuctionError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::BAD_REQUEST,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::Auction(e) => {
                let status = status_for(e);
                // Persistence details are logged here, never returned.
                let message = if matches!(e, AuctionError::Store(_)) {
                    error!(error = %e, "request failed on storage");
                    "internal error".to_string()
                } else {
                    e.to_string()
                };
                (status, e.code(), message)
            }
            ApiError::Unauthenticated => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHENTICATED",
                "missing caller identity".to_string(),
            ),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
        };

        let body = serde_json::json!({ "code": code, "message": message });
        (status, Json(body)).into_response()
    }
}

// ---------------------------------------------------------------------------
// Identity and request metadata
// ---------------------------------------------------------------------------

/// Caller identity as injected by the mesh.
fn identity(headers: &HeaderMap) -> Result<BidderIdentity, ApiError> {
    let id = headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<UserId>().ok())
        .ok_or(ApiError::Unauthenticated)?;
    let name = headers
        .get("x-user-name")
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    Ok(match name {
        Some(name) => BidderIdentity::named(id, name),
        None => BidderIdentity::new(id),
    })
}

fn request_meta(headers: &HeaderMap) -> RequestMeta {
    RequestMeta {
        ip_address: headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned),
        user_agent: headers
            .get("user-agent")
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned),
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

#[instrument(name = "place_bid", skip_all)]
async fn place_bid<S: AuctionStore>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
    Json(payload): Json<PlaceBidRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let bidder = identity(&headers)?;
    let meta = request_meta(&headers);
    let amount = payload.amount.ok_or(AuctionError::BidAmountRequired)?;
    let accepted = state
        .ledger
        .place_bid(payload.lot_id, &bidder, amount, meta)
        .await?;
    Ok((StatusCode::CREATED, Json(BidResponse::from(accepted))))
}

#[instrument(name = "get_lot", skip(state))]
async fn get_lot<S: AuctionStore>(
    State(state): State<AppState<S>>,
    Path(lot_id): Path<LotId>,
) -> Result<Json<Lot>, ApiError> {
    let lot = state
        .store
        .lot(lot_id)
        .await?
        .ok_or(AuctionError::LotNotFound(lot_id))?;
    Ok(Json(lot))
}

#[instrument(name = "list_bids", skip(state))]
async fn list_bids<S: AuctionStore>(
    State(state): State<AppState<S>>,
    Path(lot_id): Path<LotId>,
) -> Result<Json<Vec<Bid>>, ApiError> {
    Ok(Json(state.store.bids_for_lot(lot_id).await?))
}

#[instrument(name = "get_sale", skip(state))]
async fn get_sale<S: AuctionStore>(
    State(state): State<AppState<S>>,
    Path(lot_id): Path<LotId>,
) -> Result<Json<SalesRecord>, ApiError> {
    let sale = state
        .store
        .sale_for_lot(lot_id)
        .await?
        .ok_or(AuctionError::LotNotFound(lot_id))?;
    Ok(Json(sale))
}

#[instrument(name = "submit_offer", skip_all)]
async fn submit_offer<S: AuctionStore>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
    Json(payload): Json<SubmitOfferRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let buyer = identity(&headers)?;
    let amount = payload.amount.ok_or(AuctionError::OfferAmountRequired)?;
    let offer = state
        .desk
        .submit_offer(payload.lot_id, &buyer, amount, payload.message)
        .await?;
    Ok((StatusCode::CREATED, Json(offer)))
}

#[instrument(name = "withdraw_offer", skip(state, headers))]
async fn withdraw_offer<S: AuctionStore>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
    Path(offer_id): Path<OfferId>,
) -> Result<Json<Offer>, ApiError> {
    let caller = identity(&headers)?;
    let offer = state.desk.withdraw_offer(offer_id, caller.id).await?;
    Ok(Json(offer))
}

#[instrument(name = "respond_to_offer", skip(state, headers, payload))]
async fn respond_to_offer<S: AuctionStore>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
    Path(offer_id): Path<OfferId>,
    Json(payload): Json<OfferResponseRequest>,
) -> Result<Json<Offer>, ApiError> {
    let admin = identity(&headers)?;
    let offer = match payload.action {
        OfferAction::Accept => {
            state
                .desk
                .accept_offer(offer_id, &admin, payload.response)
                .await?
        }
        OfferAction::Reject => {
            state
                .desk
                .reject_offer(offer_id, &admin, payload.response)
                .await?
        }
        OfferAction::Counter => {
            let amount = payload
                .counter_amount
                .ok_or_else(|| ApiError::BadRequest("counter_amount is required".into()))?;
            state
                .desk
                .counter_offer(offer_id, &admin, amount, payload.response)
                .await?
        }
    };
    Ok(Json(offer))
}

#[instrument(name = "create_lot", skip(state, payload))]
async fn create_lot<S: AuctionStore>(
    State(state): State<AppState<S>>,
    Json(payload): Json<CreateLotRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if payload.title.trim().is_empty() {
        return Err(ApiError::BadRequest("title must not be empty".into()));
    }
    if payload.end_time <= payload.start_time {
        return Err(ApiError::BadRequest(
            "end_time must be after start_time".into(),
        ));
    }

    let mut lot = Lot::open(
        payload.title,
        payload.starting_price,
        payload.reserve_price,
        payload.bid_increment,
        payload.start_time,
        payload.end_time,
    );
    lot.mpn = payload.mpn;
    lot.allow_offers = payload.allow_offers;
    lot.minimum_offer = payload.minimum_offer;

    state.store.insert_lot(lot.clone()).await?;
    Ok((StatusCode::CREATED, Json(lot)))
}

#[instrument(name = "list_notifications", skip_all)]
async fn list_notifications<S: AuctionStore>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
) -> Result<Json<Vec<Notification>>, ApiError> {
    let caller = identity(&headers)?;
    Ok(Json(state.store.notifications_for_user(caller.id).await?))
}

#[instrument(name = "run_close_sweep", skip_all)]
async fn run_close_sweep<S: AuctionStore>(
    State(state): State<AppState<S>>,
) -> Json<crate::auction_closer::CloseSummary> {
    Json(state.closer.close_expired_auctions().await)
}

#[instrument(name = "run_ending_soon_sweep", skip_all)]
async fn run_ending_soon_sweep<S: AuctionStore>(
    State(state): State<AppState<S>>,
) -> Json<crate::auction_closer::NotifySummary> {
    Json(state.closer.notify_ending_soon().await)
}
