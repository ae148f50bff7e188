use axum::{
    Json, Router,
    extract::{
        FromRequest, FromRequestParts, State,
        rejection::{JsonRejection, PathRejection, QueryRejection},
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    advisory::{self, Advice},
    errors::{AdvisoryError, TradingError},
    events::Event,
    instrument::Pair,
    orders::{NewOrder, Order},
    state::AppState,
    submit::submit,
    tick::Tick,
};

/// JSON error body: `{"error": "..."}` with a status picked from the error.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<TradingError> for ApiError {
    fn from(e: TradingError) -> Self {
        let status = match &e {
            TradingError::Validation(_) => StatusCode::BAD_REQUEST,
            TradingError::NotFound(_) => StatusCode::NOT_FOUND,
            TradingError::InvalidState { .. } => StatusCode::CONFLICT,
            TradingError::Upstream(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        ApiError::new(status, e.to_string())
    }
}

impl From<AdvisoryError> for ApiError {
    fn from(e: AdvisoryError) -> Self {
        TradingError::from(e).into()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(r: JsonRejection) -> Self {
        warn!("rejected request body: {}", r.body_text());
        ApiError::new(r.status(), r.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(r: PathRejection) -> Self {
        warn!("rejected path: {}", r.body_text());
        ApiError::new(r.status(), r.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(r: QueryRejection) -> Self {
        warn!("rejected query: {}", r.body_text());
        ApiError::new(r.status(), r.body_text())
    }
}

/// `Json` extractor whose rejections use the [`ApiError`] body shape.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

/// `Path` extractor with [`ApiError`] rejections.
#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(ApiError))]
pub struct ApiPath<T>(pub T);

/// `Query` extractor with [`ApiError`] rejections.
#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(ApiError))]
pub struct ApiQuery<T>(pub T);

#[derive(Debug, Serialize)]
pub struct MarketSnapshot {
    pub pair: Pair,
    pub capacity: usize,
    pub latest: Option<Decimal>,
    pub ticks: Vec<Tick>,
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    #[serde(default)]
    pub after: u64,
}

/// Places an order after the configured acceptance latency and returns it.
pub async fn create_order(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<NewOrder>,
) -> Result<Json<Order>, ApiError> {
    let pending = submit(&state, req, state.config.accept_latency, &state.shutdown);
    match pending.accepted().await? {
        Some(order) => Ok(Json(order)),
        None => Err(ApiError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "order withdrawn: engine shutting down",
        )),
    }
}

pub async fn list_orders(State(state): State<AppState>) -> Json<Vec<Order>> {
    Json(state.engine().book().list_all())
}

pub async fn list_open_orders(State(state): State<AppState>) -> Json<Vec<Order>> {
    Json(state.engine().book().list_open())
}

pub async fn get_order(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<Json<Order>, ApiError> {
    let engine = state.engine();
    let order = engine.book().get(id).cloned();
    order.map(Json).ok_or_else(|| TradingError::NotFound(id).into())
}

pub async fn cancel_order(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<Json<Order>, ApiError> {
    let cancelled = state.engine().cancel(id)?;
    Ok(Json(cancelled))
}

pub async fn market(State(state): State<AppState>) -> Json<MarketSnapshot> {
    let engine = state.engine();
    let window = engine.window();
    Json(MarketSnapshot {
        pair: engine.pair(),
        capacity: window.capacity(),
        latest: window.latest().map(Tick::price),
        ticks: window.snapshot(),
    })
}

pub async fn events(
    State(state): State<AppState>,
    ApiQuery(q): ApiQuery<EventsQuery>,
) -> Json<Vec<Event>> {
    Json(state.engine().events().since(q.after))
}

pub async fn analysis(State(state): State<AppState>) -> Result<Json<Advice>, ApiError> {
    Ok(Json(advisory::request_analysis(&state).await?))
}

pub async fn script(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<NewOrder>,
) -> Result<Json<Advice>, ApiError> {
    Ok(Json(advisory::request_script(&state, &req).await?))
}

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| tail_events(socket, state))
}

/// Sends the event history, then every new event as it is appended.
async fn tail_events(mut socket: WebSocket, state: AppState) {
    // subscribe before reading the backlog so nothing falls in between
    let mut rx = state.subscribe();
    let backlog = state.engine().events().all();
    let mut last = 0u64;

    for event in backlog {
        last = event.id;
        if send_event(&mut socket, &event).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => break,
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            },
            next = rx.recv() => match next {
                Ok(event) => {
                    if event.id <= last {
                        continue;
                    }
                    last = event.id;
                    if send_event(&mut socket, &event).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(n)) => {
                    warn!("ws subscriber lagged by {} events, resyncing", n);
                    let missed = state.engine().events().since(last);
                    for event in missed {
                        last = event.id;
                        if send_event(&mut socket, &event).await.is_err() {
                            return;
                        }
                    }
                }
                Err(RecvError::Closed) => break,
            },
        }
    }
    debug!("ws tail closed");
}

async fn send_event(socket: &mut WebSocket, event: &Event) -> Result<(), axum::Error> {
    let txt = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    socket.send(Message::Text(txt.into())).await
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/orders", post(create_order).get(list_orders))
        .route("/orders/open", get(list_open_orders))
        .route("/orders/{id}", get(get_order).delete(cancel_order))
        .route("/market", get(market))
        .route("/events", get(events))
        .route("/ws", get(ws_handler))
        .route("/advisor/analysis", post(analysis))
        .route("/advisor/script", post(script))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
