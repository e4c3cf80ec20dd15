//! JSON CRUD surface plus the event-bus WebSocket bridge.
//!
//! The UI is a thin consumer: it reads and writes rows here and follows
//! live updates over `/ws`. No HTML is rendered by the core.

use crate::bus::{EventBus, TOPIC_COPY_TRADING, TOPIC_LIVE_ORDERS, TOPIC_STRATEGIES_UPDATES};
use crate::copy::{CopyExecutor, CopyWatcher};
use crate::engine::{Engine, StrategyKind};
use crate::markets::{GammaClient, MarketFeed};
use crate::models::{StrategyStatus, WalletTrade};
use crate::store::{CredentialsUpdate, SettingsUpdate, Store, StrategyUpdate};
use crate::venue::VenueClient;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tracing::debug;

#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub bus: EventBus,
    pub watcher: CopyWatcher,
    pub executor: Arc<CopyExecutor>,
    pub engine: Arc<Engine>,
    pub feed: MarketFeed,
    pub client: VenueClient,
    pub gamma: GammaClient,
}

type ApiError = (StatusCode, Json<Value>);
type ApiResult<T> = Result<Json<T>, ApiError>;

fn bad_request(err: impl std::fmt::Display) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": err.to_string() })),
    )
}

fn not_found(what: &str) -> ApiError {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": format!("{what} not found") })),
    )
}

fn internal(err: impl std::fmt::Display) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": err.to_string() })),
    )
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/credentials", get(get_credentials).put(put_credentials))
        .route("/api/settings", get(get_settings).put(put_settings))
        .route("/api/tracked-users", get(list_tracked).post(track_user))
        .route("/api/tracked-users/:address", delete(delete_tracked))
        .route("/api/tracked-users/:address/untrack", post(untrack_user))
        .route("/api/tracked-users/:address/restore", post(restore_user))
        .route("/api/tracked-users/:address/trades", get(tracked_trades))
        .route("/api/copy-trades", get(list_copy_trades))
        .route("/api/trades", get(list_all_trades))
        .route("/api/copy-trades/manual", post(manual_copy))
        .route("/api/copy-trades/:id/retry", post(retry_copy_trade))
        .route("/api/copy-trades/:id", delete(delete_copy_trade))
        .route("/api/strategies", get(list_strategies).post(create_strategy))
        .route(
            "/api/strategies/:id",
            get(get_strategy).put(update_strategy).delete(delete_strategy),
        )
        .route("/api/strategies/:id/start", post(start_strategy))
        .route("/api/strategies/:id/stop", post(stop_strategy))
        .route("/api/strategies/:id/pause", post(pause_strategy))
        .route("/api/strategies/:id/resume", post(resume_strategy))
        .route("/api/strategies/:id/events", get(list_strategy_events))
        .route("/api/strategies/:id/positions", get(list_strategy_positions))
        .route("/api/strategies/:id/trades", get(list_strategy_trades))
        .route("/api/strategies/:id/tokens", get(discovered_tokens))
        .route("/api/feed/status", get(feed_status))
        .route("/api/feed/resubscribe", post(feed_resubscribe))
        .route("/api/markets/search", get(search_markets))
        .route("/api/markets/expiring", get(expiring_markets))
        .route("/api/markets/event/:slug", get(event_by_slug))
        .route("/api/markets/token/:token_id", get(token_info))
        .route("/api/markets/token/:token_id/snapshot", get(token_snapshot))
        .route("/api/venue/time", get(venue_time))
        .route("/api/venue/balance", get(venue_balance))
        .route("/api/venue/positions", get(venue_positions))
        .route("/api/venue/closed-positions", get(venue_closed_positions))
        .route("/api/venue/activity", get(venue_activity))
        .route("/api/venue/trades", get(venue_trades))
        .route("/api/venue/markets/:condition_id", get(venue_market))
        .route("/ws", get(ws_upgrade))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

// ---------------------------------------------------------------------
// Credentials & settings
// ---------------------------------------------------------------------

async fn get_credentials(State(state): State<AppState>) -> ApiResult<Value> {
    let creds = state.store.get_credentials().await.map_err(internal)?;
    Ok(Json(serde_json::to_value(creds.to_masked()).map_err(internal)?))
}

async fn put_credentials(
    State(state): State<AppState>,
    Json(update): Json<CredentialsUpdate>,
) -> ApiResult<Value> {
    let creds = state
        .store
        .update_credentials(update)
        .await
        .map_err(bad_request)?;
    Ok(Json(serde_json::to_value(creds.to_masked()).map_err(internal)?))
}

async fn get_settings(State(state): State<AppState>) -> ApiResult<Value> {
    let settings = state.store.get_copy_settings().await.map_err(internal)?;
    Ok(Json(serde_json::to_value(settings).map_err(internal)?))
}

async fn put_settings(
    State(state): State<AppState>,
    Json(update): Json<SettingsUpdate>,
) -> ApiResult<Value> {
    let settings = state
        .store
        .update_copy_settings(update)
        .await
        .map_err(bad_request)?;
    Ok(Json(serde_json::to_value(settings).map_err(internal)?))
}

// ---------------------------------------------------------------------
// Tracked users
// ---------------------------------------------------------------------

#[derive(Deserialize)]
struct ListTrackedQuery {
    #[serde(default)]
    include_archived: bool,
}

async fn list_tracked(
    State(state): State<AppState>,
    Query(query): Query<ListTrackedQuery>,
) -> ApiResult<Value> {
    let users = state
        .store
        .list_tracked_users(query.include_archived)
        .await
        .map_err(internal)?;
    Ok(Json(serde_json::to_value(users).map_err(internal)?))
}

#[derive(Deserialize)]
struct TrackBody {
    address: String,
    #[serde(default)]
    label: String,
}

async fn track_user(
    State(state): State<AppState>,
    Json(body): Json<TrackBody>,
) -> ApiResult<Value> {
    let user = state
        .watcher
        .track(&body.address, &body.label)
        .await
        .map_err(bad_request)?;
    Ok(Json(serde_json::to_value(user).map_err(internal)?))
}

async fn untrack_user(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> ApiResult<Value> {
    state.watcher.untrack(&address).await.map_err(bad_request)?;
    Ok(Json(json!({ "ok": true })))
}

async fn restore_user(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> ApiResult<Value> {
    state.watcher.restore(&address).await.map_err(bad_request)?;
    Ok(Json(json!({ "ok": true })))
}

async fn delete_tracked(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> ApiResult<Value> {
    state.watcher.delete(&address).await.map_err(bad_request)?;
    Ok(Json(json!({ "ok": true })))
}

async fn tracked_trades(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> ApiResult<Value> {
    let trades = state.watcher.latest_trades(&address).await;
    Ok(Json(serde_json::to_value(trades).map_err(internal)?))
}

// ---------------------------------------------------------------------
// Copy trades
// ---------------------------------------------------------------------

#[derive(Deserialize)]
struct LimitQuery {
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    100
}

#[derive(Deserialize)]
struct CopyTradesQuery {
    #[serde(default = "default_limit")]
    limit: usize,
    status: Option<crate::models::CopyTradeStatus>,
}

async fn list_copy_trades(
    State(state): State<AppState>,
    Query(query): Query<CopyTradesQuery>,
) -> ApiResult<Value> {
    let trades = match query.status {
        Some(status) => state
            .store
            .list_copy_trades_with_status(status, query.limit)
            .await
            .map_err(internal)?,
        None => state
            .store
            .list_copy_trades(query.limit)
            .await
            .map_err(internal)?,
    };
    Ok(Json(serde_json::to_value(trades).map_err(internal)?))
}

async fn list_all_trades(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> ApiResult<Value> {
    let trades = state
        .store
        .list_all_trades(query.limit)
        .await
        .map_err(internal)?;
    Ok(Json(serde_json::to_value(trades).map_err(internal)?))
}

#[derive(Deserialize)]
struct ManualCopyBody {
    address: String,
    trade: WalletTrade,
}

/// Operator-initiated copy of one specific trade; bypasses the enabled
/// flag but never the duplicate gate.
async fn manual_copy(
    State(state): State<AppState>,
    Json(body): Json<ManualCopyBody>,
) -> ApiResult<Value> {
    let row = state
        .executor
        .execute_copy(&body.address, &body.trade, true)
        .await
        .map_err(bad_request)?;
    Ok(Json(serde_json::to_value(row).map_err(internal)?))
}

async fn retry_copy_trade(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Value> {
    let row = state.executor.retry(&id).await.map_err(bad_request)?;
    Ok(Json(serde_json::to_value(row).map_err(internal)?))
}

async fn delete_copy_trade(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Value> {
    state.store.delete_copy_trade(&id).await.map_err(internal)?;
    Ok(Json(json!({ "ok": true })))
}

// ---------------------------------------------------------------------
// Strategies
// ---------------------------------------------------------------------

/// The displayed status comes from the registry; the persisted column is
/// only the restart intent.
fn effective_status(engine: &Engine, id: i64, persisted: StrategyStatus) -> StrategyStatus {
    if engine.running(id) {
        if persisted == StrategyStatus::Paused {
            StrategyStatus::Paused
        } else {
            StrategyStatus::Running
        }
    } else if persisted == StrategyStatus::Error {
        StrategyStatus::Error
    } else {
        StrategyStatus::Stopped
    }
}

fn strategy_view(engine: &Engine, strategy: crate::store::Strategy) -> Value {
    let status = effective_status(engine, strategy.id, strategy.status);
    let mut v = serde_json::to_value(&strategy).unwrap_or(Value::Null);
    if let Some(obj) = v.as_object_mut() {
        obj.insert("status".into(), json!(status.as_str()));
    }
    v
}

async fn list_strategies(State(state): State<AppState>) -> ApiResult<Value> {
    let strategies = state.store.list_strategies().await.map_err(internal)?;
    let views: Vec<Value> = strategies
        .into_iter()
        .map(|s| strategy_view(&state.engine, s))
        .collect();
    Ok(Json(Value::Array(views)))
}

#[derive(Deserialize)]
struct CreateStrategyBody {
    name: String,
    #[serde(rename = "type")]
    strategy_type: String,
    #[serde(default)]
    config: Value,
    #[serde(default = "default_paper_mode")]
    paper_mode: bool,
}

fn default_paper_mode() -> bool {
    true
}

async fn create_strategy(
    State(state): State<AppState>,
    Json(body): Json<CreateStrategyBody>,
) -> ApiResult<Value> {
    StrategyKind::validate(&body.strategy_type, &body.config).map_err(bad_request)?;
    let strategy = state
        .store
        .create_strategy(&body.name, &body.strategy_type, &body.config, body.paper_mode)
        .await
        .map_err(bad_request)?;
    state.bus.publish(
        TOPIC_STRATEGIES_UPDATES,
        "created",
        json!({ "strategy_id": strategy.id }),
    );
    Ok(Json(strategy_view(&state.engine, strategy)))
}

async fn get_strategy(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Value> {
    let Some(strategy) = state.store.get_strategy(id).await.map_err(internal)? else {
        return Err(not_found("strategy"));
    };
    Ok(Json(strategy_view(&state.engine, strategy)))
}

async fn update_strategy(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(update): Json<StrategyUpdate>,
) -> ApiResult<Value> {
    if let Some(config) = &update.config {
        let Some(current) = state.store.get_strategy(id).await.map_err(internal)? else {
            return Err(not_found("strategy"));
        };
        StrategyKind::validate(&current.strategy_type, config).map_err(bad_request)?;
    }
    let strategy = state
        .store
        .update_strategy(id, update)
        .await
        .map_err(bad_request)?;
    Ok(Json(strategy_view(&state.engine, strategy)))
}

async fn delete_strategy(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Value> {
    if state.engine.running(id) {
        return Err(bad_request("stop the strategy before deleting it"));
    }
    state.store.delete_strategy(id).await.map_err(internal)?;
    state
        .bus
        .publish(TOPIC_STRATEGIES_UPDATES, "deleted", json!({ "strategy_id": id }));
    Ok(Json(json!({ "ok": true })))
}

async fn start_strategy(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Value> {
    state.engine.start_strategy(id).await.map_err(bad_request)?;
    Ok(Json(json!({ "ok": true, "running": true })))
}

async fn stop_strategy(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Value> {
    state.engine.stop_strategy(id).await.map_err(bad_request)?;
    Ok(Json(json!({ "ok": true })))
}

async fn pause_strategy(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Value> {
    state.engine.pause_strategy(id).await.map_err(bad_request)?;
    Ok(Json(json!({ "ok": true })))
}

async fn resume_strategy(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Value> {
    state.engine.resume_strategy(id).await.map_err(bad_request)?;
    Ok(Json(json!({ "ok": true })))
}

async fn list_strategy_events(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<LimitQuery>,
) -> ApiResult<Value> {
    let events = state
        .store
        .list_strategy_events(id, query.limit)
        .await
        .map_err(internal)?;
    Ok(Json(serde_json::to_value(events).map_err(internal)?))
}

async fn list_strategy_positions(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Value> {
    let positions = state.store.list_positions(id).await.map_err(internal)?;
    Ok(Json(serde_json::to_value(positions).map_err(internal)?))
}

async fn list_strategy_trades(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<LimitQuery>,
) -> ApiResult<Value> {
    let trades = state
        .store
        .list_trades(id, query.limit)
        .await
        .map_err(internal)?;
    Ok(Json(serde_json::to_value(trades).map_err(internal)?))
}

async fn discovered_tokens(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Value> {
    let tokens = state.engine.discovered_tokens(id).await;
    Ok(Json(json!({ "tokens": tokens })))
}

// ---------------------------------------------------------------------
// Feed & venue passthrough
// ---------------------------------------------------------------------

async fn feed_status(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "connected": state.feed.is_connected(),
        "subscribed_markets": state.feed.subscribed_markets().len(),
        "subscription_stats": state.feed.stats(),
    }))
}

async fn feed_resubscribe(State(state): State<AppState>) -> Json<Value> {
    state.feed.force_resubscribe().await;
    Json(json!({ "ok": true }))
}

#[derive(Deserialize)]
struct SearchQuery {
    text: String,
    #[serde(default = "default_limit")]
    limit: usize,
}

async fn search_markets(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> ApiResult<Value> {
    let results = state
        .gamma
        .search_events(&query.text, query.limit)
        .await
        .map_err(bad_request)?;
    Ok(Json(results))
}

#[derive(Deserialize)]
struct ExpiringQuery {
    interval: String,
    min_minutes: Option<i64>,
    max_minutes: Option<i64>,
}

async fn expiring_markets(
    State(state): State<AppState>,
    Query(query): Query<ExpiringQuery>,
) -> ApiResult<Value> {
    let Some(interval) = crate::markets::Interval::parse(&query.interval) else {
        return Err(bad_request(format!("unknown interval {:?}", query.interval)));
    };
    let (default_min, default_max) = interval.window_minutes();
    let tokens = state
        .gamma
        .fetch_expiring(
            interval,
            query.min_minutes.unwrap_or(default_min),
            query.max_minutes.unwrap_or(default_max),
        )
        .await
        .map_err(bad_request)?;
    let views: Vec<Value> = tokens
        .into_iter()
        .map(|t| {
            json!({
                "token_id": t.token_id,
                "question": t.info.question,
                "outcome": t.info.outcome,
                "price": t.info.price,
                "end_date": t.info.end_date,
                "event_slug": t.info.event_slug,
            })
        })
        .collect();
    Ok(Json(Value::Array(views)))
}

async fn event_by_slug(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> ApiResult<Value> {
    let Some(event) = state
        .gamma
        .fetch_event_by_slug(&slug)
        .await
        .map_err(bad_request)?
    else {
        return Err(not_found("event"));
    };
    Ok(Json(json!({
        "slug": event.slug,
        "title": event.title,
        "end_date": event.end_date,
        "markets": event.markets.len(),
    })))
}

async fn token_info(
    State(state): State<AppState>,
    Path(token_id): Path<String>,
) -> ApiResult<Value> {
    let Some(info) = state
        .gamma
        .lookup_token(&token_id)
        .await
        .map_err(bad_request)?
    else {
        return Err(not_found("token"));
    };
    Ok(Json(serde_json::to_value(info).map_err(internal)?))
}

/// Live view of one token: top of book plus venue-quoted prices.
async fn token_snapshot(
    State(state): State<AppState>,
    Path(token_id): Path<String>,
) -> ApiResult<Value> {
    let book = state
        .client
        .get_order_book(&token_id)
        .await
        .map_err(bad_request)?;
    let midpoint = state.client.get_midpoint(&token_id).await.ok().flatten();
    let buy = state.client.get_price(&token_id, "buy").await.ok().flatten();
    let sell = state.client.get_price(&token_id, "sell").await.ok().flatten();
    Ok(Json(json!({
        "best_bid": book.best_bid(),
        "best_ask": book.best_ask(),
        "neg_risk": book.neg_risk,
        "midpoint": midpoint,
        "buy_price": buy,
        "sell_price": sell,
    })))
}

async fn venue_time(State(state): State<AppState>) -> ApiResult<Value> {
    let ts = state.client.get_server_time().await.map_err(bad_request)?;
    Ok(Json(json!({ "server_time": ts })))
}

#[derive(Deserialize)]
struct ActivityQuery {
    user: String,
    #[serde(default = "default_activity_max")]
    max: usize,
}

fn default_activity_max() -> usize {
    1000
}

async fn venue_activity(
    State(state): State<AppState>,
    Query(query): Query<ActivityQuery>,
) -> ApiResult<Value> {
    let items = state
        .client
        .fetch_all_activity(&query.user, query.max, None)
        .await
        .map_err(bad_request)?;
    Ok(Json(serde_json::to_value(items).map_err(internal)?))
}

#[derive(Deserialize)]
struct ClobTradesQuery {
    user: String,
    /// `maker` or `taker`.
    #[serde(default = "default_trade_role")]
    role: String,
}

fn default_trade_role() -> String {
    "maker".to_string()
}

async fn venue_trades(
    State(state): State<AppState>,
    Query(query): Query<ClobTradesQuery>,
) -> ApiResult<Value> {
    if query.role != "maker" && query.role != "taker" {
        return Err(bad_request("role must be maker or taker"));
    }
    let trades = state
        .client
        .get_clob_trades(&query.role, &query.user)
        .await
        .map_err(bad_request)?;
    Ok(Json(Value::Array(trades)))
}

async fn venue_market(
    State(state): State<AppState>,
    Path(condition_id): Path<String>,
) -> ApiResult<Value> {
    let market = state
        .client
        .get_clob_market(&condition_id)
        .await
        .map_err(bad_request)?;
    Ok(Json(market))
}

async fn venue_balance(State(state): State<AppState>) -> ApiResult<Value> {
    let balance = state.client.get_balance().await.map_err(bad_request)?;
    Ok(Json(json!({ "balance": balance })))
}

#[derive(Deserialize)]
struct UserQuery {
    user: String,
}

async fn venue_positions(
    State(state): State<AppState>,
    Query(query): Query<UserQuery>,
) -> ApiResult<Value> {
    let positions = state
        .client
        .get_positions(&query.user)
        .await
        .map_err(bad_request)?;
    Ok(Json(Value::Array(positions)))
}

async fn venue_closed_positions(
    State(state): State<AppState>,
    Query(query): Query<UserQuery>,
) -> ApiResult<Value> {
    let positions = state
        .client
        .get_closed_positions(&query.user)
        .await
        .map_err(bad_request)?;
    Ok(Json(Value::Array(positions)))
}

// ---------------------------------------------------------------------
// Event-bus bridge
// ---------------------------------------------------------------------

#[derive(Deserialize)]
struct WsQuery {
    /// Comma-separated topic list; defaults to the main topics.
    topics: Option<String>,
}

async fn ws_upgrade(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let topics: Vec<String> = match query.topics {
        Some(raw) => raw
            .split(',')
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect(),
        None => vec![
            TOPIC_COPY_TRADING.to_string(),
            TOPIC_STRATEGIES_UPDATES.to_string(),
            TOPIC_LIVE_ORDERS.to_string(),
        ],
    };
    ws.on_upgrade(move |socket| bridge_bus(socket, state.bus, topics))
        .into_response()
}

/// Forward bus events for the requested topics until the client leaves.
async fn bridge_bus(mut socket: WebSocket, bus: EventBus, topics: Vec<String>) {
    let (tx, mut rx) = mpsc::channel::<Value>(256);
    for topic in topics {
        let mut bus_rx = bus.subscribe(&topic);
        let tx = tx.clone();
        tokio::spawn(async move {
            while let Ok(event) = bus_rx.recv().await {
                let payload = serde_json::to_value(&event).unwrap_or(Value::Null);
                if tx.send(payload).await.is_err() {
                    return;
                }
            }
        });
    }
    drop(tx);

    loop {
        tokio::select! {
            event = rx.recv() => {
                let Some(event) = event else { return; };
                if socket.send(Message::Text(event.to_string())).await.is_err() {
                    return;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {
                        debug!("ws bridge client left");
                        return;
                    }
                    _ => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::RunnerDeps;
    use crate::markets::MarketCache;
    use crate::store::test_util::temp_store;
    use crate::venue::RateLimiter;

    #[tokio::test]
    async fn effective_status_follows_registry() {
        let (store, _dir) = temp_store();
        let bus = EventBus::default();
        let limiter = RateLimiter::spawn();
        let cache = MarketCache::new();
        let engine = Engine::new(RunnerDeps {
            store: store.clone(),
            bus: bus.clone(),
            feed: MarketFeed::spawn(bus.clone()),
            gamma: GammaClient::new(limiter.clone(), cache.clone()),
            cache,
            client: VenueClient::new(store.clone(), limiter),
        });

        // nothing registered: persisted "running" still displays stopped
        assert_eq!(
            effective_status(&engine, 1, StrategyStatus::Running),
            StrategyStatus::Stopped
        );
        assert_eq!(
            effective_status(&engine, 1, StrategyStatus::Error),
            StrategyStatus::Error
        );
        assert_eq!(
            effective_status(&engine, 1, StrategyStatus::Paused),
            StrategyStatus::Stopped
        );
    }
}
