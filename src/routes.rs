// ====================================================================================
// src/routes.rs - HTTP路由处理
// ====================================================================================
use crate::{
    config::Config,
    db::{self, GameResultEntry},
    error::AppError,
    handler::{self, coin_push},
    models::{
        BalanceResponse, CategorySummary, PurchaseWebhook, PurchaseWebhookResponse, RoomSummary, ServerEvent,
    },
    state::AppState,
};
use axum::{
    extract::{Path, Query, State, WebSocketUpgrade},
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use headers::HeaderValue;
use http::{HeaderMap, StatusCode};
use serde::Deserialize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub fn router(state: Arc<AppState>) -> Router {
    // 定义CORS策略
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/ws", get(ws_handler))
        .route("/categories", get(list_categories))
        .route("/coins/:app_user_id", get(get_balance))
        .route("/webhooks/purchases", post(purchase_webhook))
        .route("/management/rooms", get(list_rooms))
        .route("/management/rooms/:room_code", delete(close_room))
        .route("/management/results", get(recent_results))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

// 健康检查
pub async fn health_check() -> impl IntoResponse {
    "OK"
}

// WebSocket处理器
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    // 负载保护检查
    if state.total_connections.load(Ordering::Relaxed) >= state.config.max_connections {
        return AppError::ServiceUnavailable("Connection limit reached".to_string()).into_response();
    }

    ws.on_upgrade(move |socket| handler::handle_socket(socket, state))
}

pub async fn list_categories(State(state): State<Arc<AppState>>) -> Json<Vec<CategorySummary>> {
    Json(state.questions.categories().await.as_ref().clone())
}

// 客户端对账时拉取权威余额
pub async fn get_balance(
    State(state): State<Arc<AppState>>,
    Path(app_user_id): Path<String>,
) -> Result<Json<BalanceResponse>, AppError> {
    let balance = state.ledger.balance(&app_user_id).await?;
    Ok(Json(BalanceResponse {
        app_user_id: balance.app_user_id,
        balance: balance.balance,
        version: balance.version,
    }))
}

// 购买回调：入账并推送给该用户的在线连接
pub async fn purchase_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<PurchaseWebhook>,
) -> Result<Json<PurchaseWebhookResponse>, AppError> {
    check_auth(&headers, &state.config)?;

    let result = state
        .ledger
        .add_coins(&payload.app_user_id, payload.amount, payload.transaction_id.as_deref())
        .await;
    if let Some(push) = coin_push(&payload.app_user_id, &result) {
        let delivered = state
            .user_channels
            .notify(&payload.app_user_id, ServerEvent::CoinsAdded(push))
            .await;
        tracing::debug!(app_user_id = %payload.app_user_id, delivered, "coins-added pushed");
    }

    let update = result?;
    Ok(Json(PurchaseWebhookResponse {
        app_user_id: update.app_user_id,
        new_balance: update.balance,
        version: update.version,
        duplicate: update.duplicate,
    }))
}

// 查询所有房间
pub async fn list_rooms(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<RoomSummary>>, AppError> {
    check_auth(&headers, &state.config)?;
    Ok(Json(state.rooms.list_rooms().await))
}

// 关闭房间
pub async fn close_room(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(room_code): Path<String>,
) -> Result<StatusCode, AppError> {
    check_auth(&headers, &state.config)?;
    state.rooms.close_room(&room_code, "closed by operator").await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub struct ResultsQuery {
    limit: Option<u32>,
}

pub async fn recent_results(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<ResultsQuery>,
) -> Result<Json<Vec<GameResultEntry>>, AppError> {
    check_auth(&headers, &state.config)?;
    let limit = query.limit.unwrap_or(50).min(500);
    Ok(Json(db::recent_game_results(&state.db_pool, limit).await?))
}

// 认证辅助函数
fn check_auth(headers: &HeaderMap, config: &Config) -> Result<(), AppError> {
    if config.admin_api_key.is_empty() {
        return Err(AppError::Unauthorized);
    }
    match (headers.get("X-Api-Key"), HeaderValue::from_str(&config.admin_api_key)) {
        (Some(key), Ok(expected)) if key == expected => Ok(()),
        _ => Err(AppError::Unauthorized),
    }
}
