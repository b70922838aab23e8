// ====================================================================================
// src/error.rs - 自定义错误类型
// ====================================================================================
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),
    #[error("Room {0} not found")]
    RoomNotFound(String),
    #[error("Room is full")]
    RoomFull,
    #[error("{0}")]
    InvalidState(String),
    #[error("Only the host can do that")]
    NotHost,
    #[error("At least 2 players are needed to start")]
    NotEnoughPlayers,
    #[error("Insufficient coins")]
    InsufficientFunds,
    #[error("Persistence error: {0}")]
    Persistence(#[from] sqlx::Error),
    #[error("Unauthorized: Invalid API Key")]
    Unauthorized,
    #[error("Service Unavailable: {0}")]
    ServiceUnavailable(String),
}

impl AppError {
    pub fn validation(msg: impl Into<String>) -> Self {
        AppError::Validation(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        AppError::InvalidState(msg.into())
    }

    // 发给客户端的文本，持久化错误不暴露内部细节
    pub fn client_message(&self) -> String {
        match self {
            AppError::Persistence(_) => "Storage unavailable, please retry".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::Persistence(e) => {
                tracing::error!("SQLx error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, format!("Database error: {}", e))
            }
            AppError::Validation(msg) | AppError::InvalidState(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::InsufficientFunds => (StatusCode::CONFLICT, self.to_string()),
            AppError::RoomFull => (StatusCode::CONFLICT, self.to_string()),
            AppError::NotHost => (StatusCode::FORBIDDEN, self.to_string()),
            AppError::NotEnoughPlayers => (StatusCode::CONFLICT, self.to_string()),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, self.to_string()),
            AppError::RoomNotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            AppError::ServiceUnavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
        };

        let body = Json(json!({ "error": error_message }));
        (status, body).into_response()
    }
}
