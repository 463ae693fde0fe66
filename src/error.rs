use std::fmt;
use std::error::Error as StdError;
use serde::{Serialize, Deserialize};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response, Json},
};

use crate::infra::database::DatabaseError;

/// 服务错误类型
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ServerError {
    /// 内部错误
    Internal(String),
    /// 验证错误
    Validation(String),
    /// 数据库错误
    Database(String),
    /// 配置错误
    Configuration(String),
    /// 限流（拦截）
    RateLimit(String),
    /// 超时错误
    Timeout(String),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerError::Internal(msg) => write!(f, "Internal error: {}", msg),
            ServerError::Validation(msg) => write!(f, "Validation error: {}", msg),
            ServerError::Database(msg) => write!(f, "Database error: {}", msg),
            ServerError::Configuration(msg) => write!(f, "Configuration error: {}", msg),
            ServerError::RateLimit(msg) => write!(f, "{}", msg),
            ServerError::Timeout(msg) => write!(f, "Timeout error: {}", msg),
        }
    }
}

impl StdError for ServerError {}

impl ServerError {
    /// 可以原样展示给终端用户的错误
    pub fn is_user_facing(&self) -> bool {
        matches!(self, ServerError::RateLimit(_) | ServerError::Validation(_))
    }

    /// 对外的消息：内部错误统一替换成通用文案
    pub fn public_message(&self) -> String {
        if self.is_user_facing() {
            self.to_string()
        } else {
            "The server encountered an internal error. Please try again later.".to_string()
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status_code = match &self {
            ServerError::Validation(_) => StatusCode::BAD_REQUEST,
            ServerError::RateLimit(_) => StatusCode::TOO_MANY_REQUESTS,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let error_response = ErrorResponse::new(&self);
        (status_code, Json(error_response)).into_response()
    }
}

impl From<DatabaseError> for ServerError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::NotConfigured(_) => ServerError::Configuration(err.to_string()),
            DatabaseError::AcquireTimeout { .. } => ServerError::Timeout(err.to_string()),
            other => ServerError::Database(other.to_string()),
        }
    }
}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        ServerError::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for ServerError {
    fn from(err: serde_json::Error) -> Self {
        ServerError::Internal(err.to_string())
    }
}

impl From<toml::de::Error> for ServerError {
    fn from(err: toml::de::Error) -> Self {
        ServerError::Configuration(err.to_string())
    }
}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, ServerError>;

/// 错误代码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    /// 成功
    Success = 0,
    /// 内部错误
    Internal = 1000,
    /// 验证错误
    Validation = 1003,
    /// 数据库错误
    Database = 2000,
    /// 配置错误
    Configuration = 2003,
    /// 限流错误
    RateLimit = 3000,
    /// 超时错误
    Timeout = 3002,
}

impl From<&ServerError> for ErrorCode {
    fn from(error: &ServerError) -> Self {
        match error {
            ServerError::Internal(_) => ErrorCode::Internal,
            ServerError::Validation(_) => ErrorCode::Validation,
            ServerError::Database(_) => ErrorCode::Database,
            ServerError::Configuration(_) => ErrorCode::Configuration,
            ServerError::RateLimit(_) => ErrorCode::RateLimit,
            ServerError::Timeout(_) => ErrorCode::Timeout,
        }
    }
}

/// 错误响应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// 错误代码
    pub code: ErrorCode,
    /// 错误消息
    pub message: String,
    /// 时间戳
    pub timestamp: u64,
}

impl ErrorResponse {
    pub fn new(error: &ServerError) -> Self {
        Self {
            code: ErrorCode::from(error),
            message: error.public_message(),
            timestamp: chrono::Utc::now().timestamp() as u64,
        }
    }
}
