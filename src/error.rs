use axum::{
    extract::rejection::{JsonRejection, PathRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Client-facing messages shared between handlers and tests.
pub mod msg {
    pub const VOUCHER_NOT_FOUND: &str = "Voucher not found";
    pub const ALREADY_REDEEMED: &str = "Voucher has already been redeemed";
    pub const VOUCHER_CANCELLED: &str = "Voucher has been cancelled";
    pub const VOUCHER_EXPIRED: &str = "Voucher has expired";
    pub const CAP_REACHED: &str = "This deal has reached its redemption limit";
    pub const DEAL_NOT_FOUND: &str = "Deal not found";
    pub const USER_NOT_FOUND: &str = "User not found";
    pub const DEAL_UNAVAILABLE: &str = "Deal is not currently available";
    pub const ALREADY_CLAIMED: &str = "User already holds an active voucher for this deal";
    pub const CODE_REQUIRED: &str = "Provide exactly one of 'code' or 'scanned'";
    pub const INVALID_SIGNATURE_FORMAT: &str = "Invalid signature format";
    pub const INVALID_TIMESTAMP_IN_SIGNATURE: &str = "Invalid timestamp in signature";
    pub const INVALID_WEBHOOK_SECRET: &str = "Invalid webhook secret";
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Voucher already redeemed")]
    AlreadyRedeemed,

    #[error("Voucher cancelled")]
    VoucherCancelled,

    #[error("Voucher expired")]
    Expired,

    #[error("Redemption cap reached")]
    CapReached,

    #[error("Deal unavailable")]
    DealUnavailable,

    #[error("Billing provider error: {0}")]
    Upstream(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Stable machine-readable code returned alongside the message.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::BadRequest(_) | AppError::Json(_) => "BAD_REQUEST",
            AppError::Conflict(_) => "CONFLICT",
            AppError::AlreadyRedeemed => "ALREADY_REDEEMED",
            AppError::VoucherCancelled => "VOUCHER_CANCELLED",
            AppError::Expired => "EXPIRED",
            AppError::CapReached => "CAP_REACHED",
            AppError::DealUnavailable => "DEAL_UNAVAILABLE",
            AppError::Upstream(_) => "UPSTREAM_ERROR",
            AppError::Database(_) | AppError::Pool(_) | AppError::Internal(_) => {
                "INTERNAL_ERROR"
            }
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) | AppError::Json(_) => StatusCode::BAD_REQUEST,
            AppError::Conflict(_)
            | AppError::AlreadyRedeemed
            | AppError::VoucherCancelled
            | AppError::CapReached
            | AppError::DealUnavailable => StatusCode::CONFLICT,
            AppError::Expired => StatusCode::GONE,
            AppError::Upstream(_)
            | AppError::Database(_)
            | AppError::Pool(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: &'static str,
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let error = match &self {
            AppError::NotFound(msg)
            | AppError::BadRequest(msg)
            | AppError::Conflict(msg) => msg.clone(),
            AppError::AlreadyRedeemed => msg::ALREADY_REDEEMED.to_string(),
            AppError::VoucherCancelled => msg::VOUCHER_CANCELLED.to_string(),
            AppError::Expired => msg::VOUCHER_EXPIRED.to_string(),
            AppError::CapReached => msg::CAP_REACHED.to_string(),
            AppError::DealUnavailable => msg::DEAL_UNAVAILABLE.to_string(),
            AppError::Json(e) => {
                tracing::debug!("JSON error: {}", e);
                "Invalid JSON".to_string()
            }
            AppError::Upstream(e) => {
                tracing::error!("Billing provider error: {}", e);
                "Internal server error".to_string()
            }
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                "Internal server error".to_string()
            }
            AppError::Pool(e) => {
                tracing::error!("Pool error: {}", e);
                "Internal server error".to_string()
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                "Internal server error".to_string()
            }
        };

        let body = ErrorResponse {
            error,
            code: self.code(),
        };

        (self.status(), Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
