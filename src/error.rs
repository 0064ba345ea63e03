//! Error type shared by every handler and the `{ success, data | message }`
//! response envelope.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),

    #[error("validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("{message}")]
    Unauthorized { code: &'static str, message: String },

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{message}")]
    Conflict {
        code: &'static str,
        message: String,
        details: Option<Value>,
    },

    #[error("{message}")]
    Unprocessable { code: &'static str, message: String },

    #[error("payment gateway error: {0}")]
    Gateway(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Redis(#[from] redis::RedisError),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type ApiResult<T> = Result<T, AppError>;

impl AppError {
    pub fn unauthorized(code: &'static str, message: impl Into<String>) -> Self {
        AppError::Unauthorized { code, message: message.into() }
    }

    pub fn conflict(code: &'static str, message: impl Into<String>) -> Self {
        AppError::Conflict { code, message: message.into(), details: None }
    }

    pub fn conflict_with(code: &'static str, message: impl Into<String>, details: Value) -> Self {
        AppError::Conflict { code, message: message.into(), details: Some(details) }
    }

    pub fn unprocessable(code: &'static str, message: impl Into<String>) -> Self {
        AppError::Unprocessable { code, message: message.into() }
    }

    pub fn not_found(what: &str) -> Self {
        AppError::NotFound(format!("{} not found", what))
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) | AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Database(sqlx::Error::RowNotFound) => StatusCode::NOT_FOUND,
            AppError::Conflict { .. } => StatusCode::CONFLICT,
            AppError::Unprocessable { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Gateway(_) => StatusCode::BAD_GATEWAY,
            AppError::Database(_) | AppError::Redis(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match self {
            AppError::Validation(errors) => json!({
                "success": false,
                "message": "Validation failed",
                "errors": errors,
            }),
            AppError::Unauthorized { code, message } | AppError::Unprocessable { code, message } => json!({
                "success": false,
                "message": message,
                "code": code,
            }),
            AppError::Conflict { code, message, details } => {
                let mut body = json!({
                    "success": false,
                    "message": message,
                    "code": code,
                });
                if let Some(details) = details {
                    body["details"] = details;
                }
                body
            }
            AppError::Database(sqlx::Error::RowNotFound) => json!({
                "success": false,
                "message": "Resource not found",
            }),
            AppError::Database(e) => {
                tracing::error!("database error: {:?}", e);
                internal_body()
            }
            AppError::Redis(e) => {
                tracing::error!("redis error: {:?}", e);
                internal_body()
            }
            AppError::Internal(e) => {
                tracing::error!("internal error: {:#}", e);
                internal_body()
            }
            AppError::Gateway(message) => {
                tracing::warn!("payment gateway error: {}", message);
                json!({ "success": false, "message": message, "code": "GATEWAY_ERROR" })
            }
            AppError::BadRequest(message) | AppError::Forbidden(message) | AppError::NotFound(message) => json!({
                "success": false,
                "message": message,
            }),
        };

        (status, Json(body)).into_response()
    }
}

fn internal_body() -> Value {
    json!({ "success": false, "message": "Internal server error" })
}

// --- Success envelope ---

#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pagination: Option<Pagination>,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: u32,
    pub page_size: u32,
    pub total: i64,
}

pub fn ok<T: Serialize>(data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse { success: true, data: Some(data), message: None, pagination: None })
}

pub fn created<T: Serialize>(data: T) -> (StatusCode, Json<ApiResponse<T>>) {
    (StatusCode::CREATED, ok(data))
}

pub fn paginated<T: Serialize>(data: T, pagination: Pagination) -> Json<ApiResponse<T>> {
    Json(ApiResponse { success: true, data: Some(data), message: None, pagination: Some(pagination) })
}

pub fn message(text: impl Into<String>) -> Json<ApiResponse<()>> {
    Json(ApiResponse { success: true, data: None, message: Some(text.into()), pagination: None })
}

/// `?page=&pageSize=` query parameters shared by list endpoints.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageQuery {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

impl PageQuery {
    pub const MAX_PAGE_SIZE: u32 = 100;

    pub fn page(&self) -> u32 {
        self.page.unwrap_or(1).max(1)
    }

    pub fn page_size(&self) -> u32 {
        self.page_size.unwrap_or(20).clamp(1, Self::MAX_PAGE_SIZE)
    }

    pub fn limit(&self) -> i64 {
        self.page_size() as i64
    }

    pub fn offset(&self) -> i64 {
        (self.page() as i64 - 1) * self.page_size() as i64
    }

    pub fn pagination(&self, total: i64) -> Pagination {
        Pagination { page: self.page(), page_size: self.page_size(), total }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn conflict_carries_code_and_details() {
        let err = AppError::conflict_with("SEAT_UNAVAILABLE", "Seats taken", json!({ "seats": [3, 4] }));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let body = body_json(response).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["code"], "SEAT_UNAVAILABLE");
        assert_eq!(body["details"]["seats"], json!([3, 4]));
    }

    #[tokio::test]
    async fn internal_errors_hide_the_cause() {
        let response = AppError::Internal(anyhow::anyhow!("connection refused")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["message"], "Internal server error");
    }

    #[tokio::test]
    async fn row_not_found_maps_to_404() {
        let response = AppError::Database(sqlx::Error::RowNotFound).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn page_query_clamps_values() {
        let q = PageQuery { page: Some(0), page_size: Some(1000) };
        assert_eq!(q.page(), 1);
        assert_eq!(q.page_size(), PageQuery::MAX_PAGE_SIZE);
        assert_eq!(q.offset(), 0);

        let q = PageQuery { page: Some(3), page_size: Some(10) };
        assert_eq!(q.offset(), 20);
        assert_eq!(q.pagination(45), Pagination { page: 3, page_size: 10, total: 45 });
    }

    #[test]
    fn success_envelope_skips_empty_fields() {
        let value = serde_json::to_value(&ok(vec![1, 2]).0).unwrap();
        assert_eq!(value, json!({ "success": true, "data": [1, 2] }));

        let value = serde_json::to_value(&message("done").0).unwrap();
        assert_eq!(value, json!({ "success": true, "message": "done" }));
    }
}
