use axum::{
    extract::{Path, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::warn;
use validator::Validate;

use crate::{
    error::{ok, ApiResult, AppError},
    extract::ValidatedJson,
    middleware::AuthUser,
    models::PaymentTarget,
    services::payment::PaymentService,
    AppState,
};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/payment/initiate", post(initiate_payment))
        .route("/payment/webhook", post(payment_webhook))
        .route("/payment/status/{kind}/{id}", get(payment_status))
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct InitiatePaymentRequest {
    pub target_kind: PaymentTarget,
    #[validate(range(min = 1))]
    pub target_id: i64,
    #[validate(range(min = 0.0))]
    pub advance_amount: Option<f64>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    #[validate(length(min = 1, message = "paymentId is required"))]
    pub payment_id: String,
    #[validate(length(min = 1, message = "status is required"))]
    pub status: String,
    #[serde(default)]
    pub token: Option<String>,
}

// POST /api/payment/initiate
async fn initiate_payment(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ValidatedJson(req): ValidatedJson<InitiatePaymentRequest>,
) -> ApiResult<impl IntoResponse> {
    let session = PaymentService::new(state)
        .initiate(user, req.target_kind, req.target_id, req.advance_amount)
        .await?;
    Ok(ok(session))
}

// POST /api/payment/webhook
async fn payment_webhook(
    State(state): State<Arc<AppState>>,
    ValidatedJson(payload): ValidatedJson<WebhookPayload>,
) -> ApiResult<impl IntoResponse> {
    let result = PaymentService::new(state)
        .process_webhook_notification(&payload.payment_id, &payload.status, payload.token.as_deref())
        .await;

    match result {
        Ok(()) => {}
        // Unknown payments are acknowledged so the gateway stops retrying
        Err(AppError::NotFound(_)) => {
            warn!("Acknowledged webhook for unknown payment {}", payload.payment_id);
        }
        Err(e) => return Err(e),
    }
    Ok(Json(json!({ "received": true })))
}

// GET /api/payment/status/{kind}/{id}
async fn payment_status(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path((kind, id)): Path<(String, i64)>,
) -> ApiResult<impl IntoResponse> {
    let target = PaymentTarget::parse(&kind)
        .ok_or_else(|| AppError::BadRequest(format!("unknown payment target '{}'", kind)))?;
    let overview = PaymentService::new(state).overview(user, target, id).await?;
    Ok(ok(overview))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initiate_request_uses_snake_case_targets() {
        let req: InitiatePaymentRequest = serde_json::from_value(json!({
            "targetKind": "package_order",
            "targetId": 12,
            "advanceAmount": 500.0
        }))
        .unwrap();
        assert_eq!(req.target_kind, PaymentTarget::PackageOrder);
        assert!(req.validate().is_ok());

        let bad = InitiatePaymentRequest { target_id: 0, ..req };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn webhook_token_is_optional() {
        let payload: WebhookPayload =
            serde_json::from_value(json!({ "paymentId": "p-1", "status": "CONFIRMED" })).unwrap();
        assert!(payload.token.is_none());
    }
}
