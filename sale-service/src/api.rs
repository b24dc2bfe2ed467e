use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use shared::{CheckoutError, ItemId, Outcome, PurchaseError, PurchaseRecord, Sale};
use tokio::time::Instant;
use tower_http::trace::TraceLayer;

use crate::service::SaleService;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<SaleService>,
    pub request_timeout: Duration,
}

impl AppState {
    fn deadline(&self) -> Instant {
        Instant::now() + self.request_timeout
    }
}

#[derive(Debug, Deserialize)]
pub struct CheckoutParams {
    pub user_id: Option<String>,
    pub id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PurchaseParams {
    pub code: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PurchasesParams {
    pub user_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CheckoutResponse {
    pub code: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PurchaseResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_id: Option<ItemId>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

/// HTTP status by outcome class; the try-later class is split per variant.
pub fn checkout_status(e: CheckoutError) -> StatusCode {
    match e.outcome() {
        Outcome::SystemProblem => StatusCode::INTERNAL_SERVER_ERROR,
        Outcome::TokenDead => StatusCode::BAD_REQUEST,
        Outcome::TryLater => match e {
            CheckoutError::SaleNotActive => StatusCode::SERVICE_UNAVAILABLE,
            CheckoutError::ItemUnavailable => StatusCode::NOT_FOUND,
            _ => StatusCode::FORBIDDEN,
        },
    }
}

pub fn purchase_status(e: PurchaseError) -> StatusCode {
    match e.outcome() {
        Outcome::SystemProblem => StatusCode::INTERNAL_SERVER_ERROR,
        Outcome::TokenDead => StatusCode::BAD_REQUEST,
        Outcome::TryLater => match e {
            PurchaseError::SaleNotActive => StatusCode::SERVICE_UNAVAILABLE,
            PurchaseError::UserLimitReached => StatusCode::FORBIDDEN,
            _ => StatusCode::CONFLICT,
        },
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/checkout", post(checkout))
        .route("/purchase", post(purchase))
        .route("/sales/current", get(current_sale))
        .route("/sales/current/purchases", get(user_purchases))
        .route("/health", get(health_check))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
}

pub async fn checkout(
    State(state): State<AppState>,
    Query(params): Query<CheckoutParams>,
) -> Result<Json<CheckoutResponse>, ApiError> {
    let user_id = params
        .user_id
        .filter(|u| !u.is_empty())
        .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "user_id query parameter is required"))?;
    let item_id = params
        .id
        .filter(|i| !i.is_empty())
        .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "id query parameter is required"))?
        .parse::<ItemId>()
        .map_err(|_| api_error(StatusCode::BAD_REQUEST, "Invalid item id format"))?;

    let code = state
        .service
        .start_checkout(&user_id, item_id, state.deadline())
        .await
        .map_err(|e| {
            let message = match e.outcome() {
                Outcome::SystemProblem => "Internal server error during checkout".to_string(),
                _ => e.to_string(),
            };
            api_error(checkout_status(e), message)
        })?;

    Ok(Json(CheckoutResponse { code }))
}

pub async fn purchase(
    State(state): State<AppState>,
    Query(params): Query<PurchaseParams>,
) -> Response {
    let code = match params.code.filter(|c| !c.is_empty()) {
        Some(code) => code,
        None => {
            return api_error(StatusCode::BAD_REQUEST, "code query parameter is required")
                .into_response()
        }
    };

    match state.service.complete_purchase(&code, state.deadline()).await {
        Ok(item_id) => Json(PurchaseResponse {
            status: "success".to_string(),
            message: Some("Item purchased successfully".to_string()),
            item_id: Some(item_id),
        })
        .into_response(),
        Err(e) => {
            let message = match e.outcome() {
                Outcome::SystemProblem => {
                    "Purchase processing failed due to an internal error".to_string()
                }
                _ => e.to_string(),
            };
            let status = purchase_status(e);
            let body = PurchaseResponse {
                status: "failed".to_string(),
                message: Some(message),
                item_id: None,
            };
            (status, Json(body)).into_response()
        }
    }
}

pub async fn current_sale(State(state): State<AppState>) -> Result<Json<Sale>, ApiError> {
    match state.service.current_sale().await {
        Ok(Some(sale)) => Ok(Json(sale)),
        Ok(None) => Err(api_error(StatusCode::NOT_FOUND, "no active sale at the moment")),
        Err(e) => {
            tracing::error!("Failed to load current sale: {}", e);
            Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, "failed to load current sale"))
        }
    }
}

pub async fn user_purchases(
    State(state): State<AppState>,
    Query(params): Query<PurchasesParams>,
) -> Result<Json<Vec<PurchaseRecord>>, ApiError> {
    let user_id = params
        .user_id
        .filter(|u| !u.is_empty())
        .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "user_id query parameter is required"))?;

    state
        .service
        .purchases_in_current_sale(&user_id)
        .await
        .map(Json)
        .map_err(|e| {
            tracing::error!("Failed to load purchases for user {}: {}", user_id, e);
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "failed to load purchases")
        })
}

pub async fn health_check() -> &'static str {
    "OK"
}
