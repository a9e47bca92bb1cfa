// API request handlers

use axum::{
    extract::{Path, State},
    response::Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use super::error::{ApiError, ApiJson};
use super::AppState;
use crate::ledger::UserBalance;
use crate::proxy::{router, GenerationRequest, GenerationResult};

// Root endpoint
pub async fn root() -> Json<Value> {
    Json(json!({
        "name": env!("CARGO_PKG_NAME"),
        "message": "Coin ledger and generation proxy",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": [
            "GET /",
            "GET /health",
            "GET /api/test",
            "GET /api/models",
            "GET /api/coins/:user_id",
            "PUT /api/coins/:user_id",
            "POST /api/coins/:user_id",
            "POST /api/coins/:user_id/increment",
            "POST /api/generate"
        ]
    }))
}

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "ledger": state.ledger.backend().as_str(),
        "version": env!("CARGO_PKG_VERSION")
    }))
}

pub async fn test_endpoint() -> Json<Value> {
    Json(json!({
        "message": "Backend is working",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

pub async fn list_models(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "default_provider": state.proxy.settings().default_provider,
        "providers": router::describe_all(state.proxy.providers())
    }))
}

// Coin ledger endpoints

#[derive(Debug, Deserialize)]
pub struct SetCoinsBody {
    pub coins: i64,
}

#[derive(Debug, Deserialize)]
pub struct IncrementCoinsBody {
    #[serde(alias = "delta")]
    pub amount: i64,
}

pub async fn get_coins(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<UserBalance>, ApiError> {
    Ok(Json(state.ledger.get(&user_id).await?))
}

pub async fn set_coins(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    ApiJson(body): ApiJson<SetCoinsBody>,
) -> Result<Json<UserBalance>, ApiError> {
    let coins = u64::try_from(body.coins)
        .map_err(|_| ApiError::BadRequest("coins must be a non-negative integer".to_string()))?;

    let balance = state.ledger.set(&user_id, coins).await?;
    tracing::info!("Coins for {} set to {}", user_id, balance.coins);
    Ok(Json(balance))
}

pub async fn increment_coins(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    ApiJson(body): ApiJson<IncrementCoinsBody>,
) -> Result<Json<UserBalance>, ApiError> {
    let balance = state.ledger.increment(&user_id, body.amount).await?;
    tracing::info!(
        "Coins for {} changed by {} to {}",
        user_id,
        body.amount,
        balance.coins
    );
    Ok(Json(balance))
}

// Generation proxy endpoint

pub async fn generate(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<GenerationRequest>,
) -> Result<Json<GenerationResult>, ApiError> {
    let cost = state.proxy.settings().cost_per_request;
    let metered_user = request
        .user_id
        .as_deref()
        .map(str::trim)
        .filter(|id| cost > 0 && !id.is_empty());

    if let Some(user_id) = metered_user {
        let balance = state.ledger.get(user_id).await?;
        if balance.coins < cost {
            return Err(ApiError::PaymentRequired {
                balance: balance.coins,
                cost,
            });
        }
    }

    let mut result = state.proxy.generate(&request).await?;

    if let Some(user_id) = metered_user {
        let delta = i64::try_from(cost).map(|c| -c).unwrap_or(i64::MIN);
        let balance = state.ledger.increment(user_id, delta).await?;
        result.coins_remaining = Some(balance.coins);
    }

    Ok(Json(result))
}
