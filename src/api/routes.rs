use std::sync::Arc;

use axum::{
    extract::State,
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::api::latency::{DecisionLatency, LatencySnapshot};
use crate::cache::RequestCache;
use crate::error::AppError;
use crate::pipeline::Pipeline;
use crate::types::{round2, InternalAggregate, MarketSummary, PredictionMethod, Recommendation};

#[derive(Clone)]
pub struct ApiState {
    pub pipeline: Pipeline,
    pub cache: Arc<RequestCache>,
    pub latency: Arc<DecisionLatency>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/price-recommendation", post(price_recommendation))
        .route("/health", get(health))
        .route("/cache/stats", get(cache_stats))
        .route("/cache/clear", delete(cache_clear))
        .route("/stats/latency", get(stats_latency))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Request / response shapes
// ---------------------------------------------------------------------------

/// Caller-supplied internal metrics; replaces the matching engine's output
/// for the call.
#[derive(Debug, Deserialize)]
pub struct InternalDataOverride {
    pub internal_price: f64,
    pub sell_through_rate: f64,
    pub days_on_shelf: f64,
    pub category: String,
}

impl From<InternalDataOverride> for InternalAggregate {
    fn from(data: InternalDataOverride) -> Self {
        InternalAggregate {
            matched_count: 0,
            sold_count: 0,
            internal_price: data.internal_price,
            production_price: data.internal_price,
            sell_through_rate: data.sell_through_rate,
            days_on_shelf: data.days_on_shelf,
            category: data.category,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PriceRecommendationRequest {
    /// UPC code, product name, brand, or search term.
    pub upc: String,
    #[serde(default)]
    pub internal_data: Option<InternalDataOverride>,
}

#[derive(Debug, Serialize)]
pub struct InternalDataResponse {
    pub internal_price: f64,
    pub sell_through_rate: f64,
    pub days_on_shelf: f64,
    pub category: String,
    pub matched_count: usize,
}

#[derive(Debug, Serialize)]
pub struct PriceRecommendationResponse {
    pub upc: String,
    pub recommended_price: f64,
    pub internal_vs_market_weighting: f64,
    pub confidence_score: u8,
    pub rationale: String,
    pub prediction_method: PredictionMethod,
    pub market_data: Option<MarketSummary>,
    pub internal_data: Option<InternalDataResponse>,
    pub warnings: Vec<String>,
}

impl From<Recommendation> for PriceRecommendationResponse {
    fn from(rec: Recommendation) -> Self {
        Self {
            upc: rec.query,
            recommended_price: round2(rec.recommended_price),
            internal_vs_market_weighting: rec.internal_vs_market_weighting,
            confidence_score: rec.confidence_score,
            rationale: rec.rationale,
            prediction_method: rec.prediction_method,
            market_data: rec.market,
            internal_data: rec.internal.map(|agg| InternalDataResponse {
                internal_price: round2(agg.internal_price),
                sell_through_rate: agg.sell_through_rate,
                days_on_shelf: agg.days_on_shelf,
                category: agg.category,
                matched_count: agg.matched_count,
            }),
            warnings: rec.warnings,
        }
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn price_recommendation(
    State(state): State<ApiState>,
    Json(request): Json<PriceRecommendationRequest>,
) -> Result<Json<PriceRecommendationResponse>, AppError> {
    let internal_override = request.internal_data.map(InternalAggregate::from);
    let recommendation = state.pipeline.recommend(&request.upc, internal_override).await?;
    Ok(Json(recommendation.into()))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn cache_stats(State(state): State<ApiState>) -> Json<serde_json::Value> {
    let stats = state.cache.stats();
    Json(serde_json::json!({
        "size": stats.size,
        "hits": stats.hits,
        "misses": stats.misses,
    }))
}

async fn cache_clear(State(state): State<ApiState>) -> Json<serde_json::Value> {
    let cleared = state.cache.clear();
    info!(cleared, "cache cleared via API");
    Json(serde_json::json!({ "cleared": cleared }))
}

async fn stats_latency(State(state): State<ApiState>) -> Json<LatencySnapshot> {
    Json(state.latency.snapshot())
}
