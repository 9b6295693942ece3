use axum::{
    Json,
    body::Body,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::admin::{AppState, create_error_response, error_response};
use crate::consolidation::CycleType;
use crate::engine::{CacheStats, RecallRequest};
use crate::error::EideticError;
use crate::memory::types::{MemoryRecord, StoreContext, TierId};
use crate::storage::RecordFilter;

pub async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

pub async fn stats_handler(State(state): State<Arc<AppState>>) -> Json<CacheStats> {
    Json(state.cache.stats())
}

#[derive(Debug, Deserialize)]
pub struct StoreBody {
    pub content: String,
    #[serde(default = "default_content_type")]
    pub content_type: String,
    #[serde(default)]
    pub context: StoreContext,
}

fn default_content_type() -> String {
    "semantic".to_string()
}

pub async fn store_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<StoreBody>,
) -> Response<Body> {
    match state
        .cache
        .store(&body.content, &body.content_type, body.context)
        .await
    {
        Ok(receipt) => (StatusCode::CREATED, Json(receipt)).into_response(),
        Err(e) => error_response(&e),
    }
}

pub async fn get_memory_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response<Body> {
    let Ok(id) = Uuid::parse_str(&id) else {
        return create_error_response(
            StatusCode::BAD_REQUEST,
            "invalid_input",
            &format!("Invalid record id: {id}"),
        );
    };

    match state.cache.get(id) {
        Some(record) => Json(record).into_response(),
        None => error_response(&EideticError::NotFound(id)),
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct MemoriesQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
    pub tier: Option<String>,
    pub min_weight: Option<f32>,
    #[serde(rename = "type")]
    pub content_type: Option<String>,
}

fn default_limit() -> usize {
    50
}

#[derive(Debug, Serialize)]
pub struct MemoriesResponse {
    pub memories: Vec<MemoryRecord>,
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
}

pub async fn list_memories_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<MemoriesQuery>,
) -> Response<Body> {
    let mut filter = RecordFilter::new();

    if let Some(ref tier) = query.tier {
        match tier.parse::<TierId>() {
            Ok(tier) => filter = filter.with_tier(tier),
            Err(e) => return error_response(&e),
        }
    }
    if let Some(min_weight) = query.min_weight {
        filter = filter.with_min_weight(min_weight);
    }
    if let Some(ref content_type) = query.content_type {
        filter = filter.with_content_type(content_type.clone());
    }

    let total = state.cache.count(&filter);
    let memories = state.cache.list(&filter, query.limit, query.offset);

    Json(MemoriesResponse {
        memories,
        total,
        limit: query.limit,
        offset: query.offset,
    })
    .into_response()
}

pub async fn recall_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RecallRequest>,
) -> Response<Body> {
    match state.cache.recall(request).await {
        Ok(response) => Json(response).into_response(),
        Err(e) => error_response(&e),
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct ConsolidateQuery {
    #[serde(default)]
    pub force: bool,
}

pub async fn consolidate_handler(
    State(state): State<Arc<AppState>>,
    Path(cycle): Path<String>,
    Query(query): Query<ConsolidateQuery>,
) -> Response<Body> {
    let cycle = match cycle.parse::<CycleType>() {
        Ok(cycle) => cycle,
        Err(e) => return error_response(&e),
    };

    Json(state.cache.run_cycle(cycle, query.force).await).into_response()
}
