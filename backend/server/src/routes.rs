use std::sync::Arc;

use axum::{
    Json,
    extract::{Query, State},
    http::header::CACHE_CONTROL,
    response::IntoResponse,
};
use collections::CollectionSet;
use serde::Deserialize;
use serde_json::json;
use tracing::error;

use crate::{error::AppError, state::AppState, sync::aggregate};

#[derive(Deserialize)]
pub struct SyncParams {
    collections: Option<String>,
}

pub async fn sync_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SyncParams>,
) -> Result<impl IntoResponse, AppError> {
    let requested = CollectionSet::parse(params.collections.as_deref());

    let body = aggregate(state.store.as_ref(), &requested)
        .await
        .map_err(|e| {
            error!("Sync failed: {e}");
            AppError::from(e)
        })?;

    Ok((
        [(CACHE_CONTROL, state.config.sync_cache_control())],
        Json(body),
    ))
}

pub async fn method_not_allowed() -> AppError {
    AppError::MethodNotAllowed
}

pub async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let database = match state.store.ping().await {
        Ok(()) => "OK",
        Err(_) => "UNREACHABLE",
    };

    Json(json!({
        "status": "online",
        "database": database,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
