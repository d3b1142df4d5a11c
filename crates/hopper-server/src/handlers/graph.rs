use axum::{
    extract::{Json, Query, State},
    response::IntoResponse,
};
use tracing::{error, info};

use hopper_core::api_types::{PathParams, PathResponse};
use hopper_core::HopperError;

use crate::handlers::error_response;
use crate::state::AppState;

const DEFAULT_MAX_HOPS: u32 = 3;
const MAX_HOPS_CEILING: u32 = 6;
const DEFAULT_PATH_LIMIT: usize = 5;

/// Paths between two named entities of one owner, shortest first.
pub async fn find_paths(
    State(state): State<AppState>,
    Query(params): Query<PathParams>,
) -> axum::response::Response {
    if params.owner.trim().is_empty() || params.from.trim().is_empty() || params.to.trim().is_empty() {
        return error_response(
            "Path query failed",
            &HopperError::Validation("owner, from and to must not be empty".into()),
        );
    }
    let max_hops = params.max_hops.unwrap_or(DEFAULT_MAX_HOPS).clamp(1, MAX_HOPS_CEILING);
    let limit = params.limit.unwrap_or(DEFAULT_PATH_LIMIT).max(1);

    match state
        .graph
        .find_paths(&params.owner, &params.from, &params.to, max_hops, limit)
        .await
    {
        Ok(paths) => {
            info!(owner = %params.owner, paths = paths.len(), max_hops, "Path query complete");
            Json(PathResponse { paths }).into_response()
        }
        Err(e) => {
            error!(error = %e, "Path query failed");
            error_response("Path query failed", &e)
        }
    }
}
