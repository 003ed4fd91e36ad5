//! Security-activity read surface.

use axum::extract::{Json, Query, State};
use serde::Deserialize;

use service_core::error::AppError;

use crate::models::ActivityRecord;
use crate::AppState;

const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 100;

#[derive(Debug, Deserialize)]
pub struct RecentActivityQuery {
    pub limit: Option<i64>,
}

/// Most recent activity records, newest first.
///
/// Reached only through the authentication gate plus a
/// `{module: "logs", action: "read"}` permission layer.
#[utoipa::path(
    get,
    path = "/activity/recent",
    params(("limit" = Option<i64>, Query, description = "Max records to return (default 50, cap 100)")),
    responses(
        (status = 200, description = "Recent activity", body = [ActivityRecord]),
        (status = 403, description = "Missing the logs read permission"),
    ),
    security(("bearer_auth" = [])),
    tag = "Activity"
)]
pub async fn recent_activity(
    State(state): State<AppState>,
    Query(query): Query<RecentActivityQuery>,
) -> Result<Json<Vec<ActivityRecord>>, AppError> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let records = state.activity_store.recent(limit).await?;
    Ok(Json(records))
}
