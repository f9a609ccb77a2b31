//! Operator-facing audit endpoints for manual reconciliation.

use axum::{extract::State, Json};

use crate::errors::ServiceError;
use crate::models::{ConflictRecord, OrphanEvent};
use crate::AppState;

#[utoipa::path(
    get,
    path = "/api/v1/admin/conflicts",
    tag = "admin",
    responses(
        (status = 200, description = "Recorded conflicts, oldest first", body = [ConflictRecord])
    )
)]
pub async fn list_conflicts(
    State(state): State<AppState>,
) -> Result<Json<Vec<ConflictRecord>>, ServiceError> {
    Ok(Json(state.reconciler.list_conflicts().await?))
}

#[utoipa::path(
    get,
    path = "/api/v1/admin/orphans",
    tag = "admin",
    responses(
        (status = 200, description = "Parked orphan events, oldest first", body = [OrphanEvent])
    )
)]
pub async fn list_orphans(
    State(state): State<AppState>,
) -> Result<Json<Vec<OrphanEvent>>, ServiceError> {
    Ok(Json(state.reconciler.list_orphans().await?))
}
