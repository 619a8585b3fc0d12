//! Object storage routes.

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tether_engine::BatchResponseItem;

use crate::auth::AuthUser;
use crate::error::{AppError, Result};
use crate::handlers::{
    handle_batch, handle_create, handle_delete, handle_get, handle_update, BatchBody, SaveQuery,
};
use crate::store::Fields;
use crate::AppState;

/// Create object routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/{version}/classes/{class}", post(create_handler))
        .route(
            "/{version}/classes/{class}/{id}",
            get(get_handler).put(update_handler).delete(delete_handler),
        )
        .route("/{version}/batch", post(batch_handler))
}

fn check_version(state: &AppState, version: &str) -> Result<()> {
    if version == state.config.api_version {
        Ok(())
    } else {
        Err(AppError::NotFound(format!("unknown API version '{version}'")))
    }
}

/// POST /{version}/classes/{class} - Create an object.
async fn create_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path((version, class)): Path<(String, String)>,
    Query(query): Query<SaveQuery>,
    body: std::result::Result<Json<Fields>, JsonRejection>,
) -> Result<(StatusCode, Json<Fields>)> {
    check_version(&state, &version)?;
    let Json(body) = body?;
    let response = handle_create(&state.store, &class, &body, &query)?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// GET /{version}/classes/{class}/{id} - Fetch an object.
async fn get_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path((version, class, id)): Path<(String, String, String)>,
) -> Result<Json<Fields>> {
    check_version(&state, &version)?;
    Ok(Json(handle_get(&state.store, &class, &id)?))
}

/// PUT /{version}/classes/{class}/{id} - Update an object.
async fn update_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path((version, class, id)): Path<(String, String, String)>,
    Query(query): Query<SaveQuery>,
    body: std::result::Result<Json<Fields>, JsonRejection>,
) -> Result<Json<Fields>> {
    check_version(&state, &version)?;
    let Json(body) = body?;
    Ok(Json(handle_update(&state.store, &class, &id, &body, &query)?))
}

/// DELETE /{version}/classes/{class}/{id} - Delete an object.
async fn delete_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path((version, class, id)): Path<(String, String, String)>,
) -> Result<Json<Fields>> {
    check_version(&state, &version)?;
    handle_delete(&state.store, &class, &id)?;
    Ok(Json(Fields::new()))
}

/// POST /{version}/batch - Run several object requests.
async fn batch_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(version): Path<String>,
    body: std::result::Result<Json<BatchBody>, JsonRejection>,
) -> Result<Json<Vec<BatchResponseItem>>> {
    check_version(&state, &version)?;
    let Json(body) = body?;
    let items = handle_batch(&state.store, &state.config.api_version, &body.requests);
    Ok(Json(items))
}
