use axum::{extract::State, http::StatusCode, response::Json};
use diesel::{sql_query, RunQueryDsl};
use serde_json::{json, Value};

use crate::state::AppState;

/// Liveness plus a round trip to the database.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let database_ok = state
        .db()
        .ok()
        .and_then(|mut conn| sql_query("SELECT 1").execute(&mut conn).ok())
        .is_some();

    if database_ok {
        (StatusCode::OK, Json(json!({ "status": "ok" })))
    } else {
        tracing::warn!("health check: database unreachable");
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "unavailable" })),
        )
    }
}
