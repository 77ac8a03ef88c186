use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use bazaar_db::kv::KeyValueStore;
use bazaar_db::{ping, DbPool};

#[derive(Clone)]
pub struct HealthState {
    db_pool: DbPool,
    kv: Arc<dyn KeyValueStore>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: HealthCheck,
    pub database: HealthCheck,
    pub cache: HealthCheck,
    pub checked_at: String,
}

pub fn router(db_pool: DbPool, kv: Arc<dyn KeyValueStore>) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { db_pool, kv })
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let database = database_check(&state.db_pool).await;
    let cache = cache_check(state.kv.as_ref()).await;
    let ready = database.status == "ready" && cache.status == "ready";

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        service: HealthCheck {
            status: "ready",
            detail: "bazaar-server runtime initialized".to_string(),
        },
        database,
        cache,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

async fn database_check(pool: &DbPool) -> HealthCheck {
    match ping(pool).await {
        Ok(()) => HealthCheck { status: "ready", detail: "database query succeeded".to_string() },
        Err(error) => {
            HealthCheck { status: "degraded", detail: format!("database query failed: {error}") }
        }
    }
}

async fn cache_check(kv: &dyn KeyValueStore) -> HealthCheck {
    match kv.ping().await {
        Ok(()) => HealthCheck {
            status: "ready",
            detail: format!("{} key-value store reachable", kv.backend_name()),
        },
        Err(error) => HealthCheck {
            status: "degraded",
            detail: format!("{} key-value store unreachable: {error}", kv.backend_name()),
        },
    }
}
