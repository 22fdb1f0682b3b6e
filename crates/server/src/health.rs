//! `GET /health`: the service is ready once the database answers and its
//! schema carries every embedded migration.

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use requestflow_db::{migrations, ping, DbPool};
use serde::Serialize;

#[derive(Clone)]
pub struct HealthState {
    db_pool: DbPool,
    delivery: &'static str,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

impl HealthCheck {
    fn ready(detail: impl Into<String>) -> Self {
        Self { status: "ready", detail: detail.into() }
    }

    fn degraded(detail: impl Into<String>) -> Self {
        Self { status: "degraded", detail: detail.into() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: HealthCheck,
    pub schema: HealthCheck,
    /// `webhook` or `log`; informational, never degrades readiness.
    pub notifications: &'static str,
    pub checked_at: String,
}

pub fn router(db_pool: DbPool, delivery: &'static str) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { db_pool, delivery })
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let database = match ping(&state.db_pool).await {
        Ok(()) => HealthCheck::ready("database query succeeded"),
        Err(error) => HealthCheck::degraded(format!("database query failed: {error}")),
    };
    let schema = if database.status == "ready" {
        schema_check(&state.db_pool).await
    } else {
        HealthCheck::degraded("not checked; database unreachable")
    };
    let ready = database.status == "ready" && schema.status == "ready";

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        database,
        schema,
        notifications: state.delivery,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

async fn schema_check(pool: &DbPool) -> HealthCheck {
    match migrations::pending(pool).await {
        Ok(pending) if pending.is_empty() => HealthCheck::ready("schema is at the latest migration"),
        Ok(pending) => HealthCheck::degraded(format!("{} pending migration(s)", pending.len())),
        Err(error) => HealthCheck::degraded(format!("migration state unreadable: {error}")),
    }
}
