use axum::http::HeaderMap;

use requestflow_core::domain::user::{Caller, UserId};
use requestflow_core::engine::RequestEngine;

use crate::api::ApiError;

/// Resolves the caller from the identity header set by the fronting proxy.
/// Missing, malformed, unknown or unconfirmed identities are rejected with 401.
pub async fn resolve_caller(
    headers: &HeaderMap,
    header_name: &str,
    engine: &RequestEngine,
) -> Result<Caller, ApiError> {
    let raw = headers
        .get(header_name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ApiError::unauthorized(format!("missing `{header_name}` header")))?;

    let id = raw
        .parse::<i64>()
        .map(UserId)
        .map_err(|_| ApiError::unauthorized(format!("`{header_name}` must carry a user id")))?;

    match engine.user(id).await? {
        Some(user) if user.confirmed => Ok(user.caller()),
        Some(_) => Err(ApiError::unauthorized("account is not confirmed")),
        None => Err(ApiError::unauthorized("unknown user")),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::http::{HeaderMap, HeaderValue, StatusCode};
    use chrono::Utc;

    use requestflow_core::domain::user::{Role, User, UserId};
    use requestflow_core::engine::RequestEngine;
    use requestflow_core::memory::{
        InMemoryAttachmentCatalog, InMemoryUserDirectory, InMemoryWorkflowStore, RecordingNotifier,
    };

    use super::resolve_caller;

    const HEADER: &str = "x-requestflow-user";

    async fn engine() -> RequestEngine {
        let directory = Arc::new(InMemoryUserDirectory::default());
        let now = Utc::now();
        for (id, confirmed) in [(1, true), (2, false)] {
            directory
                .insert(User {
                    id: UserId(id),
                    email: format!("u{id}@example.edu"),
                    name: format!("User {id}"),
                    role: Role::Hr,
                    confirmed,
                    created_at: now,
                    updated_at: now,
                })
                .await;
        }
        RequestEngine::new(
            Arc::new(InMemoryWorkflowStore::default()),
            directory,
            Arc::new(InMemoryAttachmentCatalog::default()),
            Arc::new(RecordingNotifier::default()),
        )
    }

    fn headers(value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(HEADER, HeaderValue::from_static(value));
        headers
    }

    #[tokio::test]
    async fn known_confirmed_user_resolves_to_caller() {
        let caller = resolve_caller(&headers("1"), HEADER, &engine().await).await.expect("caller");
        assert_eq!(caller.id, UserId(1));
        assert_eq!(caller.role, Role::Hr);
    }

    #[tokio::test]
    async fn absent_or_unknown_identity_is_unauthorized() {
        let engine = engine().await;
        for headers in [HeaderMap::new(), headers("abc"), headers("99"), headers("2")] {
            let error = resolve_caller(&headers, HEADER, &engine).await.expect_err("rejected");
            assert_eq!(error.status(), StatusCode::UNAUTHORIZED);
        }
    }
}
