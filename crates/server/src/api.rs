//! JSON API for request workflows.
//!
//! - `POST /api/v1/requests`                  create a request
//! - `GET  /api/v1/requests?filter=`          `my` (default), `pending` or `all`
//! - `GET  /api/v1/requests/{id}`             request detail with ledger
//! - `GET  /api/v1/requests/{id}/history`     ledger only
//! - `POST /api/v1/requests/{id}/decision`    approve or reject
//! - `POST /api/v1/requests/{id}/forward`     re-route to a role or a user
//! - `POST /api/v1/requests/{id}/attachments` record attachment metadata
//! - `GET  /api/v1/users?role=`               forward-target picker
//! - `POST /api/v1/users`                     self-registration, no caller header

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use requestflow_core::domain::attachment::{Attachment, AttachmentMetadata};
use requestflow_core::domain::history::HistoryEntry;
use requestflow_core::domain::request::{
    AssignmentTarget, CreateRequest, Decision, ForwardTarget, Request, RequestId, RequestType,
    Urgency,
};
use requestflow_core::domain::user::{NewUser, Role, User, UserId};
use requestflow_core::engine::{RequestEngine, RequestSummary, RequestView};
use requestflow_core::errors::{InterfaceError, WorkflowError};

use crate::identity::resolve_caller;

#[derive(Clone)]
pub struct ApiState {
    engine: RequestEngine,
    caller_header: Arc<str>,
    allowed_email_domain: Arc<str>,
}

impl ApiState {
    pub fn new(engine: RequestEngine, caller_header: &str, allowed_email_domain: &str) -> Self {
        Self {
            engine,
            caller_header: Arc::from(caller_header.to_ascii_lowercase()),
            allowed_email_domain: Arc::from(allowed_email_domain),
        }
    }
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/v1/requests", post(create_request).get(list_requests))
        .route("/api/v1/requests/{id}", get(view_request))
        .route("/api/v1/requests/{id}/history", get(request_history))
        .route("/api/v1/requests/{id}/decision", post(decide_request))
        .route("/api/v1/requests/{id}/forward", post(forward_request))
        .route("/api/v1/requests/{id}/attachments", post(attach_file))
        .route("/api/v1/users", get(list_users).post(register_user))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Request / Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CreateRequestBody {
    #[serde(rename = "type")]
    pub request_type: String,
    pub title: String,
    pub description: String,
    pub reason: Option<String>,
    pub urgency: Option<String>,
    pub assigned_to_user_id: Option<i64>,
    pub assigned_to_role: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct ListQuery {
    pub filter: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum RequestList {
    Summaries(Vec<RequestSummary>),
    Requests(Vec<Request>),
}

#[derive(Debug, Deserialize)]
pub struct DecisionBody {
    pub decision: String,
    pub comment: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ForwardBody {
    pub comment: String,
    pub to_user_id: Option<i64>,
    pub to_role: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct UsersQuery {
    pub role: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RegisterBody {
    pub email: String,
    pub name: String,
    /// Defaults to `employee`.
    pub role: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
    pub detail: String,
    pub field: Option<String>,
    pub correlation_id: Option<String>,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    pub fn unauthorized(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            body: ErrorBody {
                error: "unauthorized".to_string(),
                message: "Sign in to continue.".to_string(),
                detail: detail.into(),
                field: None,
                correlation_id: None,
            },
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<WorkflowError> for ApiError {
    fn from(error: WorkflowError) -> Self {
        let correlation_id = Uuid::new_v4().to_string();
        let kind = error.kind();
        let interface = error.into_interface(correlation_id.clone());
        let (status, field) = match &interface {
            InterfaceError::BadRequest { field, .. } => (StatusCode::BAD_REQUEST, *field),
            InterfaceError::NotFound { .. } => (StatusCode::NOT_FOUND, None),
            InterfaceError::Forbidden { .. } => (StatusCode::FORBIDDEN, None),
            InterfaceError::Conflict { .. } => (StatusCode::CONFLICT, None),
            InterfaceError::ServiceUnavailable { .. } => (StatusCode::SERVICE_UNAVAILABLE, None),
        };

        if status.is_server_error() {
            warn!(
                event_name = "api.request.failed",
                correlation_id = %correlation_id,
                error_kind = kind,
                error = %interface,
                "request failed on a dependency"
            );
        } else {
            info!(
                event_name = "api.request.rejected",
                correlation_id = %correlation_id,
                error_kind = kind,
                error = %interface,
                "request rejected"
            );
        }

        Self {
            status,
            body: ErrorBody {
                error: kind.to_string(),
                message: interface.user_message().to_string(),
                detail: interface.to_string(),
                field: field.map(str::to_string),
                correlation_id: Some(correlation_id),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

fn parse_optional<T>(value: Option<&str>) -> Result<Option<T>, WorkflowError>
where
    T: std::str::FromStr<Err = WorkflowError>,
{
    value.map(str::trim).filter(|value| !value.is_empty()).map(str::parse).transpose()
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn create_request(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(body): Json<CreateRequestBody>,
) -> Result<(StatusCode, Json<Request>), ApiError> {
    let caller = resolve_caller(&headers, &state.caller_header, &state.engine).await?;

    let request_type: RequestType = body.request_type.trim().parse()?;
    let urgency = parse_optional::<Urgency>(body.urgency.as_deref())?;
    let role = parse_optional::<Role>(body.assigned_to_role.as_deref())?;
    let assignment = AssignmentTarget::from_parts(body.assigned_to_user_id.map(UserId), role);

    let request = state
        .engine
        .create(
            CreateRequest {
                request_type,
                title: body.title,
                description: body.description,
                reason: body.reason,
                urgency,
                assignment,
            },
            &caller,
        )
        .await?;

    Ok((StatusCode::CREATED, Json(request)))
}

async fn list_requests(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> Result<Json<RequestList>, ApiError> {
    let caller = resolve_caller(&headers, &state.caller_header, &state.engine).await?;

    let filter = query.filter.as_deref().map(str::trim).unwrap_or("my");
    let list = match filter {
        "" | "my" => RequestList::Summaries(state.engine.my_requests(&caller).await?),
        "pending" => RequestList::Requests(state.engine.pending_for(&caller).await?),
        "all" => RequestList::Requests(state.engine.all_requests(&caller).await?),
        other => {
            return Err(WorkflowError::validation(
                "filter",
                format!("unknown filter `{other}` (expected my|pending|all)"),
            )
            .into())
        }
    };

    Ok(Json(list))
}

async fn view_request(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<RequestView>, ApiError> {
    let caller = resolve_caller(&headers, &state.caller_header, &state.engine).await?;
    Ok(Json(state.engine.view(RequestId(id), &caller).await?))
}

async fn request_history(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<Vec<HistoryEntry>>, ApiError> {
    let caller = resolve_caller(&headers, &state.caller_header, &state.engine).await?;
    let view = state.engine.view(RequestId(id), &caller).await?;
    Ok(Json(view.history))
}

async fn decide_request(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(body): Json<DecisionBody>,
) -> Result<Json<Request>, ApiError> {
    let caller = resolve_caller(&headers, &state.caller_header, &state.engine).await?;
    let decision: Decision = body.decision.trim().parse()?;
    let request = state.engine.decide(RequestId(id), &caller, decision, body.comment).await?;
    Ok(Json(request))
}

async fn forward_request(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(body): Json<ForwardBody>,
) -> Result<Json<Request>, ApiError> {
    let caller = resolve_caller(&headers, &state.caller_header, &state.engine).await?;
    let role = parse_optional::<Role>(body.to_role.as_deref())?;
    let target = ForwardTarget::from_parts(body.to_user_id.map(UserId), role)?;
    let request = state.engine.forward(RequestId(id), &caller, &body.comment, target).await?;
    Ok(Json(request))
}

async fn attach_file(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(body): Json<AttachmentMetadata>,
) -> Result<(StatusCode, Json<Attachment>), ApiError> {
    let caller = resolve_caller(&headers, &state.caller_header, &state.engine).await?;
    let attachment = state.engine.attach(RequestId(id), &caller, body).await?;
    Ok((StatusCode::CREATED, Json(attachment)))
}

async fn list_users(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(query): Query<UsersQuery>,
) -> Result<Json<Vec<User>>, ApiError> {
    resolve_caller(&headers, &state.caller_header, &state.engine).await?;
    let role = parse_optional::<Role>(query.role.as_deref())?;
    Ok(Json(state.engine.users(role).await?))
}

async fn register_user(
    State(state): State<ApiState>,
    Json(body): Json<RegisterBody>,
) -> Result<(StatusCode, Json<User>), ApiError> {
    let role = parse_optional::<Role>(body.role.as_deref())?.unwrap_or(Role::Employee);
    let user = state
        .engine
        .register(NewUser { email: body.email, name: body.name, role }, &state.allowed_email_domain)
        .await?;
    Ok((StatusCode::CREATED, Json(user)))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::{to_bytes, Body},
        http::{header, Method, Request as HttpRequest, StatusCode},
        Router,
    };
    use chrono::Utc;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use requestflow_core::domain::user::{Role, User, UserId};
    use requestflow_core::engine::RequestEngine;
    use requestflow_core::memory::{
        InMemoryAttachmentCatalog, InMemoryUserDirectory, InMemoryWorkflowStore, RecordingNotifier,
    };

    use super::{router, ApiState, ErrorBody};

    const HEADER: &str = "x-requestflow-user";
    const EMPLOYEE: i64 = 1;
    const FINANCE: i64 = 2;
    const IT: i64 = 3;
    const ADMIN: i64 = 4;

    async fn app() -> Router {
        let directory = Arc::new(InMemoryUserDirectory::default());
        let now = Utc::now();
        for (id, name, role) in [
            (EMPLOYEE, "Ana", Role::Employee),
            (FINANCE, "Fin", Role::Finance),
            (IT, "Ivan", Role::It),
            (ADMIN, "Root", Role::Admin),
        ] {
            directory
                .insert(User {
                    id: UserId(id),
                    email: format!("{}@example.edu", name.to_lowercase()),
                    name: name.to_string(),
                    role,
                    confirmed: true,
                    created_at: now,
                    updated_at: now,
                })
                .await;
        }
        let engine = RequestEngine::new(
            Arc::new(InMemoryWorkflowStore::default()),
            directory,
            Arc::new(InMemoryAttachmentCatalog::default()),
            Arc::new(RecordingNotifier::default()),
        );
        router(ApiState::new(engine, HEADER, "@example.edu"))
    }

    async fn call(
        app: &Router,
        method: Method,
        uri: &str,
        user: Option<i64>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = HttpRequest::builder().method(method).uri(uri);
        if let Some(user) = user {
            builder = builder.header(HEADER, user.to_string());
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .expect("request"),
            None => builder.body(Body::empty()).expect("request"),
        };

        let response = app.clone().oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        let value =
            if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).expect("json") };
        (status, value)
    }

    async fn create_purchase(app: &Router) -> i64 {
        let (status, body) = call(
            app,
            Method::POST,
            "/api/v1/requests",
            Some(EMPLOYEE),
            Some(json!({
                "type": "purchase",
                "title": "Projector",
                "description": "Room 204",
                "urgency": "high"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["current_approver_role"], "finance");
        assert_eq!(body["status"], "pending");
        body["id"].as_i64().expect("id")
    }

    #[tokio::test]
    async fn missing_identity_is_unauthorized() {
        let app = app().await;
        let (status, body) = call(&app, Method::GET, "/api/v1/requests", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "unauthorized");
    }

    #[tokio::test]
    async fn create_then_approve_round_trip() {
        let app = app().await;
        let id = create_purchase(&app).await;

        let (status, pending) =
            call(&app, Method::GET, "/api/v1/requests?filter=pending", Some(FINANCE), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(pending.as_array().map(Vec::len), Some(1));

        let (status, decided) = call(
            &app,
            Method::POST,
            &format!("/api/v1/requests/{id}/decision"),
            Some(FINANCE),
            Some(json!({ "decision": "approve", "comment": "ok" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(decided["status"], "approved");
        assert_eq!(decided["current_approver_role"], Value::Null);

        let (status, history) =
            call(&app, Method::GET, &format!("/api/v1/requests/{id}/history"), Some(EMPLOYEE), None).await;
        assert_eq!(status, StatusCode::OK);
        let actions: Vec<&str> = history
            .as_array()
            .expect("array")
            .iter()
            .filter_map(|entry| entry["action"].as_str())
            .collect();
        assert_eq!(actions, vec!["created", "approved"]);

        let (status, mine) = call(&app, Method::GET, "/api/v1/requests", Some(EMPLOYEE), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(mine[0]["last_comment"], "ok");
        assert_eq!(mine[0]["type"], "purchase");
    }

    #[tokio::test]
    async fn second_decision_conflicts_with_correlation_id() {
        let app = app().await;
        let id = create_purchase(&app).await;
        let uri = format!("/api/v1/requests/{id}/decision");

        let (status, _) =
            call(&app, Method::POST, &uri, Some(FINANCE), Some(json!({ "decision": "reject" }))).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) =
            call(&app, Method::POST, &uri, Some(ADMIN), Some(json!({ "decision": "approve" }))).await;
        assert_eq!(status, StatusCode::CONFLICT);
        let error: ErrorBody = serde_json::from_value(body).expect("error body");
        assert_eq!(error.error, "conflict");
        assert!(error.correlation_id.is_some());
    }

    #[tokio::test]
    async fn wrong_role_is_forbidden_and_unknown_request_not_found() {
        let app = app().await;
        let id = create_purchase(&app).await;

        let (status, _) = call(
            &app,
            Method::POST,
            &format!("/api/v1/requests/{id}/decision"),
            Some(IT),
            Some(json!({ "decision": "approve" })),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = call(&app, Method::GET, "/api/v1/requests/999", Some(ADMIN), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn forward_validates_target_and_reassigns() {
        let app = app().await;
        let id = create_purchase(&app).await;
        let uri = format!("/api/v1/requests/{id}/forward");

        let (status, body) = call(
            &app,
            Method::POST,
            &uri,
            Some(FINANCE),
            Some(json!({ "comment": "both", "to_user_id": IT, "to_role": "hr" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["field"], "target");

        let (status, body) = call(
            &app,
            Method::POST,
            &uri,
            Some(FINANCE),
            Some(json!({ "comment": "needs IT review", "to_user_id": IT })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["assigned_to_user_id"], IT);
        assert_eq!(body["custom_flow"], true);

        let (status, view) = call(&app, Method::GET, &format!("/api/v1/requests/{id}"), Some(IT), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(view["last_comment"], "Forwarded: needs IT review");
        assert_eq!(view["assignee"]["name"], "Ivan");
    }

    #[tokio::test]
    async fn invalid_inputs_are_bad_requests() {
        let app = app().await;

        let (status, body) = call(
            &app,
            Method::POST,
            "/api/v1/requests",
            Some(EMPLOYEE),
            Some(json!({ "type": "vacation", "title": "x", "description": "y" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["field"], "type");

        let (status, _) =
            call(&app, Method::GET, "/api/v1/requests?filter=everything", Some(EMPLOYEE), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(&app, Method::GET, "/api/v1/requests?filter=all", Some(EMPLOYEE), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn users_can_be_filtered_by_role() {
        let app = app().await;
        let (status, users) = call(&app, Method::GET, "/api/v1/users?role=it", Some(EMPLOYEE), None).await;
        assert_eq!(status, StatusCode::OK);
        let names: Vec<&str> =
            users.as_array().expect("array").iter().filter_map(|user| user["name"].as_str()).collect();
        assert_eq!(names, vec!["Ivan"]);
    }

    #[tokio::test]
    async fn registration_needs_no_identity_and_rejects_duplicates() {
        let app = app().await;
        let registration = json!({ "email": "Nora@Example.edu", "name": "Nora" });

        let (status, user) =
            call(&app, Method::POST, "/api/v1/users", None, Some(registration.clone())).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(user["email"], "nora@example.edu");
        assert_eq!(user["role"], "employee");
        assert_eq!(user["confirmed"], true);

        let (status, body) =
            call(&app, Method::POST, "/api/v1/users", None, Some(registration)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "conflict");

        let (status, body) = call(
            &app,
            Method::POST,
            "/api/v1/users",
            None,
            Some(json!({ "email": "eve@gmail.com", "name": "Eve", "role": "finance" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["field"], "email");

        let id = user["id"].as_i64().expect("id");
        let (status, _) = call(&app, Method::GET, "/api/v1/users", Some(id), None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn requester_records_attachment_metadata() {
        let app = app().await;
        let id = create_purchase(&app).await;
        let uri = format!("/api/v1/requests/{id}/attachments");
        let metadata = json!({
            "filename": "5f1c-quote.pdf",
            "original_filename": "quote.pdf",
            "mime_type": "application/pdf",
            "size": 48213,
            "path": "uploads/5f1c-quote.pdf"
        });

        let (status, _) = call(&app, Method::POST, &uri, Some(FINANCE), Some(metadata.clone())).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, attachment) =
            call(&app, Method::POST, &uri, Some(EMPLOYEE), Some(metadata)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(attachment["request_id"], id);
        assert_eq!(attachment["original_filename"], "quote.pdf");

        let (status, view) =
            call(&app, Method::GET, &format!("/api/v1/requests/{id}"), Some(FINANCE), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(view["attachments"].as_array().map(Vec::len), Some(1));

        let (status, _) = call(
            &app,
            Method::POST,
            "/api/v1/requests/999/attachments",
            Some(EMPLOYEE),
            Some(json!({
                "filename": "x", "original_filename": "x", "mime_type": "text/plain",
                "size": 1, "path": "uploads/x"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
