use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, Transaction};
use tracing::debug;

use requestflow_core::domain::history::{HistoryAction, HistoryDraft, HistoryEntry, HistoryId};
use requestflow_core::domain::request::{Request, RequestId, RequestStatus};
use requestflow_core::domain::user::{Role, UserId};
use requestflow_core::errors::StoreError;
use requestflow_core::ports::{
    RequestDraft, RequestMutation, RequestRevision, TransitionResult, WorkflowStore,
};

use super::{
    decode_column, decode_optional, decode_timestamp, encode_timestamp, storage_precision,
    RepositoryError,
};
use crate::DbPool;

const REQUEST_COLUMNS: &str = "id, type, title, description, reason, urgency, status, requester_id,
     current_approver_role, assigned_to_user_id, custom_flow, created_at, updated_at";

const HISTORY_COLUMNS: &str = "id, request_id, user_id, action, comment, previous_status,
     new_status, forwarded_to_role, forwarded_to_user_id, created_at";

const URGENCY_ORDER: &str =
    "CASE urgency WHEN 'high' THEN 1 WHEN 'medium' THEN 2 WHEN 'low' THEN 3 ELSE 4 END";

/// Requests and their approval ledger, backed by SQLite.
pub struct SqlWorkflowStore {
    pool: DbPool,
}

impl SqlWorkflowStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn fetch_request(&self, id: RequestId) -> Result<Option<Request>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {REQUEST_COLUMNS} FROM requests WHERE id = ?"))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_request(r)?)),
            None => Ok(None),
        }
    }

    async fn fetch_requests(
        &self,
        sql: &str,
        bind: Option<Bind<'_>>,
    ) -> Result<Vec<Request>, RepositoryError> {
        let query = sqlx::query(sql);
        let query = match bind {
            Some(Bind::Int(value)) => query.bind(value),
            Some(Bind::Text(value)) => query.bind(value),
            None => query,
        };
        let rows: Vec<SqliteRow> = query.fetch_all(&self.pool).await?;
        rows.iter().map(row_to_request).collect::<Result<Vec<_>, _>>()
    }

    async fn insert_request(
        &self,
        mut draft: RequestDraft,
        entry: HistoryDraft,
    ) -> Result<Request, RepositoryError> {
        draft.created_at = storage_precision(draft.created_at);
        let mut tx = self.pool.begin().await?;
        let created_at = encode_timestamp(draft.created_at);

        let result = sqlx::query(
            "INSERT INTO requests (type, title, description, reason, urgency, status, requester_id,
                                   current_approver_role, assigned_to_user_id, custom_flow,
                                   created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(draft.request_type.as_str())
        .bind(&draft.title)
        .bind(&draft.description)
        .bind(&draft.reason)
        .bind(draft.urgency.as_str())
        .bind(RequestStatus::Pending.as_str())
        .bind(draft.requester_id.0)
        .bind(draft.current_approver_role.map(|role| role.as_str()))
        .bind(draft.assigned_to_user_id.map(|user| user.0))
        .bind(draft.custom_flow)
        .bind(&created_at)
        .bind(&created_at)
        .execute(&mut *tx)
        .await?;

        let id = RequestId(result.last_insert_rowid());
        insert_history(&mut tx, id, &entry).await?;
        tx.commit().await?;

        Ok(draft.into_request(id))
    }

    async fn apply_transition(
        &self,
        id: RequestId,
        expected: RequestRevision,
        mutation: RequestMutation,
        mut entry: HistoryDraft,
    ) -> Result<TransitionResult, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "UPDATE requests
             SET status = ?, current_approver_role = ?, assigned_to_user_id = ?,
                 custom_flow = ?, updated_at = ?
             WHERE id = ? AND status = ? AND current_approver_role IS ?
               AND assigned_to_user_id IS ? AND updated_at = ?",
        )
        .bind(mutation.status.as_str())
        .bind(mutation.current_approver_role.map(|role| role.as_str()))
        .bind(mutation.assigned_to_user_id.map(|user| user.0))
        .bind(mutation.custom_flow)
        .bind(encode_timestamp(mutation.updated_at))
        .bind(id.0)
        .bind(expected.status.as_str())
        .bind(expected.current_approver_role.map(|role| role.as_str()))
        .bind(expected.assigned_to_user_id.map(|user| user.0))
        .bind(encode_timestamp(expected.updated_at))
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            let current: Option<String> =
                sqlx::query_scalar("SELECT status FROM requests WHERE id = ?")
                    .bind(id.0)
                    .fetch_optional(&mut *tx)
                    .await?;
            tx.rollback().await?;
            debug!(
                event_name = "store.transition.stale",
                request_id = id.0,
                expected_status = %expected.status,
                current_status = ?current,
                "transition guard did not match"
            );
            return Ok(TransitionResult::Stale(decode_optional("status", current)?));
        }

        // The UPDATE holds the write lock from here to commit.
        entry.created_at = storage_precision(Utc::now());
        insert_history(&mut tx, id, &entry).await?;
        let row = sqlx::query(&format!("SELECT {REQUEST_COLUMNS} FROM requests WHERE id = ?"))
            .bind(id.0)
            .fetch_one(&mut *tx)
            .await?;
        let updated = row_to_request(&row)?;
        tx.commit().await?;

        Ok(TransitionResult::Applied(updated))
    }

    async fn fetch_history(&self, id: RequestId) -> Result<Vec<HistoryEntry>, RepositoryError> {
        let rows: Vec<SqliteRow> = sqlx::query(&format!(
            "SELECT {HISTORY_COLUMNS} FROM approval_history
             WHERE request_id = ?
             ORDER BY created_at ASC, id ASC"
        ))
        .bind(id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_history).collect::<Result<Vec<_>, _>>()
    }

    async fn fetch_last_comment(&self, id: RequestId) -> Result<Option<String>, RepositoryError> {
        let comment: Option<String> = sqlx::query_scalar(
            "SELECT comment FROM approval_history
             WHERE request_id = ? AND comment IS NOT NULL AND TRIM(comment) <> ''
             ORDER BY created_at DESC, id DESC
             LIMIT 1",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(comment)
    }
}

enum Bind<'a> {
    Int(i64),
    Text(&'a str),
}

async fn insert_history(
    tx: &mut Transaction<'_, Sqlite>,
    request_id: RequestId,
    entry: &HistoryDraft,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO approval_history (request_id, user_id, action, comment, previous_status,
                                       new_status, forwarded_to_role, forwarded_to_user_id,
                                       created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(request_id.0)
    .bind(entry.actor_user_id.0)
    .bind(entry.action.as_str())
    .bind(&entry.comment)
    .bind(entry.previous_status.map(|status| status.as_str()))
    .bind(entry.new_status.map(|status| status.as_str()))
    .bind(entry.forwarded_to_role.map(|role| role.as_str()))
    .bind(entry.forwarded_to_user_id.map(|user| user.0))
    .bind(encode_timestamp(entry.created_at))
    .execute(&mut **tx)
    .await?;
    Ok(())
}

fn decode_err(error: sqlx::Error) -> RepositoryError {
    RepositoryError::Decode(error.to_string())
}

fn row_to_request(row: &SqliteRow) -> Result<Request, RepositoryError> {
    let request_type: String = row.try_get("type").map_err(decode_err)?;
    let urgency: String = row.try_get("urgency").map_err(decode_err)?;
    let status: String = row.try_get("status").map_err(decode_err)?;
    let role: Option<String> = row.try_get("current_approver_role").map_err(decode_err)?;
    let assigned: Option<i64> = row.try_get("assigned_to_user_id").map_err(decode_err)?;
    let created_at: String = row.try_get("created_at").map_err(decode_err)?;
    let updated_at: String = row.try_get("updated_at").map_err(decode_err)?;

    Ok(Request {
        id: RequestId(row.try_get("id").map_err(decode_err)?),
        request_type: decode_column("type", &request_type)?,
        title: row.try_get("title").map_err(decode_err)?,
        description: row.try_get("description").map_err(decode_err)?,
        reason: row.try_get("reason").map_err(decode_err)?,
        urgency: decode_column("urgency", &urgency)?,
        status: decode_column("status", &status)?,
        requester_id: UserId(row.try_get("requester_id").map_err(decode_err)?),
        current_approver_role: decode_optional::<Role>("current_approver_role", role)?,
        assigned_to_user_id: assigned.map(UserId),
        custom_flow: row.try_get("custom_flow").map_err(decode_err)?,
        created_at: decode_timestamp("created_at", &created_at)?,
        updated_at: decode_timestamp("updated_at", &updated_at)?,
    })
}

fn row_to_history(row: &SqliteRow) -> Result<HistoryEntry, RepositoryError> {
    let action: String = row.try_get("action").map_err(decode_err)?;
    let previous: Option<String> = row.try_get("previous_status").map_err(decode_err)?;
    let next: Option<String> = row.try_get("new_status").map_err(decode_err)?;
    let role: Option<String> = row.try_get("forwarded_to_role").map_err(decode_err)?;
    let user: Option<i64> = row.try_get("forwarded_to_user_id").map_err(decode_err)?;
    let created_at: String = row.try_get("created_at").map_err(decode_err)?;

    Ok(HistoryEntry {
        id: HistoryId(row.try_get("id").map_err(decode_err)?),
        request_id: RequestId(row.try_get("request_id").map_err(decode_err)?),
        actor_user_id: UserId(row.try_get("user_id").map_err(decode_err)?),
        action: decode_column::<HistoryAction>("action", &action)?,
        comment: row.try_get("comment").map_err(decode_err)?,
        previous_status: decode_optional("previous_status", previous)?,
        new_status: decode_optional("new_status", next)?,
        forwarded_to_role: decode_optional("forwarded_to_role", role)?,
        forwarded_to_user_id: user.map(UserId),
        created_at: decode_timestamp("created_at", &created_at)?,
    })
}

#[async_trait]
impl WorkflowStore for SqlWorkflowStore {
    async fn create_request(
        &self,
        draft: RequestDraft,
        entry: HistoryDraft,
    ) -> Result<Request, StoreError> {
        Ok(self.insert_request(draft, entry).await?)
    }

    async fn find_request(&self, id: RequestId) -> Result<Option<Request>, StoreError> {
        Ok(self.fetch_request(id).await?)
    }

    async fn transition_request(
        &self,
        id: RequestId,
        expected: RequestRevision,
        mutation: RequestMutation,
        entry: HistoryDraft,
    ) -> Result<TransitionResult, StoreError> {
        Ok(self.apply_transition(id, expected, mutation, entry).await?)
    }

    async fn history_for(&self, id: RequestId) -> Result<Vec<HistoryEntry>, StoreError> {
        Ok(self.fetch_history(id).await?)
    }

    async fn last_comment(&self, id: RequestId) -> Result<Option<String>, StoreError> {
        Ok(self.fetch_last_comment(id).await?)
    }

    async fn list_by_requester(&self, requester: UserId) -> Result<Vec<Request>, StoreError> {
        let sql = format!(
            "SELECT {REQUEST_COLUMNS} FROM requests
             WHERE requester_id = ?
             ORDER BY created_at DESC, id DESC"
        );
        Ok(self.fetch_requests(&sql, Some(Bind::Int(requester.0))).await?)
    }

    async fn list_open_by_role(&self, role: Role) -> Result<Vec<Request>, StoreError> {
        let sql = format!(
            "SELECT {REQUEST_COLUMNS} FROM requests
             WHERE status IN ('pending', 'in_progress') AND current_approver_role = ?
             ORDER BY {URGENCY_ORDER}, created_at ASC, id ASC"
        );
        Ok(self.fetch_requests(&sql, Some(Bind::Text(role.as_str()))).await?)
    }

    async fn list_open_by_assignee(&self, user: UserId) -> Result<Vec<Request>, StoreError> {
        let sql = format!(
            "SELECT {REQUEST_COLUMNS} FROM requests
             WHERE status IN ('pending', 'in_progress') AND assigned_to_user_id = ?
             ORDER BY {URGENCY_ORDER}, created_at ASC, id ASC"
        );
        Ok(self.fetch_requests(&sql, Some(Bind::Int(user.0))).await?)
    }

    async fn list_all(&self) -> Result<Vec<Request>, StoreError> {
        let sql = format!("SELECT {REQUEST_COLUMNS} FROM requests ORDER BY created_at DESC, id DESC");
        Ok(self.fetch_requests(&sql, None).await?)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, Utc};

    use requestflow_core::domain::history::{HistoryAction, HistoryDraft};
    use requestflow_core::domain::request::{
        AssignmentTarget, CreateRequest, Decision, ForwardTarget, RequestId, RequestStatus,
        RequestType, Urgency,
    };
    use requestflow_core::domain::user::{Caller, Role, UserId};
    use requestflow_core::engine::RequestEngine;
    use requestflow_core::memory::RecordingNotifier;
    use requestflow_core::errors::StoreError;
    use requestflow_core::ports::{
        RequestDraft, RequestMutation, RequestRevision, TransitionResult, WorkflowStore,
    };

    use super::SqlWorkflowStore;
    use crate::repositories::test_support::{insert_user, setup};
    use crate::repositories::{SqlAttachmentRepository, SqlUserDirectory};
    use crate::DbPool;

    fn draft(requester: UserId, urgency: Urgency, offset_secs: i64) -> RequestDraft {
        RequestDraft {
            request_type: RequestType::Support,
            title: "VPN access".to_string(),
            description: "Cannot reach the intranet".to_string(),
            reason: None,
            urgency,
            requester_id: requester,
            current_approver_role: Some(Role::It),
            assigned_to_user_id: None,
            custom_flow: false,
            created_at: Utc::now() + Duration::seconds(offset_secs),
        }
    }

    fn created(actor: UserId) -> HistoryDraft {
        HistoryDraft::new(actor, HistoryAction::Created)
            .with_comment(Some("Request created".to_string()))
            .with_transition(None, RequestStatus::Pending)
    }

    fn engine(pool: &DbPool) -> RequestEngine {
        RequestEngine::new(
            Arc::new(SqlWorkflowStore::new(pool.clone())),
            Arc::new(SqlUserDirectory::new(pool.clone())),
            Arc::new(SqlAttachmentRepository::new(pool.clone())),
            Arc::new(RecordingNotifier::default()),
        )
    }

    #[tokio::test]
    async fn create_writes_row_and_created_entry() {
        let pool = setup().await;
        let requester = insert_user(&pool, "ana@example.edu", "Ana", Role::Employee).await;
        let store = SqlWorkflowStore::new(pool);

        let request = store.create_request(draft(requester, Urgency::High, 0), created(requester))
            .await
            .expect("create");
        let found = store.find_request(request.id).await.expect("find").expect("exists");
        assert_eq!(found, request);

        let history = store.history_for(request.id).await.expect("history");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].action, HistoryAction::Created);
        assert_eq!(history[0].new_status, Some(RequestStatus::Pending));
    }

    #[tokio::test]
    async fn stale_transition_writes_nothing() {
        let pool = setup().await;
        let requester = insert_user(&pool, "ana@example.edu", "Ana", Role::Employee).await;
        let store = SqlWorkflowStore::new(pool);
        let request = store
            .create_request(draft(requester, Urgency::Low, 0), created(requester))
            .await
            .expect("create");

        let mutation = RequestMutation {
            status: RequestStatus::Approved,
            current_approver_role: None,
            assigned_to_user_id: None,
            custom_flow: false,
            updated_at: Utc::now(),
        };
        let entry = HistoryDraft::new(requester, HistoryAction::Approved)
            .with_transition(Some(RequestStatus::InProgress), RequestStatus::Approved);
        let outdated = RequestRevision {
            status: RequestStatus::InProgress,
            ..RequestRevision::of(&request)
        };
        let outcome = store
            .transition_request(request.id, outdated, mutation.clone(), entry.clone())
            .await
            .expect("transition");
        assert_eq!(outcome, TransitionResult::Stale(Some(RequestStatus::Pending)));
        assert_eq!(store.history_for(request.id).await.expect("history").len(), 1);

        let missing = store
            .transition_request(RequestId(999), RequestRevision::of(&request), mutation, entry)
            .await
            .expect("transition");
        assert_eq!(missing, TransitionResult::Stale(None));
    }

    #[tokio::test]
    async fn transition_from_outdated_owner_is_stale() {
        let pool = setup().await;
        let requester = insert_user(&pool, "ana@example.edu", "Ana", Role::Employee).await;
        let store = SqlWorkflowStore::new(pool);
        let request = store
            .create_request(draft(requester, Urgency::Low, 0), created(requester))
            .await
            .expect("create");
        let snapshot = RequestRevision::of(&request);

        let forward = RequestMutation {
            status: RequestStatus::Pending,
            current_approver_role: Some(Role::Finance),
            assigned_to_user_id: None,
            custom_flow: true,
            updated_at: Utc::now() + Duration::milliseconds(5),
        };
        let forwarded = HistoryDraft::new(requester, HistoryAction::Forwarded)
            .with_comment(Some("Forwarded: budget".to_string()))
            .with_transition(Some(RequestStatus::Pending), RequestStatus::Pending)
            .with_target(Some(Role::Finance), None);
        let applied = store
            .transition_request(request.id, snapshot, forward, forwarded)
            .await
            .expect("forward");
        assert!(matches!(applied, TransitionResult::Applied(_)));

        // Same status, different owner: a decision read before the forward.
        let decide = RequestMutation {
            status: RequestStatus::Approved,
            current_approver_role: None,
            assigned_to_user_id: None,
            custom_flow: false,
            updated_at: Utc::now() + Duration::milliseconds(10),
        };
        let approved = HistoryDraft::new(requester, HistoryAction::Approved)
            .with_transition(Some(RequestStatus::Pending), RequestStatus::Approved);
        let stale = store
            .transition_request(request.id, snapshot, decide, approved)
            .await
            .expect("decide");
        assert_eq!(stale, TransitionResult::Stale(Some(RequestStatus::Pending)));

        let current = store.find_request(request.id).await.expect("find").expect("exists");
        assert_eq!(current.current_approver_role, Some(Role::Finance));
        assert_eq!(store.history_for(request.id).await.expect("history").len(), 2);
    }

    #[tokio::test]
    async fn create_rolls_back_when_ledger_insert_fails() {
        let pool = setup().await;
        let requester = insert_user(&pool, "ana@example.edu", "Ana", Role::Employee).await;
        let store = SqlWorkflowStore::new(pool.clone());

        let error = store
            .create_request(draft(requester, Urgency::High, 0), created(UserId(999)))
            .await
            .expect_err("ledger actor does not exist");
        match error {
            StoreError::Unavailable(message) => {
                assert!(message.contains("FOREIGN KEY constraint failed"), "{message}")
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM requests")
            .fetch_one(&pool)
            .await
            .expect("count requests");
        assert_eq!(rows, 0);
    }

    #[tokio::test]
    async fn transition_rolls_back_when_ledger_insert_fails() {
        let pool = setup().await;
        let requester = insert_user(&pool, "ana@example.edu", "Ana", Role::Employee).await;
        let store = SqlWorkflowStore::new(pool);
        let request = store
            .create_request(draft(requester, Urgency::High, 0), created(requester))
            .await
            .expect("create");

        let mutation = RequestMutation {
            status: RequestStatus::Approved,
            current_approver_role: None,
            assigned_to_user_id: None,
            custom_flow: false,
            updated_at: Utc::now(),
        };
        let entry = HistoryDraft::new(UserId(999), HistoryAction::Approved)
            .with_transition(Some(RequestStatus::Pending), RequestStatus::Approved);
        let error = store
            .transition_request(request.id, RequestRevision::of(&request), mutation, entry)
            .await
            .expect_err("ledger actor does not exist");
        assert!(matches!(error, StoreError::Unavailable(_)));

        let current = store.find_request(request.id).await.expect("find").expect("exists");
        assert_eq!(current, request);
        assert_eq!(store.history_for(request.id).await.expect("history").len(), 1);
    }

    #[tokio::test]
    async fn open_queues_order_by_urgency_then_age() {
        let pool = setup().await;
        let requester = insert_user(&pool, "ana@example.edu", "Ana", Role::Employee).await;
        let store = SqlWorkflowStore::new(pool);

        let low = store.create_request(draft(requester, Urgency::Low, 0), created(requester)).await.expect("low");
        let old_medium =
            store.create_request(draft(requester, Urgency::Medium, 1), created(requester)).await.expect("medium");
        let new_medium =
            store.create_request(draft(requester, Urgency::Medium, 2), created(requester)).await.expect("medium");
        let high = store.create_request(draft(requester, Urgency::High, 3), created(requester)).await.expect("high");

        let queue = store.list_open_by_role(Role::It).await.expect("queue");
        let ids: Vec<RequestId> = queue.iter().map(|request| request.id).collect();
        assert_eq!(ids, vec![high.id, old_medium.id, new_medium.id, low.id]);

        let mine = store.list_by_requester(requester).await.expect("mine");
        assert_eq!(mine.first().map(|request| request.id), Some(high.id));
        assert!(store.list_open_by_role(Role::Finance).await.expect("empty").is_empty());
    }

    #[tokio::test]
    async fn scenario_purchase_approved_by_finance() {
        let pool = setup().await;
        let requester = insert_user(&pool, "ana@example.edu", "Ana", Role::Employee).await;
        let finance = insert_user(&pool, "fin@example.edu", "Fin", Role::Finance).await;
        let engine = engine(&pool);

        let request = engine
            .create(
                CreateRequest {
                    request_type: RequestType::Purchase,
                    title: "Lab microscopes".to_string(),
                    description: "Two units for biology".to_string(),
                    reason: Some("Semester start".to_string()),
                    urgency: Some(Urgency::High),
                    assignment: AssignmentTarget::Default,
                },
                &Caller::new(requester, Role::Employee),
            )
            .await
            .expect("create");
        assert_eq!(request.current_approver_role, Some(Role::Finance));

        let decided = engine
            .decide(request.id, &Caller::new(finance, Role::Finance), Decision::Approve, Some("ok".to_string()))
            .await
            .expect("approve");
        assert_eq!(decided.status, RequestStatus::Approved);
        assert_eq!(decided.current_approver_role, None);

        let history = engine.history_for(request.id).await.expect("history");
        let actions: Vec<HistoryAction> = history.iter().map(|entry| entry.action).collect();
        assert_eq!(actions, vec![HistoryAction::Created, HistoryAction::Approved]);
        assert_eq!(history[1].previous_status, Some(RequestStatus::Pending));
        assert_eq!(engine.last_comment(request.id).await.expect("comment").as_deref(), Some("ok"));

        let again = engine
            .decide(request.id, &Caller::new(finance, Role::Finance), Decision::Reject, None)
            .await
            .expect_err("already decided");
        assert_eq!(again.kind(), "conflict");
    }

    #[tokio::test]
    async fn scenario_support_forwarded_to_user() {
        let pool = setup().await;
        let requester = insert_user(&pool, "ana@example.edu", "Ana", Role::Employee).await;
        let it = insert_user(&pool, "ivan@example.edu", "Ivan", Role::It).await;
        let gs = insert_user(&pool, "gus@example.edu", "Gus", Role::GeneralServices).await;
        let engine = engine(&pool);

        let request = engine
            .create(
                CreateRequest {
                    request_type: RequestType::Support,
                    title: "Broken projector".to_string(),
                    description: "Room 12".to_string(),
                    reason: None,
                    urgency: None,
                    assignment: AssignmentTarget::Default,
                },
                &Caller::new(requester, Role::Employee),
            )
            .await
            .expect("create");

        let forwarded = engine
            .forward(request.id, &Caller::new(it, Role::It), "hardware issue", ForwardTarget::ToUser(gs))
            .await
            .expect("forward");
        assert_eq!(forwarded.assigned_to_user_id, Some(gs));
        assert_eq!(forwarded.current_approver_role, None);
        assert!(forwarded.custom_flow);

        let history = engine.history_for(request.id).await.expect("history");
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].comment.as_deref(), Some("Forwarded: hardware issue"));
        assert_eq!(history[1].forwarded_to_user_id, Some(gs));

        let queue = engine.pending_for(&Caller::new(gs, Role::GeneralServices)).await.expect("queue");
        assert_eq!(queue.len(), 1);
        let it_queue = engine.pending_for(&Caller::new(it, Role::It)).await.expect("it queue");
        assert!(it_queue.is_empty());
    }

    #[tokio::test]
    async fn concurrent_decisions_on_one_request_yield_single_winner() {
        let dir = tempfile::TempDir::new().expect("temp dir");
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("race.db").display());
        let pool = crate::connect_with_settings(&url, 4, 30).await.expect("connect");
        crate::migrations::run_pending(&pool).await.expect("migrations");
        let requester = insert_user(&pool, "ana@example.edu", "Ana", Role::Employee).await;
        let finance = insert_user(&pool, "fin@example.edu", "Fin", Role::Finance).await;
        let admin = insert_user(&pool, "root@example.edu", "Root", Role::Admin).await;
        let engine = engine(&pool);

        let request = engine
            .create(
                CreateRequest {
                    request_type: RequestType::Purchase,
                    title: "Chairs".to_string(),
                    description: "Ten chairs".to_string(),
                    reason: None,
                    urgency: None,
                    assignment: AssignmentTarget::Default,
                },
                &Caller::new(requester, Role::Employee),
            )
            .await
            .expect("create");

        let finance_caller = Caller::new(finance, Role::Finance);
        let admin_caller = Caller::new(admin, Role::Admin);
        let (first, second) = tokio::join!(
            engine.decide(request.id, &finance_caller, Decision::Approve, None),
            engine.decide(request.id, &admin_caller, Decision::Reject, None),
        );

        assert_eq!([first.is_ok(), second.is_ok()].iter().filter(|ok| **ok).count(), 1);
        let loser = first.err().or(second.err()).expect("one loser");
        assert_eq!(loser.kind(), "conflict");
        assert_eq!(engine.history_for(request.id).await.expect("history").len(), 2);
    }

    #[tokio::test]
    async fn concurrent_forwards_keep_ledger_in_step_with_owner() {
        let dir = tempfile::TempDir::new().expect("temp dir");
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("forward.db").display());
        let pool = crate::connect_with_settings(&url, 4, 30).await.expect("connect");
        crate::migrations::run_pending(&pool).await.expect("migrations");
        let requester = insert_user(&pool, "ana@example.edu", "Ana", Role::Employee).await;
        let it = insert_user(&pool, "ivan@example.edu", "Ivan", Role::It).await;
        let store = SqlWorkflowStore::new(pool);

        let request = store
            .create_request(draft(requester, Urgency::Medium, 0), created(requester))
            .await
            .expect("create");
        let snapshot = RequestRevision::of(&request);

        let forward_to = |actor: UserId, role: Role| {
            let mutation = RequestMutation {
                status: RequestStatus::Pending,
                current_approver_role: Some(role),
                assigned_to_user_id: None,
                custom_flow: true,
                updated_at: Utc::now(),
            };
            let entry = HistoryDraft::new(actor, HistoryAction::Forwarded)
                .with_comment(Some(format!("Forwarded: to {role}")))
                .with_transition(Some(RequestStatus::Pending), RequestStatus::Pending)
                .with_target(Some(role), None);
            (mutation, entry)
        };
        let (finance_mutation, finance_entry) = forward_to(requester, Role::Finance);
        let (hr_mutation, hr_entry) = forward_to(it, Role::Hr);

        let (first, second) = tokio::join!(
            store.transition_request(request.id, snapshot, finance_mutation, finance_entry),
            store.transition_request(request.id, snapshot, hr_mutation, hr_entry),
        );
        let outcomes = [first.expect("first"), second.expect("second")];
        let applied = outcomes
            .iter()
            .filter(|outcome| matches!(outcome, TransitionResult::Applied(_)))
            .count();
        assert_eq!(applied, 1);
        assert!(outcomes.contains(&TransitionResult::Stale(Some(RequestStatus::Pending))));

        let row = store.find_request(request.id).await.expect("find").expect("exists");
        let history = store.history_for(request.id).await.expect("history");
        assert_eq!(history.len(), 2);
        let last = history.last().expect("forward entry");
        assert_eq!(last.action, HistoryAction::Forwarded);
        assert_eq!(last.forwarded_to_role, row.current_approver_role);
        assert!(last.created_at >= history[0].created_at);
    }
}
