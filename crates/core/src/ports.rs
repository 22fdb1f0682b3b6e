//! Collaborator contracts consumed by the lifecycle engine.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::domain::attachment::{Attachment, AttachmentMetadata};
use crate::domain::history::{HistoryDraft, HistoryEntry};
use crate::domain::request::{Request, RequestId, RequestStatus, RequestType, Urgency};
use crate::domain::user::{NewUser, Role, User, UserId};
use crate::errors::StoreError;

/// A request row that has not been written yet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestDraft {
    pub request_type: RequestType,
    pub title: String,
    pub description: String,
    pub reason: Option<String>,
    pub urgency: Urgency,
    pub requester_id: UserId,
    pub current_approver_role: Option<Role>,
    pub assigned_to_user_id: Option<UserId>,
    pub custom_flow: bool,
    pub created_at: DateTime<Utc>,
}

impl RequestDraft {
    pub fn into_request(self, id: RequestId) -> Request {
        Request {
            id,
            request_type: self.request_type,
            title: self.title,
            description: self.description,
            reason: self.reason,
            urgency: self.urgency,
            status: RequestStatus::Pending,
            requester_id: self.requester_id,
            current_approver_role: self.current_approver_role,
            assigned_to_user_id: self.assigned_to_user_id,
            custom_flow: self.custom_flow,
            created_at: self.created_at,
            updated_at: self.created_at,
        }
    }
}

/// New ownership and status written by a decide or forward.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestMutation {
    pub status: RequestStatus,
    pub current_approver_role: Option<Role>,
    pub assigned_to_user_id: Option<UserId>,
    pub custom_flow: bool,
    pub updated_at: DateTime<Utc>,
}

impl RequestMutation {
    pub fn apply(&self, request: &mut Request) {
        request.status = self.status;
        request.current_approver_role = self.current_approver_role;
        request.assigned_to_user_id = self.assigned_to_user_id;
        request.custom_flow = self.custom_flow;
        request.updated_at = self.updated_at;
    }
}

/// What a transition is conditioned on: the status and ownership the caller
/// read, plus the row's `updated_at` at that moment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RequestRevision {
    pub status: RequestStatus,
    pub current_approver_role: Option<Role>,
    pub assigned_to_user_id: Option<UserId>,
    pub updated_at: DateTime<Utc>,
}

impl RequestRevision {
    pub fn of(request: &Request) -> Self {
        Self {
            status: request.status,
            current_approver_role: request.current_approver_role,
            assigned_to_user_id: request.assigned_to_user_id,
            updated_at: request.updated_at,
        }
    }

    pub fn matches(&self, request: &Request) -> bool {
        *self == Self::of(request)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransitionResult {
    Applied(Request),
    /// The stored row no longer matches the expected revision (`None` when
    /// the row no longer exists). Carries the current status. Nothing was
    /// written.
    Stale(Option<RequestStatus>),
}

/// Persistence port for requests and their ledger.
///
/// `create_request` and `transition_request` write the row change and the
/// ledger entry as one atomic unit. `transition_request` is a compare-and-set
/// on the whole [`RequestRevision`]: a concurrent decide or forward that got
/// there first makes it return `Stale`. The store stamps the ledger entry of
/// an applied transition while it holds the write, so ledger order follows
/// commit order.
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    async fn create_request(
        &self,
        draft: RequestDraft,
        entry: HistoryDraft,
    ) -> Result<Request, StoreError>;

    async fn find_request(&self, id: RequestId) -> Result<Option<Request>, StoreError>;

    async fn transition_request(
        &self,
        id: RequestId,
        expected: RequestRevision,
        mutation: RequestMutation,
        entry: HistoryDraft,
    ) -> Result<TransitionResult, StoreError>;

    /// Ledger entries ordered by `created_at`, then insertion order.
    async fn history_for(&self, id: RequestId) -> Result<Vec<HistoryEntry>, StoreError>;

    async fn last_comment(&self, id: RequestId) -> Result<Option<String>, StoreError>;

    /// Newest first.
    async fn list_by_requester(&self, requester: UserId) -> Result<Vec<Request>, StoreError>;

    /// Open requests owned by `role`, most urgent first, then oldest first.
    async fn list_open_by_role(&self, role: Role) -> Result<Vec<Request>, StoreError>;

    /// Open requests assigned to `user`, most urgent first, then oldest first.
    async fn list_open_by_assignee(&self, user: UserId) -> Result<Vec<Request>, StoreError>;

    /// Newest first.
    async fn list_all(&self) -> Result<Vec<Request>, StoreError>;
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn get_user(&self, id: UserId) -> Result<Option<User>, StoreError>;

    /// Case-insensitive lookup.
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    /// Writes a new user. A taken email is `StoreError::Duplicate`.
    async fn insert_user(&self, new_user: NewUser, confirmed: bool) -> Result<User, StoreError>;

    async fn list_users(&self) -> Result<Vec<User>, StoreError>;

    /// Confirmed users holding `role`, ordered by name.
    async fn list_by_role(&self, role: Role) -> Result<Vec<User>, StoreError>;
}

#[async_trait]
pub trait AttachmentCatalog: Send + Sync {
    async fn record(
        &self,
        request_id: RequestId,
        metadata: AttachmentMetadata,
    ) -> Result<Attachment, StoreError>;

    /// Oldest first.
    async fn list_for(&self, request_id: RequestId) -> Result<Vec<Attachment>, StoreError>;
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Contact {
    pub name: String,
    pub email: String,
}

impl From<&User> for Contact {
    fn from(user: &User) -> Self {
        Self { name: user.name.clone(), email: user.email.clone() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AssignmentNotice {
    pub request_id: RequestId,
    pub request_type: RequestType,
    pub title: String,
    pub description: String,
    pub urgency: Urgency,
    pub created_by: Contact,
    pub is_forwarded: bool,
    pub forwarded_by: Option<Contact>,
}

/// Best-effort delivery of assignment notices. Returns whether the notice
/// was handed off; callers never fail because of it.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_assignment(&self, recipient: &User, notice: &AssignmentNotice) -> bool;
}

/// Notifier used when outbound delivery is disabled.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify_assignment(&self, recipient: &User, notice: &AssignmentNotice) -> bool {
        info!(
            event_name = "notification.assignment.logged",
            request_id = notice.request_id.0,
            recipient_id = recipient.id.0,
            is_forwarded = notice.is_forwarded,
            "assignment notice recorded without delivery"
        );
        true
    }
}
