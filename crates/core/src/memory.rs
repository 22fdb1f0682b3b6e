//! In-process implementations of the ports, used by tests and demos.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::domain::attachment::{Attachment, AttachmentId, AttachmentMetadata};
use crate::domain::history::{self, HistoryDraft, HistoryEntry, HistoryId};
use crate::domain::request::{Request, RequestId};
use crate::domain::user::{NewUser, Role, User, UserId};
use crate::errors::StoreError;
use crate::ports::{
    AssignmentNotice, AttachmentCatalog, Notifier, RequestDraft, RequestMutation,
    RequestRevision, TransitionResult, UserDirectory, WorkflowStore,
};

#[derive(Default)]
struct WorkflowState {
    requests: BTreeMap<RequestId, Request>,
    history: Vec<HistoryEntry>,
    next_request_id: i64,
    next_history_id: i64,
}

impl WorkflowState {
    fn append(&mut self, request_id: RequestId, entry: HistoryDraft) {
        self.next_history_id += 1;
        self.history.push(entry.into_entry(HistoryId(self.next_history_id), request_id));
    }

    fn history_for(&self, id: RequestId) -> Vec<HistoryEntry> {
        let mut entries: Vec<HistoryEntry> =
            self.history.iter().filter(|entry| entry.request_id == id).cloned().collect();
        entries.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        entries
    }
}

#[derive(Default)]
pub struct InMemoryWorkflowStore {
    state: RwLock<WorkflowState>,
}

fn newest_first(requests: &mut [Request]) {
    requests.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
}

fn queue_order(requests: &mut [Request]) {
    requests.sort_by(|a, b| {
        a.urgency
            .priority()
            .cmp(&b.urgency.priority())
            .then(a.created_at.cmp(&b.created_at))
            .then(a.id.cmp(&b.id))
    });
}

#[async_trait]
impl WorkflowStore for InMemoryWorkflowStore {
    async fn create_request(
        &self,
        draft: RequestDraft,
        entry: HistoryDraft,
    ) -> Result<Request, StoreError> {
        let mut state = self.state.write().await;
        state.next_request_id += 1;
        let request = draft.into_request(RequestId(state.next_request_id));
        state.requests.insert(request.id, request.clone());
        state.append(request.id, entry);
        Ok(request)
    }

    async fn find_request(&self, id: RequestId) -> Result<Option<Request>, StoreError> {
        Ok(self.state.read().await.requests.get(&id).cloned())
    }

    async fn transition_request(
        &self,
        id: RequestId,
        expected: RequestRevision,
        mutation: RequestMutation,
        mut entry: HistoryDraft,
    ) -> Result<TransitionResult, StoreError> {
        let mut state = self.state.write().await;
        let Some(request) = state.requests.get_mut(&id) else {
            return Ok(TransitionResult::Stale(None));
        };
        if !expected.matches(request) {
            return Ok(TransitionResult::Stale(Some(request.status)));
        }

        mutation.apply(request);
        let updated = request.clone();
        entry.created_at = Utc::now();
        state.append(id, entry);
        Ok(TransitionResult::Applied(updated))
    }

    async fn history_for(&self, id: RequestId) -> Result<Vec<HistoryEntry>, StoreError> {
        Ok(self.state.read().await.history_for(id))
    }

    async fn last_comment(&self, id: RequestId) -> Result<Option<String>, StoreError> {
        Ok(history::last_comment(&self.state.read().await.history_for(id)))
    }

    async fn list_by_requester(&self, requester: UserId) -> Result<Vec<Request>, StoreError> {
        let state = self.state.read().await;
        let mut requests: Vec<Request> = state
            .requests
            .values()
            .filter(|request| request.requester_id == requester)
            .cloned()
            .collect();
        newest_first(&mut requests);
        Ok(requests)
    }

    async fn list_open_by_role(&self, role: Role) -> Result<Vec<Request>, StoreError> {
        let state = self.state.read().await;
        let mut requests: Vec<Request> = state
            .requests
            .values()
            .filter(|request| {
                request.status.is_open() && request.current_approver_role == Some(role)
            })
            .cloned()
            .collect();
        queue_order(&mut requests);
        Ok(requests)
    }

    async fn list_open_by_assignee(&self, user: UserId) -> Result<Vec<Request>, StoreError> {
        let state = self.state.read().await;
        let mut requests: Vec<Request> = state
            .requests
            .values()
            .filter(|request| request.status.is_open() && request.assigned_to_user_id == Some(user))
            .cloned()
            .collect();
        queue_order(&mut requests);
        Ok(requests)
    }

    async fn list_all(&self) -> Result<Vec<Request>, StoreError> {
        let mut requests: Vec<Request> =
            self.state.read().await.requests.values().cloned().collect();
        newest_first(&mut requests);
        Ok(requests)
    }
}

#[derive(Default)]
pub struct InMemoryUserDirectory {
    users: RwLock<BTreeMap<UserId, User>>,
}

impl InMemoryUserDirectory {
    pub async fn insert(&self, user: User) {
        self.users.write().await.insert(user.id, user);
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn get_user(&self, id: UserId) -> Result<Option<User>, StoreError> {
        Ok(self.users.read().await.get(&id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let email = email.trim().to_ascii_lowercase();
        Ok(self.users.read().await.values().find(|user| user.email == email).cloned())
    }

    async fn insert_user(&self, new_user: NewUser, confirmed: bool) -> Result<User, StoreError> {
        let mut users = self.users.write().await;
        if users.values().any(|user| user.email == new_user.email) {
            return Err(StoreError::Duplicate(format!(
                "a user with email {} already exists",
                new_user.email
            )));
        }
        let id = UserId(users.keys().next_back().map_or(1, |last| last.0 + 1));
        let now = Utc::now();
        let user = User {
            id,
            email: new_user.email,
            name: new_user.name,
            role: new_user.role,
            confirmed,
            created_at: now,
            updated_at: now,
        };
        users.insert(id, user.clone());
        Ok(user)
    }

    async fn list_users(&self) -> Result<Vec<User>, StoreError> {
        Ok(self.users.read().await.values().cloned().collect())
    }

    async fn list_by_role(&self, role: Role) -> Result<Vec<User>, StoreError> {
        let mut users: Vec<User> = self
            .users
            .read()
            .await
            .values()
            .filter(|user| user.role == role && user.confirmed)
            .cloned()
            .collect();
        users.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(users)
    }
}

#[derive(Default)]
pub struct InMemoryAttachmentCatalog {
    attachments: RwLock<Vec<Attachment>>,
}

#[async_trait]
impl AttachmentCatalog for InMemoryAttachmentCatalog {
    async fn record(
        &self,
        request_id: RequestId,
        metadata: AttachmentMetadata,
    ) -> Result<Attachment, StoreError> {
        let mut attachments = self.attachments.write().await;
        let attachment = Attachment {
            id: AttachmentId(attachments.len() as i64 + 1),
            request_id,
            filename: metadata.filename,
            original_filename: metadata.original_filename,
            mime_type: metadata.mime_type,
            size: metadata.size,
            path: metadata.path,
            created_at: Utc::now(),
        };
        attachments.push(attachment.clone());
        Ok(attachment)
    }

    async fn list_for(&self, request_id: RequestId) -> Result<Vec<Attachment>, StoreError> {
        Ok(self
            .attachments
            .read()
            .await
            .iter()
            .filter(|attachment| attachment.request_id == request_id)
            .cloned()
            .collect())
    }
}

/// Notifier that keeps every notice it receives. With `failing` set it
/// records the attempt and reports a delivery failure.
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<(UserId, AssignmentNotice)>>>,
    failing: bool,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        Self { sent: Arc::default(), failing: true }
    }

    pub fn sent(&self) -> Vec<(UserId, AssignmentNotice)> {
        match self.sent.lock() {
            Ok(sent) => sent.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify_assignment(&self, recipient: &User, notice: &AssignmentNotice) -> bool {
        match self.sent.lock() {
            Ok(mut sent) => sent.push((recipient.id, notice.clone())),
            Err(poisoned) => poisoned.into_inner().push((recipient.id, notice.clone())),
        }
        !self.failing
    }
}
