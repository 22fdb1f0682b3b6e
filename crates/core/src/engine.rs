//! Request lifecycle: creation, decisions, forwarding and the read models
//! built on top of the ledger.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use crate::domain::attachment::{Attachment, AttachmentMetadata};
use crate::domain::history::{HistoryAction, HistoryDraft, HistoryEntry};
use crate::domain::request::{
    AssignmentTarget, CreateRequest, Decision, ForwardTarget, Request, RequestId, RequestStatus,
};
use crate::domain::user::{Caller, NewUser, Role, User, UserId};
use crate::errors::WorkflowError;
use crate::permissions::PermissionEvaluator;
use crate::ports::{
    AssignmentNotice, AttachmentCatalog, Contact, Notifier, RequestDraft, RequestMutation,
    RequestRevision, TransitionResult, UserDirectory, WorkflowStore,
};
use crate::routing::RoutingPolicy;

pub const FORWARD_COMMENT_PREFIX: &str = "Forwarded: ";

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RequestView {
    pub request: Request,
    pub requester: Option<User>,
    pub assignee: Option<User>,
    pub attachments: Vec<Attachment>,
    pub history: Vec<HistoryEntry>,
    pub last_comment: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RequestSummary {
    #[serde(flatten)]
    pub request: Request,
    pub last_comment: Option<String>,
}

#[derive(Clone)]
pub struct RequestEngine {
    store: Arc<dyn WorkflowStore>,
    directory: Arc<dyn UserDirectory>,
    attachments: Arc<dyn AttachmentCatalog>,
    notifier: Arc<dyn Notifier>,
    routing: RoutingPolicy,
    permissions: PermissionEvaluator,
}

impl RequestEngine {
    pub fn new(
        store: Arc<dyn WorkflowStore>,
        directory: Arc<dyn UserDirectory>,
        attachments: Arc<dyn AttachmentCatalog>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            directory,
            attachments,
            notifier,
            routing: RoutingPolicy,
            permissions: PermissionEvaluator,
        }
    }

    pub fn routing(&self) -> &RoutingPolicy {
        &self.routing
    }

    pub async fn create(
        &self,
        input: CreateRequest,
        requester: &Caller,
    ) -> Result<Request, WorkflowError> {
        let title = required_text("title", &input.title)?;
        let description = required_text("description", &input.description)?;
        let reason = input.reason.filter(|value| !value.trim().is_empty());

        let mut assignee = None;
        let (role, user, custom_flow) = match input.assignment {
            AssignmentTarget::Default => {
                (self.routing.initial_approver(input.request_type), None, false)
            }
            AssignmentTarget::ToRole(role) => (Some(role), None, true),
            AssignmentTarget::ToUser(user_id) => {
                assignee = Some(self.require_user(user_id).await?);
                (None, Some(user_id), true)
            }
        };

        let now = Utc::now();
        let draft = RequestDraft {
            request_type: input.request_type,
            title,
            description,
            reason,
            urgency: input.urgency.unwrap_or_default(),
            requester_id: requester.id,
            current_approver_role: role,
            assigned_to_user_id: user,
            custom_flow,
            created_at: now,
        };
        let comment =
            if custom_flow { "Request created with custom routing" } else { "Request created" };
        let mut entry = HistoryDraft::new(requester.id, HistoryAction::Created)
            .with_comment(Some(comment.to_string()))
            .with_transition(None, RequestStatus::Pending)
            .with_target(role, user);
        entry.created_at = now;

        let request = self.store.create_request(draft, entry).await?;
        info!(
            event_name = "request.created",
            request_id = request.id.0,
            actor_id = requester.id.0,
            request_type = %request.request_type,
            approver_role = ?request.current_approver_role.map(|role| role.as_str()),
            assigned_to = ?request.assigned_to_user_id.map(|id| id.0),
            custom_flow = request.custom_flow,
            "request created"
        );

        if let Some(assignee) = assignee {
            self.dispatch(&request, &assignee, None).await;
        }

        Ok(request)
    }

    pub async fn decide(
        &self,
        id: RequestId,
        caller: &Caller,
        decision: Decision,
        comment: Option<String>,
    ) -> Result<Request, WorkflowError> {
        let request = self.require_request(id).await?;
        if request.status.is_terminal() {
            return Err(WorkflowError::AlreadyDecided { request: id, status: request.status });
        }
        if !self.permissions.can_act(&request, caller) {
            return Err(WorkflowError::forbidden(caller.id, "decide on this request"));
        }

        let next = decision.resulting_status();
        let action = match decision {
            Decision::Approve => HistoryAction::Approved,
            Decision::Reject => HistoryAction::Rejected,
        };
        let mutation = RequestMutation {
            status: next,
            current_approver_role: None,
            assigned_to_user_id: request.assigned_to_user_id,
            custom_flow: request.custom_flow,
            updated_at: Utc::now(),
        };
        let entry = HistoryDraft::new(caller.id, action)
            .with_comment(comment)
            .with_transition(Some(request.status), next);

        let updated = self.apply(&request, mutation, entry).await?;
        info!(
            event_name = "request.decided",
            request_id = id.0,
            actor_id = caller.id.0,
            previous_status = %request.status,
            new_status = %next,
            "request decided"
        );

        Ok(updated)
    }

    pub async fn forward(
        &self,
        id: RequestId,
        caller: &Caller,
        comment: &str,
        target: ForwardTarget,
    ) -> Result<Request, WorkflowError> {
        let request = self.require_request(id).await?;
        if !self.permissions.can_forward(&request, caller) {
            return Err(WorkflowError::forbidden(caller.id, "forward this request"));
        }
        let comment = required_text("comment", comment)?;

        let (role, user, assignee) = match target {
            ForwardTarget::ToRole(role) => (Some(role), None, None),
            ForwardTarget::ToUser(user_id) => {
                let assignee = self.require_user(user_id).await?;
                (None, Some(user_id), Some(assignee))
            }
        };

        let next = RequestStatus::Pending;
        let mutation = RequestMutation {
            status: next,
            current_approver_role: role,
            assigned_to_user_id: user,
            custom_flow: true,
            updated_at: Utc::now(),
        };
        let entry = HistoryDraft::new(caller.id, HistoryAction::Forwarded)
            .with_comment(Some(format!("{FORWARD_COMMENT_PREFIX}{comment}")))
            .with_transition(Some(request.status), next)
            .with_target(role, user);

        let updated = self.apply(&request, mutation, entry).await?;
        info!(
            event_name = "request.forwarded",
            request_id = id.0,
            actor_id = caller.id.0,
            previous_status = %request.status,
            forwarded_to_role = ?role.map(|role| role.as_str()),
            forwarded_to_user = ?user.map(|id| id.0),
            "request forwarded"
        );

        if let Some(assignee) = assignee {
            self.dispatch(&updated, &assignee, Some(caller.id)).await;
        }

        Ok(updated)
    }

    pub async fn view(&self, id: RequestId, caller: &Caller) -> Result<RequestView, WorkflowError> {
        let request = self.require_request(id).await?;
        let history = self.store.history_for(id).await?;
        if !self.permissions.can_view(&request, &history, caller) {
            return Err(WorkflowError::forbidden(caller.id, "view this request"));
        }

        let requester = self.directory.get_user(request.requester_id).await?;
        let assignee = match request.assigned_to_user_id {
            Some(user_id) => self.directory.get_user(user_id).await?,
            None => None,
        };
        let attachments = self.attachments.list_for(id).await?;
        let last_comment = crate::domain::history::last_comment(&history);

        Ok(RequestView { request, requester, assignee, attachments, history, last_comment })
    }

    /// Records metadata of a file the requester attached. The bytes are
    /// stored elsewhere; only the requester may attach.
    pub async fn attach(
        &self,
        id: RequestId,
        caller: &Caller,
        metadata: AttachmentMetadata,
    ) -> Result<Attachment, WorkflowError> {
        let request = self.require_request(id).await?;
        if request.requester_id != caller.id {
            return Err(WorkflowError::forbidden(caller.id, "attach files to this request"));
        }
        if metadata.size < 0 {
            return Err(WorkflowError::validation("size", "must not be negative"));
        }
        let metadata = AttachmentMetadata {
            filename: required_text("filename", &metadata.filename)?,
            original_filename: required_text("original_filename", &metadata.original_filename)?,
            mime_type: required_text("mime_type", &metadata.mime_type)?,
            size: metadata.size,
            path: required_text("path", &metadata.path)?,
        };

        let attachment = self.attachments.record(id, metadata).await?;
        info!(
            event_name = "request.attachment_recorded",
            request_id = id.0,
            actor_id = caller.id.0,
            attachment_id = attachment.id.0,
            size = attachment.size,
            "attachment recorded"
        );
        Ok(attachment)
    }

    pub async fn history_for(&self, id: RequestId) -> Result<Vec<HistoryEntry>, WorkflowError> {
        self.require_request(id).await?;
        Ok(self.store.history_for(id).await?)
    }

    pub async fn last_comment(&self, id: RequestId) -> Result<Option<String>, WorkflowError> {
        Ok(self.store.last_comment(id).await?)
    }

    pub async fn my_requests(&self, caller: &Caller) -> Result<Vec<RequestSummary>, WorkflowError> {
        let requests = self.store.list_by_requester(caller.id).await?;
        let mut summaries = Vec::with_capacity(requests.len());
        for request in requests {
            let last_comment = self.store.last_comment(request.id).await?;
            summaries.push(RequestSummary { request, last_comment });
        }
        Ok(summaries)
    }

    /// Work queue of `caller`: open requests owned by their role or assigned
    /// to them directly.
    pub async fn pending_for(&self, caller: &Caller) -> Result<Vec<Request>, WorkflowError> {
        let by_role = self.store.list_open_by_role(caller.role).await?;
        let by_user = self.store.list_open_by_assignee(caller.id).await?;

        let mut seen = HashSet::new();
        let mut queue: Vec<Request> = by_role
            .into_iter()
            .chain(by_user)
            .filter(|request| seen.insert(request.id))
            .collect();
        queue.sort_by(|a, b| {
            a.urgency
                .priority()
                .cmp(&b.urgency.priority())
                .then(a.created_at.cmp(&b.created_at))
                .then(a.id.cmp(&b.id))
        });
        Ok(queue)
    }

    pub async fn all_requests(&self, caller: &Caller) -> Result<Vec<Request>, WorkflowError> {
        if !caller.is_admin() {
            return Err(WorkflowError::forbidden(caller.id, "list all requests"));
        }
        Ok(self.store.list_all().await?)
    }

    pub async fn users(&self, role: Option<Role>) -> Result<Vec<User>, WorkflowError> {
        let users = match role {
            Some(role) => self.directory.list_by_role(role).await?,
            None => self.directory.list_users().await?,
        };
        Ok(users)
    }

    /// Registers a user. Only addresses under `allowed_domain` are accepted
    /// and those are confirmed immediately.
    pub async fn register(
        &self,
        input: NewUser,
        allowed_domain: &str,
    ) -> Result<User, WorkflowError> {
        let email = input.email.trim().to_ascii_lowercase();
        let domain = allowed_domain.trim().to_ascii_lowercase();
        if !email.ends_with(&domain) || email.len() <= domain.len() {
            return Err(WorkflowError::validation(
                "email",
                format!("only {allowed_domain} addresses may register"),
            ));
        }
        let name = required_text("name", &input.name)?;
        if self.directory.find_by_email(&email).await?.is_some() {
            return Err(WorkflowError::Conflict(format!("{email} is already registered")));
        }

        let user =
            self.directory.insert_user(NewUser { email, name, role: input.role }, true).await?;
        info!(
            event_name = "user.registered",
            user_id = user.id.0,
            role = %user.role,
            "user registered"
        );
        Ok(user)
    }

    pub async fn user(&self, id: UserId) -> Result<Option<User>, WorkflowError> {
        Ok(self.directory.get_user(id).await?)
    }

    async fn apply(
        &self,
        request: &Request,
        mutation: RequestMutation,
        entry: HistoryDraft,
    ) -> Result<Request, WorkflowError> {
        let expected = RequestRevision::of(request);
        match self.store.transition_request(request.id, expected, mutation, entry).await? {
            TransitionResult::Applied(updated) => Ok(updated),
            TransitionResult::Stale(None) => Err(WorkflowError::request_not_found(request.id)),
            TransitionResult::Stale(Some(current)) => {
                warn!(
                    event_name = "request.transition_conflict",
                    request_id = request.id.0,
                    expected_status = %request.status,
                    current_status = %current,
                    "request changed before the transition could be applied"
                );
                if current.is_terminal() {
                    Err(WorkflowError::AlreadyDecided { request: request.id, status: current })
                } else {
                    Err(WorkflowError::Conflict(format!(
                        "request {} was changed concurrently and is now {}",
                        request.id, current
                    )))
                }
            }
        }
    }

    async fn require_request(&self, id: RequestId) -> Result<Request, WorkflowError> {
        self.store.find_request(id).await?.ok_or_else(|| WorkflowError::request_not_found(id))
    }

    async fn require_user(&self, id: UserId) -> Result<User, WorkflowError> {
        self.directory.get_user(id).await?.ok_or_else(|| WorkflowError::user_not_found(id))
    }

    /// Sends an assignment notice. Every failure stops here.
    async fn dispatch(&self, request: &Request, recipient: &User, forwarded_by: Option<UserId>) {
        let created_by = match self.directory.get_user(request.requester_id).await {
            Ok(Some(user)) => Contact::from(&user),
            Ok(None) => {
                warn!(
                    event_name = "notification.assignment.skipped",
                    request_id = request.id.0,
                    "requester not found; assignment notice not sent"
                );
                return;
            }
            Err(error) => {
                warn!(
                    event_name = "notification.assignment.skipped",
                    request_id = request.id.0,
                    error = %error,
                    "requester lookup failed; assignment notice not sent"
                );
                return;
            }
        };
        let is_forwarded = forwarded_by.is_some();
        let forwarded_by = match forwarded_by {
            Some(user_id) => match self.directory.get_user(user_id).await {
                Ok(user) => user.as_ref().map(Contact::from),
                Err(error) => {
                    warn!(
                        event_name = "notification.assignment.forwarder_lookup_failed",
                        request_id = request.id.0,
                        error = %error,
                        "forwarding user lookup failed"
                    );
                    None
                }
            },
            None => None,
        };

        let notice = AssignmentNotice {
            request_id: request.id,
            request_type: request.request_type,
            title: request.title.clone(),
            description: request.description.clone(),
            urgency: request.urgency,
            created_by,
            is_forwarded,
            forwarded_by,
        };

        if self.notifier.notify_assignment(recipient, &notice).await {
            info!(
                event_name = "notification.assignment.sent",
                request_id = request.id.0,
                recipient_id = recipient.id.0,
                is_forwarded = notice.is_forwarded,
                "assignment notice dispatched"
            );
        } else {
            warn!(
                event_name = "notification.assignment.failed",
                request_id = request.id.0,
                recipient_id = recipient.id.0,
                "assignment notice could not be delivered"
            );
        }
    }
}

fn required_text(field: &'static str, value: &str) -> Result<String, WorkflowError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(WorkflowError::validation(field, "must not be empty"));
    }
    Ok(trimmed.to_string())
}
