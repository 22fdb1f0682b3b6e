use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::request::{RequestId, RequestStatus};
use crate::domain::user::{Role, UserId};
use crate::errors::WorkflowError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HistoryId(pub i64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryAction {
    Created,
    Forwarded,
    Approved,
    Rejected,
    Commented,
}

impl HistoryAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Forwarded => "forwarded",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Commented => "commented",
        }
    }
}

impl FromStr for HistoryAction {
    type Err = WorkflowError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "created" => Ok(Self::Created),
            "forwarded" => Ok(Self::Forwarded),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            "commented" => Ok(Self::Commented),
            other => {
                Err(WorkflowError::validation("action", format!("unknown history action `{other}`")))
            }
        }
    }
}

impl fmt::Display for HistoryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A ledger row that has not been written yet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HistoryDraft {
    pub actor_user_id: UserId,
    pub action: HistoryAction,
    pub comment: Option<String>,
    pub previous_status: Option<RequestStatus>,
    pub new_status: Option<RequestStatus>,
    pub forwarded_to_role: Option<Role>,
    pub forwarded_to_user_id: Option<UserId>,
    pub created_at: DateTime<Utc>,
}

impl HistoryDraft {
    pub fn new(actor_user_id: UserId, action: HistoryAction) -> Self {
        Self {
            actor_user_id,
            action,
            comment: None,
            previous_status: None,
            new_status: None,
            forwarded_to_role: None,
            forwarded_to_user_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_comment(mut self, comment: Option<String>) -> Self {
        self.comment = comment.filter(|value| !value.trim().is_empty());
        self
    }

    pub fn with_transition(mut self, previous: Option<RequestStatus>, next: RequestStatus) -> Self {
        self.previous_status = previous;
        self.new_status = Some(next);
        self
    }

    pub fn with_target(mut self, role: Option<Role>, user: Option<UserId>) -> Self {
        self.forwarded_to_role = role;
        self.forwarded_to_user_id = user;
        self
    }

    pub fn into_entry(self, id: HistoryId, request_id: RequestId) -> HistoryEntry {
        HistoryEntry {
            id,
            request_id,
            actor_user_id: self.actor_user_id,
            action: self.action,
            comment: self.comment,
            previous_status: self.previous_status,
            new_status: self.new_status,
            forwarded_to_role: self.forwarded_to_role,
            forwarded_to_user_id: self.forwarded_to_user_id,
            created_at: self.created_at,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: HistoryId,
    pub request_id: RequestId,
    pub actor_user_id: UserId,
    pub action: HistoryAction,
    pub comment: Option<String>,
    pub previous_status: Option<RequestStatus>,
    pub new_status: Option<RequestStatus>,
    pub forwarded_to_role: Option<Role>,
    pub forwarded_to_user_id: Option<UserId>,
    pub created_at: DateTime<Utc>,
}

/// Most recent non-empty comment of a chronologically ordered ledger.
pub fn last_comment(entries: &[HistoryEntry]) -> Option<String> {
    entries
        .iter()
        .rev()
        .find_map(|entry| entry.comment.as_ref().filter(|comment| !comment.trim().is_empty()))
        .cloned()
}
