use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::user::{Role, UserId};
use crate::errors::WorkflowError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub i64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestType {
    Purchase,
    Leave,
    Support,
    Certificate,
    Maintenance,
    Custom,
}

impl RequestType {
    pub const ALL: [RequestType; 6] = [
        RequestType::Purchase,
        RequestType::Leave,
        RequestType::Support,
        RequestType::Certificate,
        RequestType::Maintenance,
        RequestType::Custom,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Purchase => "purchase",
            Self::Leave => "leave",
            Self::Support => "support",
            Self::Certificate => "certificate",
            Self::Maintenance => "maintenance",
            Self::Custom => "custom",
        }
    }
}

impl FromStr for RequestType {
    type Err = WorkflowError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "purchase" => Ok(Self::Purchase),
            "leave" => Ok(Self::Leave),
            "support" => Ok(Self::Support),
            "certificate" => Ok(Self::Certificate),
            "maintenance" => Ok(Self::Maintenance),
            "custom" => Ok(Self::Custom),
            other => Err(WorkflowError::validation(
                "type",
                format!(
                    "unsupported request type `{other}` (expected purchase|leave|support|certificate|maintenance|custom)"
                ),
            )),
        }
    }
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Low,
    #[default]
    Medium,
    High,
}

impl Urgency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    /// Sort key for work queues: lower values are served first.
    pub fn priority(&self) -> u8 {
        match self {
            Self::High => 1,
            Self::Medium => 2,
            Self::Low => 3,
        }
    }
}

impl FromStr for Urgency {
    type Err = WorkflowError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(WorkflowError::validation(
                "urgency",
                format!("unsupported urgency `{other}` (expected low|medium|high)"),
            )),
        }
    }
}

impl fmt::Display for Urgency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    InProgress,
    Approved,
    Rejected,
    Resolved,
    Closed,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Resolved => "resolved",
            Self::Closed => "closed",
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, Self::Pending | Self::InProgress)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_open()
    }
}

impl FromStr for RequestStatus {
    type Err = WorkflowError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            "resolved" => Ok(Self::Resolved),
            "closed" => Ok(Self::Closed),
            other => {
                Err(WorkflowError::validation("status", format!("unknown request status `{other}`")))
            }
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub id: RequestId,
    #[serde(rename = "type")]
    pub request_type: RequestType,
    pub title: String,
    pub description: String,
    pub reason: Option<String>,
    pub urgency: Urgency,
    pub status: RequestStatus,
    pub requester_id: UserId,
    pub current_approver_role: Option<Role>,
    pub assigned_to_user_id: Option<UserId>,
    pub custom_flow: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Owner {
    Role(Role),
    User(UserId),
}

impl Request {
    /// The role or individual currently expected to act. A direct assignment
    /// takes precedence over the role; decided requests have no owner.
    pub fn owner(&self) -> Option<Owner> {
        if self.status.is_terminal() {
            return None;
        }

        self.assigned_to_user_id
            .map(Owner::User)
            .or_else(|| self.current_approver_role.map(Owner::Role))
    }
}

/// How a new request picks its first owner.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssignmentTarget {
    #[default]
    Default,
    ToRole(Role),
    ToUser(UserId),
}

impl AssignmentTarget {
    pub fn from_parts(user: Option<UserId>, role: Option<Role>) -> Self {
        match (user, role) {
            (Some(user), _) => Self::ToUser(user),
            (None, Some(role)) => Self::ToRole(role),
            (None, None) => Self::Default,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ForwardTarget {
    ToRole(Role),
    ToUser(UserId),
}

impl ForwardTarget {
    pub fn from_parts(user: Option<UserId>, role: Option<Role>) -> Result<Self, WorkflowError> {
        match (user, role) {
            (Some(user), None) => Ok(Self::ToUser(user)),
            (None, Some(role)) => Ok(Self::ToRole(role)),
            (Some(_), Some(_)) => Err(WorkflowError::validation(
                "target",
                "forward to either a user or a role, not both",
            )),
            (None, None) => Err(WorkflowError::validation(
                "target",
                "a forward target (user or role) is required",
            )),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Reject,
}

impl Decision {
    pub fn resulting_status(&self) -> RequestStatus {
        match self {
            Self::Approve => RequestStatus::Approved,
            Self::Reject => RequestStatus::Rejected,
        }
    }
}

impl FromStr for Decision {
    type Err = WorkflowError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "approve" => Ok(Self::Approve),
            "reject" => Ok(Self::Reject),
            other => Err(WorkflowError::validation(
                "decision",
                format!("unsupported decision `{other}` (expected approve|reject)"),
            )),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CreateRequest {
    pub request_type: RequestType,
    pub title: String,
    pub description: String,
    pub reason: Option<String>,
    pub urgency: Option<Urgency>,
    pub assignment: AssignmentTarget,
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn request(status: RequestStatus) -> Request {
        let now = Utc::now();
        Request {
            id: RequestId(1),
            request_type: RequestType::Support,
            title: "Laptop".to_string(),
            description: "Screen flickers".to_string(),
            reason: None,
            urgency: Urgency::Medium,
            status,
            requester_id: UserId(10),
            current_approver_role: Some(Role::It),
            assigned_to_user_id: None,
            custom_flow: false,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn direct_assignment_takes_precedence_over_role() {
        let mut request = request(RequestStatus::Pending);
        assert_eq!(request.owner(), Some(Owner::Role(Role::It)));

        request.assigned_to_user_id = Some(UserId(7));
        assert_eq!(request.owner(), Some(Owner::User(UserId(7))));
    }

    #[test]
    fn decided_requests_have_no_owner() {
        let mut request = request(RequestStatus::Approved);
        request.assigned_to_user_id = Some(UserId(7));
        assert_eq!(request.owner(), None);
    }

    #[test]
    fn high_urgency_sorts_first() {
        let mut urgencies = vec![Urgency::Low, Urgency::High, Urgency::Medium];
        urgencies.sort_by_key(Urgency::priority);
        assert_eq!(urgencies, vec![Urgency::High, Urgency::Medium, Urgency::Low]);
    }

    #[test]
    fn forward_target_requires_exactly_one_destination() {
        assert_eq!(
            ForwardTarget::from_parts(None, Some(Role::Hr)).expect("role only"),
            ForwardTarget::ToRole(Role::Hr)
        );
        assert!(ForwardTarget::from_parts(Some(UserId(3)), Some(Role::Hr)).is_err());
        assert!(ForwardTarget::from_parts(None, None).is_err());
    }

    #[test]
    fn unknown_type_is_rejected() {
        let error = "travel".parse::<RequestType>().expect_err("not a request type");
        assert!(matches!(error, WorkflowError::Validation { field: "type", .. }));
    }

    #[test]
    fn only_pending_and_in_progress_are_open() {
        assert!(RequestStatus::Pending.is_open());
        assert!(RequestStatus::InProgress.is_open());
        for status in [
            RequestStatus::Approved,
            RequestStatus::Rejected,
            RequestStatus::Resolved,
            RequestStatus::Closed,
        ] {
            assert!(status.is_terminal(), "{status} should be terminal");
        }
    }
}
