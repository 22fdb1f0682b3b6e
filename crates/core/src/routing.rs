//! Default routing tables: which role receives a new request, and which role
//! a request would escalate to after its current owner.
//!
//! Both lookups are total. Approval never escalates automatically; the
//! escalation table is advisory and only surfaced to operators and clients
//! that want to suggest a forward target.

use serde::Serialize;

use crate::domain::request::RequestType;
use crate::domain::user::Role;

#[derive(Clone, Copy, Debug, Default)]
pub struct RoutingPolicy;

impl RoutingPolicy {
    pub fn initial_approver(&self, request_type: RequestType) -> Option<Role> {
        match request_type {
            RequestType::Purchase => Some(Role::Finance),
            RequestType::Leave | RequestType::Certificate => Some(Role::Hr),
            RequestType::Support => Some(Role::It),
            RequestType::Maintenance => Some(Role::GeneralServices),
            RequestType::Custom => Some(Role::Management),
        }
    }

    pub fn next_approver(&self, current: Option<Role>, request_type: RequestType) -> Option<Role> {
        match current? {
            Role::Finance | Role::It | Role::Hr | Role::GeneralServices => Some(Role::Management),
            Role::Management if request_type == RequestType::Purchase => Some(Role::Executive),
            Role::Management | Role::Executive | Role::Employee | Role::Admin => None,
        }
    }

    /// Full default chain for a request type, starting at its first approver.
    pub fn default_chain(&self, request_type: RequestType) -> Vec<Role> {
        let mut chain = Vec::new();
        let mut current = self.initial_approver(request_type);
        while let Some(role) = current {
            if chain.contains(&role) {
                break;
            }
            chain.push(role);
            current = self.next_approver(Some(role), request_type);
        }
        chain
    }

    pub fn table(&self) -> Vec<RouteSummary> {
        RequestType::ALL
            .into_iter()
            .map(|request_type| RouteSummary {
                request_type,
                initial_approver: self.initial_approver(request_type),
                escalation_chain: self.default_chain(request_type),
            })
            .collect()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RouteSummary {
    pub request_type: RequestType,
    pub initial_approver: Option<Role>,
    pub escalation_chain: Vec<Role>,
}
