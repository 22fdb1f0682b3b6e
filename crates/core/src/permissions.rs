use crate::domain::history::HistoryEntry;
use crate::domain::request::Request;
use crate::domain::user::Caller;

/// Write and read access rules for requests.
///
/// Role ownership and direct assignment are equally authoritative: matching
/// whichever field is set grants access.
#[derive(Clone, Copy, Debug, Default)]
pub struct PermissionEvaluator;

impl PermissionEvaluator {
    /// Whether `caller` may approve or reject `request`.
    pub fn can_act(&self, request: &Request, caller: &Caller) -> bool {
        request.status.is_open() && self.holds(request, caller)
    }

    /// Whether `caller` may re-route `request`. The requester may always
    /// redirect their own request.
    pub fn can_forward(&self, request: &Request, caller: &Caller) -> bool {
        self.holds(request, caller) || request.requester_id == caller.id
    }

    pub fn can_view(&self, request: &Request, history: &[HistoryEntry], caller: &Caller) -> bool {
        request.requester_id == caller.id
            || self.holds(request, caller)
            || history.iter().any(|entry| entry.actor_user_id == caller.id)
    }

    fn holds(&self, request: &Request, caller: &Caller) -> bool {
        request.current_approver_role == Some(caller.role)
            || request.assigned_to_user_id == Some(caller.id)
            || caller.is_admin()
    }
}
