pub mod config;
pub mod domain;
pub mod engine;
pub mod errors;
pub mod memory;
pub mod permissions;
pub mod ports;
pub mod routing;

pub use config::{AppConfig, ConfigError, LoadOptions, LogFormat};
pub use domain::attachment::{Attachment, AttachmentId, AttachmentMetadata};
pub use domain::history::{HistoryAction, HistoryDraft, HistoryEntry, HistoryId};
pub use domain::request::{
    AssignmentTarget, CreateRequest, Decision, ForwardTarget, Owner, Request, RequestId,
    RequestStatus, RequestType, Urgency,
};
pub use domain::user::{Caller, NewUser, Role, User, UserId};
pub use engine::{RequestEngine, RequestSummary, RequestView};
pub use errors::{InterfaceError, StoreError, WorkflowError};
pub use permissions::PermissionEvaluator;
pub use ports::{
    AssignmentNotice, AttachmentCatalog, Contact, LogNotifier, Notifier, UserDirectory,
    WorkflowStore,
};
pub use routing::{RouteSummary, RoutingPolicy};
