use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::request::RequestId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttachmentId(pub i64);

/// Metadata of a stored file; the bytes live in an external store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentMetadata {
    pub filename: String,
    pub original_filename: String,
    pub mime_type: String,
    pub size: i64,
    pub path: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: AttachmentId,
    pub request_id: RequestId,
    pub filename: String,
    pub original_filename: String,
    pub mime_type: String,
    pub size: i64,
    pub path: String,
    pub created_at: DateTime<Utc>,
}
