use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use requestflow_core::domain::attachment::{Attachment, AttachmentId, AttachmentMetadata};
use requestflow_core::domain::request::RequestId;
use requestflow_core::errors::StoreError;
use requestflow_core::ports::AttachmentCatalog;

use super::{decode_timestamp, encode_timestamp, storage_precision, RepositoryError};
use crate::DbPool;

/// Attachment metadata. File bytes live wherever `path` points.
pub struct SqlAttachmentRepository {
    pool: DbPool,
}

impl SqlAttachmentRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_attachment(row: &SqliteRow) -> Result<Attachment, RepositoryError> {
    let decode = |error: sqlx::Error| RepositoryError::Decode(error.to_string());
    let created_at: String = row.try_get("created_at").map_err(decode)?;

    Ok(Attachment {
        id: AttachmentId(row.try_get("id").map_err(decode)?),
        request_id: RequestId(row.try_get("request_id").map_err(decode)?),
        filename: row.try_get("filename").map_err(decode)?,
        original_filename: row.try_get("original_filename").map_err(decode)?,
        mime_type: row.try_get("mime_type").map_err(decode)?,
        size: row.try_get("size").map_err(decode)?,
        path: row.try_get("path").map_err(decode)?,
        created_at: decode_timestamp("created_at", &created_at)?,
    })
}

#[async_trait]
impl AttachmentCatalog for SqlAttachmentRepository {
    async fn record(
        &self,
        request_id: RequestId,
        metadata: AttachmentMetadata,
    ) -> Result<Attachment, StoreError> {
        let created_at = storage_precision(Utc::now());
        let result = sqlx::query(
            "INSERT INTO attachments (request_id, filename, original_filename, mime_type, size,
                                      path, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(request_id.0)
        .bind(&metadata.filename)
        .bind(&metadata.original_filename)
        .bind(&metadata.mime_type)
        .bind(metadata.size)
        .bind(&metadata.path)
        .bind(encode_timestamp(created_at))
        .execute(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(Attachment {
            id: AttachmentId(result.last_insert_rowid()),
            request_id,
            filename: metadata.filename,
            original_filename: metadata.original_filename,
            mime_type: metadata.mime_type,
            size: metadata.size,
            path: metadata.path,
            created_at,
        })
    }

    async fn list_for(&self, request_id: RequestId) -> Result<Vec<Attachment>, StoreError> {
        let rows: Vec<SqliteRow> = sqlx::query(
            "SELECT id, request_id, filename, original_filename, mime_type, size, path, created_at
             FROM attachments WHERE request_id = ? ORDER BY id ASC",
        )
        .bind(request_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(rows.iter().map(row_to_attachment).collect::<Result<Vec<_>, _>>()?)
    }
}
