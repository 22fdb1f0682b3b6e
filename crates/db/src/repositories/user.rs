use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use requestflow_core::domain::user::{NewUser, Role, User, UserId};
use requestflow_core::errors::StoreError;
use requestflow_core::ports::UserDirectory;

use super::{
    decode_column, decode_timestamp, encode_timestamp, is_unique_violation, storage_precision,
    RepositoryError,
};
use crate::DbPool;

const USER_COLUMNS: &str = "id, email, name, role, confirmed, created_at, updated_at";

pub struct SqlUserDirectory {
    pool: DbPool,
}

impl SqlUserDirectory {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub(crate) async fn insert(
        &self,
        email: &str,
        name: &str,
        role: Role,
        confirmed: bool,
    ) -> Result<User, RepositoryError> {
        let now = storage_precision(Utc::now());
        let stamp = encode_timestamp(now);
        let result = sqlx::query(
            "INSERT INTO users (email, name, role, confirmed, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(email)
        .bind(name)
        .bind(role.as_str())
        .bind(confirmed)
        .bind(&stamp)
        .bind(&stamp)
        .execute(&self.pool)
        .await
        .map_err(|error| {
            if is_unique_violation(&error) {
                RepositoryError::Duplicate(format!("a user with email {email} already exists"))
            } else {
                RepositoryError::Database(error)
            }
        })?;

        Ok(User {
            id: UserId(result.last_insert_rowid()),
            email: email.to_string(),
            name: name.to_string(),
            role,
            confirmed,
            created_at: now,
            updated_at: now,
        })
    }

    async fn fetch_all(&self, role: Option<Role>) -> Result<Vec<User>, RepositoryError> {
        let rows: Vec<SqliteRow> = match role {
            Some(role) => {
                sqlx::query(&format!(
                    "SELECT {USER_COLUMNS} FROM users
                     WHERE role = ? AND confirmed = 1
                     ORDER BY name ASC, id ASC"
                ))
                .bind(role.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users ORDER BY name ASC, id ASC"))
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        rows.iter().map(row_to_user).collect::<Result<Vec<_>, _>>()
    }
}

fn row_to_user(row: &SqliteRow) -> Result<User, RepositoryError> {
    let decode = |error: sqlx::Error| RepositoryError::Decode(error.to_string());
    let role: String = row.try_get("role").map_err(decode)?;
    let created_at: String = row.try_get("created_at").map_err(decode)?;
    let updated_at: String = row.try_get("updated_at").map_err(decode)?;

    Ok(User {
        id: UserId(row.try_get("id").map_err(decode)?),
        email: row.try_get("email").map_err(decode)?,
        name: row.try_get("name").map_err(decode)?,
        role: decode_column("role", &role)?,
        confirmed: row.try_get("confirmed").map_err(decode)?,
        created_at: decode_timestamp("created_at", &created_at)?,
        updated_at: decode_timestamp("updated_at", &updated_at)?,
    })
}

#[async_trait]
impl UserDirectory for SqlUserDirectory {
    async fn get_user(&self, id: UserId) -> Result<Option<User>, StoreError> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?"))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(RepositoryError::from)?;

        match row {
            Some(ref r) => Ok(Some(row_to_user(r)?)),
            None => Ok(None),
        }
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?"))
            .bind(email.trim().to_ascii_lowercase())
            .fetch_optional(&self.pool)
            .await
            .map_err(RepositoryError::from)?;

        match row {
            Some(ref r) => Ok(Some(row_to_user(r)?)),
            None => Ok(None),
        }
    }

    async fn insert_user(&self, new_user: NewUser, confirmed: bool) -> Result<User, StoreError> {
        let email = new_user.email.trim().to_ascii_lowercase();
        Ok(self.insert(&email, &new_user.name, new_user.role, confirmed).await?)
    }

    async fn list_users(&self) -> Result<Vec<User>, StoreError> {
        Ok(self.fetch_all(None).await?)
    }

    async fn list_by_role(&self, role: Role) -> Result<Vec<User>, StoreError> {
        Ok(self.fetch_all(Some(role)).await?)
    }
}
