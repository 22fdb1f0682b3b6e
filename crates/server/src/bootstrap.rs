use std::sync::Arc;

use axum::Router;
use requestflow_core::config::{AppConfig, ConfigError, LoadOptions};
use requestflow_core::engine::RequestEngine;
use requestflow_core::ports::{LogNotifier, Notifier};
use requestflow_db::{
    connect_with_config, migrations, DbPool, SqlAttachmentRepository, SqlUserDirectory,
    SqlWorkflowStore,
};
use thiserror::Error;
use tracing::info;

use crate::api::{self, ApiState};
use crate::health;
use crate::notify::WebhookNotifier;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub engine: RequestEngine,
    /// `webhook` or `log`.
    pub delivery: &'static str,
}

impl Application {
    /// Health route plus the JSON API, sharing one pool.
    pub fn router(&self) -> Router {
        let state = ApiState::new(
            self.engine.clone(),
            &self.config.identity.caller_header,
            &self.config.identity.allowed_email_domain,
        );
        health::router(self.db_pool.clone(), self.delivery).merge(api::router(state))
    }
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("notification client setup failed: {0}")]
    Notifier(#[source] reqwest::Error),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool =
        connect_with_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let webhook =
        WebhookNotifier::from_config(&config.notifications).map_err(BootstrapError::Notifier)?;
    let delivery = if webhook.is_some() { "webhook" } else { "log" };
    let notifier: Arc<dyn Notifier> = match webhook {
        Some(webhook) => Arc::new(webhook),
        None => Arc::new(LogNotifier),
    };
    info!(
        event_name = "system.bootstrap.notifier_ready",
        correlation_id = "bootstrap",
        delivery,
        "assignment notifier configured"
    );

    let engine = RequestEngine::new(
        Arc::new(SqlWorkflowStore::new(db_pool.clone())),
        Arc::new(SqlUserDirectory::new(db_pool.clone())),
        Arc::new(SqlAttachmentRepository::new(db_pool.clone())),
        notifier,
    );

    Ok(Application { config, db_pool, engine, delivery })
}

#[cfg(test)]
mod tests {
    use requestflow_core::config::{ConfigOverrides, LoadOptions};
    use requestflow_core::domain::request::{
        AssignmentTarget, CreateRequest, Decision, RequestStatus, RequestType,
    };
    use requestflow_core::domain::user::{Caller, Role, UserId};
    use requestflow_db::DemoSeedDataset;

    use crate::bootstrap::bootstrap;

    fn options(database_url: &str) -> LoadOptions {
        LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some(database_url.to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }
    }

    #[tokio::test]
    async fn bootstrap_rejects_invalid_database_url() {
        let result = bootstrap(options("postgres://localhost/requestflow")).await;
        let message = result.err().expect("error").to_string();
        assert!(message.contains("database.url"));
    }

    #[tokio::test]
    async fn bootstrap_migrates_and_wires_the_engine() {
        let app = bootstrap(options("sqlite::memory:")).await.expect("bootstrap");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master \
             WHERE type = 'table' AND name IN ('users', 'requests', 'approval_history', 'attachments')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("baseline tables");
        assert_eq!(table_count, 4);

        let seeded = DemoSeedDataset::load(&app.db_pool, &app.config.identity.allowed_email_domain)
            .await
            .expect("seed");
        let id_for = |role: Role| {
            seeded
                .users
                .iter()
                .find(|user| user.role == role.as_str())
                .map(|user| user.id)
                .expect("seeded role")
        };
        let employee = Caller::new(UserId(id_for(Role::Employee)), Role::Employee);
        let hr = Caller::new(UserId(id_for(Role::Hr)), Role::Hr);

        let request = app
            .engine
            .create(
                CreateRequest {
                    request_type: RequestType::Leave,
                    title: "Vacation".to_string(),
                    description: "Two weeks in March".to_string(),
                    reason: None,
                    urgency: None,
                    assignment: AssignmentTarget::Default,
                },
                &employee,
            )
            .await
            .expect("create");
        assert_eq!(request.current_approver_role, Some(Role::Hr));

        let decided = app
            .engine
            .decide(request.id, &hr, Decision::Approve, None)
            .await
            .expect("decide");
        assert_eq!(decided.status, RequestStatus::Approved);
        assert_eq!(app.delivery, "log");

        app.db_pool.close().await;
    }
}
