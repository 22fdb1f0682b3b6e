pub mod config;
pub mod doctor;
pub mod migrate;
pub mod routes;
pub mod seed;

use serde::Serialize;
use serde_json::Value;

use requestflow_core::config::{AppConfig, LoadOptions};
use requestflow_db::{connect_with_config, migrations, DbPool};

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Debug, Serialize)]
struct CommandOutcome {
    command: String,
    status: String,
    error_class: Option<String>,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

/// Failure triple shared by the database-backed commands.
pub(crate) type Failure = (&'static str, String, u8);

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        Self::success_with_data(command, message, None)
    }

    pub fn success_with_data(
        command: &str,
        message: impl Into<String>,
        data: Option<Value>,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "ok".to_string(),
            error_class: None,
            message: message.into(),
            data,
        };
        Self { exit_code: 0, output: serialize_payload(payload) }
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "error".to_string(),
            error_class: Some(error_class.to_string()),
            message: message.into(),
            data: None,
        };
        Self { exit_code, output: serialize_payload(payload) }
    }
}

/// Loads config and runs `work` against a migrated pool on a current-thread runtime.
pub(crate) fn with_migrated_pool<T, F, Fut>(command: &str, work: F) -> Result<T, CommandResult>
where
    F: FnOnce(AppConfig, DbPool) -> Fut,
    Fut: std::future::Future<Output = Result<T, Failure>>,
{
    let config = AppConfig::load(LoadOptions::default()).map_err(|error| {
        CommandResult::failure(
            command,
            "config_validation",
            format!("configuration issue: {error}"),
            2,
        )
    })?;

    let runtime =
        tokio::runtime::Builder::new_current_thread().enable_all().build().map_err(|error| {
            CommandResult::failure(
                command,
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            )
        })?;

    runtime
        .block_on(async move {
            let pool = connect_with_config(&config.database)
                .await
                .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
            migrations::run_pending(&pool)
                .await
                .map_err(|error| ("migration", error.to_string(), 5u8))?;

            let result = work(config, pool.clone()).await;
            pool.close().await;
            result
        })
        .map_err(|(error_class, message, exit_code)| {
            CommandResult::failure(command, error_class, message, exit_code)
        })
}

fn serialize_payload(payload: CommandOutcome) -> String {
    serde_json::to_string(&payload).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"unknown\",\"status\":\"error\",\"error_class\":\"serialization\",\"message\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    })
}
