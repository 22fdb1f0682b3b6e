use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use requestflow_core::config::{AppConfig, LoadOptions};
use secrecy::ExposeSecret;
use toml::Value;

use crate::commands::CommandResult;

/// Effective configuration with per-field source attribution. Secrets are redacted.
pub fn run() -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "config",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            )
        }
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    let source = |key_path: &str, env_key: &str| {
        field_source(key_path, env_key, config_file_doc.as_ref(), config_file_path.as_deref())
    };

    let webhook_token = match &config.notifications.webhook_token {
        Some(token) => redact_secret(token.expose_secret()),
        None => "<unset>".to_string(),
    };

    let fields = [
        ("database.url", config.database.url.clone(), "REQUESTFLOW_DATABASE_URL"),
        (
            "database.max_connections",
            config.database.max_connections.to_string(),
            "REQUESTFLOW_DATABASE_MAX_CONNECTIONS",
        ),
        (
            "database.timeout_secs",
            config.database.timeout_secs.to_string(),
            "REQUESTFLOW_DATABASE_TIMEOUT_SECS",
        ),
        (
            "server.bind_address",
            config.server.bind_address.clone(),
            "REQUESTFLOW_SERVER_BIND_ADDRESS",
        ),
        ("server.port", config.server.port.to_string(), "REQUESTFLOW_SERVER_PORT"),
        (
            "identity.allowed_email_domain",
            config.identity.allowed_email_domain.clone(),
            "REQUESTFLOW_IDENTITY_ALLOWED_EMAIL_DOMAIN",
        ),
        (
            "identity.caller_header",
            config.identity.caller_header.clone(),
            "REQUESTFLOW_IDENTITY_CALLER_HEADER",
        ),
        (
            "notifications.enabled",
            config.notifications.enabled.to_string(),
            "REQUESTFLOW_NOTIFICATIONS_ENABLED",
        ),
        (
            "notifications.webhook_url",
            config.notifications.webhook_url.clone().unwrap_or_else(|| "<unset>".to_string()),
            "REQUESTFLOW_NOTIFICATIONS_WEBHOOK_URL",
        ),
        ("notifications.webhook_token", webhook_token, "REQUESTFLOW_NOTIFICATIONS_WEBHOOK_TOKEN"),
        ("logging.level", config.logging.level.clone(), "REQUESTFLOW_LOGGING_LEVEL"),
        (
            "logging.format",
            format!("{:?}", config.logging.format).to_lowercase(),
            "REQUESTFLOW_LOGGING_FORMAT",
        ),
    ];

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    lines.extend(fields.iter().map(|(key, value, env_key)| {
        format!("- {key} = {value} (source: {})", source(key, env_key))
    }));

    CommandResult::success("config", lines.join("\n"))
}

fn detect_config_path() -> Option<PathBuf> {
    ["requestflow.toml", "config/requestflow.toml"]
        .into_iter()
        .map(PathBuf::from)
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let raw = fs::read_to_string(path?).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: &str,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if env::var_os(env_key).is_some() {
        return format!("env ({env_key})");
    }

    if config_file_doc.is_some_and(|doc| contains_path(doc, key_path)) {
        let file_path = config_file_path
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| "config file".to_string());
        return format!("file ({file_path})");
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn redact_secret(secret: &str) -> String {
    let trimmed = secret.trim();
    match trimmed.chars().count() {
        0 => "<empty>".to_string(),
        1..=8 => "<redacted>".to_string(),
        _ => format!("{}***", trimmed.chars().take(4).collect::<String>()),
    }
}

#[cfg(test)]
mod tests {
    use super::{contains_path, field_source, redact_secret};

    #[test]
    fn redaction_keeps_only_a_short_prefix() {
        assert_eq!(redact_secret(""), "<empty>");
        assert_eq!(redact_secret("short"), "<redacted>");
        assert_eq!(redact_secret("relay-secret-value"), "rela***");
    }

    #[test]
    fn file_source_is_reported_for_nested_keys() {
        let doc: toml::Value = "[server]\nport = 9000\n".parse().expect("toml");
        assert!(contains_path(&doc, "server.port"));
        assert!(!contains_path(&doc, "server.bind_address"));
        assert_eq!(
            field_source("server.port", "REQUESTFLOW_TEST_UNUSED_KEY", Some(&doc), None),
            "file (config file)"
        );
        assert_eq!(
            field_source("database.url", "REQUESTFLOW_TEST_UNUSED_KEY", Some(&doc), None),
            "default"
        );
    }
}
