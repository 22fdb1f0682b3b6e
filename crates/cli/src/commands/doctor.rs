use requestflow_core::config::{AppConfig, LoadOptions};
use requestflow_db::{connect_existing, migrations, ping, DemoSeedDataset};
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

impl DoctorReport {
    fn passed(&self) -> bool {
        self.overall_status == CheckStatus::Pass
    }
}

/// Runs readiness checks; exit code 0 when all pass, 1 otherwise.
pub fn run(json_output: bool) -> (u8, String) {
    let report = build_report();
    let exit_code = if report.passed() { 0 } else { 1 };

    if json_output {
        let output = serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
        return (exit_code, output);
    }

    (exit_code, render_human(&report))
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.push(check_notifications(&config));
            checks.extend(check_database(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            for name in ["database_connectivity", "schema_migrations", "role_coverage"] {
                checks.push(DoctorCheck {
                    name,
                    status: CheckStatus::Skipped,
                    details: "skipped because configuration did not load".to_string(),
                });
            }
        }
    }

    let all_pass = checks.iter().all(|check| check.status != CheckStatus::Fail);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_notifications(config: &AppConfig) -> DoctorCheck {
    let details = match (&config.notifications.webhook_url, config.notifications.enabled) {
        (Some(url), true) => format!("assignment notices are posted to `{url}`"),
        _ => "delivery disabled; assignment notices are only logged".to_string(),
    };
    DoctorCheck { name: "notification_delivery", status: CheckStatus::Pass, details }
}

/// Connectivity, schema and role coverage against the existing database.
/// Nothing is created or migrated. Later checks stop once one fails.
fn check_database(config: &AppConfig) -> Vec<DoctorCheck> {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return vec![DoctorCheck {
                name: "database_connectivity",
                status: CheckStatus::Fail,
                details: format!("failed to initialize async runtime: {error}"),
            }];
        }
    };

    runtime.block_on(async {
        let mut checks = Vec::new();
        let pool = match connect_existing(&config.database).await {
            Ok(pool) => pool,
            Err(error) => {
                checks.push(DoctorCheck {
                    name: "database_connectivity",
                    status: CheckStatus::Fail,
                    details: format!("failed to connect to database: {error}"),
                });
                return checks;
            }
        };

        match ping(&pool).await {
            Ok(()) => checks.push(DoctorCheck {
                name: "database_connectivity",
                status: CheckStatus::Pass,
                details: format!("connected using `{}`", config.database.url),
            }),
            Err(error) => {
                checks.push(DoctorCheck {
                    name: "database_connectivity",
                    status: CheckStatus::Fail,
                    details: format!("database query failed: {error}"),
                });
                pool.close().await;
                return checks;
            }
        }

        match migrations::pending(&pool).await {
            Ok(pending) if pending.is_empty() => checks.push(DoctorCheck {
                name: "schema_migrations",
                status: CheckStatus::Pass,
                details: "schema is at the latest migration".to_string(),
            }),
            Ok(pending) => {
                let versions =
                    pending.iter().map(i64::to_string).collect::<Vec<_>>().join(", ");
                checks.push(DoctorCheck {
                    name: "schema_migrations",
                    status: CheckStatus::Fail,
                    details: format!(
                        "{} pending migration(s): {versions}; run `requestflow migrate`",
                        pending.len()
                    ),
                });
                pool.close().await;
                return checks;
            }
            Err(error) => {
                checks.push(DoctorCheck {
                    name: "schema_migrations",
                    status: CheckStatus::Fail,
                    details: error.to_string(),
                });
                pool.close().await;
                return checks;
            }
        }

        // Empty queues are not fatal, so missing roles only warn via `skipped`.
        checks.push(match DemoSeedDataset::verify(&pool).await {
            Ok(verification) if verification.all_present => DoctorCheck {
                name: "role_coverage",
                status: CheckStatus::Pass,
                details: "every role has at least one confirmed user".to_string(),
            },
            Ok(verification) => DoctorCheck {
                name: "role_coverage",
                status: CheckStatus::Skipped,
                details: format!(
                    "no confirmed user for roles: {}",
                    verification
                        .checks
                        .iter()
                        .filter_map(|(role, present)| (!present).then_some(*role))
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            },
            Err(error) => DoctorCheck {
                name: "role_coverage",
                status: CheckStatus::Fail,
                details: error.to_string(),
            },
        });

        pool.close().await;
        checks
    })
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
