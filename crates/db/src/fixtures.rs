use serde::Serialize;

use requestflow_core::domain::user::Role;

use crate::connection::DbPool;
use crate::repositories::{RepositoryError, SqlUserDirectory};

/// One demo account per role, so every queue has somebody to work it.
const DEMO_USERS: &[DemoUser] = &[
    DemoUser { local_part: "employee", name: "Demo Employee", role: Role::Employee },
    DemoUser { local_part: "finance", name: "Demo Finance", role: Role::Finance },
    DemoUser { local_part: "hr", name: "Demo HR", role: Role::Hr },
    DemoUser { local_part: "it", name: "Demo IT", role: Role::It },
    DemoUser {
        local_part: "general.services",
        name: "Demo General Services",
        role: Role::GeneralServices,
    },
    DemoUser { local_part: "management", name: "Demo Management", role: Role::Management },
    DemoUser { local_part: "executive", name: "Demo Executive", role: Role::Executive },
    DemoUser { local_part: "admin", name: "Demo Admin", role: Role::Admin },
];

struct DemoUser {
    local_part: &'static str,
    name: &'static str,
    role: Role,
}

pub struct DemoSeedDataset;

impl DemoSeedDataset {
    /// Inserts the demo users that are missing. Safe to run repeatedly.
    pub async fn load(pool: &DbPool, email_domain: &str) -> Result<SeedResult, RepositoryError> {
        let directory = SqlUserDirectory::new(pool.clone());
        let mut users = Vec::with_capacity(DEMO_USERS.len());

        for demo in DEMO_USERS {
            let email = format!("{}{}", demo.local_part, email_domain.trim()).to_ascii_lowercase();
            let (id, created) = match directory.insert(&email, demo.name, demo.role, true).await {
                Ok(user) => (user.id.0, true),
                Err(RepositoryError::Duplicate(_)) => {
                    let id: i64 = sqlx::query_scalar("SELECT id FROM users WHERE email = ?")
                        .bind(&email)
                        .fetch_one(pool)
                        .await?;
                    (id, false)
                }
                Err(error) => return Err(error),
            };
            users.push(SeededUser { id, email, role: demo.role.as_str(), created });
        }

        Ok(SeedResult { users })
    }

    /// Checks that every role has at least one confirmed account.
    pub async fn verify(pool: &DbPool) -> Result<VerificationResult, RepositoryError> {
        let mut checks = Vec::with_capacity(Role::ALL.len());
        for role in Role::ALL {
            let present: i64 = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM users WHERE role = ?1 AND confirmed = 1)",
            )
            .bind(role.as_str())
            .fetch_one(pool)
            .await?;
            checks.push((role.as_str(), present == 1));
        }

        let all_present = checks.iter().all(|(_, present)| *present);
        Ok(VerificationResult { all_present, checks })
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct SeedResult {
    pub users: Vec<SeededUser>,
}

#[derive(Clone, Debug, Serialize)]
pub struct SeededUser {
    pub id: i64,
    pub email: String,
    pub role: &'static str,
    pub created: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}
