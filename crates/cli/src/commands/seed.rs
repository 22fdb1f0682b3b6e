use serde_json::json;

use requestflow_db::{DemoSeedDataset, SeedResult};

use crate::commands::{with_migrated_pool, CommandResult};

pub fn run() -> CommandResult {
    let result = with_migrated_pool("seed", |config, pool| async move {
        let seeded = DemoSeedDataset::load(&pool, &config.identity.allowed_email_domain)
            .await
            .map_err(|error| ("seed_execution", error.to_string(), 5u8))?;

        let verification = DemoSeedDataset::verify(&pool)
            .await
            .map_err(|error| ("seed_verification", error.to_string(), 6u8))?;
        if !verification.all_present {
            let missing = verification
                .checks
                .iter()
                .filter_map(|(role, present)| (!present).then_some(*role))
                .collect::<Vec<_>>();
            return Err(("seed_verification", verification_message(&missing), 6u8));
        }

        Ok(seeded)
    });

    match result {
        Ok(seeded) => CommandResult::success_with_data(
            "seed",
            summary(&seeded),
            Some(json!({ "users": seeded.users })),
        ),
        Err(failure) => failure,
    }
}

fn summary(seeded: &SeedResult) -> String {
    let created = seeded.users.iter().filter(|user| user.created).count();
    format!(
        "demo users ready: {} total, {created} created, {} already present",
        seeded.users.len(),
        seeded.users.len() - created
    )
}

fn verification_message(missing: &[&str]) -> String {
    if missing.is_empty() {
        "some demo users failed to load".to_string()
    } else {
        format!("no confirmed user for roles: {}", missing.join(", "))
    }
}
