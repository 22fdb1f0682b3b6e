use requestflow_core::routing::RoutingPolicy;

use crate::commands::CommandResult;

/// Prints the default routing and escalation tables. Needs no config or database.
pub fn run() -> CommandResult {
    let table = RoutingPolicy.table();
    match serde_json::to_value(&table) {
        Ok(data) => CommandResult::success_with_data(
            "routes",
            format!("{} request types routed", table.len()),
            Some(data),
        ),
        Err(error) => CommandResult::failure("routes", "serialization", error.to_string(), 1),
    }
}
