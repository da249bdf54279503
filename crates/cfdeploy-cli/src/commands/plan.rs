use std::path::Path;

use cfdeploy_core::DeployConfig;
use cfdeploy_rollout::Plan;
use cfdeploy_state::StateStore;

pub fn plan(config: &Path, address: &str, state: &Path, format: &str) -> anyhow::Result<()> {
    let config = DeployConfig::from_file(config)?;
    let store = StateStore::open(state)?;
    let plan = store
        .get_record(address)?
        .map(|record| Plan::for_record(&record, &config.app));

    match (format, plan) {
        ("json", Some(plan)) => println!("{}", serde_json::to_string_pretty(&plan)?),
        ("json", None) => println!(
            "{}",
            serde_json::json!({ "address": address, "action": "create", "changed": [] })
        ),
        (_, Some(plan)) if plan.changed.is_empty() => println!("{address}: {}", plan.action),
        (_, Some(plan)) => println!("{address}: {} ({})", plan.action, plan.changed.join(", ")),
        (_, None) => println!("{address}: create"),
    }
    Ok(())
}
