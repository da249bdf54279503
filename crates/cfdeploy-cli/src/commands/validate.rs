use std::path::Path;

use cfdeploy_core::DeployConfig;

pub fn validate(path: &Path) -> anyhow::Result<()> {
    let config = DeployConfig::from_file(path)?;
    println!(
        "✓ {} is valid: app {} ({} instance(s), {} route(s)), {} service instance(s)",
        path.display(),
        config.app.name,
        config.app.instances,
        config.app.routes.len(),
        config.service_instances.len()
    );
    if config.app.blue_green.enable && config.app.routes.is_empty() {
        println!("  note: blue-green is enabled but no routes are set; rollovers will be refused");
    }
    Ok(())
}
