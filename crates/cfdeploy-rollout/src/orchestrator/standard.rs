//! In-place update of the live application.

use tokio::time::sleep;
use tracing::{debug, info};

use cfdeploy_core::{AppConfig, AppUpdate, PackageState};
use cfdeploy_state::AppRecord;

use crate::bindings::{BindingManager, diff_bindings};
use crate::classify::ChangeSet;
use crate::error::DeployResult;
use crate::routes::{RouteReconciler, reconcile};

use super::Orchestrator;

/// Apply `changes` to the live application of `record`.
///
/// Attributes first, then service bindings (removals before additions),
/// then routes, then the artifact. A restage or restart follows if any of
/// that requires one, and the requested run state is applied last.
///
/// Routes may only be held by this application, or by applications a
/// rollover left deposed. Mappings of the desired routes held by deposed
/// applications are removed once this application has its own, so each
/// route ends up mapped to this application alone.
pub(super) async fn apply(
    orch: &Orchestrator,
    mut record: AppRecord,
    config: &AppConfig,
    changes: &ChangeSet,
) -> DeployResult<AppRecord> {
    let apps = &*orch.apps;
    let id = record.id.clone();
    let timeout = config.timeout();
    let deposed: Vec<String> = record.deposed.iter().map(|(id, _)| id.to_string()).collect();
    let owners: Vec<&str> = deposed.iter().map(String::as_str).collect();

    let route_plan = reconcile(&config.desired_routes(), &record.routes);
    let routes = RouteReconciler::new(&*orch.routes);
    routes.preflight(&route_plan.to_create, &owners_with(&owners, &id)).await?;

    let attributes_changed = changes.updates_in_place()
        || changes.requires_restart()
        || changes.buildpack
        || changes.stack
        || changes.environment;
    if attributes_changed {
        record.app = apps
            .update_app(&AppUpdate::from_spec(&id, &config.to_spec()))
            .await?;
        orch.persist(&mut record)?;
        info!(app = %id, "application attributes updated");
    }

    if changes.service_bindings {
        let plan = diff_bindings(&record.service_bindings, &config.desired_bindings());
        let result = BindingManager::new(apps)
            .apply(&id, &plan, &mut record.service_bindings)
            .await;
        orch.persist(&mut record)?;
        result?;
    }

    if !route_plan.is_empty() {
        let result = routes
            .apply(&id, &route_plan, &owners, &mut record.routes)
            .await;
        orch.persist(&mut record)?;
        result?;
        routes.hand_over(&record.routes, &owners).await?;
    }

    let uploaded = changes.requires_upload() && orch.upload(&id, config).await?;

    let mut restage = changes.requires_restage();
    let mut restart = changes.requires_restart();
    if uploaded || restage {
        sleep(orch.timings.package_settle).await;
    }
    let current = apps.read_app(&id).await?;
    if uploaded || restage {
        if current.package_state == PackageState::Pending {
            debug!(app = %id, "package pending, restarting instead of restaging");
            restage = false;
            restart = true;
        } else {
            restage = true;
        }
    }

    if restage {
        apps.restage_app(&id, timeout).await?;
        if current.is_started() {
            apps.wait_for_app_to_start(&id, timeout).await?;
        }
        info!(app = %id, "application restaged");
    } else if restart && !config.stopped {
        apps.stop_app(&id, timeout).await?;
        apps.start_app(&id, timeout).await?;
        info!(app = %id, "application restarted");
    }

    if changes.stopped {
        if config.stopped {
            apps.stop_app(&id, timeout).await?;
            info!(app = %id, "application stopped");
        } else {
            apps.start_app(&id, timeout).await?;
            info!(app = %id, "application started");
        }
    }

    record.app = apps.read_app(&id).await?;
    record.config = config.clone();
    orch.persist(&mut record)?;
    Ok(record)
}

fn owners_with<'a>(owners: &[&'a str], app: &'a str) -> Vec<&'a str> {
    let mut all = owners.to_vec();
    all.push(app);
    all
}
