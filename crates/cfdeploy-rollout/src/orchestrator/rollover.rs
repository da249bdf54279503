//! Blue-green rollover state machine.
//!
//! One pass per update call. Once the live application has been renamed
//! there is no rollback: a failure leaves the record pointing at whatever
//! was committed last, with the venerable application in the deposed
//! registry until it is decommissioned.

use std::fmt;

use serde::Serialize;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

use cfdeploy_core::{AppConfig, AppUpdate, Application, RouteBinding};
use cfdeploy_state::AppRecord;

use crate::deposed::DeposedTracker;
use crate::error::{DeployError, DeployResult};
use crate::poller::StateWait;
use crate::routes::RouteReconciler;

use super::Orchestrator;

/// Suffix appended to the name of the application being replaced.
pub const VENERABLE_SUFFIX: &str = "-venerable";

/// Numbered venerable names tried before giving up on a rename.
const MAX_VENERABLE_GENERATIONS: u32 = 16;

/// Step of a rollover, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RolloverStep {
    RenameVenerable,
    ProvisionReplacement,
    BindRoutes,
    ScaleConverge,
    UnbindVenerableRoutes,
    AwaitShutdownGrace,
    DecommissionVenerable,
    Done,
}

impl RolloverStep {
    pub fn next(self) -> Self {
        match self {
            RolloverStep::RenameVenerable => RolloverStep::ProvisionReplacement,
            RolloverStep::ProvisionReplacement => RolloverStep::BindRoutes,
            RolloverStep::BindRoutes => RolloverStep::ScaleConverge,
            RolloverStep::ScaleConverge => RolloverStep::UnbindVenerableRoutes,
            RolloverStep::UnbindVenerableRoutes => RolloverStep::AwaitShutdownGrace,
            RolloverStep::AwaitShutdownGrace => RolloverStep::DecommissionVenerable,
            RolloverStep::DecommissionVenerable | RolloverStep::Done => RolloverStep::Done,
        }
    }
}

impl fmt::Display for RolloverStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RolloverStep::RenameVenerable => "rename_venerable",
            RolloverStep::ProvisionReplacement => "provision_replacement",
            RolloverStep::BindRoutes => "bind_routes",
            RolloverStep::ScaleConverge => "scale_converge",
            RolloverStep::UnbindVenerableRoutes => "unbind_venerable_routes",
            RolloverStep::AwaitShutdownGrace => "await_shutdown_grace",
            RolloverStep::DecommissionVenerable => "decommission_venerable",
            RolloverStep::Done => "done",
        })
    }
}

/// Venerable name of `name` for a given generation: `api-venerable` first,
/// then `api-venerable-2` and so on when earlier names are still taken by
/// applications an interrupted rollover left behind.
pub fn venerable_name(name: &str, generation: u32) -> String {
    if generation <= 1 {
        format!("{name}{VENERABLE_SUFFIX}")
    } else {
        format!("{name}{VENERABLE_SUFFIX}-{generation}")
    }
}

/// Whether `name` already is a venerable name, so a retried rollover does
/// not stack suffixes.
pub fn is_venerable_name(name: &str) -> bool {
    name.ends_with(VENERABLE_SUFFIX)
        || name.rsplit_once('-').is_some_and(|(head, generation)| {
            head.ends_with(VENERABLE_SUFFIX) && generation.parse::<u32>().is_ok()
        })
}

pub(super) struct Rollover<'o> {
    orch: &'o Orchestrator,
    record: AppRecord,
    config: &'o AppConfig,
    step: RolloverStep,
    /// The live application before the rollover.
    venerable: Application,
    /// Mappings of the venerable application when the rollover began.
    venerable_routes: Vec<RouteBinding>,
    /// Running-instance target of the venerable application.
    venerable_instances: u32,
}

impl<'o> Rollover<'o> {
    pub(super) fn new(orch: &'o Orchestrator, record: AppRecord, config: &'o AppConfig) -> Self {
        let venerable = record.app.clone();
        let venerable_routes = record.routes.clone();
        let venerable_instances = venerable.instances;
        Self {
            orch,
            record,
            config,
            step: RolloverStep::RenameVenerable,
            venerable,
            venerable_routes,
            venerable_instances,
        }
    }

    pub(super) async fn run(mut self) -> DeployResult<AppRecord> {
        self.preflight().await?;
        info!(
            address = %self.record.address,
            venerable = %self.venerable.id,
            instances = self.config.instances,
            "starting rollover"
        );

        while self.step != RolloverStep::Done {
            let step = self.step;
            debug!(address = %self.record.address, %step, "rollover step");
            if let Err(e) = self.execute(step).await {
                warn!(address = %self.record.address, %step, error = %e, "rollover failed, no rollback");
                return Err(e);
            }
            self.step = step.next();
            info!(address = %self.record.address, completed = %step, next = %self.step, "rollover advanced");
        }

        self.finish().await
    }

    async fn execute(&mut self, step: RolloverStep) -> DeployResult<()> {
        match step {
            RolloverStep::RenameVenerable => self.rename_venerable().await,
            RolloverStep::ProvisionReplacement => self.provision_replacement().await,
            RolloverStep::BindRoutes => self.bind_routes().await,
            RolloverStep::ScaleConverge => self.scale_converge().await,
            RolloverStep::UnbindVenerableRoutes => self.unbind_venerable_routes().await,
            RolloverStep::AwaitShutdownGrace => self.await_shutdown_grace().await,
            RolloverStep::DecommissionVenerable => self.decommission_venerable().await,
            RolloverStep::Done => Ok(()),
        }
    }

    /// Checks that must pass before anything is mutated.
    async fn preflight(&self) -> DeployResult<()> {
        if self.config.routes.is_empty() {
            return Err(DeployError::Validation(
                "blue-green rollover requires at least one route".to_string(),
            ));
        }
        let superseded = self.superseded();
        let owners: Vec<&str> = superseded.iter().map(String::as_str).collect();
        RouteReconciler::new(&*self.orch.routes)
            .preflight(&self.config.desired_routes(), &owners)
            .await
    }

    /// Applications that may still hold the desired routes: the venerable
    /// and whatever an earlier, interrupted rollover left deposed.
    fn superseded(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .record
            .deposed
            .iter()
            .map(|(id, _)| id.to_string())
            .collect();
        if !ids.contains(&self.venerable.id) {
            ids.push(self.venerable.id.clone());
        }
        ids
    }

    async fn rename_venerable(&mut self) -> DeployResult<()> {
        let mut generation = 1;
        while !is_venerable_name(&self.venerable.name) {
            let name = venerable_name(&self.venerable.name, generation);
            let renamed = self
                .orch
                .apps
                .update_app(&AppUpdate::rename(&self.venerable.id, &name))
                .await;
            match renamed {
                Ok(app) => self.venerable = app,
                Err(e) if e.is_conflict() && generation < MAX_VENERABLE_GENERATIONS => {
                    debug!(app = %self.venerable.id, %name, "venerable name taken, trying the next one");
                    generation += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
        self.record.app = self.venerable.clone();
        self.orch.persist(&mut self.record)?;
        info!(app = %self.venerable.id, name = %self.venerable.name, "venerable application renamed");
        Ok(())
    }

    async fn provision_replacement(&mut self) -> DeployResult<()> {
        let mut spec = self.config.to_spec();
        spec.instances = 1;
        let provisioned = self.orch.provision(&spec, self.config, false).await?;

        // The replacement is now the identity of this resource. Routes are
        // still the venerable's until they are migrated.
        let mut config = self.config.clone();
        config.routes = self.record.config.routes.clone();
        config.instances = provisioned.app.instances;
        self.record.id = provisioned.app.id.clone();
        self.record.app = provisioned.app;
        self.record.config = config;
        self.record.service_bindings = provisioned.bindings;
        self.record.routes = Vec::new();
        DeposedTracker::new(&*self.orch.apps).track(&mut self.record.deposed, &self.venerable.id);
        self.orch.persist(&mut self.record)?;
        Ok(())
    }

    async fn bind_routes(&mut self) -> DeployResult<()> {
        let reconciler = RouteReconciler::new(&*self.orch.routes);
        let superseded = self.superseded();
        let owners: Vec<&str> = superseded.iter().map(String::as_str).collect();
        let result = reconciler
            .add_mappings(
                &self.record.id,
                &self.config.desired_routes(),
                &owners,
                &mut self.record.routes,
            )
            .await;
        if !self.record.routes.is_empty() {
            self.record.config.routes = self.config.routes.clone();
            self.orch.persist(&mut self.record)?;
        }
        result
    }

    /// Ramp the replacement up and, unless suppressed, the venerable down,
    /// one instance per call, waiting for each change to be observed.
    async fn scale_converge(&mut self) -> DeployResult<()> {
        let target = self.config.instances;
        let suppress = self.config.blue_green.suppress_scale_down();
        let timeout = self.config.timeout();
        let orch = self.orch;
        let interval = orch.timings.app_poll_interval;
        let apps = &*orch.apps;
        let replacement = self.record.id.clone();
        let venerable = self.venerable.id.clone();
        let (replacement, venerable) = (replacement.as_str(), venerable.as_str());

        if suppress {
            if self.config.blue_green.shutdown_wait > 0 {
                warn!(
                    %venerable,
                    instances = self.venerable_instances,
                    shutdown_wait_minutes = self.config.blue_green.shutdown_wait,
                    "venerable keeps full scale during shutdown wait; both applications run at capacity"
                );
            } else {
                debug!(%venerable, "venerable application is forgotten, not scaling it down");
            }
        }

        let mut current = self.record.app.instances;
        while current < target || (!suppress && self.venerable_instances > 1) {
            if current < target {
                current += 1;
                self.record.app = apps.update_app(&AppUpdate::scale(replacement, current)).await?;
                self.record.config.instances = current;
                orch.persist(&mut self.record)?;
                info!(app = %replacement, instances = current, "scaled replacement up");

                if !self.config.stopped {
                    StateWait::condition(format!("{replacement} to run {current} instances"))
                        .timeout(timeout)
                        .poll_interval(interval)
                        .until(|| async move {
                            let running = apps.count_running_instances(replacement).await?;
                            Ok::<_, DeployError>(running >= current)
                        })
                        .await?;
                }
            }

            if !suppress && self.venerable_instances > 1 {
                self.venerable_instances -= 1;
                let down = self.venerable_instances;
                apps.update_app(&AppUpdate::scale(venerable, down)).await?;
                info!(app = %venerable, instances = down, "scaled venerable down");

                if self.venerable.is_started() {
                    StateWait::condition(format!("{venerable} to stop down to {down} instances"))
                        .timeout(timeout)
                        .poll_interval(interval)
                        .until(|| async move {
                            let running = apps.count_running_instances(venerable).await?;
                            Ok::<_, DeployError>(running <= down)
                        })
                        .await?;
                    sleep(orch.timings.stop_grace).await;
                }
            }
        }
        Ok(())
    }

    async fn unbind_venerable_routes(&mut self) -> DeployResult<()> {
        let live: Vec<&str> = self
            .record
            .routes
            .iter()
            .filter_map(|r| r.mapping_id.as_deref())
            .collect();
        let stale: Vec<RouteBinding> = self
            .venerable_routes
            .iter()
            .filter(|r| match r.mapping_id.as_deref() {
                Some(id) => !live.contains(&id),
                None => false,
            })
            .cloned()
            .collect();

        let reconciler = RouteReconciler::new(&*self.orch.routes);
        let removed = reconciler.delete_mappings(&stale).await?;
        info!(app = %self.venerable.id, removed, "venerable route mappings removed");

        let superseded = self.superseded();
        let owners: Vec<&str> = superseded.iter().map(String::as_str).collect();
        let handed_over = reconciler.hand_over(&self.record.routes, &owners).await?;
        if handed_over > 0 {
            info!(handed_over, "route mappings of deposed applications removed");
        }
        Ok(())
    }

    async fn await_shutdown_grace(&mut self) -> DeployResult<()> {
        let wait = self.config.blue_green.shutdown_wait();
        if wait.is_zero() {
            return Ok(());
        }
        let cycle = self.orch.timings.shutdown_wait_cycle;
        let venerable = &self.venerable.id;
        let started = Instant::now();

        StateWait::condition(format!("shutdown wait of {venerable}"))
            .timeout(wait + cycle)
            .poll_interval(cycle)
            .until(|| async move {
                let waited = started.elapsed();
                info!(
                    app = %venerable,
                    waited_secs = waited.as_secs(),
                    shutdown_wait_secs = wait.as_secs(),
                    "waiting for venerable shutdown period to expire"
                );
                Ok::<_, DeployError>(waited >= wait)
            })
            .await
    }

    async fn decommission_venerable(&mut self) -> DeployResult<()> {
        let id = self.venerable.id.clone();
        if self.config.blue_green.forget_venerable {
            info!(app = %id, "forgetting venerable application, leaving it running");
        } else {
            match self.orch.apps.delete_app(&id, true).await {
                Ok(()) => info!(app = %id, "venerable application deleted"),
                Err(e) if e.is_not_found() => debug!(app = %id, "venerable application already gone"),
                Err(e) => return Err(e.into()),
            }
        }
        DeposedTracker::new(&*self.orch.apps).release(&mut self.record.deposed, &id);
        self.orch.persist(&mut self.record)?;
        Ok(())
    }

    async fn finish(mut self) -> DeployResult<AppRecord> {
        self.record.app = self.orch.apps.read_app(&self.record.id).await?;
        self.record.config = self.config.clone();
        self.orch.persist(&mut self.record)?;
        if !self.record.deposed.is_empty() {
            let ids: Vec<&str> = self.record.deposed.iter().map(|(id, _)| id).collect();
            warn!(address = %self.record.address, deposed = ?ids, "deposed applications from earlier rollovers remain");
        }
        info!(
            address = %self.record.address,
            app = %self.record.id,
            instances = self.record.app.instances,
            "rollover complete"
        );
        Ok(self.record)
    }
}
