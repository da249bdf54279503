//! Deployment orchestrator: create, refresh, update and delete one managed
//! application.
//!
//! Updates are classified first ([`classify`]) and then dispatched: a
//! rollover runs the blue-green state machine in [`rollover`], anything else
//! is applied in place by [`standard`]. The [`AppRecord`] is written back to
//! the [`StateStore`] after every committed step, so an interrupted run
//! leaves behind enough bookkeeping to continue or clean up.

mod rollover;
mod standard;


use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use cfdeploy_core::{AppConfig, AppSpec, Application, RouteBinding, ServiceBinding};
use cfdeploy_state::{AppRecord, StateStore};

use crate::bindings::BindingManager;
use crate::classify::{Action, ChangeSet, classify};
use crate::deposed::DeposedTracker;
use crate::error::{DeployError, DeployResult};
use crate::limiter::ConcurrencyLimiter;
use crate::platform::{AppManager, ArtifactFetcher, RouteManager, ServiceManager};
use crate::routes::RouteReconciler;
use crate::service_instance::ServiceInstances;
use crate::timings::Timings;

pub use rollover::RolloverStep;

/// Outcome of classifying a requested config against the recorded one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Plan {
    pub address: String,
    pub action: Action,
    pub changed: Vec<&'static str>,
}

impl Plan {
    /// Classify `next` against the config and live state held in `record`.
    pub fn for_record(record: &AppRecord, next: &AppConfig) -> Self {
        let changes = ChangeSet::against_record(record, next);
        Self {
            address: record.address.clone(),
            action: classify(&changes, next.blue_green.enable),
            changed: changes.changed_fields(),
        }
    }
}

type ArtifactTask = JoinHandle<Result<PathBuf, String>>;

/// An application that was created and populated successfully.
struct Provisioned {
    app: Application,
    routes: Vec<RouteBinding>,
    bindings: Vec<ServiceBinding>,
}

pub struct Orchestrator {
    apps: Arc<dyn AppManager>,
    routes: Arc<dyn RouteManager>,
    fetcher: Arc<dyn ArtifactFetcher>,
    store: StateStore,
    limiter: ConcurrencyLimiter,
    timings: Timings,
}

impl Orchestrator {
    pub fn new(
        apps: Arc<dyn AppManager>,
        routes: Arc<dyn RouteManager>,
        fetcher: Arc<dyn ArtifactFetcher>,
        store: StateStore,
    ) -> Self {
        Self {
            apps,
            routes,
            fetcher,
            store,
            limiter: ConcurrencyLimiter::new(),
            timings: Timings::default(),
        }
    }

    pub fn with_timings(mut self, timings: Timings) -> Self {
        self.timings = timings;
        self
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Service-instance operations sharing this orchestrator's limiter.
    pub fn service_instances(&self, services: Arc<dyn ServiceManager>) -> ServiceInstances {
        ServiceInstances::new(services, self.limiter.clone(), self.timings.clone())
    }

    /// Create the application described by `config` and record it under
    /// `address`.
    ///
    /// On any failure after the application exists it is deleted again.
    pub async fn create(&self, address: &str, config: &AppConfig) -> DeployResult<AppRecord> {
        validate(config)?;
        if self.store.get_record(address)?.is_some() {
            return Err(DeployError::Validation(format!(
                "{address} is already managed; update it instead"
            )));
        }
        RouteReconciler::new(&*self.routes)
            .preflight(&config.desired_routes(), &[])
            .await?;

        let provisioned = self.provision(&config.to_spec(), config, true).await?;
        let mut record = AppRecord::new(address, config.clone(), provisioned.app);
        record.routes = provisioned.routes;
        record.service_bindings = provisioned.bindings;
        self.persist(&mut record)?;
        info!(%address, app = %record.id, "application created");
        Ok(record)
    }

    /// Refresh the record of `address` from the platform.
    ///
    /// Returns `None` (and forgets the record) if the application no longer
    /// exists. Deposed entries whose application is gone are dropped.
    pub async fn read(&self, address: &str) -> DeployResult<Option<AppRecord>> {
        let Some(mut record) = self.store.get_record(address)? else {
            return Ok(None);
        };

        match self.apps.read_app(&record.id).await {
            Ok(app) => record.app = app,
            Err(e) if e.is_not_found() => {
                warn!(%address, app = %record.id, "application no longer exists, forgetting it");
                self.store.delete_record(address)?;
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        }

        record.routes = RouteReconciler::new(&*self.routes).live_routes(&record.id).await?;
        record.service_bindings = BindingManager::new(&*self.apps)
            .live(&record.id, &record.service_bindings)
            .await?;
        DeposedTracker::new(&*self.apps)
            .refresh(&mut record.deposed)
            .await?;

        self.persist(&mut record)?;
        Ok(Some(record))
    }

    /// Classify `config` against the recorded config and live state of `address`.
    pub fn plan(&self, address: &str, config: &AppConfig) -> DeployResult<Plan> {
        validate(config)?;
        let record = self.load(address)?;
        Ok(Plan::for_record(&record, config))
    }

    /// Move `address` to `config`.
    pub async fn update(&self, address: &str, config: &AppConfig) -> DeployResult<AppRecord> {
        validate(config)?;
        let mut record = self.load(address)?;
        let changes = ChangeSet::against_record(&record, config);
        let action = classify(&changes, config.blue_green.enable);
        info!(%address, %action, changed = ?changes.changed_fields(), "applying change");

        match action {
            Action::NoOp => {
                record.config = config.clone();
                self.persist(&mut record)?;
                Ok(record)
            }
            Action::Rollover => rollover::Rollover::new(self, record, config).run().await,
            Action::Update | Action::Restart | Action::Restage => {
                standard::apply(self, record, config, &changes).await
            }
        }
    }

    /// Remove the application of `address` with its bindings and mappings,
    /// then forget the record. Objects already gone count as removed.
    pub async fn delete(&self, address: &str) -> DeployResult<()> {
        let mut record = self.load(address)?;

        let bindings = record.service_bindings.clone();
        BindingManager::new(&*self.apps)
            .remove(&bindings, &mut record.service_bindings)
            .await?;
        RouteReconciler::new(&*self.routes)
            .delete_mappings(&record.routes)
            .await?;

        match self.apps.delete_app(&record.id, true).await {
            Ok(()) => info!(%address, app = %record.id, "application deleted"),
            Err(e) if e.is_not_found() => info!(%address, app = %record.id, "application already deleted"),
            Err(e) => return Err(e.into()),
        }

        if !record.deposed.is_empty() {
            let ids: Vec<&str> = record.deposed.iter().map(|(id, _)| id).collect();
            warn!(%address, deposed = ?ids, "deposed applications remain and need manual cleanup");
        }
        self.store.delete_record(address)?;
        Ok(())
    }

    fn load(&self, address: &str) -> DeployResult<AppRecord> {
        self.store
            .get_record(address)?
            .ok_or_else(|| DeployError::UnknownResource(address.to_string()))
    }

    fn persist(&self, record: &mut AppRecord) -> DeployResult<()> {
        self.store.put_record(record)?;
        Ok(())
    }

    /// Create an application from `spec`, then bind services, optionally map
    /// the desired routes, upload the artifact and start it.
    ///
    /// Artifact retrieval runs concurrently with creation; upload waits for
    /// it. If anything after creation fails the application is deleted.
    async fn provision(
        &self,
        spec: &AppSpec,
        config: &AppConfig,
        map_routes: bool,
    ) -> DeployResult<Provisioned> {
        let mut artifact = config
            .source
            .as_ref()
            .map(|source| tokio::spawn(self.fetcher.fetch(source)));

        let app = match self.apps.create_app(spec).await {
            Ok(app) => app,
            Err(e) => {
                abort(artifact);
                return Err(e.into());
            }
        };
        info!(app = %app.id, name = %app.name, instances = app.instances, "application provisioned");

        match self.populate(&app, config, map_routes, &mut artifact).await {
            Ok(provisioned) => Ok(provisioned),
            Err(e) => {
                abort(artifact);
                warn!(app = %app.id, error = %e, "provisioning failed, deleting application");
                if let Err(cleanup) = self.apps.delete_app(&app.id, true).await {
                    warn!(app = %app.id, error = %cleanup, "could not delete partially provisioned application");
                }
                Err(e)
            }
        }
    }

    async fn populate(
        &self,
        app: &Application,
        config: &AppConfig,
        map_routes: bool,
        artifact: &mut Option<ArtifactTask>,
    ) -> DeployResult<Provisioned> {
        let mut bindings = Vec::new();
        BindingManager::new(&*self.apps)
            .add(&app.id, &config.desired_bindings(), &mut bindings)
            .await?;

        let mut routes = Vec::new();
        if map_routes {
            RouteReconciler::new(&*self.routes)
                .add_mappings(&app.id, &config.desired_routes(), &[], &mut routes)
                .await?;
        }

        if let Some(task) = artifact.take() {
            let path = await_artifact(task).await?;
            self.apps.upload_app(&app.id, &path, &config.add_content).await?;
        }

        if !config.stopped {
            self.apps.start_app(&app.id, config.timeout()).await?;
        }

        let app = self.apps.read_app(&app.id).await?;
        Ok(Provisioned {
            app,
            routes,
            bindings,
        })
    }

    /// Retrieve the artifact of `config` and upload it to `app`.
    async fn upload(&self, app: &str, config: &AppConfig) -> DeployResult<bool> {
        let Some(source) = config.source.as_ref() else {
            return Ok(false);
        };
        let path = await_artifact(tokio::spawn(self.fetcher.fetch(source))).await?;
        self.apps.upload_app(app, &path, &config.add_content).await?;
        info!(%app, "artifact uploaded");
        Ok(true)
    }
}

fn validate(config: &AppConfig) -> DeployResult<()> {
    config
        .validate()
        .map_err(|e| DeployError::Validation(e.to_string()))
}

async fn await_artifact(task: ArtifactTask) -> DeployResult<PathBuf> {
    match task.await {
        Ok(Ok(path)) => Ok(path),
        Ok(Err(reason)) => Err(DeployError::Artifact(reason)),
        Err(join) => Err(DeployError::Artifact(join.to_string())),
    }
}

fn abort(artifact: Option<ArtifactTask>) {
    if let Some(task) = artifact {
        task.abort();
    }
}
