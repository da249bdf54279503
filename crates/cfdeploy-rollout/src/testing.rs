//! In-memory fake platform for tests.
//!
//! Implements every collaborator trait over a single mutex-guarded state.
//! Scaling converges immediately, uploads leave the package `PENDING`,
//! and any operation can be made to fail once via [`FakePlatform::fail_next`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;

use cfdeploy_core::{
    AppSpec, AppState, AppUpdate, Application, ArtifactSource, ContentEntry, MappingId,
    PackageState, RouteMapping, ServiceBinding,
};

use crate::platform::*;

#[derive(Default)]
pub(crate) struct FakeState {
    pub apps: BTreeMap<String, Application>,
    pub running: BTreeMap<String, u32>,
    pub mappings: BTreeMap<String, RouteMapping>,
    pub bindings: BTreeMap<String, (String, CreatedBinding)>,
    pub instances: BTreeMap<String, (ServiceInstance, u32)>,
    pub uploads: Vec<(String, PathBuf)>,
    pub calls: Vec<String>,
    pub failures: BTreeMap<String, PlatformError>,
    pub package_state_after_upload: Option<PackageState>,
    pub instance_op_reads: u32,
    pub fail_instance_ops: bool,
    pub fetch_error: Option<String>,
    pub fetch_delay: Duration,
    next_id: u64,
}

impl FakeState {
    fn next(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }

    /// Application names are unique per space.
    fn name_taken(&self, space: &str, name: &str, except: &str) -> bool {
        self.apps
            .values()
            .any(|a| a.id != except && a.space == space && a.name == name)
    }
}

#[derive(Default)]
pub(crate) struct FakePlatform {
    state: Mutex<FakeState>,
}

fn ready<T: Send + 'static>(result: PlatformResult<T>) -> PlatformFuture<'static, T> {
    Box::pin(std::future::ready(result))
}

impl FakePlatform {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut FakeState) -> R) -> R {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    /// Make the next call of `op` fail with `err`.
    pub fn fail_next(&self, op: &str, err: PlatformError) {
        self.with(|s| s.failures.insert(op.to_string(), err));
    }

    pub fn calls(&self) -> Vec<String> {
        self.with(|s| s.calls.clone())
    }

    pub fn count_calls(&self, prefix: &str) -> usize {
        self.with(|s| s.calls.iter().filter(|c| c.starts_with(prefix)).count())
    }

    pub fn app(&self, id: &str) -> Option<Application> {
        self.with(|s| s.apps.get(id).cloned())
    }

    pub fn running(&self, id: &str) -> u32 {
        self.with(|s| s.running.get(id).copied().unwrap_or(0))
    }

    pub fn mappings_for_route(&self, route: &str) -> Vec<RouteMapping> {
        self.with(|s| {
            s.mappings
                .values()
                .filter(|m| m.route == route)
                .cloned()
                .collect()
        })
    }

    /// Create a started, staged application directly on the platform.
    pub fn seed_app(&self, name: &str, instances: u32) -> String {
        self.with(|s| {
            let id = s.next("app");
            s.apps.insert(
                id.clone(),
                Application {
                    id: id.clone(),
                    name: name.to_string(),
                    space: "space-1".to_string(),
                    instances,
                    memory: Some(256),
                    disk_quota: None,
                    stack: None,
                    buildpack: None,
                    command: None,
                    enable_ssh: None,
                    health_check: Default::default(),
                    environment: Default::default(),
                    ports: [8080].into_iter().collect(),
                    state: AppState::Started,
                    package_state: PackageState::Staged,
                },
            );
            s.running.insert(id.clone(), instances);
            id
        })
    }

    pub fn seed_mapping(&self, route: &str, app: &str) -> String {
        self.with(|s| {
            let id = s.next("mapping");
            s.mappings.insert(
                id.clone(),
                RouteMapping {
                    mapping_id: id.clone(),
                    route: route.to_string(),
                    app: app.to_string(),
                    port: Some(8080),
                },
            );
            id
        })
    }

    fn begin(&self, op: &str, detail: impl AsRef<str>) -> PlatformResult<()> {
        self.with(|s| {
            s.calls.push(format!("{op} {}", detail.as_ref()));
            match s.failures.remove(op) {
                Some(err) => Err(err),
                None => Ok(()),
            }
        })
    }
}

fn app_not_found(id: &str) -> PlatformError {
    PlatformError::not_found(ObjectKind::Application, id)
}

impl AppManager for FakePlatform {
    fn create_app<'a>(&'a self, spec: &'a AppSpec) -> PlatformFuture<'a, Application> {
        let result = self.begin("create_app", &spec.name).and_then(|_| {
            self.with(|s| -> PlatformResult<Application> {
                if s.name_taken(&spec.space, &spec.name, "") {
                    return Err(PlatformError::conflict(ObjectKind::Application, &spec.name));
                }
                let id = s.next("app");
                let app = Application {
                    id: id.clone(),
                    name: spec.name.clone(),
                    space: spec.space.clone(),
                    instances: spec.instances,
                    memory: spec.memory,
                    disk_quota: spec.disk_quota,
                    stack: spec.stack.clone(),
                    buildpack: spec.buildpack.clone(),
                    command: spec.command.clone(),
                    enable_ssh: spec.enable_ssh,
                    health_check: spec.health_check.clone(),
                    environment: spec.environment.clone(),
                    ports: if spec.ports.is_empty() {
                        [8080].into_iter().collect()
                    } else {
                        spec.ports.clone()
                    },
                    state: AppState::Stopped,
                    package_state: PackageState::Unknown,
                };
                s.apps.insert(id.clone(), app.clone());
                s.running.insert(id, 0);
                Ok(app)
            })
        });
        ready(result)
    }

    fn read_app<'a>(&'a self, id: &'a str) -> PlatformFuture<'a, Application> {
        let result = self
            .begin("read_app", id)
            .and_then(|_| self.with(|s| s.apps.get(id).cloned().ok_or_else(|| app_not_found(id))));
        ready(result)
    }

    fn update_app<'a>(&'a self, update: &'a AppUpdate) -> PlatformFuture<'a, Application> {
        let detail = match (update.instances, &update.name) {
            (Some(n), None) if update.space.is_none() => format!("{} instances={n}", update.id),
            (_, Some(name)) if update.space.is_none() => format!("{} name={name}", update.id),
            _ => format!("{} full", update.id),
        };
        let result = self.begin("update_app", detail).and_then(|_| {
            self.with(|s| -> PlatformResult<Application> {
                let space = match &update.space {
                    Some(space) => space.clone(),
                    None => s
                        .apps
                        .get(&update.id)
                        .ok_or_else(|| app_not_found(&update.id))?
                        .space
                        .clone(),
                };
                if let Some(name) = &update.name {
                    if s.name_taken(&space, name, &update.id) {
                        return Err(PlatformError::conflict(ObjectKind::Application, name));
                    }
                }
                let app = s.apps.get_mut(&update.id).ok_or_else(|| app_not_found(&update.id))?;
                if let Some(v) = &update.name {
                    app.name = v.clone();
                }
                if let Some(v) = &update.space {
                    app.space = v.clone();
                }
                if let Some(v) = update.instances {
                    app.instances = v;
                }
                if update.memory.is_some() {
                    app.memory = update.memory;
                }
                if update.disk_quota.is_some() {
                    app.disk_quota = update.disk_quota;
                }
                if update.buildpack.is_some() {
                    app.buildpack = update.buildpack.clone();
                }
                if update.stack.is_some() {
                    app.stack = update.stack.clone();
                }
                if update.command.is_some() {
                    app.command = update.command.clone();
                }
                if let Some(v) = &update.environment {
                    app.environment = v.clone();
                }
                if let Some(v) = &update.ports {
                    app.ports = v.clone();
                }
                let app = app.clone();
                if app.is_started() {
                    s.running.insert(app.id.clone(), app.instances);
                }
                Ok(app)
            })
        });
        ready(result)
    }

    fn delete_app<'a>(&'a self, id: &'a str, recursive: bool) -> PlatformFuture<'a, ()> {
        let result = self.begin("delete_app", id).and_then(|_| {
            self.with(|s| -> PlatformResult<()> {
                s.apps.remove(id).ok_or_else(|| app_not_found(id))?;
                s.running.remove(id);
                if recursive {
                    s.mappings.retain(|_, m| m.app != id);
                    s.bindings.retain(|_, (app, _)| app != id);
                }
                Ok(())
            })
        });
        ready(result)
    }

    fn upload_app<'a>(
        &'a self,
        id: &'a str,
        artifact: &'a Path,
        _add_content: &'a [ContentEntry],
    ) -> PlatformFuture<'a, ()> {
        let result = self.begin("upload_app", id).and_then(|_| {
            self.with(|s| -> PlatformResult<()> {
                let after = s.package_state_after_upload.unwrap_or(PackageState::Pending);
                let app = s.apps.get_mut(id).ok_or_else(|| app_not_found(id))?;
                app.package_state = after;
                s.uploads.push((id.to_string(), artifact.to_path_buf()));
                Ok(())
            })
        });
        ready(result)
    }

    fn start_app<'a>(&'a self, id: &'a str, _timeout: Duration) -> PlatformFuture<'a, ()> {
        let result = self.begin("start_app", id).and_then(|_| {
            self.with(|s| -> PlatformResult<()> {
                let app = s.apps.get_mut(id).ok_or_else(|| app_not_found(id))?;
                app.state = AppState::Started;
                app.package_state = PackageState::Staged;
                let instances = app.instances;
                s.running.insert(id.to_string(), instances);
                Ok(())
            })
        });
        ready(result)
    }

    fn stop_app<'a>(&'a self, id: &'a str, _timeout: Duration) -> PlatformFuture<'a, ()> {
        let result = self.begin("stop_app", id).and_then(|_| {
            self.with(|s| -> PlatformResult<()> {
                let app = s.apps.get_mut(id).ok_or_else(|| app_not_found(id))?;
                app.state = AppState::Stopped;
                s.running.insert(id.to_string(), 0);
                Ok(())
            })
        });
        ready(result)
    }

    fn restage_app<'a>(&'a self, id: &'a str, _timeout: Duration) -> PlatformFuture<'a, ()> {
        let result = self.begin("restage_app", id).and_then(|_| {
            self.with(|s| -> PlatformResult<()> {
                let app = s.apps.get_mut(id).ok_or_else(|| app_not_found(id))?;
                if app.package_state == PackageState::Pending {
                    return Err(PlatformError::transport(
                        ObjectKind::Application,
                        id,
                        "package is pending staging",
                    ));
                }
                app.package_state = PackageState::Staged;
                Ok(())
            })
        });
        ready(result)
    }

    fn wait_for_app_to_start<'a>(
        &'a self,
        id: &'a str,
        _timeout: Duration,
    ) -> PlatformFuture<'a, ()> {
        let result = self.begin("wait_for_app_to_start", id).and_then(|_| {
            self.with(|s| match s.apps.get(id) {
                Some(app) if app.is_started() => Ok(()),
                Some(_) => Err(PlatformError::transport(ObjectKind::Application, id, "not started")),
                None => Err(app_not_found(id)),
            })
        });
        ready(result)
    }

    fn count_running_instances<'a>(&'a self, id: &'a str) -> PlatformFuture<'a, u32> {
        let result = self.begin("count_running_instances", id).and_then(|_| {
            self.with(|s| s.running.get(id).copied().ok_or_else(|| app_not_found(id)))
        });
        ready(result)
    }

    fn create_service_binding<'a>(
        &'a self,
        app: &'a str,
        binding: &'a ServiceBinding,
    ) -> PlatformFuture<'a, CreatedBinding> {
        let result = self
            .begin("create_service_binding", &binding.service_instance)
            .map(|_| {
                self.with(|s| {
                    let id = s.next("binding");
                    let created = CreatedBinding {
                        binding_id: id.clone(),
                        service_instance: binding.service_instance.clone(),
                        credentials: json!({
                            "uri": format!("{}://{app}", binding.service_instance),
                            "tls": { "enabled": true },
                        })
                        .as_object()
                        .cloned()
                        .unwrap_or_default(),
                    };
                    s.bindings.insert(id, (app.to_string(), created.clone()));
                    created
                })
            });
        ready(result)
    }

    fn delete_service_binding<'a>(&'a self, binding_id: &'a str) -> PlatformFuture<'a, ()> {
        let result = self.begin("delete_service_binding", binding_id).and_then(|_| {
            self.with(|s| {
                s.bindings
                    .remove(binding_id)
                    .map(|_| ())
                    .ok_or_else(|| PlatformError::not_found(ObjectKind::ServiceBinding, binding_id))
            })
        });
        ready(result)
    }

    fn read_service_bindings_by_app<'a>(
        &'a self,
        app: &'a str,
    ) -> PlatformFuture<'a, Vec<CreatedBinding>> {
        let result = self.begin("read_service_bindings_by_app", app).map(|_| {
            self.with(|s| {
                s.bindings
                    .values()
                    .filter(|(owner, _)| owner == app)
                    .map(|(_, b)| b.clone())
                    .collect()
            })
        });
        ready(result)
    }
}

impl RouteManager for FakePlatform {
    fn create_route_mapping<'a>(
        &'a self,
        route: &'a str,
        app: &'a str,
        port: Option<u16>,
    ) -> PlatformFuture<'a, MappingId> {
        let result = self
            .begin("create_route_mapping", format!("{route} {app}"))
            .and_then(|_| {
                self.with(|s| -> PlatformResult<MappingId> {
                    if s.mappings.values().any(|m| m.route == route && m.app == app) {
                        return Err(PlatformError::conflict(ObjectKind::RouteMapping, route));
                    }
                    let id = s.next("mapping");
                    s.mappings.insert(
                        id.clone(),
                        RouteMapping {
                            mapping_id: id.clone(),
                            route: route.to_string(),
                            app: app.to_string(),
                            port: port.or(Some(8080)),
                        },
                    );
                    Ok(id)
                })
            });
        ready(result)
    }

    fn read_route_mapping<'a>(&'a self, mapping_id: &'a str) -> PlatformFuture<'a, RouteMapping> {
        let result = self.begin("read_route_mapping", mapping_id).and_then(|_| {
            self.with(|s| {
                s.mappings
                    .get(mapping_id)
                    .cloned()
                    .ok_or_else(|| PlatformError::not_found(ObjectKind::RouteMapping, mapping_id))
            })
        });
        ready(result)
    }

    fn read_route_mappings_by_app<'a>(
        &'a self,
        app: &'a str,
    ) -> PlatformFuture<'a, Vec<RouteMapping>> {
        let result = self.begin("read_route_mappings_by_app", app).map(|_| {
            self.with(|s| s.mappings.values().filter(|m| m.app == app).cloned().collect())
        });
        ready(result)
    }

    fn read_route_mappings_by_route<'a>(
        &'a self,
        route: &'a str,
    ) -> PlatformFuture<'a, Vec<RouteMapping>> {
        let result = self.begin("read_route_mappings_by_route", route).map(|_| {
            self.with(|s| s.mappings.values().filter(|m| m.route == route).cloned().collect())
        });
        ready(result)
    }

    fn delete_route_mapping<'a>(&'a self, mapping_id: &'a str) -> PlatformFuture<'a, ()> {
        let result = self.begin("delete_route_mapping", mapping_id).and_then(|_| {
            self.with(|s| {
                s.mappings
                    .remove(mapping_id)
                    .map(|_| ())
                    .ok_or_else(|| PlatformError::not_found(ObjectKind::RouteMapping, mapping_id))
            })
        });
        ready(result)
    }
}

impl ServiceManager for FakePlatform {
    fn create_service_instance<'a>(
        &'a self,
        request: &'a ServiceInstanceRequest,
    ) -> PlatformFuture<'a, String> {
        let result = self.begin("create_service_instance", &request.name).map(|_| {
            self.with(|s| {
                let id = s.next("si");
                let reads = s.instance_op_reads;
                let instance = ServiceInstance {
                    id: id.clone(),
                    name: request.name.clone(),
                    service_plan: request.service_plan.clone(),
                    space: request.space.clone(),
                    tags: request.tags.clone(),
                    last_operation: Some(LastOperation {
                        kind: OperationKind::Create,
                        state: OperationState::InProgress,
                        description: None,
                    }),
                };
                s.instances.insert(id.clone(), (instance, reads));
                id
            })
        });
        ready(result)
    }

    fn update_service_instance<'a>(
        &'a self,
        id: &'a str,
        request: &'a ServiceInstanceRequest,
    ) -> PlatformFuture<'a, ()> {
        let result = self.begin("update_service_instance", id).and_then(|_| {
            self.with(|s| -> PlatformResult<()> {
                let reads = s.instance_op_reads;
                let (instance, countdown) = s
                    .instances
                    .get_mut(id)
                    .ok_or_else(|| PlatformError::not_found(ObjectKind::ServiceInstance, id))?;
                instance.name = request.name.clone();
                instance.service_plan = request.service_plan.clone();
                instance.tags = request.tags.clone();
                instance.last_operation = Some(LastOperation {
                    kind: OperationKind::Update,
                    state: OperationState::InProgress,
                    description: None,
                });
                *countdown = reads;
                Ok(())
            })
        });
        ready(result)
    }

    fn delete_service_instance<'a>(&'a self, id: &'a str) -> PlatformFuture<'a, ()> {
        let result = self.begin("delete_service_instance", id).and_then(|_| {
            self.with(|s| -> PlatformResult<()> {
                let reads = s.instance_op_reads;
                let (instance, countdown) = s
                    .instances
                    .get_mut(id)
                    .ok_or_else(|| PlatformError::not_found(ObjectKind::ServiceInstance, id))?;
                instance.last_operation = Some(LastOperation {
                    kind: OperationKind::Delete,
                    state: OperationState::InProgress,
                    description: None,
                });
                *countdown = reads;
                Ok(())
            })
        });
        ready(result)
    }

    fn read_service_instance<'a>(&'a self, id: &'a str) -> PlatformFuture<'a, ServiceInstance> {
        let result = self.begin("read_service_instance", id).and_then(|_| {
            self.with(|s| -> PlatformResult<ServiceInstance> {
                let fail = s.fail_instance_ops;
                let (instance, countdown) = s
                    .instances
                    .get_mut(id)
                    .ok_or_else(|| PlatformError::not_found(ObjectKind::ServiceInstance, id))?;
                if *countdown > 0 {
                    *countdown -= 1;
                    return Ok(instance.clone());
                }
                let deleting = matches!(
                    instance.last_operation,
                    Some(LastOperation { kind: OperationKind::Delete, .. })
                );
                if let Some(op) = instance.last_operation.as_mut() {
                    op.state = if fail {
                        OperationState::Failed
                    } else {
                        OperationState::Succeeded
                    };
                }
                let snapshot = instance.clone();
                if deleting && !fail {
                    s.instances.remove(id);
                    return Err(PlatformError::not_found(ObjectKind::ServiceInstance, id));
                }
                Ok(snapshot)
            })
        });
        ready(result)
    }
}

impl ArtifactFetcher for FakePlatform {
    fn fetch(&self, source: &ArtifactSource) -> FetchFuture {
        let (error, delay) = self.with(|s| {
            s.calls.push("fetch".to_string());
            (s.fetch_error.clone(), s.fetch_delay)
        });
        let path = match source {
            ArtifactSource::Url(url) => PathBuf::from(url.trim_start_matches("file://")),
            _ => PathBuf::from("/tmp/checkout"),
        };
        Box::pin(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            match error {
                Some(e) => Err(e),
                None => Ok(path),
            }
        })
    }
}
