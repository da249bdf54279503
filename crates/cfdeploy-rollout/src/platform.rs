//! Collaborator capabilities the orchestrator drives.
//!
//! The platform API client lives outside this crate. The orchestrator only
//! sees these traits, which are object-safe (boxed futures) so callers can
//! inject a real client or an in-memory fake.

use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use cfdeploy_core::{AppSpec, AppUpdate, Application, ContentEntry, MappingId, RouteMapping, ServiceBinding};

/// Class of remote object, carried in errors for remediation context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Application,
    RouteMapping,
    Route,
    ServiceBinding,
    ServiceInstance,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ObjectKind::Application => "application",
            ObjectKind::RouteMapping => "route mapping",
            ObjectKind::Route => "route",
            ObjectKind::ServiceBinding => "service binding",
            ObjectKind::ServiceInstance => "service instance",
        };
        f.write_str(name)
    }
}

/// Typed failure of a single collaborator call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlatformError {
    #[error("{kind} {id} not found")]
    NotFound { kind: ObjectKind, id: String },

    #[error("{kind} {id} already exists")]
    Conflict { kind: ObjectKind, id: String },

    #[error("{kind} {id}: {message}")]
    Transport {
        kind: ObjectKind,
        id: String,
        message: String,
    },
}

impl PlatformError {
    pub fn not_found(kind: ObjectKind, id: impl Into<String>) -> Self {
        PlatformError::NotFound { kind, id: id.into() }
    }

    pub fn conflict(kind: ObjectKind, id: impl Into<String>) -> Self {
        PlatformError::Conflict { kind, id: id.into() }
    }

    pub fn transport(kind: ObjectKind, id: impl Into<String>, message: impl Into<String>) -> Self {
        PlatformError::Transport {
            kind,
            id: id.into(),
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, PlatformError::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, PlatformError::Conflict { .. })
    }
}

pub type PlatformResult<T> = Result<T, PlatformError>;

/// Boxed future returned by every collaborator call.
pub type PlatformFuture<'a, T> = Pin<Box<dyn Future<Output = PlatformResult<T>> + Send + 'a>>;

/// Application lifecycle operations.
pub trait AppManager: Send + Sync {
    fn create_app<'a>(&'a self, spec: &'a AppSpec) -> PlatformFuture<'a, Application>;

    fn read_app<'a>(&'a self, id: &'a str) -> PlatformFuture<'a, Application>;

    fn update_app<'a>(&'a self, update: &'a AppUpdate) -> PlatformFuture<'a, Application>;

    /// Delete an application. `recursive` also removes its bindings and mappings.
    fn delete_app<'a>(&'a self, id: &'a str, recursive: bool) -> PlatformFuture<'a, ()>;

    fn upload_app<'a>(
        &'a self,
        id: &'a str,
        artifact: &'a std::path::Path,
        add_content: &'a [ContentEntry],
    ) -> PlatformFuture<'a, ()>;

    /// Start and wait up to `timeout` for the application to run.
    fn start_app<'a>(&'a self, id: &'a str, timeout: Duration) -> PlatformFuture<'a, ()>;

    fn stop_app<'a>(&'a self, id: &'a str, timeout: Duration) -> PlatformFuture<'a, ()>;

    fn restage_app<'a>(&'a self, id: &'a str, timeout: Duration) -> PlatformFuture<'a, ()>;

    fn wait_for_app_to_start<'a>(&'a self, id: &'a str, timeout: Duration)
    -> PlatformFuture<'a, ()>;

    fn count_running_instances<'a>(&'a self, id: &'a str) -> PlatformFuture<'a, u32>;

    /// Bind a service instance. Returns the binding with its identity and
    /// raw credentials.
    fn create_service_binding<'a>(
        &'a self,
        app: &'a str,
        binding: &'a ServiceBinding,
    ) -> PlatformFuture<'a, CreatedBinding>;

    fn delete_service_binding<'a>(&'a self, binding_id: &'a str) -> PlatformFuture<'a, ()>;

    fn read_service_bindings_by_app<'a>(
        &'a self,
        app: &'a str,
    ) -> PlatformFuture<'a, Vec<CreatedBinding>>;
}

/// A service binding as returned by the platform.
#[derive(Debug, Clone, PartialEq)]
pub struct CreatedBinding {
    pub binding_id: String,
    pub service_instance: String,
    pub credentials: serde_json::Map<String, serde_json::Value>,
}

/// Route mapping operations.
pub trait RouteManager: Send + Sync {
    /// Map `route` to `app`. Returns the new mapping identity.
    fn create_route_mapping<'a>(
        &'a self,
        route: &'a str,
        app: &'a str,
        port: Option<u16>,
    ) -> PlatformFuture<'a, MappingId>;

    fn read_route_mapping<'a>(&'a self, mapping_id: &'a str) -> PlatformFuture<'a, RouteMapping>;

    fn read_route_mappings_by_app<'a>(&'a self, app: &'a str)
    -> PlatformFuture<'a, Vec<RouteMapping>>;

    fn read_route_mappings_by_route<'a>(
        &'a self,
        route: &'a str,
    ) -> PlatformFuture<'a, Vec<RouteMapping>>;

    fn delete_route_mapping<'a>(&'a self, mapping_id: &'a str) -> PlatformFuture<'a, ()>;
}

/// Kind of an asynchronous service-instance operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OperationKind::Create => "create",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
        })
    }
}

/// Progress of the last asynchronous operation on a service instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationState {
    InProgress,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastOperation {
    pub kind: OperationKind,
    pub state: OperationState,
    #[serde(default)]
    pub description: Option<String>,
}

/// A service instance as observed on the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInstance {
    pub id: String,
    pub name: String,
    pub service_plan: String,
    pub space: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub last_operation: Option<LastOperation>,
}

/// Request body for creating or updating a service instance.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceInstanceRequest {
    pub name: String,
    pub service_plan: String,
    pub space: String,
    pub params: serde_json::Map<String, serde_json::Value>,
    pub tags: Vec<String>,
}

/// Service instance operations. Mutations return once the platform has
/// accepted the request; completion is observed via `last_operation`.
pub trait ServiceManager: Send + Sync {
    fn create_service_instance<'a>(
        &'a self,
        request: &'a ServiceInstanceRequest,
    ) -> PlatformFuture<'a, String>;

    fn update_service_instance<'a>(
        &'a self,
        id: &'a str,
        request: &'a ServiceInstanceRequest,
    ) -> PlatformFuture<'a, ()>;

    fn delete_service_instance<'a>(&'a self, id: &'a str) -> PlatformFuture<'a, ()>;

    fn read_service_instance<'a>(&'a self, id: &'a str) -> PlatformFuture<'a, ServiceInstance>;
}

/// Boxed future of an artifact retrieval. `'static` so it can be spawned.
pub type FetchFuture = Pin<Box<dyn Future<Output = Result<PathBuf, String>> + Send + 'static>>;

/// Retrieves application binaries or sources to a local path.
pub trait ArtifactFetcher: Send + Sync {
    fn fetch(&self, source: &cfdeploy_core::ArtifactSource) -> FetchFuture;
}
