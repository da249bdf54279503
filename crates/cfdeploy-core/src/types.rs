//! Shared types used across cfdeploy crates.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Platform-assigned identity of an application.
pub type AppId = String;

/// Platform-assigned identity of a route.
pub type RouteId = String;

/// Platform-assigned identity of a route-to-application mapping.
pub type MappingId = String;

/// Platform-assigned identity of a service instance.
pub type ServiceInstanceId = String;

// ── Application ───────────────────────────────────────────────────

/// Run state of an application as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppState {
    Started,
    #[default]
    Stopped,
}

/// Package (staging) state of an application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PackageState {
    /// The platform has flagged the package for staging but not staged it yet.
    Pending,
    Staged,
    Failed,
    #[default]
    Unknown,
}

/// Health check kind understood by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthCheckType {
    Port,
    Process,
    Http,
    None,
}

/// Health check configuration of an application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct HealthCheck {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<HealthCheckType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_endpoint: Option<String>,
    /// Seconds the platform waits for the check to pass.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u32>,
}

/// An application as observed on the platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Application {
    pub id: AppId,
    pub name: String,
    pub space: String,
    pub instances: u32,
    pub memory: Option<u32>,
    pub disk_quota: Option<u32>,
    pub stack: Option<String>,
    pub buildpack: Option<String>,
    pub command: Option<String>,
    pub enable_ssh: Option<bool>,
    #[serde(default)]
    pub health_check: HealthCheck,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    #[serde(default)]
    pub ports: BTreeSet<u16>,
    pub state: AppState,
    pub package_state: PackageState,
}

impl Application {
    pub fn is_started(&self) -> bool {
        self.state == AppState::Started
    }
}

/// Attributes used to create an application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppSpec {
    pub name: String,
    pub space: String,
    pub instances: u32,
    pub memory: Option<u32>,
    pub disk_quota: Option<u32>,
    pub stack: Option<String>,
    pub buildpack: Option<String>,
    pub command: Option<String>,
    pub enable_ssh: Option<bool>,
    pub health_check: HealthCheck,
    pub environment: BTreeMap<String, String>,
    pub ports: BTreeSet<u16>,
}

/// Partial update of an existing application. `None` fields are left as-is.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AppUpdate {
    pub id: AppId,
    pub name: Option<String>,
    pub space: Option<String>,
    pub instances: Option<u32>,
    pub memory: Option<u32>,
    pub disk_quota: Option<u32>,
    pub stack: Option<String>,
    pub buildpack: Option<String>,
    pub command: Option<String>,
    pub enable_ssh: Option<bool>,
    pub health_check: Option<HealthCheck>,
    pub environment: Option<BTreeMap<String, String>>,
    pub ports: Option<BTreeSet<u16>>,
}

impl AppUpdate {
    /// An update that only renames the application.
    pub fn rename(id: &str, name: impl Into<String>) -> Self {
        Self {
            id: id.to_string(),
            name: Some(name.into()),
            ..Default::default()
        }
    }

    /// An update that only changes the instance count.
    pub fn scale(id: &str, instances: u32) -> Self {
        Self {
            id: id.to_string(),
            instances: Some(instances),
            ..Default::default()
        }
    }

    /// A full update carrying every attribute of `spec`.
    pub fn from_spec(id: &str, spec: &AppSpec) -> Self {
        Self {
            id: id.to_string(),
            name: Some(spec.name.clone()),
            space: Some(spec.space.clone()),
            instances: Some(spec.instances),
            memory: spec.memory,
            disk_quota: spec.disk_quota,
            stack: spec.stack.clone(),
            buildpack: spec.buildpack.clone(),
            command: spec.command.clone(),
            enable_ssh: spec.enable_ssh,
            health_check: Some(spec.health_check.clone()),
            environment: Some(spec.environment.clone()),
            ports: (!spec.ports.is_empty()).then(|| spec.ports.clone()),
        }
    }
}

// ── Routes ────────────────────────────────────────────────────────

/// A route-to-application mapping as reported by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteMapping {
    pub mapping_id: MappingId,
    pub route: RouteId,
    pub app: AppId,
    pub port: Option<u16>,
}

/// A desired or recorded live route of an application.
///
/// `mapping_id` and `port` are filled in once the mapping exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteBinding {
    pub route: RouteId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mapping_id: Option<MappingId>,
}

impl RouteBinding {
    pub fn new(route: impl Into<String>) -> Self {
        Self {
            route: route.into(),
            port: None,
            mapping_id: None,
        }
    }

    pub fn from_mapping(mapping: &RouteMapping) -> Self {
        Self {
            route: mapping.route.clone(),
            port: mapping.port,
            mapping_id: Some(mapping.mapping_id.clone()),
        }
    }
}

// ── Service bindings ──────────────────────────────────────────────

/// A binding between an application and a service instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceBinding {
    pub service_instance: ServiceInstanceId,
    #[serde(default)]
    pub params: BTreeMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binding_id: Option<String>,
    /// Flattened credentials returned by the platform (read-only output).
    #[serde(default)]
    pub credentials: BTreeMap<String, String>,
}

impl ServiceBinding {
    pub fn new(service_instance: impl Into<String>) -> Self {
        Self {
            service_instance: service_instance.into(),
            params: BTreeMap::new(),
            binding_id: None,
            credentials: BTreeMap::new(),
        }
    }

    /// Structural equality of the requested binding, ignoring platform outputs.
    pub fn same_request(&self, other: &ServiceBinding) -> bool {
        self.service_instance == other.service_instance && self.params == other.params
    }
}

/// Flatten a nested credentials object into `parent_child` keyed strings.
///
/// Scalars are rendered without quotes; arrays are indexed by position.
pub fn normalize_credentials(
    credentials: &serde_json::Map<String, serde_json::Value>,
) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for (key, value) in credentials {
        flatten_into(&mut out, key, value);
    }
    out
}

fn flatten_into(out: &mut BTreeMap<String, String>, prefix: &str, value: &serde_json::Value) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, nested) in map {
                flatten_into(out, &format!("{prefix}_{key}"), nested);
            }
        }
        serde_json::Value::Array(items) => {
            for (index, nested) in items.iter().enumerate() {
                flatten_into(out, &format!("{prefix}_{index}"), nested);
            }
        }
        serde_json::Value::String(s) => {
            out.insert(prefix.to_string(), s.clone());
        }
        serde_json::Value::Null => {
            out.insert(prefix.to_string(), String::new());
        }
        other => {
            out.insert(prefix.to_string(), other.to_string());
        }
    }
}

// ── Artifacts ─────────────────────────────────────────────────────

/// Where the application binary or source comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactSource {
    /// An HTTP(S) or `file://` URL.
    Url(String),
    Git {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        branch: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tag: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        password: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        key: Option<String>,
    },
    GithubRelease {
        owner: String,
        repo: String,
        version: String,
        filename: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token: Option<String>,
    },
}

/// Extra file copied into the uploaded artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentEntry {
    pub source: String,
    pub destination: String,
}
