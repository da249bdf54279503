//! Deployment config parser.
//!
//! A config file carries one `[app]` table and any number of
//! `[[service_instance]]` tables. Decoding produces typed structs; the
//! rollout engine never looks at untyped maps.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};
use crate::types::{AppSpec, ArtifactSource, ContentEntry, HealthCheck, RouteBinding, ServiceBinding};

/// Default seconds allowed for start/stop/restage and each convergence poll.
pub const DEFAULT_APP_TIMEOUT_SECS: u64 = 60;

/// Upper bound for `blue_green.shutdown_wait`, in minutes.
pub const MAX_SHUTDOWN_WAIT_MINUTES: u64 = 15;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployConfig {
    pub app: AppConfig,
    #[serde(default, rename = "service_instance")]
    pub service_instances: Vec<ServiceInstanceConfig>,
}

/// Desired state of a single application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    pub name: String,
    pub space: String,
    #[serde(default = "default_instances")]
    pub instances: u32,
    pub memory: Option<u32>,
    pub disk_quota: Option<u32>,
    pub stack: Option<String>,
    pub buildpack: Option<String>,
    pub command: Option<String>,
    pub enable_ssh: Option<bool>,
    #[serde(default)]
    pub ports: BTreeSet<u16>,
    #[serde(default)]
    pub health_check: HealthCheck,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    /// Seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default)]
    pub stopped: bool,
    pub source: Option<ArtifactSource>,
    #[serde(default)]
    pub add_content: Vec<ContentEntry>,
    #[serde(default)]
    pub service_bindings: Vec<ServiceBindingConfig>,
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
    #[serde(default)]
    pub blue_green: BlueGreenConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceBindingConfig {
    pub service_instance: String,
    #[serde(default)]
    pub params: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteConfig {
    pub route: String,
    pub port: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct BlueGreenConfig {
    #[serde(default)]
    pub enable: bool,
    /// Minutes to keep the venerable application alive after cut-over.
    #[serde(default)]
    pub shutdown_wait: u64,
    #[serde(default)]
    pub forget_venerable: bool,
}

impl BlueGreenConfig {
    pub fn shutdown_wait(&self) -> Duration {
        Duration::from_secs(self.shutdown_wait * 60)
    }

    /// Scale-down of the venerable application is skipped when it either
    /// has to outlive the cut-over or is not ours to clean up.
    pub fn suppress_scale_down(&self) -> bool {
        self.shutdown_wait > 0 || self.forget_venerable
    }
}

fn default_instances() -> u32 {
    1
}

fn default_timeout() -> u64 {
    DEFAULT_APP_TIMEOUT_SECS
}

impl DeployConfig {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        let config: DeployConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        self.app.validate()?;
        for instance in &self.service_instances {
            instance.validate()?;
        }
        Ok(())
    }
}

impl AppConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::invalid("name", "must not be empty"));
        }
        if self.space.trim().is_empty() {
            return Err(ConfigError::invalid("space", "must not be empty"));
        }
        if self.timeout == 0 {
            return Err(ConfigError::invalid("timeout", "must be at least 1 second"));
        }
        if self.ports.contains(&0) {
            return Err(ConfigError::invalid("ports", "port 0 is not a valid port"));
        }

        let mut seen = HashSet::new();
        for route in &self.routes {
            if route.route.trim().is_empty() {
                return Err(ConfigError::invalid("routes.route", "must not be empty"));
            }
            if route.port == Some(0) {
                return Err(ConfigError::invalid(
                    "routes.port",
                    "must be between 1 and 65535",
                ));
            }
            if !seen.insert(route.route.as_str()) {
                return Err(ConfigError::invalid(
                    "routes",
                    format!("route {} is listed more than once", route.route),
                ));
            }
        }

        if self.blue_green.enable && self.instances == 0 {
            return Err(ConfigError::invalid(
                "instances",
                "must be at least 1 when blue_green is enabled",
            ));
        }

        if self.blue_green.shutdown_wait > MAX_SHUTDOWN_WAIT_MINUTES {
            return Err(ConfigError::invalid(
                "blue_green.shutdown_wait",
                format!("must be between 0 and {MAX_SHUTDOWN_WAIT_MINUTES} minutes"),
            ));
        }

        if let Some(ArtifactSource::Git { branch: Some(_), tag: Some(_), .. }) = &self.source {
            return Err(ConfigError::invalid(
                "source.git",
                "branch and tag are mutually exclusive",
            ));
        }

        for binding in &self.service_bindings {
            if binding.service_instance.trim().is_empty() {
                return Err(ConfigError::invalid(
                    "service_bindings.service_instance",
                    "must not be empty",
                ));
            }
        }

        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    /// Attributes for creating an application from this config.
    pub fn to_spec(&self) -> AppSpec {
        AppSpec {
            name: self.name.clone(),
            space: self.space.clone(),
            instances: self.instances,
            memory: self.memory,
            disk_quota: self.disk_quota,
            stack: self.stack.clone(),
            buildpack: self.buildpack.clone(),
            command: self.command.clone(),
            enable_ssh: self.enable_ssh,
            health_check: self.health_check.clone(),
            environment: self.environment.clone(),
            ports: self.ports.clone(),
        }
    }

    /// Desired live routes, without platform-assigned identities.
    pub fn desired_routes(&self) -> Vec<RouteBinding> {
        self.routes
            .iter()
            .map(|r| RouteBinding {
                route: r.route.clone(),
                port: r.port,
                mapping_id: None,
            })
            .collect()
    }

    /// Desired service bindings, without platform-assigned identities.
    pub fn desired_bindings(&self) -> Vec<ServiceBinding> {
        self.service_bindings
            .iter()
            .map(|b| ServiceBinding {
                service_instance: b.service_instance.clone(),
                params: b.params.clone(),
                binding_id: None,
                credentials: BTreeMap::new(),
            })
            .collect()
    }
}

/// Desired state of a managed service instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInstanceConfig {
    pub name: String,
    pub service_plan: String,
    pub space: String,
    #[serde(default)]
    pub json_params: Option<String>,
    #[serde(default)]
    pub json_params_sensitive: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Ceiling on concurrent mutations of instances sharing `service_plan`.
    #[serde(default)]
    pub service_plan_concurrency: Option<u32>,
}

impl ServiceInstanceConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::invalid("service_instance.name", "must not be empty"));
        }
        if self.service_plan.trim().is_empty() {
            return Err(ConfigError::invalid(
                "service_instance.service_plan",
                "must not be empty",
            ));
        }
        let public = parse_json_object("json_params", self.json_params.as_deref())?;
        let sensitive =
            parse_json_object("json_params_sensitive", self.json_params_sensitive.as_deref())?;
        if let Some(key) = public.keys().find(|k| sensitive.contains_key(*k)) {
            return Err(ConfigError::invalid(
                "json_params",
                format!("json_params and json_params_sensitive both set top level key {key}"),
            ));
        }
        Ok(())
    }

    /// Merged request parameters (sensitive values win on conflict).
    pub fn params(&self) -> ConfigResult<serde_json::Map<String, serde_json::Value>> {
        let mut params = parse_json_object("json_params", self.json_params.as_deref())?;
        let sensitive =
            parse_json_object("json_params_sensitive", self.json_params_sensitive.as_deref())?;
        params.extend(sensitive);
        Ok(params)
    }
}

fn parse_json_object(
    field: &str,
    raw: Option<&str>,
) -> ConfigResult<serde_json::Map<String, serde_json::Value>> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(serde_json::Map::new()),
        Some(raw) => match serde_json::from_str::<serde_json::Value>(raw) {
            Ok(serde_json::Value::Object(map)) => Ok(map),
            Ok(_) => Err(ConfigError::invalid(field, "must be a JSON object")),
            Err(e) => Err(ConfigError::invalid(field, e.to_string())),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
[app]
name = "api"
space = "space-1"
instances = 3
memory = 512
command = "bin/server"
timeout = 120

[app.source]
url = "https://example.com/api.zip"

[app.environment]
LOG_LEVEL = "info"

[[app.routes]]
route = "route-1"

[[app.routes]]
route = "route-2"
port = 8080

[[app.service_bindings]]
service_instance = "db"

[app.blue_green]
enable = true
shutdown_wait = 2

[[service_instance]]
name = "db"
service_plan = "plan-small"
space = "space-1"
json_params = '{"size": "s"}'
service_plan_concurrency = 2
"#;

    fn minimal_app() -> AppConfig {
        let cfg = DeployConfig::from_toml_str(
            r#"
[app]
name = "api"
space = "space-1"
"#,
        )
        .unwrap();
        cfg.app
    }

    #[test]
    fn parse_minimal_uses_defaults() {
        let app = minimal_app();
        assert_eq!(app.instances, 1);
        assert_eq!(app.timeout, DEFAULT_APP_TIMEOUT_SECS);
        assert!(!app.stopped);
        assert!(!app.blue_green.enable);
        assert!(app.routes.is_empty());
    }

    #[test]
    fn parse_full_config() {
        let cfg = DeployConfig::from_toml_str(FULL).unwrap();
        assert_eq!(cfg.app.instances, 3);
        assert_eq!(
            cfg.app.source,
            Some(ArtifactSource::Url("https://example.com/api.zip".to_string()))
        );
        assert_eq!(cfg.app.routes.len(), 2);
        assert_eq!(cfg.app.routes[1].port, Some(8080));
        assert_eq!(cfg.app.blue_green.shutdown_wait(), Duration::from_secs(120));
        assert!(cfg.app.blue_green.suppress_scale_down());
        assert_eq!(cfg.service_instances[0].service_plan_concurrency, Some(2));
    }

    #[test]
    fn rejects_shutdown_wait_out_of_range() {
        let mut app = minimal_app();
        app.blue_green.shutdown_wait = 16;
        assert!(matches!(app.validate(), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn blue_green_requires_an_instance() {
        let mut app = minimal_app();
        app.instances = 0;
        app.validate().unwrap();

        app.blue_green.enable = true;
        assert!(matches!(
            app.validate(),
            Err(ConfigError::Invalid { ref field, .. }) if field == "instances"
        ));
    }

    #[test]
    fn rejects_duplicate_routes() {
        let mut app = minimal_app();
        app.routes = vec![
            RouteConfig { route: "r1".to_string(), port: None },
            RouteConfig { route: "r1".to_string(), port: Some(80) },
        ];
        assert!(app.validate().is_err());
    }

    #[test]
    fn rejects_git_branch_and_tag() {
        let mut app = minimal_app();
        app.source = Some(ArtifactSource::Git {
            url: "https://git.example.com/api.git".to_string(),
            branch: Some("main".to_string()),
            tag: Some("v1".to_string()),
            user: None,
            password: None,
            key: None,
        });
        assert!(app.validate().is_err());
    }

    #[test]
    fn service_instance_rejects_overlapping_params() {
        let cfg = ServiceInstanceConfig {
            name: "db".to_string(),
            service_plan: "plan".to_string(),
            space: "space-1".to_string(),
            json_params: Some(r#"{"a": 1, "b": 2}"#.to_string()),
            json_params_sensitive: Some(r#"{"b": 3}"#.to_string()),
            tags: vec![],
            service_plan_concurrency: None,
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn service_instance_merges_params() {
        let cfg = ServiceInstanceConfig {
            name: "db".to_string(),
            service_plan: "plan".to_string(),
            space: "space-1".to_string(),
            json_params: Some(r#"{"a": 1}"#.to_string()),
            json_params_sensitive: Some(r#"{"secret": "s"}"#.to_string()),
            tags: vec![],
            service_plan_concurrency: None,
        };
        cfg.validate().unwrap();
        let params = cfg.params().unwrap();
        assert_eq!(params.len(), 2);
        assert_eq!(params["secret"], "s");
    }

    #[test]
    fn desired_routes_have_no_mapping_ids() {
        let cfg = DeployConfig::from_toml_str(FULL).unwrap();
        let routes = cfg.app.desired_routes();
        assert!(routes.iter().all(|r| r.mapping_id.is_none()));
        assert_eq!(routes[0].route, "route-1");
    }
}
