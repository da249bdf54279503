//! cfdeploy-core: domain types and typed deployment config.

pub mod config;
pub mod error;
pub mod types;

pub use config::{
    AppConfig, BlueGreenConfig, DeployConfig, RouteConfig, ServiceBindingConfig,
    ServiceInstanceConfig,
};
pub use error::{ConfigError, ConfigResult};
pub use types::*;
