//! cfdeploy rollout engine: classifies configuration changes and applies
//! them to a platform application, including blue-green rollovers.
//!
//! # Components
//!
//! - **`platform`**: collaborator traits the engine drives (apps, routes, services, artifacts)
//! - **`poller`**: parameterized wait for remote convergence
//! - **`limiter`**: keyed concurrency ceiling for mutating calls
//! - **`routes`**: route mapping diff and application
//! - **`bindings`**: service binding diff and application
//! - **`deposed`**: registry upkeep for superseded applications
//! - **`classify`**: pure change classification
//! - **`orchestrator`**: create/read/update/delete and the rollover state machine
//! - **`service_instance`**: service instances with throttled, polled operations

pub mod bindings;
pub mod classify;
pub mod deposed;
pub mod error;
pub mod limiter;
pub mod orchestrator;
pub mod platform;
pub mod poller;
pub mod routes;
pub mod service_instance;
pub mod timings;

#[cfg(test)]
pub(crate) mod testing;

pub use classify::{Action, ChangeSet, classify};
pub use error::{DeployError, DeployResult};
pub use limiter::{ConcurrencyLimiter, ConcurrencyToken};
pub use orchestrator::{Orchestrator, Plan, RolloverStep};
pub use platform::{
    AppManager, ArtifactFetcher, ObjectKind, PlatformError, PlatformResult, RouteManager,
    ServiceManager,
};
pub use poller::StateWait;
pub use routes::{RoutePlan, RouteReconciler, reconcile};
pub use service_instance::ServiceInstances;
pub use timings::Timings;
