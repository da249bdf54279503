use std::time::Duration;

/// Fixed intervals used by the orchestrator.
///
/// Tests keep the defaults and run on a paused clock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timings {
    /// Poll interval while waiting for running-instance counts to converge.
    pub app_poll_interval: Duration,
    /// Pause after scaling the venerable application down, and the stop
    /// timeout used when restarting.
    pub stop_grace: Duration,
    /// Granularity of the shutdown-wait loop.
    pub shutdown_wait_cycle: Duration,
    /// Pause after re-uploading bits before checking the package state.
    pub package_settle: Duration,
    /// Poll interval for asynchronous service-instance operations.
    pub service_poll_interval: Duration,
    /// Pause before the first service-instance poll.
    pub service_poll_delay: Duration,
    /// Upper bound on a single service-instance operation.
    pub service_timeout: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            app_poll_interval: Duration::from_secs(5),
            stop_grace: Duration::from_secs(10),
            shutdown_wait_cycle: Duration::from_secs(10),
            package_settle: Duration::from_secs(5),
            service_poll_interval: Duration::from_secs(30),
            service_poll_delay: Duration::from_secs(5),
            service_timeout: Duration::from_secs(15 * 60),
        }
    }
}
