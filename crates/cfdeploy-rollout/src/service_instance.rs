//! Managed service instances.
//!
//! Every mutation is admitted through the [`ConcurrencyLimiter`], keyed by
//! service plan, and then observed to completion with a [`StateWait`] on the
//! instance's last operation. The permit covers only the mutating call.

use std::sync::Arc;

use tracing::{debug, info};

use cfdeploy_core::ServiceInstanceConfig;

use crate::error::{DeployError, DeployResult};
use crate::limiter::ConcurrencyLimiter;
use crate::platform::{
    OperationKind, OperationState, ServiceInstance, ServiceInstanceRequest, ServiceManager,
};
use crate::poller::StateWait;
use crate::timings::Timings;

const IN_PROGRESS: &str = "in progress";
const SUCCEEDED: &str = "succeeded";

pub struct ServiceInstances {
    services: Arc<dyn ServiceManager>,
    limiter: ConcurrencyLimiter,
    timings: Timings,
}

impl ServiceInstances {
    pub fn new(
        services: Arc<dyn ServiceManager>,
        limiter: ConcurrencyLimiter,
        timings: Timings,
    ) -> Self {
        Self {
            services,
            limiter,
            timings,
        }
    }

    pub async fn create(&self, config: &ServiceInstanceConfig) -> DeployResult<ServiceInstance> {
        let request = request(config)?;
        let id = self
            .limiter
            .run(
                &config.service_plan,
                config.service_plan_concurrency,
                self.services.create_service_instance(&request),
            )
            .await?;
        info!(service_instance = %id, name = %config.name, "service instance creation accepted");

        self.await_operation(&id, OperationKind::Create)
            .await?
            .ok_or_else(|| DeployError::OperationFailed {
                operation: format!("create service instance {id}"),
                reason: "instance disappeared".to_string(),
            })
    }

    pub async fn update(
        &self,
        id: &str,
        config: &ServiceInstanceConfig,
    ) -> DeployResult<ServiceInstance> {
        let request = request(config)?;
        self.limiter
            .run(
                &config.service_plan,
                config.service_plan_concurrency,
                self.services.update_service_instance(id, &request),
            )
            .await?;
        info!(service_instance = %id, "service instance update accepted");

        self.await_operation(id, OperationKind::Update)
            .await?
            .ok_or_else(|| DeployError::OperationFailed {
                operation: format!("update service instance {id}"),
                reason: "instance disappeared".to_string(),
            })
    }

    /// Delete an instance. An instance that is already gone, or disappears
    /// while the deletion is polled, counts as deleted.
    pub async fn delete(&self, id: &str, config: &ServiceInstanceConfig) -> DeployResult<()> {
        let accepted = self
            .limiter
            .run(
                &config.service_plan,
                config.service_plan_concurrency,
                self.services.delete_service_instance(id),
            )
            .await;
        match accepted {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                debug!(service_instance = %id, "service instance already deleted");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }

        self.await_operation(id, OperationKind::Delete).await?;
        info!(service_instance = %id, "service instance deleted");
        Ok(())
    }

    /// Current state of an instance, or `None` if it does not exist.
    pub async fn read(&self, id: &str) -> DeployResult<Option<ServiceInstance>> {
        match self.services.read_service_instance(id).await {
            Ok(instance) => Ok(Some(instance)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn await_operation(
        &self,
        id: &str,
        kind: OperationKind,
    ) -> DeployResult<Option<ServiceInstance>> {
        let operation = format!("{kind} service instance {id}");
        let services = &*self.services;
        let op = operation.as_str();

        StateWait::new(operation.clone())
            .pending(&[IN_PROGRESS])
            .target(&[SUCCEEDED])
            .timeout(self.timings.service_timeout)
            .poll_interval(self.timings.service_poll_interval)
            .delay(self.timings.service_poll_delay)
            .wait(|| async move {
                let instance = match services.read_service_instance(id).await {
                    Ok(instance) => instance,
                    Err(e) if e.is_not_found() && kind == OperationKind::Delete => {
                        return Ok((None, SUCCEEDED.to_string()));
                    }
                    Err(e) => return Err(DeployError::from(e)),
                };
                let label = match &instance.last_operation {
                    None => SUCCEEDED,
                    Some(last) => match last.state {
                        OperationState::InProgress => IN_PROGRESS,
                        OperationState::Succeeded => SUCCEEDED,
                        OperationState::Failed => {
                            return Err(DeployError::OperationFailed {
                                operation: op.to_string(),
                                reason: last
                                    .description
                                    .clone()
                                    .unwrap_or_else(|| "broker reported failure".to_string()),
                            });
                        }
                    },
                };
                Ok((Some(instance), label.to_string()))
            })
            .await
    }
}

fn request(config: &ServiceInstanceConfig) -> DeployResult<ServiceInstanceRequest> {
    config
        .validate()
        .map_err(|e| DeployError::Validation(e.to_string()))?;
    let params = config
        .params()
        .map_err(|e| DeployError::Validation(e.to_string()))?;
    Ok(ServiceInstanceRequest {
        name: config.name.clone(),
        service_plan: config.service_plan.clone(),
        space: config.space.clone(),
        params,
        tags: config.tags.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakePlatform;
    use std::time::Duration;
    use tokio::time::Instant;

    fn config() -> ServiceInstanceConfig {
        ServiceInstanceConfig {
            name: "db".to_string(),
            service_plan: "plan-small".to_string(),
            space: "space-1".to_string(),
            json_params: Some(r#"{"size": "s"}"#.to_string()),
            json_params_sensitive: None,
            tags: vec!["sql".to_string()],
            service_plan_concurrency: Some(1),
        }
    }

    fn instances(platform: &Arc<FakePlatform>) -> ServiceInstances {
        let services: Arc<dyn ServiceManager> = platform.clone();
        ServiceInstances::new(services, ConcurrencyLimiter::new(), Timings::default())
    }

    #[tokio::test(start_paused = true)]
    async fn create_waits_for_operation_to_succeed() {
        let platform = FakePlatform::new();
        platform.with(|s| s.instance_op_reads = 2);
        let started = Instant::now();

        let instance = instances(&platform).create(&config()).await.unwrap();

        assert_eq!(instance.name, "db");
        assert_eq!(
            instance.last_operation.map(|op| op.state),
            Some(OperationState::Succeeded)
        );
        assert_eq!(platform.count_calls("read_service_instance"), 3);
        // Initial delay plus two poll intervals.
        assert!(started.elapsed() >= Duration::from_secs(65));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_operation_is_terminal() {
        let platform = FakePlatform::new();
        platform.with(|s| s.fail_instance_ops = true);

        let err = instances(&platform).create(&config()).await.unwrap_err();
        assert!(matches!(err, DeployError::OperationFailed { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn delete_treats_disappearance_as_success() {
        let platform = FakePlatform::new();
        let service = instances(&platform);
        let created = service.create(&config()).await.unwrap();

        platform.with(|s| s.instance_op_reads = 1);
        service.delete(&created.id, &config()).await.unwrap();
        assert!(service.read(&created.id).await.unwrap().is_none());

        // Deleting again is a no-op.
        service.delete(&created.id, &config()).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_operation_times_out() {
        let platform = FakePlatform::new();
        platform.with(|s| s.instance_op_reads = u32::MAX);

        let err = instances(&platform).create(&config()).await.unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn invalid_params_fail_before_any_call() {
        let platform = FakePlatform::new();
        let mut cfg = config();
        cfg.json_params_sensitive = Some(r#"{"size": "m"}"#.to_string());

        let err = instances(&platform).create(&cfg).await.unwrap_err();
        assert!(err.is_validation());
        assert!(platform.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn permit_is_released_before_polling() {
        let platform = FakePlatform::new();
        platform.with(|s| s.instance_op_reads = 3);
        let service = instances(&platform);
        let started = Instant::now();

        let first = config();
        let mut second = config();
        second.name = "db-2".to_string();
        let (a, b) = tokio::join!(service.create(&first), service.create(&second));
        a.unwrap();
        b.unwrap();

        // One operation takes 5s + 3 * 30s; holding the ceiling-1 permit
        // across polling would have doubled the total.
        assert_eq!(platform.count_calls("create_service_instance"), 2);
        assert!(started.elapsed() < Duration::from_secs(190));
    }
}
