//! Service binding reconciliation.
//!
//! Bindings are compared by request (instance + params), never by the
//! platform-assigned identity, so a recorded binding matches its desired
//! counterpart even though only the former carries an ID and credentials.

use tracing::{debug, info};

use cfdeploy_core::{ServiceBinding, normalize_credentials};

use crate::error::DeployResult;
use crate::platform::{AppManager, CreatedBinding};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BindingPlan {
    pub to_remove: Vec<ServiceBinding>,
    pub to_add: Vec<ServiceBinding>,
}

impl BindingPlan {
    pub fn is_empty(&self) -> bool {
        self.to_remove.is_empty() && self.to_add.is_empty()
    }
}

/// Structural diff of two binding lists.
pub fn diff_bindings(current: &[ServiceBinding], desired: &[ServiceBinding]) -> BindingPlan {
    let to_remove = current
        .iter()
        .filter(|c| !desired.iter().any(|d| d.same_request(c)))
        .cloned()
        .collect();
    let to_add = desired
        .iter()
        .filter(|d| !current.iter().any(|c| c.same_request(d)))
        .cloned()
        .collect();
    BindingPlan { to_remove, to_add }
}

pub struct BindingManager<'a> {
    apps: &'a dyn AppManager,
}

impl<'a> BindingManager<'a> {
    pub fn new(apps: &'a dyn AppManager) -> Self {
        Self { apps }
    }

    /// Bind each of `bindings` to `app`, appending the created binding (with
    /// identity and flattened credentials) to `applied` as it commits.
    pub async fn add(
        &self,
        app: &str,
        bindings: &[ServiceBinding],
        applied: &mut Vec<ServiceBinding>,
    ) -> DeployResult<()> {
        for binding in bindings {
            let created = self.apps.create_service_binding(app, binding).await?;
            info!(%app, service_instance = %binding.service_instance, binding_id = %created.binding_id, "service bound");
            applied.push(merge(binding, created));
        }
        Ok(())
    }

    /// Remove each of `bindings`, dropping it from `current` once gone.
    pub async fn remove(
        &self,
        bindings: &[ServiceBinding],
        current: &mut Vec<ServiceBinding>,
    ) -> DeployResult<()> {
        for binding in bindings {
            if let Some(binding_id) = binding.binding_id.as_deref() {
                match self.apps.delete_service_binding(binding_id).await {
                    Ok(()) => info!(%binding_id, service_instance = %binding.service_instance, "service unbound"),
                    Err(e) if e.is_not_found() => debug!(%binding_id, "service binding already absent"),
                    Err(e) => return Err(e.into()),
                }
            }
            current.retain(|c| !c.same_request(binding));
        }
        Ok(())
    }

    /// Apply `plan`: removals first, then additions.
    pub async fn apply(
        &self,
        app: &str,
        plan: &BindingPlan,
        current: &mut Vec<ServiceBinding>,
    ) -> DeployResult<()> {
        self.remove(&plan.to_remove, current).await?;
        self.add(app, &plan.to_add, current).await
    }

    /// Bindings of `app` as the platform reports them, keeping the request
    /// params from `recorded` where the instance matches.
    pub async fn live(
        &self,
        app: &str,
        recorded: &[ServiceBinding],
    ) -> DeployResult<Vec<ServiceBinding>> {
        let mut live = self.apps.read_service_bindings_by_app(app).await?;
        live.sort_by(|a, b| a.service_instance.cmp(&b.service_instance));
        Ok(live
            .into_iter()
            .map(|created| {
                let request = recorded
                    .iter()
                    .find(|r| r.service_instance == created.service_instance)
                    .cloned()
                    .unwrap_or_else(|| ServiceBinding::new(created.service_instance.clone()));
                merge(&request, created)
            })
            .collect())
    }
}

fn merge(request: &ServiceBinding, created: CreatedBinding) -> ServiceBinding {
    ServiceBinding {
        service_instance: request.service_instance.clone(),
        params: request.params.clone(),
        binding_id: Some(created.binding_id),
        credentials: normalize_credentials(&created.credentials),
    }
}
