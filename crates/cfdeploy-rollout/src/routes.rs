//! Route mapping reconciler.
//!
//! [`reconcile`] is a pure diff keyed by route identity. [`RouteReconciler`]
//! applies a plan through a [`RouteManager`], one mapping at a time, in route
//! order.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info};

use cfdeploy_core::RouteBinding;

use crate::error::{DeployError, DeployResult};
use crate::platform::{PlatformResult, RouteManager};

/// Mappings to create, delete and leave untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutePlan {
    pub to_create: Vec<RouteBinding>,
    pub to_delete: Vec<RouteBinding>,
    /// Routes present on both sides, as currently recorded.
    pub to_keep: Vec<RouteBinding>,
}

impl RoutePlan {
    pub fn is_empty(&self) -> bool {
        self.to_create.is_empty() && self.to_delete.is_empty()
    }
}

/// Diff `desired` against `actual` by route identity.
///
/// Ports do not participate in the comparison; a route that is already
/// mapped is kept with whatever port the platform assigned.
pub fn reconcile(desired: &[RouteBinding], actual: &[RouteBinding]) -> RoutePlan {
    let desired: BTreeMap<&str, &RouteBinding> =
        desired.iter().map(|r| (r.route.as_str(), r)).collect();
    let actual: BTreeMap<&str, &RouteBinding> =
        actual.iter().map(|r| (r.route.as_str(), r)).collect();

    let mut plan = RoutePlan::default();
    for (route, binding) in &desired {
        match actual.get(route) {
            Some(current) => plan.to_keep.push((*current).clone()),
            None => plan.to_create.push((*binding).clone()),
        }
    }
    for (route, binding) in &actual {
        if !desired.contains_key(route) {
            plan.to_delete.push((*binding).clone());
        }
    }
    plan
}

/// Applies route plans against the platform.
pub struct RouteReconciler<'a> {
    routes: &'a dyn RouteManager,
}

impl<'a> RouteReconciler<'a> {
    pub fn new(routes: &'a dyn RouteManager) -> Self {
        Self { routes }
    }

    /// Check that `route` may be mapped to `app`.
    ///
    /// Existing mappings are allowed only when they point at `app` itself or
    /// at one of `valid_owners` (the venerable application during a rollover).
    pub async fn validate_route(
        &self,
        app: &str,
        route: &str,
        valid_owners: &[&str],
    ) -> DeployResult<()> {
        let mut allowed = valid_owners.to_vec();
        allowed.push(app);
        self.check_owners(route, &allowed).await
    }

    /// Check every route in `routes` before any application exists to map
    /// them to. Only mappings held by `valid_owners` are tolerated.
    pub async fn preflight(&self, routes: &[RouteBinding], valid_owners: &[&str]) -> DeployResult<()> {
        for binding in routes {
            self.check_owners(&binding.route, valid_owners).await?;
        }
        Ok(())
    }

    async fn check_owners(&self, route: &str, allowed: &[&str]) -> DeployResult<()> {
        let mappings = self.routes.read_route_mappings_by_route(route).await?;
        match mappings.iter().find(|m| !allowed.contains(&m.app.as_str())) {
            None => Ok(()),
            Some(m) => Err(DeployError::Validation(format!(
                "route {route} is already mapped to application {}; a route can only be \
                 mapped to one managed application",
                m.app
            ))),
        }
    }

    /// Map every route in `routes` to `app`.
    ///
    /// All routes are validated before the first mapping is created. Each
    /// created mapping is appended to `applied` with its platform-assigned
    /// identity and port, so callers can record partial progress on failure.
    /// A mapping that already exists for the same route and application is
    /// adopted rather than treated as an error.
    pub async fn add_mappings(
        &self,
        app: &str,
        routes: &[RouteBinding],
        valid_owners: &[&str],
        applied: &mut Vec<RouteBinding>,
    ) -> DeployResult<()> {
        for binding in routes {
            self.validate_route(app, &binding.route, valid_owners).await?;
        }

        for binding in routes {
            let mapping_id = match self
                .routes
                .create_route_mapping(&binding.route, app, binding.port)
                .await
            {
                Ok(id) => id,
                Err(e) if e.is_conflict() => match self.existing_mapping(&binding.route, app).await? {
                    Some(id) => {
                        debug!(route = %binding.route, %app, mapping_id = %id, "adopting existing route mapping");
                        id
                    }
                    None => return Err(e.into()),
                },
                Err(e) => return Err(e.into()),
            };

            let mapping = self.routes.read_route_mapping(&mapping_id).await?;
            info!(route = %binding.route, %app, %mapping_id, port = ?mapping.port, "route mapped");
            applied.push(RouteBinding {
                route: binding.route.clone(),
                port: mapping.port,
                mapping_id: Some(mapping_id),
            });
        }
        Ok(())
    }

    /// Delete the recorded mappings of `routes`. Mappings already gone count
    /// as deleted. Returns how many mappings were actually removed.
    pub async fn delete_mappings(&self, routes: &[RouteBinding]) -> DeployResult<usize> {
        let mut removed = 0;
        for binding in routes {
            let Some(mapping_id) = binding.mapping_id.as_deref() else {
                debug!(route = %binding.route, "no mapping recorded, nothing to delete");
                continue;
            };
            if self.delete_mapping(mapping_id).await? {
                info!(route = %binding.route, %mapping_id, "route unmapped");
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Remove the mappings of `routes` still held by `superseded` apps, so
    /// each route is left with its new owner only. Returns how many
    /// mappings were removed.
    pub async fn hand_over(
        &self,
        routes: &[RouteBinding],
        superseded: &[&str],
    ) -> DeployResult<usize> {
        if superseded.is_empty() {
            return Ok(0);
        }
        let mut removed = 0;
        for binding in routes {
            let held = self.routes.read_route_mappings_by_route(&binding.route).await?;
            for mapping in held.iter().filter(|m| superseded.contains(&m.app.as_str())) {
                if self.delete_mapping(&mapping.mapping_id).await? {
                    info!(route = %binding.route, app = %mapping.app, "route handed over from superseded application");
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    /// Apply `plan` to `app`, keeping `current` in step with every committed
    /// mutation. Creations run before deletions.
    pub async fn apply(
        &self,
        app: &str,
        plan: &RoutePlan,
        valid_owners: &[&str],
        current: &mut Vec<RouteBinding>,
    ) -> DeployResult<()> {
        self.add_mappings(app, &plan.to_create, valid_owners, current).await?;

        for binding in &plan.to_delete {
            if let Some(mapping_id) = binding.mapping_id.as_deref() {
                if self.delete_mapping(mapping_id).await? {
                    info!(route = %binding.route, %mapping_id, "route unmapped");
                }
            }
            current.retain(|r| r.route != binding.route);
        }
        Ok(())
    }

    /// Routes currently mapped to `app` on the platform.
    pub async fn live_routes(&self, app: &str) -> DeployResult<Vec<RouteBinding>> {
        let mut mappings = self.routes.read_route_mappings_by_app(app).await?;
        mappings.sort_by(|a, b| a.route.cmp(&b.route));
        Ok(mappings.iter().map(RouteBinding::from_mapping).collect())
    }

    async fn delete_mapping(&self, mapping_id: &str) -> DeployResult<bool> {
        match self.routes.delete_route_mapping(mapping_id).await {
            Ok(()) => Ok(true),
            Err(e) if e.is_not_found() => {
                debug!(%mapping_id, "route mapping already absent");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn existing_mapping(&self, route: &str, app: &str) -> PlatformResult<Option<String>> {
        let mappings = self.routes.read_route_mappings_by_route(route).await?;
        Ok(mappings
            .into_iter()
            .find(|m| m.app == app)
            .map(|m| m.mapping_id))
    }
}

/// Route identities of `routes`, sorted.
pub fn route_ids(routes: &[RouteBinding]) -> BTreeSet<&str> {
    routes.iter().map(|r| r.route.as_str()).collect()
}
