//! Deposed resource tracker.
//!
//! The registry itself ([`DeposedResources`]) lives in the persisted
//! [`AppRecord`](cfdeploy_state::AppRecord). This module decides which
//! entries survive a refresh and logs every change to the registry.

use tracing::{debug, info};

use cfdeploy_state::{DeposedKind, DeposedResources};

use crate::error::DeployResult;
use crate::platform::AppManager;

pub struct DeposedTracker<'a> {
    apps: &'a dyn AppManager,
}

impl<'a> DeposedTracker<'a> {
    pub fn new(apps: &'a dyn AppManager) -> Self {
        Self { apps }
    }

    /// Track a superseded application that still has to be deleted.
    pub fn track(&self, deposed: &mut DeposedResources, id: &str) {
        if deposed.insert(id, DeposedKind::Application) {
            info!(app = %id, "application deposed");
        }
    }

    /// Stop tracking an application that was deleted or released.
    pub fn release(&self, deposed: &mut DeposedResources, id: &str) {
        if deposed.remove(id) {
            info!(app = %id, "deposed application released");
        }
    }

    /// Drop entries whose remote object no longer exists.
    ///
    /// Entries that still exist are kept for later cleanup. Any failure
    /// other than not-found aborts the refresh and leaves `deposed`
    /// untouched.
    pub async fn refresh(&self, deposed: &mut DeposedResources) -> DeployResult<usize> {
        let mut gone = Vec::new();
        for (id, kind) in deposed.iter() {
            match kind {
                DeposedKind::Application => match self.apps.read_app(id).await {
                    Ok(app) => debug!(app = %id, name = %app.name, "deposed application still exists"),
                    Err(e) if e.is_not_found() => gone.push(id.to_string()),
                    Err(e) => return Err(e.into()),
                },
            }
        }

        for id in &gone {
            deposed.remove(id);
            info!(app = %id, "deposed application no longer exists, dropping");
        }
        Ok(gone.len())
    }
}
