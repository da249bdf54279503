//! Persisted record types.
//!
//! An [`AppRecord`] is everything needed to diff the next desired config
//! against what was last applied, and to find every remote object this
//! resource is responsible for, including deposed ones.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use cfdeploy_core::{AppConfig, AppId, Application, RouteBinding, ServiceBinding};

// ── Deposed resources ─────────────────────────────────────────────

/// Kind of remote object held in the deposed registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeposedKind {
    Application,
}

impl std::fmt::Display for DeposedKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeposedKind::Application => f.write_str("application"),
        }
    }
}

/// Weak references to remote objects a rollover superseded but has not yet
/// confirmed as decommissioned. Keyed by remote identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct DeposedResources(BTreeMap<String, DeposedKind>);

impl DeposedResources {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `id`. Returns false if it was already tracked.
    pub fn insert(&mut self, id: impl Into<String>, kind: DeposedKind) -> bool {
        self.0.insert(id.into(), kind).is_none()
    }

    /// Stop tracking `id`. Returns true if it was tracked.
    pub fn remove(&mut self, id: &str) -> bool {
        self.0.remove(id).is_some()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.0.contains_key(id)
    }

    pub fn kind_of(&self, id: &str) -> Option<DeposedKind> {
        self.0.get(id).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, DeposedKind)> {
        self.0.iter().map(|(id, kind)| (id.as_str(), *kind))
    }
}

// ── Application record ────────────────────────────────────────────

/// Recorded state of one managed application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppRecord {
    /// Stable resource address chosen by the operator (e.g. `web/api`).
    pub address: String,
    /// Identity of the live application. Replaced by a rollover.
    pub id: AppId,
    /// The desired config that was last applied.
    pub config: AppConfig,
    /// The application as last observed on the platform.
    pub app: Application,
    /// Live route mappings with their platform identities.
    #[serde(default)]
    pub routes: Vec<RouteBinding>,
    /// Service bindings with their platform identities and credentials.
    #[serde(default)]
    pub service_bindings: Vec<ServiceBinding>,
    #[serde(default)]
    pub deposed: DeposedResources,
    /// Unix timestamp (seconds) of the last write.
    pub updated_at: u64,
}

impl AppRecord {
    pub fn new(address: impl Into<String>, config: AppConfig, app: Application) -> Self {
        Self {
            address: address.into(),
            id: app.id.clone(),
            config,
            app,
            routes: Vec::new(),
            service_bindings: Vec::new(),
            deposed: DeposedResources::new(),
            updated_at: 0,
        }
    }

    /// Build the key for the apps table.
    pub fn table_key(&self) -> &str {
        &self.address
    }
}
