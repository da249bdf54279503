//! Change classification.
//!
//! [`ChangeSet::between`] records which attributes differ between the last
//! applied config and the requested one; [`ChangeSet::against_record`] does
//! the same but compares routes and bindings with what was last observed on
//! the platform. [`classify`] maps a change set to the [`Action`] the
//! orchestrator dispatches on. All of them are pure.

use std::fmt;

use serde::Serialize;

use cfdeploy_core::AppConfig;
use cfdeploy_state::AppRecord;

use crate::bindings::diff_bindings;
use crate::routes::reconcile;

/// What a change requires of the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    NoOp,
    /// Apply in place; the platform needs no restart.
    Update,
    Restart,
    Restage,
    /// Blue-green replacement of the application.
    Rollover,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Action::NoOp => "no-op",
            Action::Update => "update",
            Action::Restart => "restart",
            Action::Restage => "restage",
            Action::Rollover => "rollover",
        })
    }
}

/// Attribute-level differences between two configs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChangeSet {
    pub name: bool,
    pub space: bool,
    pub instances: bool,
    pub enable_ssh: bool,
    pub health_check: bool,
    pub ports: bool,
    pub memory: bool,
    pub disk_quota: bool,
    pub command: bool,
    pub buildpack: bool,
    pub stack: bool,
    pub environment: bool,
    pub source: bool,
    pub add_content: bool,
    pub service_bindings: bool,
    pub routes: bool,
    pub stopped: bool,
}

impl ChangeSet {
    pub fn between(previous: &AppConfig, next: &AppConfig) -> Self {
        let routes = reconcile(&next.desired_routes(), &previous.desired_routes());
        Self {
            name: previous.name != next.name,
            space: previous.space != next.space,
            instances: previous.instances != next.instances,
            enable_ssh: previous.enable_ssh != next.enable_ssh,
            health_check: previous.health_check != next.health_check,
            ports: previous.ports != next.ports,
            memory: previous.memory != next.memory,
            disk_quota: previous.disk_quota != next.disk_quota,
            command: previous.command != next.command,
            buildpack: previous.buildpack != next.buildpack,
            stack: previous.stack != next.stack,
            environment: previous.environment != next.environment,
            source: previous.source != next.source,
            add_content: previous.add_content != next.add_content,
            service_bindings: !diff_bindings(
                &previous.desired_bindings(),
                &next.desired_bindings(),
            )
            .is_empty(),
            routes: !routes.is_empty(),
            stopped: previous.stopped != next.stopped,
        }
    }

    /// Changes from `record` to `next`. Routes and service bindings are
    /// compared with the live state held in the record rather than its
    /// config, so drift found by a refresh is reconciled by the next update.
    pub fn against_record(record: &AppRecord, next: &AppConfig) -> Self {
        let mut changes = Self::between(&record.config, next);
        changes.routes = !reconcile(&next.desired_routes(), &record.routes).is_empty();
        changes.service_bindings =
            !diff_bindings(&record.service_bindings, &next.desired_bindings()).is_empty();
        changes
    }

    /// Fields that only change in place.
    pub fn updates_in_place(&self) -> bool {
        self.name || self.space || self.instances || self.enable_ssh || self.health_check
    }

    pub fn requires_restart(&self) -> bool {
        self.ports || self.memory || self.disk_quota || self.command
    }

    pub fn requires_restage(&self) -> bool {
        self.buildpack || self.stack || self.environment || self.service_bindings
    }

    /// Whether the artifact has to be uploaded again.
    pub fn requires_upload(&self) -> bool {
        self.source || self.add_content
    }

    /// Changes that make a blue-green rollover worthwhile.
    pub fn warrants_rollover(&self) -> bool {
        self.instances
            || self.memory
            || self.disk_quota
            || self.command
            || self.source
            || self.service_bindings
            || self.add_content
    }

    pub fn is_empty(&self) -> bool {
        self.changed_fields().is_empty()
    }

    /// Names of the changed attributes, in declaration order.
    pub fn changed_fields(&self) -> Vec<&'static str> {
        let flags = [
            ("name", self.name),
            ("space", self.space),
            ("instances", self.instances),
            ("enable_ssh", self.enable_ssh),
            ("health_check", self.health_check),
            ("ports", self.ports),
            ("memory", self.memory),
            ("disk_quota", self.disk_quota),
            ("command", self.command),
            ("buildpack", self.buildpack),
            ("stack", self.stack),
            ("environment", self.environment),
            ("source", self.source),
            ("add_content", self.add_content),
            ("service_bindings", self.service_bindings),
            ("routes", self.routes),
            ("stopped", self.stopped),
        ];
        flags
            .into_iter()
            .filter_map(|(name, changed)| changed.then_some(name))
            .collect()
    }
}

/// Decide what `changes` require, given whether blue-green is enabled.
///
/// Precedence: rollover, then in-place update, then restart, then restage.
/// Binding and artifact changes outside a rollover also restage; route or
/// run-state changes alone are in-place updates.
pub fn classify(changes: &ChangeSet, blue_green: bool) -> Action {
    if blue_green && changes.warrants_rollover() {
        Action::Rollover
    } else if changes.updates_in_place() {
        Action::Update
    } else if changes.requires_restart() {
        Action::Restart
    } else if changes.requires_restage() || changes.requires_upload() {
        Action::Restage
    } else if changes.routes || changes.stopped {
        Action::Update
    } else {
        Action::NoOp
    }
}
