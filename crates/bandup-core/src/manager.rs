//! # Group Registry
//!
//! [`RateUpgradeManager`] is the single context object every operation goes
//! through: it owns the settings, the collaborators and the name → group
//! map. It performs no locking; callers deliver operations one at a time
//! (see [`crate::runtime::DispatchRuntime`] for a ready-made serializer).

use std::collections::BTreeMap;

use crate::binding;
use crate::collab::{Collaborators, PollParams};
use crate::config::{BandupConfig, ManagerSettings};
use crate::duplication::DuplicationController;
use crate::error::{BandupError, Result, Step, Teardown};
use crate::group::{GroupSpec, GroupStatus, RateUpgradeGroup};
use crate::membership;

pub struct RateUpgradeManager {
    pub(crate) settings: ManagerSettings,
    pub(crate) collab: Collaborators,
    pub(crate) groups: BTreeMap<String, RateUpgradeGroup>,
}

impl RateUpgradeManager {
    pub fn new(settings: ManagerSettings, collab: Collaborators) -> Result<Self> {
        settings.validate()?;
        tracing::info!(
            sensitivity = %settings.sensitivity,
            poll_interval_ms = settings.poll_interval().as_millis() as u64,
            poll_alpha = settings.poll_alpha(),
            entry_threshold = settings.entry_threshold,
            exit_threshold = settings.exit_threshold,
            "rate-upgrade manager initialised"
        );
        Ok(RateUpgradeManager {
            settings,
            collab,
            groups: BTreeMap::new(),
        })
    }

    /// Build a manager and register every configured group.
    ///
    /// Stops at the first group that fails to register; groups added before
    /// it are torn down again.
    pub fn from_config(config: BandupConfig, collab: Collaborators) -> Result<Self> {
        let mut manager = Self::new(config.settings, collab)?;
        for spec in config.groups {
            if let Err(e) = manager.add_group(spec) {
                manager.shutdown();
                return Err(e);
            }
        }
        Ok(manager)
    }

    pub fn settings(&self) -> &ManagerSettings {
        &self.settings
    }

    pub fn collaborators(&self) -> &Collaborators {
        &self.collab
    }

    pub fn group(&self, name: &str) -> Option<&RateUpgradeGroup> {
        self.groups.get(name)
    }

    pub fn groups(&self) -> impl Iterator<Item = &RateUpgradeGroup> {
        self.groups.values()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Name of the group that owns `iface`, as master or slave.
    pub fn group_of_interface(&self, iface: &str) -> Option<&str> {
        self.groups
            .values()
            .find(|g| g.contains_interface(iface))
            .map(|g| g.name.as_str())
    }

    pub fn snapshot(&self) -> Vec<GroupStatus> {
        self.groups.values().map(RateUpgradeGroup::status).collect()
    }

    /// Register a group.
    ///
    /// Atomic: the group exists afterwards only if the spec is valid, its
    /// (empty) membership file was written and every auto-enslaved slave
    /// bound. A failed bind also removes the membership file again.
    /// Re-adding an existing name is a logged no-op.
    pub fn add_group(&mut self, spec: GroupSpec) -> Result<()> {
        if self.groups.contains_key(&spec.name) {
            tracing::info!(group = %spec.name, "group already registered");
            return Ok(());
        }
        spec.validate()?;

        let group = RateUpgradeGroup::from_spec(spec);
        membership::persist(&group, self.collab.membership.as_ref())?;
        if let Err(e) = binding::bind_slaves(
            self.collab.binder.as_ref(),
            &group.master,
            &group.slaves,
            group.membership_file.as_deref(),
        ) {
            membership::discard(&group, self.collab.membership.as_ref());
            return Err(e);
        }

        tracing::info!(
            group = %group.name,
            master = %group.master,
            role = %group.role,
            slaves = ?group.slave_names(),
            "group registered"
        );
        self.groups.insert(group.name.clone(), group);
        Ok(())
    }

    /// Unregister a group, destroying its slave bindings.
    ///
    /// Any live duplication is dropped and an armed poller stopped first.
    /// Failures are collected; the group is removed regardless.
    pub fn del_group(&mut self, name: &str) -> Result<Teardown> {
        let mut group = self
            .groups
            .remove(name)
            .ok_or_else(|| BandupError::UnknownGroup(name.to_string()))?;

        let mut td = Teardown::new();
        if group.is_duplicated() {
            td.merge(DuplicationController::new(&self.collab).dedup_immediate(&mut group));
        }
        if group.poller_armed {
            td.attempt(Step::StopPoller, &group.master, || self.collab.poller.stop(&group.name));
            group.poller_armed = false;
        }
        td.merge(binding::unbind_slaves(self.collab.binder.as_ref(), &group.slaves));

        tracing::info!(group = %name, failures = td.failures.len(), "group removed");
        Ok(td)
    }

    /// Remove every group.
    pub fn shutdown(&mut self) -> Teardown {
        let mut td = Teardown::new();
        let names: Vec<String> = self.groups.keys().cloned().collect();
        for name in names {
            if let Ok(group_td) = self.del_group(&name) {
                td.merge(group_td);
            }
        }
        td
    }

    pub(crate) fn poll_params(&self, iface: &str) -> PollParams {
        PollParams {
            iface: iface.to_string(),
            interval: self.settings.poll_interval(),
            alpha: self.settings.poll_alpha(),
            entry_threshold: self.settings.entry_threshold,
            exit_threshold: self.settings.exit_threshold,
        }
    }
}

impl std::fmt::Debug for RateUpgradeManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateUpgradeManager")
            .field("settings", &self.settings)
            .field("groups", &self.groups.keys().collect::<Vec<_>>())
            .finish()
    }
}
