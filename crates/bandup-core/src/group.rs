//! Rate-upgrade groups: one master interface plus the slave bands that can
//! carry a copy of its session.

use std::collections::HashSet;
use std::path::PathBuf;

use serde::Serialize;

use crate::error::{BandupError, Result};
use crate::membership::MemberSet;
use crate::types::{DupState, PeerAddr, Role};

/// A slave interface as registered with its group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlaveSpec {
    pub name: String,
    /// Create the interface binding when the group is added.
    pub auto_enslave: bool,
    /// Multi-band band id this interface operates on, used to match the
    /// peer's advertised per-band addresses.
    pub band: Option<u8>,
}

impl SlaveSpec {
    pub fn new(name: impl Into<String>) -> Self {
        SlaveSpec {
            name: name.into(),
            auto_enslave: true,
            band: None,
        }
    }

    pub fn with_band(mut self, band: u8) -> Self {
        self.band = Some(band);
        self
    }

    pub fn manual(mut self) -> Self {
        self.auto_enslave = false;
        self
    }
}

/// Definition handed to `add_group`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupSpec {
    pub name: String,
    pub master: String,
    pub role: Role,
    pub slaves: Vec<SlaveSpec>,
    pub membership_file: Option<PathBuf>,
}

impl GroupSpec {
    pub fn new(name: impl Into<String>, master: impl Into<String>) -> Self {
        GroupSpec {
            name: name.into(),
            master: master.into(),
            role: Role::Station,
            slaves: Vec::new(),
            membership_file: None,
        }
    }

    pub fn role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    pub fn slave(mut self, slave: SlaveSpec) -> Self {
        self.slaves.push(slave);
        self
    }

    pub fn membership_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.membership_file = Some(path.into());
        self
    }

    /// Reject definitions the controller cannot run.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(BandupError::Configuration("group name is empty".into()));
        }
        if self.master.trim().is_empty() {
            return Err(BandupError::Configuration(format!(
                "group {} has no master interface",
                self.name
            )));
        }
        if self.slaves.is_empty() {
            return Err(BandupError::Configuration(format!(
                "group {} has no slave interfaces",
                self.name
            )));
        }
        let mut seen = HashSet::new();
        seen.insert(self.master.as_str());
        for slave in &self.slaves {
            if slave.name.trim().is_empty() {
                return Err(BandupError::Configuration(format!(
                    "group {} has a slave with an empty name",
                    self.name
                )));
            }
            if !seen.insert(slave.name.as_str()) {
                return Err(BandupError::Configuration(format!(
                    "interface {} appears twice in group {}",
                    slave.name, self.name
                )));
            }
        }
        Ok(())
    }
}

/// Per-group counters exported through the status snapshot.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct GroupCounters {
    pub duplications: u64,
    pub duplication_failures: u64,
    pub dedups: u64,
}

/// Live state of a registered group.
#[derive(Debug)]
pub struct RateUpgradeGroup {
    pub(crate) name: String,
    pub(crate) master: String,
    pub(crate) role: Role,
    pub(crate) slaves: Vec<SlaveSpec>,
    pub(crate) members: MemberSet,
    /// Slaves currently carrying a copy of the session, in registration order.
    pub(crate) duplicated: Vec<String>,
    pub(crate) membership_file: Option<PathBuf>,
    pub(crate) poller_armed: bool,
    /// Slaves the signal monitor has been armed for.
    pub(crate) signal_armed: Vec<String>,
    pub(crate) counters: GroupCounters,
}

impl RateUpgradeGroup {
    pub(crate) fn from_spec(spec: GroupSpec) -> Self {
        RateUpgradeGroup {
            name: spec.name,
            master: spec.master,
            role: spec.role,
            slaves: spec.slaves,
            members: MemberSet::default(),
            duplicated: Vec::new(),
            membership_file: spec.membership_file,
            poller_armed: false,
            signal_armed: Vec::new(),
            counters: GroupCounters::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn master(&self) -> &str {
        &self.master
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn slaves(&self) -> &[SlaveSpec] {
        &self.slaves
    }

    pub fn members(&self) -> &MemberSet {
        &self.members
    }

    pub fn membership_file(&self) -> Option<&std::path::Path> {
        self.membership_file.as_deref()
    }

    pub fn is_duplicated(&self) -> bool {
        !self.duplicated.is_empty()
    }

    pub fn state(&self) -> DupState {
        if self.is_duplicated() {
            DupState::Duplicated
        } else {
            DupState::Single
        }
    }

    /// Slaves currently holding a duplicated session.
    pub fn duplicated_slaves(&self) -> &[String] {
        &self.duplicated
    }

    pub fn poller_armed(&self) -> bool {
        self.poller_armed
    }

    pub fn signal_armed(&self) -> &[String] {
        &self.signal_armed
    }

    pub fn counters(&self) -> GroupCounters {
        self.counters
    }

    /// The group's active peer.
    ///
    /// Groups carry a single concurrently-active peer: the lookup ignores any
    /// address and returns the first member.
    pub fn peer(&self) -> Option<PeerAddr> {
        self.members.first()
    }

    pub fn is_master(&self, iface: &str) -> bool {
        self.master == iface
    }

    pub fn slave(&self, iface: &str) -> Option<&SlaveSpec> {
        self.slaves.iter().find(|s| s.name == iface)
    }

    pub fn contains_interface(&self, iface: &str) -> bool {
        self.is_master(iface) || self.slave(iface).is_some()
    }

    pub(crate) fn slave_names(&self) -> Vec<String> {
        self.slaves.iter().map(|s| s.name.clone()).collect()
    }

    /// Rename an interface in place. Returns false when `old` is not part of
    /// this group.
    pub(crate) fn rename_interface(&mut self, old: &str, new: &str) -> bool {
        let mut found = false;
        if self.master == old {
            self.master = new.to_string();
            found = true;
        }
        for slave in self.slaves.iter_mut().filter(|s| s.name == old) {
            slave.name = new.to_string();
            found = true;
        }
        let tracked = self.duplicated.iter_mut().chain(self.signal_armed.iter_mut());
        for name in tracked.filter(|n| n.as_str() == old) {
            *name = new.to_string();
        }
        found
    }

    pub fn status(&self) -> GroupStatus {
        GroupStatus {
            name: self.name.clone(),
            master: self.master.clone(),
            role: self.role,
            state: self.state(),
            slaves: self.slave_names(),
            members: self.members.iter().copied().collect(),
            duplicated: self.duplicated.clone(),
            poller_armed: self.poller_armed,
            counters: self.counters,
        }
    }
}

/// Point-in-time view of a group, for logs and the metrics endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct GroupStatus {
    pub name: String,
    pub master: String,
    pub role: Role,
    pub state: DupState,
    pub slaves: Vec<String>,
    pub members: Vec<PeerAddr>,
    pub duplicated: Vec<String>,
    pub poller_armed: bool,
    pub counters: GroupCounters,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> GroupSpec {
        GroupSpec::new("g1", "wlan0")
            .slave(SlaveSpec::new("wlan1"))
            .slave(SlaveSpec::new("wlan2").with_band(5))
    }

    #[test]
    fn validate_accepts_well_formed_spec() {
        assert!(spec().validate().is_ok());
    }

    #[test]
    fn validate_rejects_missing_slaves() {
        let err = GroupSpec::new("g1", "wlan0").validate().unwrap_err();
        assert!(matches!(err, BandupError::Configuration(_)));
    }

    #[test]
    fn validate_rejects_missing_master() {
        let err = GroupSpec::new("g1", " ")
            .slave(SlaveSpec::new("wlan1"))
            .validate()
            .unwrap_err();
        assert!(matches!(err, BandupError::Configuration(_)));
    }

    #[test]
    fn validate_rejects_master_listed_as_slave() {
        let err = GroupSpec::new("g1", "wlan0")
            .slave(SlaveSpec::new("wlan0"))
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("appears twice"));
    }

    #[test]
    fn new_group_is_single_and_empty() {
        let g = RateUpgradeGroup::from_spec(spec());
        assert_eq!(g.state(), DupState::Single);
        assert!(g.members().is_empty());
        assert!(g.peer().is_none());
        assert!(!g.poller_armed());
    }

    #[test]
    fn rename_updates_master_slaves_and_duplicated() {
        let mut g = RateUpgradeGroup::from_spec(spec());
        g.duplicated.push("wlan2".into());
        assert!(g.rename_interface("wlan2", "wlan5"));
        assert!(g.slave("wlan5").is_some());
        assert_eq!(g.duplicated_slaves(), ["wlan5".to_string()]);
        assert!(g.rename_interface("wlan0", "wlan9"));
        assert_eq!(g.master(), "wlan9");
        assert!(!g.rename_interface("eth0", "eth1"));
    }
}
