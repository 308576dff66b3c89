//! # Event Router
//!
//! Host events resolved to their group and turned into membership and
//! duplication transitions.
//!
//! | Event             | Master interface                 | Slave interface        |
//! |-------------------|----------------------------------|------------------------|
//! | connect           | add member, then see below       | arm signal monitor     |
//! | disconnect        | dedup, stop poller, drop member  | flush connection cache |
//! | release           | -                                | dedup that one only    |
//! | switch completed  | AP: disconnect from the old band | -                      |
//! | scan started/done | ignored                          | pause / resume poller  |
//! | signal change     | -                                | low traffic, re-poll   |
//!
//! A station connect on the master configures sensitivity and arms the
//! poller. An AP connect duplicates straight away. Disconnects from a peer
//! other than the active one only drop that member.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::collab::SensitivityRequest;
use crate::duplication::{self, DuplicationController};
use crate::error::{BandupError, Result, Step, Teardown};
use crate::group::RateUpgradeGroup;
use crate::manager::RateUpgradeManager;
use crate::membership;
use crate::types::{PeerAddr, Role};

/// A host event, as queued for the dispatch thread.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    Connect {
        group: String,
        iface: String,
        peer: PeerAddr,
    },
    Disconnect {
        group: String,
        iface: String,
        peer: PeerAddr,
    },
    Release {
        group: String,
        iface: String,
    },
    SwitchCompleted {
        group: String,
        old_iface: String,
        new_iface: String,
        peer: PeerAddr,
    },
    ScanStarted {
        group: String,
        iface: String,
    },
    ScanCompleted {
        group: String,
        iface: String,
    },
    SignalChange {
        group: String,
        iface: String,
    },
    /// Signal monitor callback, which only knows the interface.
    InterfaceSignal {
        iface: String,
    },
    HighTraffic {
        group: String,
    },
    LowTraffic {
        group: String,
    },
    Rename {
        group: String,
        old_name: String,
        new_name: String,
    },
    DelGroup {
        group: String,
    },
}

impl Event {
    pub fn kind(&self) -> &'static str {
        match self {
            Event::Connect { .. } => "connect",
            Event::Disconnect { .. } => "disconnect",
            Event::Release { .. } => "release",
            Event::SwitchCompleted { .. } => "switch_completed",
            Event::ScanStarted { .. } => "scan_started",
            Event::ScanCompleted { .. } => "scan_completed",
            Event::SignalChange { .. } => "signal_change",
            Event::InterfaceSignal { .. } => "interface_signal",
            Event::HighTraffic { .. } => "high_traffic",
            Event::LowTraffic { .. } => "low_traffic",
            Event::Rename { .. } => "rename",
            Event::DelGroup { .. } => "del_group",
        }
    }
}

/// Result of a dispatched event.
#[derive(Debug, Default)]
pub struct Outcome {
    /// Failures swallowed by a best-effort teardown, if the event ran one.
    pub teardown: Teardown,
}

impl From<Teardown> for Outcome {
    fn from(teardown: Teardown) -> Self {
        Outcome { teardown }
    }
}

fn lookup<'g>(
    groups: &'g mut BTreeMap<String, RateUpgradeGroup>,
    name: &str,
) -> Result<&'g mut RateUpgradeGroup> {
    groups
        .get_mut(name)
        .ok_or_else(|| BandupError::UnknownGroup(name.to_string()))
}

fn unknown_interface(group: &RateUpgradeGroup, iface: &str) -> BandupError {
    BandupError::UnknownInterface {
        group: group.name.clone(),
        iface: iface.to_string(),
    }
}

impl RateUpgradeManager {
    /// Dispatch one queued event.
    pub fn dispatch(&mut self, event: Event) -> Result<Outcome> {
        tracing::trace!(event = event.kind(), "dispatch");
        match event {
            Event::Connect { group, iface, peer } => self
                .on_connect(&group, &iface, peer)
                .map(|_| Outcome::default()),
            Event::Disconnect { group, iface, peer } => self
                .on_disconnect(&group, &iface, peer)
                .map(Outcome::from),
            Event::Release { group, iface } => self.on_release(&group, &iface).map(Outcome::from),
            Event::SwitchCompleted {
                group,
                old_iface,
                new_iface,
                peer,
            } => self
                .on_switch_completed(&group, &old_iface, &new_iface, peer)
                .map(|_| Outcome::default()),
            Event::ScanStarted { group, iface } => self
                .on_scan_started(&group, &iface)
                .map(|_| Outcome::default()),
            Event::ScanCompleted { group, iface } => self
                .on_scan_completed(&group, &iface)
                .map(|_| Outcome::default()),
            Event::SignalChange { group, iface } => {
                self.on_signal_change(&group, &iface).map(Outcome::from)
            }
            Event::InterfaceSignal { iface } => {
                let group = self
                    .group_of_interface(&iface)
                    .map(str::to_string)
                    .ok_or_else(|| BandupError::UnknownInterface {
                        group: String::new(),
                        iface: iface.clone(),
                    })?;
                self.on_signal_change(&group, &iface).map(Outcome::from)
            }
            Event::HighTraffic { group } => {
                self.on_high_traffic(&group).map(|_| Outcome::default())
            }
            Event::LowTraffic { group } => self.on_low_traffic(&group).map(Outcome::from),
            Event::Rename {
                group,
                old_name,
                new_name,
            } => self
                .rename_interface(&group, &old_name, &new_name)
                .map(|_| Outcome::default()),
            Event::DelGroup { group } => self.del_group(&group).map(Outcome::from),
        }
    }

    /// A peer connected on one of the group's interfaces.
    pub fn on_connect(&mut self, group_name: &str, iface: &str, peer: PeerAddr) -> Result<()> {
        let params = self.poll_params(iface);
        let settings = self.settings.clone();
        let collab = &self.collab;
        let group = lookup(&mut self.groups, group_name)?;

        if !group.is_master(iface) {
            if group.slave(iface).is_none() {
                return Err(unknown_interface(group, iface));
            }
            tracing::debug!(
                group = %group.name,
                iface = %iface,
                "slave connect, arming signal monitor"
            );
            collab
                .signal
                .arm(iface, settings.signal.rssi_threshold_dbm, settings.signal.hysteresis_db)
                .map_err(|source| BandupError::SignalMonitor {
                    iface: iface.to_string(),
                    source,
                })?;
            if !group.signal_armed.iter().any(|s| s == iface) {
                group.signal_armed.push(iface.to_string());
            }
            return Ok(());
        }

        if !membership::on_master_connect(group, collab.membership.as_ref(), peer)? {
            return Ok(());
        }
        tracing::info!(
            group = %group.name,
            peer = %peer,
            role = %group.role,
            "peer connected on master"
        );

        match group.role {
            Role::AccessPoint => {
                let targets = duplication::uniform_targets(group, peer);
                DuplicationController::new(collab).duplicate(group, &targets)
            }
            Role::Station => {
                let slaves = group.slave_names();
                let request = SensitivityRequest {
                    slaves: &slaves,
                    peer,
                    enabled: true,
                    entry_threshold: settings.entry_threshold,
                    exit_threshold: settings.exit_threshold,
                    level: settings.sensitivity,
                };
                if let Err(source) = collab.sensitivity.configure(&request) {
                    membership::revert_connect(group, collab.membership.as_ref(), peer);
                    return Err(BandupError::DeviceSensitivity {
                        group: group.name.clone(),
                        source,
                    });
                }
                if let Err(source) = collab.poller.start(&group.name, &params) {
                    let revert = SensitivityRequest {
                        enabled: false,
                        ..request
                    };
                    if let Err(e) = collab.sensitivity.configure(&revert) {
                        tracing::warn!(
                            group = %group.name,
                            error = %e,
                            "failed to revert device sensitivity"
                        );
                    }
                    membership::revert_connect(group, collab.membership.as_ref(), peer);
                    return Err(BandupError::Poller {
                        group: group.name.clone(),
                        source,
                    });
                }
                group.poller_armed = true;
                Ok(())
            }
        }
    }

    /// A peer left one of the group's interfaces.
    ///
    /// On the master this always runs to completion: dedup without session
    /// transfer, poller stop, sensitivity reset, member removal. Step
    /// failures (including the membership write) are in the returned report.
    pub fn on_disconnect(
        &mut self,
        group_name: &str,
        iface: &str,
        peer: PeerAddr,
    ) -> Result<Teardown> {
        let settings = self.settings.clone();
        let collab = &self.collab;
        let group = lookup(&mut self.groups, group_name)?;

        if !group.is_master(iface) {
            if group.slave(iface).is_none() {
                return Err(unknown_interface(group, iface));
            }
            tracing::debug!(
                group = %group.name,
                iface = %iface,
                "slave disconnect, flushing connection cache"
            );
            collab.peers.flush_connection_cache(iface);
            return Ok(Teardown::new());
        }

        if !group.members.contains(&peer) {
            return Err(BandupError::UnknownPeer {
                group: group.name.clone(),
                peer,
            });
        }

        let mut td = Teardown::new();
        if group.peer() != Some(peer) {
            // Not the active peer: the session state belongs to someone else.
            match membership::on_master_disconnect(group, collab.membership.as_ref(), peer) {
                Ok(()) => {}
                Err(BandupError::Persistence { source, .. }) => {
                    td.record(Step::Persist, iface, source)
                }
                Err(e) => return Err(e),
            }
            tracing::info!(
                group = %group.name,
                peer = %peer,
                failures = td.failures.len(),
                "secondary peer disconnected from master"
            );
            return Ok(td);
        }

        if group.is_duplicated() {
            td.merge(DuplicationController::new(collab).dedup_immediate(group));
        }
        if group.poller_armed {
            td.attempt(Step::StopPoller, iface, || collab.poller.stop(&group.name));
            group.poller_armed = false;
        }
        if group.role == Role::Station {
            let slaves = group.slave_names();
            let request = SensitivityRequest {
                slaves: &slaves,
                peer,
                enabled: false,
                entry_threshold: settings.entry_threshold,
                exit_threshold: settings.exit_threshold,
                level: settings.sensitivity,
            };
            td.attempt(Step::DeviceSensitivity, iface, || collab.sensitivity.configure(&request));
        }
        match membership::on_master_disconnect(group, collab.membership.as_ref(), peer) {
            Ok(()) => {}
            Err(BandupError::Persistence { source, .. }) => td.record(Step::Persist, iface, source),
            Err(e) => return Err(e),
        }

        tracing::info!(
            group = %group.name,
            peer = %peer,
            failures = td.failures.len(),
            "peer disconnected from master"
        );
        Ok(td)
    }

    /// One of the group's interfaces is going away underneath us.
    pub fn on_release(&mut self, group_name: &str, iface: &str) -> Result<Teardown> {
        let collab = &self.collab;
        let group = lookup(&mut self.groups, group_name)?;
        if !group.contains_interface(iface) {
            return Err(unknown_interface(group, iface));
        }
        Ok(DuplicationController::new(collab).release(group, iface))
    }

    /// A band switch finished.
    ///
    /// For an AP whose session moved off the master band, the peer is
    /// disconnected from the master so only one band holds it.
    pub fn on_switch_completed(
        &mut self,
        group_name: &str,
        old_iface: &str,
        new_iface: &str,
        peer: PeerAddr,
    ) -> Result<()> {
        let collab = &self.collab;
        let group = lookup(&mut self.groups, group_name)?;
        if group.role != Role::AccessPoint {
            tracing::debug!(group = %group.name, "band switch ignored for station role");
            return Ok(());
        }
        if !group.is_master(old_iface) || group.is_master(new_iface) {
            return Ok(());
        }
        if group.slave(new_iface).is_none() {
            return Err(unknown_interface(group, new_iface));
        }
        tracing::info!(
            group = %group.name,
            from = %old_iface,
            to = %new_iface,
            peer = %peer,
            "session moved off master, disconnecting old band"
        );
        collab
            .peers
            .disconnect_peer(old_iface, peer)
            .map_err(|source| BandupError::Disconnect {
                iface: old_iface.to_string(),
                peer,
                source,
            })
    }

    pub fn on_scan_started(&mut self, group_name: &str, iface: &str) -> Result<()> {
        self.scan_event(group_name, iface, true)
    }

    pub fn on_scan_completed(&mut self, group_name: &str, iface: &str) -> Result<()> {
        self.scan_event(group_name, iface, false)
    }

    fn scan_event(&mut self, group_name: &str, iface: &str, started: bool) -> Result<()> {
        let collab = &self.collab;
        let group = lookup(&mut self.groups, group_name)?;
        if group.is_master(iface) {
            return Ok(());
        }
        if group.slave(iface).is_none() {
            return Err(unknown_interface(group, iface));
        }
        if !group.poller_armed {
            return Ok(());
        }
        let result = if started {
            collab.poller.pause(&group.name)
        } else {
            collab.poller.resume(&group.name)
        };
        if let Err(e) = result {
            tracing::warn!(
                group = %group.name,
                iface = %iface,
                started,
                error = %e,
                "poller pause/resume failed"
            );
        }
        Ok(())
    }

    /// A slave's signal degraded: drop duplication, then restart the poller's
    /// averaging window.
    pub fn on_signal_change(&mut self, group_name: &str, iface: &str) -> Result<Teardown> {
        {
            let group = lookup(&mut self.groups, group_name)?;
            if !group.contains_interface(iface) {
                return Err(unknown_interface(group, iface));
            }
        }
        let td = self.on_low_traffic(group_name)?;

        let collab = &self.collab;
        let group = lookup(&mut self.groups, group_name)?;
        if group.poller_armed {
            let reset = collab
                .poller
                .pause(&group.name)
                .and_then(|_| collab.poller.resume(&group.name));
            if let Err(e) = reset {
                tracing::warn!(group = %group.name, error = %e, "poller reset failed");
            }
        }
        Ok(td)
    }

    /// Throughput crossed the entry threshold.
    pub fn on_high_traffic(&mut self, group_name: &str) -> Result<()> {
        let collab = &self.collab;
        let group = lookup(&mut self.groups, group_name)?;
        if group.is_duplicated() {
            tracing::debug!(group = %group.name, "high traffic while duplicated");
            return Ok(());
        }
        let Some(peer) = group.peer() else {
            tracing::debug!(group = %group.name, "high traffic without a registered peer");
            return Ok(());
        };

        let elements = match collab.multiband.peer_elements(&group.master, peer) {
            Ok(raw) => collab.parser.parse(&raw),
            Err(e) => {
                tracing::debug!(
                    group = %group.name,
                    peer = %peer,
                    error = %e,
                    "no multi-band elements"
                );
                Vec::new()
            }
        };
        let targets = duplication::plan_targets(group, peer, &elements);
        DuplicationController::new(collab).duplicate(group, &targets)
    }

    /// Throughput fell below the exit threshold.
    pub fn on_low_traffic(&mut self, group_name: &str) -> Result<Teardown> {
        let collab = &self.collab;
        let group = lookup(&mut self.groups, group_name)?;
        if !group.is_duplicated() {
            return Ok(Teardown::new());
        }
        Ok(DuplicationController::new(collab).dedup_graceful(group))
    }

    /// Follow an interface rename. No state transition.
    ///
    /// Background monitors keyed by interface name follow it: an armed
    /// poller measuring a renamed master is restarted on the new name, and
    /// an armed slave is re-armed on the signal monitor. The rename itself
    /// stands even when one of those calls fails.
    pub fn rename_interface(
        &mut self,
        group_name: &str,
        old_name: &str,
        new_name: &str,
    ) -> Result<()> {
        let params = self.poll_params(new_name);
        let signal = self.settings.signal;
        let collab = &self.collab;
        let group = lookup(&mut self.groups, group_name)?;
        if old_name != new_name && group.contains_interface(new_name) {
            return Err(BandupError::Configuration(format!(
                "cannot rename {old_name} to {new_name}: name already used in group {group_name}"
            )));
        }
        let was_master = group.is_master(old_name);
        if !group.rename_interface(old_name, new_name) {
            return Err(unknown_interface(group, old_name));
        }
        tracing::info!(
            group = %group.name,
            from = %old_name,
            to = %new_name,
            "interface renamed"
        );

        if was_master && group.poller_armed {
            collab
                .poller
                .start(&group.name, &params)
                .map_err(|source| BandupError::Poller {
                    group: group.name.clone(),
                    source,
                })?;
        }
        if group.signal_armed.iter().any(|s| s == new_name) {
            collab
                .signal
                .arm(new_name, signal.rssi_threshold_dbm, signal.hysteresis_db)
                .map_err(|source| BandupError::SignalMonitor {
                    iface: new_name.to_string(),
                    source,
                })?;
        }
        Ok(())
    }
}
