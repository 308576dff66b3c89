//! # Duplication Controller
//!
//! Moves a group between `Single` (session on the master band only) and
//! `Duplicated` (session also present on one or more slave bands).
//!
//! ```text
//!            duplicate(all targets ok)
//!   Single ───────────────────────────▶ Duplicated
//!     ▲  ◀── any target fails: unwind ──┘    │
//!     │                                      │ graceful: transfer + dedup per slave
//!     └──────────────────────────────────────┘ immediate: dedup per slave
//!                                              release: dedup one slave
//! ```
//!
//! Going up is transactional: every committed slave is unwound if a later one
//! fails. Coming down is best-effort: each step's failure is recorded in a
//! [`Teardown`] and the loop carries on.

use std::path::Path;

use crate::collab::{Collaborators, DuplicationChannel};
use crate::error::{BandupError, Result, Step, Teardown};
use crate::group::RateUpgradeGroup;
use crate::mbie::MultiBandElement;
use crate::types::{ChannelHint, PeerAddr};

/// One slave to duplicate onto.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DupTarget {
    pub slave: String,
    pub peer: PeerAddr,
    pub channel: ChannelHint,
}

/// Decide which slaves to duplicate onto, and with which address.
///
/// Each advertised element selects the first not-yet-targeted slave on its
/// band. When nothing matches (no elements, or none for a configured band)
/// every slave is targeted with `peer` and no channel hint.
pub fn plan_targets(
    group: &RateUpgradeGroup,
    peer: PeerAddr,
    elements: &[MultiBandElement],
) -> Vec<DupTarget> {
    let mut targets: Vec<DupTarget> = Vec::new();
    for element in elements {
        let slave = group.slaves.iter().find(|s| {
            s.band == Some(element.band_id) && !targets.iter().any(|t| t.slave == s.name)
        });
        match slave {
            Some(slave) => targets.push(DupTarget {
                slave: slave.name.clone(),
                peer: element.peer_addr,
                channel: element.channel,
            }),
            None => {
                tracing::debug!(
                    group = %group.name,
                    band = element.band_id,
                    "no slave for advertised band"
                )
            }
        }
    }
    if targets.is_empty() {
        return uniform_targets(group, peer);
    }
    targets
}

/// Every slave, same address, no channel hint.
pub fn uniform_targets(group: &RateUpgradeGroup, peer: PeerAddr) -> Vec<DupTarget> {
    group
        .slaves
        .iter()
        .map(|s| DupTarget {
            slave: s.name.clone(),
            peer,
            channel: None,
        })
        .collect()
}

/// Accumulates committed duplications so a failure can unwind exactly what
/// was done.
pub struct DuplicationTxn<'a> {
    channel: &'a dyn DuplicationChannel,
    master: &'a str,
    membership_file: Option<&'a Path>,
    committed: Vec<String>,
}

impl<'a> DuplicationTxn<'a> {
    pub fn begin(
        channel: &'a dyn DuplicationChannel,
        master: &'a str,
        membership_file: Option<&'a Path>,
    ) -> Self {
        DuplicationTxn {
            channel,
            master,
            membership_file,
            committed: Vec::new(),
        }
    }

    pub fn duplicate(&mut self, target: &DupTarget) -> anyhow::Result<()> {
        self.channel.duplicate(
            &target.slave,
            self.master,
            target.peer,
            target.channel,
            self.membership_file,
        )?;
        self.committed.push(target.slave.clone());
        Ok(())
    }

    /// Slaves duplicated so far.
    pub fn committed(&self) -> &[String] {
        &self.committed
    }

    pub fn commit(self) -> Vec<String> {
        self.committed
    }

    /// Dedup every committed slave, newest first.
    pub fn abort(self) -> Teardown {
        let mut td = Teardown::new();
        for slave in self.committed.iter().rev() {
            td.attempt(Step::Dedup, slave, || {
                self.channel.dedup(slave, self.membership_file)
            });
        }
        td
    }
}

/// Runs duplication transitions against a group.
pub struct DuplicationController<'a> {
    collab: &'a Collaborators,
}

impl<'a> DuplicationController<'a> {
    pub fn new(collab: &'a Collaborators) -> Self {
        DuplicationController { collab }
    }

    /// `Single → Duplicated`. No-op if already duplicated.
    ///
    /// On failure the already-duplicated slaves are unwound, the group stays
    /// `Single` and the failing slave's error is returned. No retry.
    pub fn duplicate(&self, group: &mut RateUpgradeGroup, targets: &[DupTarget]) -> Result<()> {
        if group.is_duplicated() {
            tracing::debug!(group = %group.name, "already duplicated");
            return Ok(());
        }

        let mut txn = DuplicationTxn::begin(
            self.collab.duplication.as_ref(),
            &group.master,
            group.membership_file.as_deref(),
        );
        for target in targets {
            if let Err(source) = txn.duplicate(target) {
                tracing::warn!(
                    group = %group.name,
                    iface = %target.slave,
                    error = %source,
                    unwind = txn.committed().len(),
                    "duplication failed, unwinding"
                );
                let undo = txn.abort();
                if !undo.is_clean() {
                    tracing::warn!(
                        group = %group.name,
                        failures = undo.failures.len(),
                        "unwind incomplete"
                    );
                }
                group.counters.duplication_failures += 1;
                return Err(BandupError::Duplication {
                    group: group.name.clone(),
                    iface: target.slave.clone(),
                    source,
                });
            }
            tracing::debug!(
                group = %group.name,
                iface = %target.slave,
                peer = %target.peer,
                channel = ?target.channel,
                "slave duplicated"
            );
        }

        let mut committed = txn.commit();
        committed.sort_by_key(|name| group.slaves.iter().position(|s| &s.name == name));
        group.duplicated = committed;
        group.counters.duplications += 1;
        tracing::info!(group = %group.name, slaves = ?group.duplicated, "session duplicated");
        Ok(())
    }

    /// `Duplicated → Single` while the session is still live: transfer the
    /// session back to the master, then dedup, for every duplicated slave.
    pub fn dedup_graceful(&self, group: &mut RateUpgradeGroup) -> Teardown {
        let peer = group.peer();
        self.dedup_all(group, peer)
    }

    /// `Duplicated → Single` after the session is gone: dedup only.
    pub fn dedup_immediate(&self, group: &mut RateUpgradeGroup) -> Teardown {
        self.dedup_all(group, None)
    }

    /// Dedup a single interface that is being torn down.
    ///
    /// The interface leaves the duplicated set whether or not the dedup
    /// succeeds; the group drops to `Single` with its last slave.
    pub fn release(&self, group: &mut RateUpgradeGroup, iface: &str) -> Teardown {
        let mut td = Teardown::new();
        let Some(idx) = group.duplicated.iter().position(|s| s == iface) else {
            tracing::debug!(
                group = %group.name,
                iface = %iface,
                "released interface not duplicated"
            );
            return td;
        };
        let slave = group.duplicated.remove(idx);
        td.attempt(Step::Dedup, &slave, || {
            self.collab
                .duplication
                .dedup(&slave, group.membership_file.as_deref())
        });
        if !group.is_duplicated() {
            group.counters.dedups += 1;
        }
        tracing::info!(
            group = %group.name,
            iface = %slave,
            state = %group.state(),
            "interface released"
        );
        td
    }

    fn dedup_all(&self, group: &mut RateUpgradeGroup, transfer_peer: Option<PeerAddr>) -> Teardown {
        let mut td = Teardown::new();
        let slaves = std::mem::take(&mut group.duplicated);
        for slave in &slaves {
            if let Some(peer) = transfer_peer {
                td.attempt(Step::Transfer, slave, || self.collab.transfer.transfer(slave, peer));
            }
            td.attempt(Step::Dedup, slave, || {
                self.collab
                    .duplication
                    .dedup(slave, group.membership_file.as_deref())
            });
        }
        if !slaves.is_empty() {
            group.counters.dedups += 1;
            tracing::info!(
                group = %group.name,
                graceful = transfer_peer.is_some(),
                failures = td.failures.len(),
                "session deduplicated"
            );
        }
        td
    }
}
