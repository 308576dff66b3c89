//! # Membership Store
//!
//! Ordered set of peers connected on a group's master, mirrored to the
//! group's membership file on every change. A connect whose write fails is
//! undone; a disconnect whose write fails still removes the peer.

use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::Context;

use crate::collab::MembershipWriter;
use crate::error::{BandupError, Result};
use crate::group::RateUpgradeGroup;
use crate::types::PeerAddr;

/// Insertion-ordered set of peer addresses.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemberSet {
    peers: Vec<PeerAddr>,
}

impl MemberSet {
    pub fn contains(&self, peer: &PeerAddr) -> bool {
        self.peers.contains(peer)
    }

    /// Returns false if the peer was already present.
    pub fn insert(&mut self, peer: PeerAddr) -> bool {
        if self.contains(&peer) {
            return false;
        }
        self.peers.push(peer);
        true
    }

    /// Returns false if the peer was absent.
    pub fn remove(&mut self, peer: &PeerAddr) -> bool {
        match self.peers.iter().position(|p| p == peer) {
            Some(idx) => {
                self.peers.remove(idx);
                true
            }
            None => false,
        }
    }

    pub fn first(&self) -> Option<PeerAddr> {
        self.peers.first().copied()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PeerAddr> {
        self.peers.iter()
    }

    pub fn as_slice(&self) -> &[PeerAddr] {
        &self.peers
    }
}

/// Writes one address per line, replacing the file atomically through a
/// sibling temporary file.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileMembershipWriter;

impl MembershipWriter for FileMembershipWriter {
    fn write_membership(&self, path: &Path, members: &[PeerAddr]) -> anyhow::Result<()> {
        let mut body = String::with_capacity(members.len() * 18);
        for peer in members {
            body.push_str(&peer.to_string());
            body.push('\n');
        }

        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = std::path::PathBuf::from(tmp);

        let mut file = fs::File::create(&tmp)
            .with_context(|| format!("creating {}", tmp.display()))?;
        file.write_all(body.as_bytes())
            .with_context(|| format!("writing {}", tmp.display()))?;
        file.sync_all()
            .with_context(|| format!("syncing {}", tmp.display()))?;
        fs::rename(&tmp, path)
            .with_context(|| format!("replacing {}", path.display()))?;
        Ok(())
    }

    fn remove_membership(&self, path: &Path) -> anyhow::Result<()> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("removing {}", path.display())),
        }
    }
}

/// Write the group's full membership list. No-op without a membership file.
pub fn persist(group: &RateUpgradeGroup, writer: &dyn MembershipWriter) -> Result<()> {
    let Some(path) = group.membership_file.as_deref() else {
        return Ok(());
    };
    writer
        .write_membership(path, group.members.as_slice())
        .map_err(|source| BandupError::Persistence {
            group: group.name.clone(),
            source,
        })
}

/// Register a peer connected on the master.
///
/// Returns `Ok(false)` when the peer was already a member. On a failed
/// write the insert is undone before the error is returned.
pub fn on_master_connect(
    group: &mut RateUpgradeGroup,
    writer: &dyn MembershipWriter,
    peer: PeerAddr,
) -> Result<bool> {
    if !group.members.insert(peer) {
        tracing::warn!(group = %group.name, peer = %peer, "peer already a member");
        return Ok(false);
    }
    if let Err(e) = persist(group, writer) {
        group.members.remove(&peer);
        return Err(e);
    }
    tracing::debug!(
        group = %group.name,
        peer = %peer,
        members = group.members.len(),
        "member added"
    );
    Ok(true)
}

/// Remove a peer that left the master.
///
/// The removal stands even when the write fails; the persistence error is
/// returned for the caller to report.
pub fn on_master_disconnect(
    group: &mut RateUpgradeGroup,
    writer: &dyn MembershipWriter,
    peer: PeerAddr,
) -> Result<()> {
    if !group.members.remove(&peer) {
        return Err(BandupError::UnknownPeer {
            group: group.name.clone(),
            peer,
        });
    }
    tracing::debug!(
        group = %group.name,
        peer = %peer,
        members = group.members.len(),
        "member removed"
    );
    persist(group, writer)
}

/// Remove the membership file of a group that failed to register.
/// Best-effort.
pub(crate) fn discard(group: &RateUpgradeGroup, writer: &dyn MembershipWriter) {
    let Some(path) = group.membership_file.as_deref() else {
        return;
    };
    if let Err(e) = writer.remove_membership(path) {
        tracing::warn!(
            group = %group.name,
            path = %path.display(),
            error = %e,
            "failed to remove membership file"
        );
    }
}

/// Undo a connect after a later step failed. Best-effort.
pub(crate) fn revert_connect(
    group: &mut RateUpgradeGroup,
    writer: &dyn MembershipWriter,
    peer: PeerAddr,
) {
    if group.members.remove(&peer) {
        if let Err(e) = persist(group, writer) {
            tracing::warn!(
                group = %group.name,
                peer = %peer,
                error = %e,
                "failed to persist reverted membership"
            );
        }
    }
}
