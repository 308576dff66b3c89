//! # Collaborator Contracts
//!
//! Everything the controller drives but does not own: interface bindings,
//! the membership file, the duplication channel, device sensitivity, the
//! traffic poller, the signal monitor, multi-band element retrieval, session
//! transfer and peer control.
//!
//! Every call is synchronous. The controller blocks for its duration and
//! relies on the collaborator's own timeout, if any. Implementations are
//! `Send + Sync` so the manager can live on the dispatch thread.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use crate::group::SlaveSpec;
use crate::mbie::{Ieee80211Parser, MultiBandElement};
use crate::membership::FileMembershipWriter;
use crate::types::{ChannelHint, PeerAddr, SensitivityLevel};

/// Creates and destroys slave-interface bindings on the device.
pub trait InterfaceBinder: Send + Sync {
    fn create_binding(
        &self,
        master: &str,
        slave: &SlaveSpec,
        membership_file: Option<&Path>,
    ) -> Result<()>;

    fn destroy_binding(&self, slave: &SlaveSpec) -> Result<()>;
}

/// Persists a group's membership list.
pub trait MembershipWriter: Send + Sync {
    fn write_membership(&self, path: &Path, members: &[PeerAddr]) -> Result<()>;

    /// Delete the membership file. A file that is already gone is not an
    /// error.
    fn remove_membership(&self, path: &Path) -> Result<()>;
}

/// Replicates a live session onto a slave band, and removes it again.
pub trait DuplicationChannel: Send + Sync {
    fn duplicate(
        &self,
        slave: &str,
        master: &str,
        peer: PeerAddr,
        channel: ChannelHint,
        membership_file: Option<&Path>,
    ) -> Result<()>;

    fn dedup(&self, slave: &str, membership_file: Option<&Path>) -> Result<()>;
}

/// Arguments of a device sensitivity (re)configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct SensitivityRequest<'a> {
    pub slaves: &'a [String],
    pub peer: PeerAddr,
    pub enabled: bool,
    pub entry_threshold: u64,
    pub exit_threshold: u64,
    pub level: SensitivityLevel,
}

/// Pushes traffic thresholds down to the device for a station session.
pub trait DeviceSensitivity: Send + Sync {
    fn configure(&self, request: &SensitivityRequest<'_>) -> Result<()>;
}

/// Parameters the traffic poller is armed with.
#[derive(Debug, Clone, PartialEq)]
pub struct PollParams {
    /// Interface whose throughput is measured.
    pub iface: String,
    pub interval: Duration,
    pub alpha: f64,
    /// Bytes/second above which `HighTraffic` fires.
    pub entry_threshold: u64,
    /// Bytes/second below which `LowTraffic` fires.
    pub exit_threshold: u64,
}

/// Background throughput monitor.
///
/// Crossings are delivered asynchronously as `HighTraffic(group)` /
/// `LowTraffic(group)` events through the dispatch queue, never by calling
/// back into the manager directly.
pub trait TrafficPoller: Send + Sync {
    /// Start measuring for `group`. A poller already running for the group
    /// is replaced.
    fn start(&self, group: &str, params: &PollParams) -> Result<()>;
    fn stop(&self, group: &str) -> Result<()>;
    fn pause(&self, group: &str) -> Result<()>;
    fn resume(&self, group: &str) -> Result<()>;
}

/// Watches the signal level of one slave interface; fires
/// `InterfaceSignal(iface)` through the dispatch queue.
pub trait SignalMonitor: Send + Sync {
    fn arm(&self, iface: &str, rssi_threshold_dbm: i32, hysteresis_db: u8) -> Result<()>;
}

/// Fetches the raw information elements a peer advertised on an interface.
pub trait MultiBandSource: Send + Sync {
    fn peer_elements(&self, iface: &str, peer: PeerAddr) -> Result<Vec<u8>>;
}

/// Extracts multi-band descriptors from raw elements.
///
/// Tolerates absent or malformed input by returning fewer (or zero)
/// descriptors; there is no error path.
pub trait MultiBandParser: Send + Sync {
    fn parse(&self, elements: &[u8]) -> Vec<MultiBandElement>;
}

/// Moves the active data session from a slave band back onto the master.
pub trait SessionTransfer: Send + Sync {
    fn transfer(&self, slave: &str, peer: PeerAddr) -> Result<()>;
}

/// Per-interface peer session control.
pub trait PeerControl: Send + Sync {
    fn disconnect_peer(&self, iface: &str, peer: PeerAddr) -> Result<()>;

    /// Drop cached scan/connection state for `iface`. Fire-and-forget.
    fn flush_connection_cache(&self, iface: &str);
}

/// The full set of collaborators a [`crate::RateUpgradeManager`] drives.
#[derive(Clone)]
pub struct Collaborators {
    pub binder: Arc<dyn InterfaceBinder>,
    pub membership: Arc<dyn MembershipWriter>,
    pub duplication: Arc<dyn DuplicationChannel>,
    pub sensitivity: Arc<dyn DeviceSensitivity>,
    pub poller: Arc<dyn TrafficPoller>,
    pub signal: Arc<dyn SignalMonitor>,
    pub multiband: Arc<dyn MultiBandSource>,
    pub parser: Arc<dyn MultiBandParser>,
    pub transfer: Arc<dyn SessionTransfer>,
    pub peers: Arc<dyn PeerControl>,
}

impl Collaborators {
    /// Route every device-facing call to one backend, with the on-disk
    /// membership writer and the IEEE 802.11 element parser.
    pub fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: InterfaceBinder
            + DuplicationChannel
            + DeviceSensitivity
            + TrafficPoller
            + SignalMonitor
            + MultiBandSource
            + SessionTransfer
            + PeerControl
            + 'static,
    {
        Collaborators {
            binder: backend.clone(),
            membership: Arc::new(FileMembershipWriter),
            duplication: backend.clone(),
            sensitivity: backend.clone(),
            poller: backend.clone(),
            signal: backend.clone(),
            multiband: backend.clone(),
            parser: Arc::new(Ieee80211Parser),
            transfer: backend.clone(),
            peers: backend,
        }
    }

    pub fn with_membership_writer(mut self, writer: Arc<dyn MembershipWriter>) -> Self {
        self.membership = writer;
        self
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}
