//! Recording collaborator backend shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use bandup_core::collab::{
    DeviceSensitivity, DuplicationChannel, InterfaceBinder, MembershipWriter, MultiBandSource,
    PeerControl, PollParams, SensitivityRequest, SessionTransfer, SignalMonitor, TrafficPoller,
};
use bandup_core::mbie::MULTI_BAND_ELEMENT_ID;
use bandup_core::types::ChannelHint;
use bandup_core::{
    Collaborators, GroupSpec, ManagerSettings, PeerAddr, RateUpgradeManager, Role, SlaveSpec,
};
use bytes::BufMut;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Bind(String),
    Unbind(String),
    WriteMembership(Vec<PeerAddr>),
    RemoveMembership,
    Duplicate {
        slave: String,
        peer: PeerAddr,
        channel: ChannelHint,
    },
    Dedup(String),
    Sensitivity(bool),
    PollerStart(String),
    PollerStop,
    PollerPause,
    PollerResume,
    ArmSignal(String),
    PeerElements(String),
    Transfer(String, PeerAddr),
    DisconnectPeer(String, PeerAddr),
    FlushCache(String),
}

/// Records every collaborator call in order; individual calls can be made
/// to fail by key (`"duplicate:wlan2"`, `"membership"`, ...).
#[derive(Default)]
pub struct MockBackend {
    calls: Mutex<Vec<Call>>,
    failing: Mutex<HashSet<String>>,
    elements: Mutex<Option<Vec<u8>>>,
    files: Mutex<Vec<(PathBuf, Vec<PeerAddr>)>>,
}

impl MockBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail(&self, key: &str) {
        self.failing.lock().unwrap().insert(key.to_string());
    }

    pub fn heal(&self, key: &str) {
        self.failing.lock().unwrap().remove(key);
    }

    pub fn set_elements(&self, raw: Vec<u8>) {
        *self.elements.lock().unwrap() = Some(raw);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn take_calls(&self) -> Vec<Call> {
        std::mem::take(&mut *self.calls.lock().unwrap())
    }

    /// Last membership list written to `path`.
    pub fn membership_file(&self, path: &Path) -> Option<Vec<PeerAddr>> {
        self.files
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(p, _)| p == path)
            .map(|(_, m)| m.clone())
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn check(&self, key: &str) -> anyhow::Result<()> {
        if self.failing.lock().unwrap().contains(key) {
            anyhow::bail!("{key} failed");
        }
        Ok(())
    }
}

impl InterfaceBinder for MockBackend {
    fn create_binding(&self, _: &str, slave: &SlaveSpec, _: Option<&Path>) -> anyhow::Result<()> {
        self.record(Call::Bind(slave.name.clone()));
        self.check(&format!("bind:{}", slave.name))
    }

    fn destroy_binding(&self, slave: &SlaveSpec) -> anyhow::Result<()> {
        self.record(Call::Unbind(slave.name.clone()));
        self.check(&format!("unbind:{}", slave.name))
    }
}

impl MembershipWriter for MockBackend {
    fn write_membership(&self, path: &Path, members: &[PeerAddr]) -> anyhow::Result<()> {
        self.record(Call::WriteMembership(members.to_vec()));
        self.check("membership")?;
        self.files
            .lock()
            .unwrap()
            .push((path.to_path_buf(), members.to_vec()));
        Ok(())
    }

    fn remove_membership(&self, path: &Path) -> anyhow::Result<()> {
        self.record(Call::RemoveMembership);
        self.check("remove_membership")?;
        self.files.lock().unwrap().retain(|(p, _)| p != path);
        Ok(())
    }
}

impl DuplicationChannel for MockBackend {
    fn duplicate(
        &self,
        slave: &str,
        _: &str,
        peer: PeerAddr,
        channel: ChannelHint,
        _: Option<&Path>,
    ) -> anyhow::Result<()> {
        self.record(Call::Duplicate {
            slave: slave.to_string(),
            peer,
            channel,
        });
        self.check(&format!("duplicate:{slave}"))
    }

    fn dedup(&self, slave: &str, _: Option<&Path>) -> anyhow::Result<()> {
        self.record(Call::Dedup(slave.to_string()));
        self.check(&format!("dedup:{slave}"))
    }
}

impl DeviceSensitivity for MockBackend {
    fn configure(&self, request: &SensitivityRequest<'_>) -> anyhow::Result<()> {
        self.record(Call::Sensitivity(request.enabled));
        self.check("sensitivity")
    }
}

impl TrafficPoller for MockBackend {
    fn start(&self, _: &str, params: &PollParams) -> anyhow::Result<()> {
        self.record(Call::PollerStart(params.iface.clone()));
        self.check("poller")
    }

    fn stop(&self, _: &str) -> anyhow::Result<()> {
        self.record(Call::PollerStop);
        self.check("poller_stop")
    }

    fn pause(&self, _: &str) -> anyhow::Result<()> {
        self.record(Call::PollerPause);
        Ok(())
    }

    fn resume(&self, _: &str) -> anyhow::Result<()> {
        self.record(Call::PollerResume);
        Ok(())
    }
}

impl SignalMonitor for MockBackend {
    fn arm(&self, iface: &str, _: i32, _: u8) -> anyhow::Result<()> {
        self.record(Call::ArmSignal(iface.to_string()));
        self.check(&format!("arm:{iface}"))
    }
}

impl MultiBandSource for MockBackend {
    fn peer_elements(&self, iface: &str, _: PeerAddr) -> anyhow::Result<Vec<u8>> {
        self.record(Call::PeerElements(iface.to_string()));
        self.elements
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| anyhow::anyhow!("no elements cached"))
    }
}

impl SessionTransfer for MockBackend {
    fn transfer(&self, slave: &str, peer: PeerAddr) -> anyhow::Result<()> {
        self.record(Call::Transfer(slave.to_string(), peer));
        self.check(&format!("transfer:{slave}"))
    }
}

impl PeerControl for MockBackend {
    fn disconnect_peer(&self, iface: &str, peer: PeerAddr) -> anyhow::Result<()> {
        self.record(Call::DisconnectPeer(iface.to_string(), peer));
        self.check("disconnect")
    }

    fn flush_connection_cache(&self, iface: &str) {
        self.record(Call::FlushCache(iface.to_string()));
    }
}

pub fn collaborators(backend: &Arc<MockBackend>) -> Collaborators {
    Collaborators::from_backend(backend.clone()).with_membership_writer(backend.clone())
}

/// Route controller logs to the test harness. `RUST_LOG` selects the level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn manager(backend: &Arc<MockBackend>) -> RateUpgradeManager {
    init_tracing();
    RateUpgradeManager::new(ManagerSettings::default(), collaborators(backend)).unwrap()
}

pub const MEMBERSHIP_FILE: &str = "/run/bandup/G1.accept";

/// `G1`: master `wlan0`, slaves `wlan1` (band 4) and `wlan2` (band 5).
pub fn g1(role: Role) -> GroupSpec {
    GroupSpec::new("G1", "wlan0")
        .role(role)
        .slave(SlaveSpec::new("wlan1").with_band(4))
        .slave(SlaveSpec::new("wlan2").with_band(5))
        .membership_file(MEMBERSHIP_FILE)
}

pub fn peer() -> PeerAddr {
    "AA:BB:CC:DD:EE:01".parse().unwrap()
}

pub fn addr(last: u8) -> PeerAddr {
    PeerAddr::new([0x02, 0, 0, 0, 0, last])
}

/// A Multi-band element carrying the peer's STA address on `band_id`.
pub fn multi_band_element(band_id: u8, channel: u8, sta_mac: PeerAddr) -> Vec<u8> {
    let mut body = Vec::new();
    body.put_u8(1 << 3);
    body.put_u8(band_id);
    body.put_u8(128);
    body.put_u8(channel);
    body.put_slice(&[0x02, 0, 0, 0, 0, 0xff]);
    body.put_u16_le(100);
    body.put_u64_le(0);
    body.put_u8(0);
    body.put_u8(0);
    body.put_slice(&sta_mac.octets());
    let mut out = vec![MULTI_BAND_ELEMENT_ID, body.len() as u8];
    out.extend(body);
    out
}
