//! Device backend that only logs what it would do, for running the agent on
//! hosts without multi-band hardware.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use bandup_core::collab::{
    DeviceSensitivity, DuplicationChannel, InterfaceBinder, MultiBandSource, PeerControl,
    SensitivityRequest, SessionTransfer,
};
use bandup_core::types::ChannelHint;
use bandup_core::{PeerAddr, SlaveSpec};

#[derive(Debug, Default)]
pub struct SimBackend {
    calls: AtomicU64,
}

impl SimBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn tick(&self) {
        self.calls.fetch_add(1, Ordering::Relaxed);
    }
}

impl Drop for SimBackend {
    fn drop(&mut self) {
        tracing::debug!(calls = self.calls.load(Ordering::Relaxed), "[sim] backend released");
    }
}

impl InterfaceBinder for SimBackend {
    fn create_binding(
        &self,
        master: &str,
        slave: &SlaveSpec,
        _: Option<&Path>,
    ) -> anyhow::Result<()> {
        self.tick();
        tracing::info!(master = %master, slave = %slave.name, band = ?slave.band, "[sim] bind");
        Ok(())
    }

    fn destroy_binding(&self, slave: &SlaveSpec) -> anyhow::Result<()> {
        self.tick();
        tracing::info!(slave = %slave.name, "[sim] unbind");
        Ok(())
    }
}

impl DuplicationChannel for SimBackend {
    fn duplicate(
        &self,
        slave: &str,
        master: &str,
        peer: PeerAddr,
        channel: ChannelHint,
        _: Option<&Path>,
    ) -> anyhow::Result<()> {
        self.tick();
        tracing::info!(
            slave = %slave,
            master = %master,
            peer = %peer,
            channel = ?channel,
            "[sim] duplicate"
        );
        Ok(())
    }

    fn dedup(&self, slave: &str, _: Option<&Path>) -> anyhow::Result<()> {
        self.tick();
        tracing::info!(slave = %slave, "[sim] dedup");
        Ok(())
    }
}

impl DeviceSensitivity for SimBackend {
    fn configure(&self, request: &SensitivityRequest<'_>) -> anyhow::Result<()> {
        self.tick();
        tracing::info!(
            peer = %request.peer,
            enabled = request.enabled,
            level = %request.level,
            slaves = ?request.slaves,
            "[sim] device sensitivity"
        );
        Ok(())
    }
}

impl MultiBandSource for SimBackend {
    fn peer_elements(&self, iface: &str, peer: PeerAddr) -> anyhow::Result<Vec<u8>> {
        self.tick();
        anyhow::bail!("no multi-band elements for {peer} on {iface} in simulation")
    }
}

impl SessionTransfer for SimBackend {
    fn transfer(&self, slave: &str, peer: PeerAddr) -> anyhow::Result<()> {
        self.tick();
        tracing::info!(slave = %slave, peer = %peer, "[sim] session transfer");
        Ok(())
    }
}

impl PeerControl for SimBackend {
    fn disconnect_peer(&self, iface: &str, peer: PeerAddr) -> anyhow::Result<()> {
        self.tick();
        tracing::info!(iface = %iface, peer = %peer, "[sim] disconnect peer");
        Ok(())
    }

    fn flush_connection_cache(&self, iface: &str) {
        self.tick();
        tracing::info!(iface = %iface, "[sim] flush connection cache");
    }
}
