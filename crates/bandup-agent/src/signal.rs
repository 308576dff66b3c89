//! Slave-band signal monitor backed by `/proc/net/wireless`.
//!
//! A single background thread re-reads the file every second. An armed
//! interface whose level falls below its threshold queues one
//! `InterfaceSignal` event, then stays quiet until the level recovers above
//! `threshold + hysteresis`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use bandup_core::collab::SignalMonitor;
use bandup_core::runtime::SendError;
use bandup_core::{Event, EventSender};

const SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

/// Extract the signal level of `iface` from `/proc/net/wireless` contents.
///
/// Format after two header lines:
/// `wlan0: 0000   -42.  -95.  0  0  0  0  0  0`
pub fn parse_signal_dbm(contents: &str, iface: &str) -> Option<f64> {
    contents.lines().skip(2).find_map(|line| {
        let rest = line.trim().strip_prefix(iface)?.strip_prefix(':')?;
        let level = rest.split_whitespace().nth(1)?;
        level.trim_end_matches('.').parse::<f64>().ok()
    })
}

/// Per-interface arming state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalWatch {
    threshold_dbm: f64,
    hysteresis_db: f64,
    below: bool,
}

impl SignalWatch {
    pub fn new(threshold_dbm: i32, hysteresis_db: u8) -> Self {
        SignalWatch {
            threshold_dbm: f64::from(threshold_dbm),
            hysteresis_db: f64::from(hysteresis_db),
            below: false,
        }
    }

    /// Returns true when this sample is a fresh degradation.
    pub fn observe(&mut self, level_dbm: f64) -> bool {
        if !self.below && level_dbm < self.threshold_dbm {
            self.below = true;
            return true;
        }
        if self.below && level_dbm > self.threshold_dbm + self.hysteresis_db {
            self.below = false;
        }
        false
    }
}

type Watches = Arc<Mutex<HashMap<String, SignalWatch>>>;

pub struct ProcSignalMonitor {
    watches: Watches,
    running: Arc<AtomicBool>,
    handle: Mutex<Option<thread::JoinHandle<()>>>,
}

impl ProcSignalMonitor {
    pub fn start(events: EventSender) -> std::io::Result<Self> {
        Self::with_source(events, "/proc/net/wireless")
    }

    pub fn with_source(events: EventSender, source: impl Into<PathBuf>) -> std::io::Result<Self> {
        let watches: Watches = Arc::new(Mutex::new(HashMap::new()));
        let running = Arc::new(AtomicBool::new(true));
        let source = source.into();

        let handle = {
            let watches = watches.clone();
            let running = running.clone();
            thread::Builder::new()
                .name("bandup-signal".into())
                .spawn(move || monitor_loop(source, watches, running, events))?
        };

        Ok(ProcSignalMonitor {
            watches,
            running,
            handle: Mutex::new(Some(handle)),
        })
    }

    pub fn armed(&self) -> Vec<String> {
        let watches = self.watches.lock().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<String> = watches.keys().cloned().collect();
        names.sort();
        names
    }

    /// Stop the sampling thread. Idempotent.
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::Relaxed);
        let handle = self.handle.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

impl SignalMonitor for ProcSignalMonitor {
    fn arm(&self, iface: &str, rssi_threshold_dbm: i32, hysteresis_db: u8) -> anyhow::Result<()> {
        if !self.running.load(Ordering::Relaxed) {
            anyhow::bail!("signal monitor is stopped");
        }
        self.watches
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(iface.to_string(), SignalWatch::new(rssi_threshold_dbm, hysteresis_db));
        tracing::debug!(
            iface = %iface,
            threshold_dbm = rssi_threshold_dbm,
            hysteresis_db,
            "signal monitor armed"
        );
        Ok(())
    }
}

impl Drop for ProcSignalMonitor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn monitor_loop(source: PathBuf, watches: Watches, running: Arc<AtomicBool>, events: EventSender) {
    let tick = Duration::from_millis(100);
    let mut waited = SAMPLE_INTERVAL;
    while running.load(Ordering::Relaxed) {
        if waited < SAMPLE_INTERVAL {
            thread::sleep(tick);
            waited += tick;
            continue;
        }
        waited = Duration::ZERO;

        let Ok(contents) = std::fs::read_to_string(&source) else {
            continue;
        };
        let degraded: Vec<String> = {
            let mut watches = watches.lock().unwrap_or_else(|e| e.into_inner());
            watches
                .iter_mut()
                .filter_map(|(iface, watch)| {
                    let level = parse_signal_dbm(&contents, iface)?;
                    watch.observe(level).then(|| {
                        tracing::info!(iface = %iface, level_dbm = level, "slave signal degraded");
                        iface.clone()
                    })
                })
                .collect()
        };
        for iface in degraded {
            match events.try_send(Event::InterfaceSignal { iface }) {
                Ok(()) => {}
                Err(SendError::Full) => tracing::warn!("dispatch queue full, signal event dropped"),
                Err(SendError::Disconnected) => return,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WIRELESS: &str = "\
Inter-| sta-|   Quality        |   Discarded packets               | Missed | WE
 face | tus | link level noise |  nwid  crypt   frag  retry   misc | beacon | 22
 wlan0: 0000   70.  -42.  -256        0      0      0      0      0        0
 wlan1: 0000   20.  -81.  -256        0      0      0      0      0        0
";

    #[test]
    fn parses_level_per_interface() {
        assert_eq!(parse_signal_dbm(WIRELESS, "wlan0"), Some(-42.0));
        assert_eq!(parse_signal_dbm(WIRELESS, "wlan1"), Some(-81.0));
        assert_eq!(parse_signal_dbm(WIRELESS, "wlan"), None);
        assert_eq!(parse_signal_dbm(WIRELESS, "eth0"), None);
    }

    #[test]
    fn watch_fires_once_until_recovered() {
        let mut watch = SignalWatch::new(-75, 5);
        assert!(!watch.observe(-60.0));
        assert!(watch.observe(-80.0));
        assert!(!watch.observe(-82.0));
        // Inside the hysteresis band: still degraded.
        assert!(!watch.observe(-72.0));
        assert!(!watch.observe(-76.0));
        // Recovered past threshold + hysteresis, then degrades again.
        assert!(!watch.observe(-65.0));
        assert!(watch.observe(-78.0));
    }

    #[test]
    fn arm_registers_interfaces_and_shutdown_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let builder = bandup_core::RuntimeBuilder::new(4);
        let monitor =
            ProcSignalMonitor::with_source(builder.sender(), dir.path().join("wireless")).unwrap();
        monitor.arm("wlan2", -75, 5).unwrap();
        monitor.arm("wlan1", -70, 3).unwrap();
        assert_eq!(monitor.armed(), vec!["wlan1".to_string(), "wlan2".to_string()]);

        monitor.shutdown();
        monitor.shutdown();
        assert!(monitor.arm("wlan3", -75, 5).is_err());
    }
}
