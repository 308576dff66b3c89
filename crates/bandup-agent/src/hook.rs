//! Device backend that delegates every device action to an external hook
//! executable, invoked as `<hook> <verb> [args...]`.
//!
//! | Verb            | Arguments                                              |
//! |-----------------|--------------------------------------------------------|
//! | `bind`          | master slave membership_file\|-                        |
//! | `unbind`        | slave                                                  |
//! | `duplicate`     | slave master peer channel\|- membership_file\|-        |
//! | `dedup`         | slave membership_file\|-                               |
//! | `sensitivity`   | on\|off peer entry exit level slave[,slave...]         |
//! | `peer-elements` | iface peer (stdout: hex-encoded information elements)  |
//! | `transfer`      | slave peer                                             |
//! | `disconnect`    | iface peer                                             |
//! | `flush`         | iface                                                  |
//!
//! A non-zero exit status is an error; the hook's stderr becomes its message.

use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::Context;
use bandup_core::collab::{
    DeviceSensitivity, DuplicationChannel, InterfaceBinder, MultiBandSource, PeerControl,
    SensitivityRequest, SessionTransfer,
};
use bandup_core::types::ChannelHint;
use bandup_core::{PeerAddr, SlaveSpec};

#[derive(Debug, Clone)]
pub struct HookBackend {
    program: PathBuf,
}

impl HookBackend {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        HookBackend {
            program: program.into(),
        }
    }

    fn run(&self, verb: &str, args: &[String]) -> anyhow::Result<String> {
        tracing::debug!(hook = %self.program.display(), verb, args = ?args, "running hook");
        let output = Command::new(&self.program)
            .arg(verb)
            .args(args)
            .output()
            .with_context(|| format!("spawning hook {}", self.program.display()))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("hook {verb} failed ({}): {}", output.status, stderr.trim());
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

fn path_arg(path: Option<&Path>) -> String {
    path.map(|p| p.display().to_string())
        .unwrap_or_else(|| "-".into())
}

/// Decode whitespace-separated or contiguous hex into bytes.
fn decode_hex(text: &str) -> anyhow::Result<Vec<u8>> {
    let digits: Vec<u8> = text.bytes().filter(|b| !b.is_ascii_whitespace()).collect();
    if digits.len() % 2 != 0 {
        anyhow::bail!("odd number of hex digits");
    }
    digits
        .chunks(2)
        .map(|pair| {
            let s = std::str::from_utf8(pair).context("non-ascii hex")?;
            u8::from_str_radix(s, 16).with_context(|| format!("invalid hex byte {s:?}"))
        })
        .collect()
}

impl InterfaceBinder for HookBackend {
    fn create_binding(
        &self,
        master: &str,
        slave: &SlaveSpec,
        membership_file: Option<&Path>,
    ) -> anyhow::Result<()> {
        self.run(
            "bind",
            &[master.into(), slave.name.clone(), path_arg(membership_file)],
        )
        .map(drop)
    }

    fn destroy_binding(&self, slave: &SlaveSpec) -> anyhow::Result<()> {
        self.run("unbind", &[slave.name.clone()]).map(drop)
    }
}

impl DuplicationChannel for HookBackend {
    fn duplicate(
        &self,
        slave: &str,
        master: &str,
        peer: PeerAddr,
        channel: ChannelHint,
        membership_file: Option<&Path>,
    ) -> anyhow::Result<()> {
        let channel = channel.map_or_else(|| "-".into(), |c| c.to_string());
        self.run(
            "duplicate",
            &[
                slave.into(),
                master.into(),
                peer.to_string(),
                channel,
                path_arg(membership_file),
            ],
        )
        .map(drop)
    }

    fn dedup(&self, slave: &str, membership_file: Option<&Path>) -> anyhow::Result<()> {
        self.run("dedup", &[slave.into(), path_arg(membership_file)])
            .map(drop)
    }
}

impl DeviceSensitivity for HookBackend {
    fn configure(&self, request: &SensitivityRequest<'_>) -> anyhow::Result<()> {
        let state = if request.enabled { "on" } else { "off" };
        self.run(
            "sensitivity",
            &[
                state.into(),
                request.peer.to_string(),
                request.entry_threshold.to_string(),
                request.exit_threshold.to_string(),
                request.level.to_string(),
                request.slaves.join(","),
            ],
        )
        .map(drop)
    }
}

impl MultiBandSource for HookBackend {
    fn peer_elements(&self, iface: &str, peer: PeerAddr) -> anyhow::Result<Vec<u8>> {
        let stdout = self.run("peer-elements", &[iface.into(), peer.to_string()])?;
        decode_hex(&stdout)
    }
}

impl SessionTransfer for HookBackend {
    fn transfer(&self, slave: &str, peer: PeerAddr) -> anyhow::Result<()> {
        self.run("transfer", &[slave.into(), peer.to_string()]).map(drop)
    }
}

impl PeerControl for HookBackend {
    fn disconnect_peer(&self, iface: &str, peer: PeerAddr) -> anyhow::Result<()> {
        self.run("disconnect", &[iface.into(), peer.to_string()])
            .map(drop)
    }

    fn flush_connection_cache(&self, iface: &str) {
        if let Err(e) = self.run("flush", &[iface.into()]) {
            tracing::warn!(iface = %iface, error = %e, "flush hook failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_hex_accepts_spaced_and_contiguous() {
        assert_eq!(decode_hex("9e 16\n00").unwrap(), vec![0x9e, 0x16, 0x00]);
        assert_eq!(decode_hex("9E1600").unwrap(), vec![0x9e, 0x16, 0x00]);
        assert!(decode_hex("").unwrap().is_empty());
        assert!(decode_hex("abc").is_err());
        assert!(decode_hex("zz").is_err());
    }

    #[cfg(unix)]
    fn write_hook(dir: &Path) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("hook.sh");
        let script = format!(
            "#!/bin/sh\n\
             echo \"$@\" >> {log}\n\
             case \"$1\" in\n\
             \x20 dedup) echo busy >&2; exit 3 ;;\n\
             \x20 peer-elements) echo 'dd 01 02' ;;\n\
             esac\n\
             exit 0\n",
            log = dir.join("log").display()
        );
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[test]
    fn hook_receives_verbs_and_arguments() {
        let dir = tempfile::tempdir().unwrap();
        let hook = HookBackend::new(write_hook(dir.path()));
        let peer: PeerAddr = "02:00:00:00:00:01".parse().unwrap();

        hook.duplicate("wlan1", "wlan0", peer, None, Some(Path::new("/run/g1")))
            .unwrap();
        hook.create_binding("wlan0", &SlaveSpec::new("wlan2"), None).unwrap();
        assert_eq!(hook.peer_elements("wlan0", peer).unwrap(), vec![0xdd, 1, 2]);

        let err = hook.dedup("wlan1", None).unwrap_err();
        assert!(err.to_string().contains("busy"));

        let log = std::fs::read_to_string(dir.path().join("log")).unwrap();
        let lines: Vec<&str> = log.lines().collect();
        assert_eq!(lines[0], "duplicate wlan1 wlan0 02:00:00:00:00:01 - /run/g1");
        assert_eq!(lines[1], "bind wlan0 wlan2 -");
        assert_eq!(lines[3], "dedup wlan1 -");
    }

    #[test]
    fn missing_hook_is_an_error() {
        let hook = HookBackend::new("/nonexistent/bandup-hook");
        assert!(hook.dedup("wlan1", None).is_err());
    }
}
