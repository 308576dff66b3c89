use std::collections::HashSet;
use std::path::PathBuf;

use serde::Deserialize;

use crate::error::{BandupError, Result};
use crate::group::{GroupSpec, SlaveSpec};
use crate::types::{Role, SensitivityLevel};

pub const CONFIG_VERSION: u32 = 1;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BandupConfigInput {
    pub version: u32,
    pub sensitivity: Option<SensitivityLevel>,
    pub entry_threshold: Option<u64>,
    pub exit_threshold: Option<u64>,
    pub signal: SignalConfigInput,
    pub groups: Vec<GroupConfigInput>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SignalConfigInput {
    pub rssi_threshold_dbm: Option<i32>,
    pub hysteresis_db: Option<u8>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GroupConfigInput {
    pub name: String,
    pub master: String,
    pub role: Role,
    pub membership_file: Option<PathBuf>,
    pub slaves: Vec<SlaveConfigInput>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SlaveConfigInput {
    pub name: String,
    #[serde(default = "default_auto_enslave")]
    pub auto_enslave: bool,
    #[serde(default)]
    pub band: Option<u8>,
}

fn default_auto_enslave() -> bool {
    true
}

/// Signal monitor arming parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalSettings {
    pub rssi_threshold_dbm: i32,
    pub hysteresis_db: u8,
}

impl Default for SignalSettings {
    fn default() -> Self {
        Self {
            rssi_threshold_dbm: -75,
            hysteresis_db: 5,
        }
    }
}

/// Process-wide controller settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ManagerSettings {
    pub sensitivity: SensitivityLevel,
    /// Bytes/second; crossing upwards requests duplication.
    pub entry_threshold: u64,
    /// Bytes/second; crossing downwards requests dedup. Below `entry_threshold`.
    pub exit_threshold: u64,
    pub signal: SignalSettings,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            sensitivity: SensitivityLevel::default(),
            entry_threshold: 1_250_000,
            exit_threshold: 250_000,
            signal: SignalSettings::default(),
        }
    }
}

impl ManagerSettings {
    pub fn validate(&self) -> Result<()> {
        if self.entry_threshold <= self.exit_threshold {
            return Err(BandupError::Configuration(format!(
                "entry_threshold ({}) must be greater than exit_threshold ({})",
                self.entry_threshold, self.exit_threshold
            )));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> std::time::Duration {
        self.sensitivity.poll_interval()
    }

    pub fn poll_alpha(&self) -> f64 {
        self.sensitivity.poll_alpha()
    }
}

#[derive(Debug, Clone, Default)]
pub struct BandupConfig {
    pub version: u32,
    pub settings: ManagerSettings,
    pub groups: Vec<GroupSpec>,
}

impl BandupConfigInput {
    pub fn resolve(self) -> Result<BandupConfig> {
        let version = if self.version == 0 {
            CONFIG_VERSION
        } else {
            self.version
        };
        if version != CONFIG_VERSION {
            return Err(BandupError::Configuration(format!(
                "unsupported config version {version}"
            )));
        }

        let defaults = ManagerSettings::default();
        let settings = ManagerSettings {
            sensitivity: self.sensitivity.unwrap_or(defaults.sensitivity),
            entry_threshold: self.entry_threshold.unwrap_or(defaults.entry_threshold),
            exit_threshold: self.exit_threshold.unwrap_or(defaults.exit_threshold),
            signal: SignalSettings {
                rssi_threshold_dbm: self
                    .signal
                    .rssi_threshold_dbm
                    .unwrap_or(defaults.signal.rssi_threshold_dbm),
                hysteresis_db: self
                    .signal
                    .hysteresis_db
                    .unwrap_or(defaults.signal.hysteresis_db),
            },
        };
        settings.validate()?;

        let mut used = HashSet::new();
        let mut groups = Vec::new();
        for group in self.groups {
            let name = group.name.trim().to_string();
            if !used.insert(name.clone()) {
                tracing::warn!(group = %name, "duplicate group definition ignored");
                continue;
            }
            let slaves = group
                .slaves
                .into_iter()
                .filter_map(|slave| {
                    let name = slave.name.trim();
                    (!name.is_empty()).then(|| SlaveSpec {
                        name: name.to_string(),
                        auto_enslave: slave.auto_enslave,
                        band: slave.band,
                    })
                })
                .collect();
            groups.push(GroupSpec {
                name,
                master: group.master.trim().to_string(),
                role: group.role,
                slaves,
                membership_file: group.membership_file,
            });
        }

        Ok(BandupConfig {
            version,
            settings,
            groups,
        })
    }
}

impl BandupConfig {
    pub fn from_toml_str(input: &str) -> Result<Self> {
        if input.trim().is_empty() {
            return Ok(BandupConfig {
                version: CONFIG_VERSION,
                ..BandupConfig::default()
            });
        }
        let parsed: BandupConfigInput = toml::from_str(input)
            .map_err(|e| BandupError::Configuration(format!("invalid config TOML: {e}")))?;
        parsed.resolve()
    }

    pub fn load(path: &std::path::Path) -> Result<Self> {
        let input = std::fs::read_to_string(path).map_err(|e| {
            BandupError::Configuration(format!("reading {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&input)
    }
}
