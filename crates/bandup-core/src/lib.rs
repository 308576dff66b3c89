//! Multi-band session duplication controller.
//!
//! A *rate-upgrade group* pairs one master Wi-Fi interface with slave
//! interfaces on other bands. While a peer's traffic is high (station role)
//! or as soon as it connects (AP role) the session is duplicated onto the
//! slaves; it is deduplicated again when traffic drops, the signal degrades
//! or the peer leaves.
//!
//! This crate contains:
//! - **Group registry**: add/remove groups and bind slaves ([`RateUpgradeManager`])
//! - **Membership**: per-group peer list and its on-disk accept file
//! - **Duplication state machine**: transactional duplicate, best-effort dedup
//! - **Event routing**: host events mapped to transitions ([`Event`])
//! - **Collaborator traits**: everything device-facing, in [`collab`]
//! - **Dispatch runtime**: single worker thread serialising all operations
//! - **Metrics**: Prometheus rendering and a scrape endpoint

pub mod binding;
pub mod collab;
pub mod config;
pub mod duplication;
pub mod error;
pub mod group;
pub mod manager;
pub mod mbie;
pub mod membership;
pub mod metrics;
pub mod router;
pub mod runtime;
pub mod types;

pub use collab::Collaborators;
pub use config::{BandupConfig, ManagerSettings};
pub use error::{BandupError, Result, Step, StepFailure, Teardown};
pub use group::{GroupSpec, GroupStatus, RateUpgradeGroup, SlaveSpec};
pub use manager::RateUpgradeManager;
pub use router::{Event, Outcome};
pub use runtime::{DispatchRuntime, EventSender, RuntimeBuilder};
pub use types::{DupState, PeerAddr, Role, SensitivityLevel};
