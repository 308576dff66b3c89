//! Property-based tests for group lifecycle invariants and the Multi-band
//! element parser.

mod common;

use std::path::Path;

use bandup_core::mbie::parse_multi_band_elements;
use bandup_core::{DupState, GroupSpec, PeerAddr, Role, SlaveSpec};
use common::{MEMBERSHIP_FILE, MockBackend, g1, manager, multi_band_element};
use proptest::prelude::*;

fn peer_addr() -> impl Strategy<Value = PeerAddr> {
    any::<[u8; 6]>().prop_map(PeerAddr::new)
}

fn role() -> impl Strategy<Value = Role> {
    prop_oneof![Just(Role::Station), Just(Role::AccessPoint)]
}

fn group_spec() -> impl Strategy<Value = GroupSpec> {
    (role(), 1usize..6, any::<bool>()).prop_map(|(role, slaves, with_file)| {
        let mut spec = GroupSpec::new("G", "wlan0").role(role);
        for i in 1..=slaves {
            spec = spec.slave(SlaveSpec::new(format!("wlan{i}")));
        }
        if with_file {
            spec = spec.membership_file(MEMBERSHIP_FILE);
        }
        spec
    })
}

proptest! {
    #[test]
    fn add_group_starts_single_and_empty(spec in group_spec()) {
        let backend = MockBackend::new();
        let mut mgr = manager(&backend);
        let with_file = spec.membership_file.is_some();
        mgr.add_group(spec).unwrap();

        let g = mgr.group("G").unwrap();
        prop_assert!(g.members().is_empty());
        prop_assert_eq!(g.state(), DupState::Single);
        if with_file {
            prop_assert_eq!(backend.membership_file(Path::new(MEMBERSHIP_FILE)), Some(vec![]));
        }
    }

    #[test]
    fn connect_disconnect_round_trip(
        role in role(),
        peer in peer_addr(),
        high_traffic in any::<bool>(),
    ) {
        let backend = MockBackend::new();
        let mut mgr = manager(&backend);
        mgr.add_group(g1(role)).unwrap();

        mgr.on_connect("G1", "wlan0", peer).unwrap();
        if high_traffic {
            mgr.on_high_traffic("G1").unwrap();
        }
        mgr.on_disconnect("G1", "wlan0", peer).unwrap();

        let g = mgr.group("G1").unwrap();
        prop_assert!(g.members().is_empty());
        prop_assert_eq!(g.state(), DupState::Single);
        prop_assert!(!g.poller_armed());
    }

    #[test]
    fn failed_duplication_never_leaves_partial_state(fail_at in 1usize..=2) {
        let backend = MockBackend::new();
        let mut mgr = manager(&backend);
        mgr.add_group(g1(Role::Station)).unwrap();
        mgr.on_connect("G1", "wlan0", "aa:bb:cc:dd:ee:01".parse().unwrap()).unwrap();
        backend.fail(&format!("duplicate:wlan{fail_at}"));

        prop_assert!(mgr.on_high_traffic("G1").is_err());
        let g = mgr.group("G1").unwrap();
        prop_assert_eq!(g.state(), DupState::Single);
        prop_assert!(g.duplicated_slaves().is_empty());
    }

    #[test]
    fn parser_never_panics(raw in proptest::collection::vec(any::<u8>(), 0..256)) {
        let _ = parse_multi_band_elements(&raw);
    }

    #[test]
    fn parser_keeps_elements_before_garbage(
        band in any::<u8>(),
        channel in 1u8..=255,
        mac in any::<[u8; 6]>(),
        tail in proptest::collection::vec(any::<u8>(), 0..64),
    ) {
        let mut raw = multi_band_element(band, channel, PeerAddr::new(mac));
        raw.extend(tail);
        let parsed = parse_multi_band_elements(&raw);
        prop_assert!(!parsed.is_empty());
        prop_assert_eq!(parsed[0].band_id, band);
        prop_assert_eq!(parsed[0].channel, Some(channel));
        prop_assert_eq!(parsed[0].peer_addr, PeerAddr::new(mac));
    }
}
