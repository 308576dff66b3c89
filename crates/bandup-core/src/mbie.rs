//! # Multi-band Element Parsing
//!
//! A peer advertises the bands it can operate on through IEEE 802.11
//! Multi-band elements (element id 158). Each one names a band, the channel
//! used there, and the address the peer answers to on that band.
//!
//! ```text
//! +----+-----+------+------+------+------+-------+-----+-----+-----+-----+---------+---------+
//! | ID | Len | Ctrl | Band | OpCl | Chan | BSSID | Bcn | TSF | MBC | FST | STA MAC | Ciphers |
//! | 1  |  1  |  1   |  1   |  1   |  1   |   6   |  2  |  8  |  1  |  1  |  0 or 6 |   opt   |
//! +----+-----+------+------+------+------+-------+-----+-----+-----+-----+---------+---------+
//! ```
//!
//! Parsing is lenient: a truncated or malformed element ends the walk, and
//! everything decoded before it is kept.

use bytes::Buf;

use crate::collab::MultiBandParser;
use crate::types::{ChannelHint, PeerAddr};

/// Element id of the Multi-band element.
pub const MULTI_BAND_ELEMENT_ID: u8 = 158;

/// Fixed part of the element body (control .. FST session timeout).
const FIXED_BODY_LEN: usize = 22;

/// Control field: STA MAC Address Present.
const CTRL_STA_MAC_PRESENT: u8 = 1 << 3;

/// One advertised band.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MultiBandElement {
    pub band_id: u8,
    /// Address the peer uses on this band.
    pub peer_addr: PeerAddr,
    pub channel: ChannelHint,
}

/// Walks an information-element stream and decodes every Multi-band element.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ieee80211Parser;

impl MultiBandParser for Ieee80211Parser {
    fn parse(&self, elements: &[u8]) -> Vec<MultiBandElement> {
        parse_multi_band_elements(elements)
    }
}

pub fn parse_multi_band_elements(mut buf: &[u8]) -> Vec<MultiBandElement> {
    let mut out = Vec::new();
    while buf.remaining() >= 2 {
        let id = buf.get_u8();
        let len = buf.get_u8() as usize;
        if buf.remaining() < len {
            tracing::debug!(id, len, remaining = buf.remaining(), "truncated element, stopping");
            break;
        }
        let (body, rest) = buf.split_at(len);
        buf = rest;
        if id != MULTI_BAND_ELEMENT_ID {
            continue;
        }
        match decode_body(body) {
            Some(element) => out.push(element),
            None => {
                tracing::debug!(len, "malformed multi-band element, stopping");
                break;
            }
        }
    }
    out
}

fn decode_body(mut body: &[u8]) -> Option<MultiBandElement> {
    if body.remaining() < FIXED_BODY_LEN {
        return None;
    }
    let control = body.get_u8();
    let band_id = body.get_u8();
    let _operating_class = body.get_u8();
    let channel = body.get_u8();
    let bssid = take_addr(&mut body);
    let _beacon_interval = body.get_u16_le();
    let _tsf_offset = body.get_u64_le();
    let _connection_capability = body.get_u8();
    let _fst_session_timeout = body.get_u8();

    let peer_addr = if control & CTRL_STA_MAC_PRESENT != 0 {
        if body.remaining() < 6 {
            return None;
        }
        take_addr(&mut body)
    } else {
        bssid
    };

    Some(MultiBandElement {
        band_id,
        peer_addr,
        channel: (channel != 0).then_some(channel),
    })
}

fn take_addr(buf: &mut &[u8]) -> PeerAddr {
    let mut octets = [0u8; 6];
    buf.copy_to_slice(&mut octets);
    PeerAddr::new(octets)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use bytes::BufMut;

    /// Encode a Multi-band element the way a peer would send it.
    pub(crate) fn encode(
        band_id: u8,
        channel: u8,
        bssid: [u8; 6],
        sta_mac: Option<[u8; 6]>,
    ) -> Vec<u8> {
        let mut body = Vec::new();
        body.put_u8(if sta_mac.is_some() { CTRL_STA_MAC_PRESENT } else { 0 });
        body.put_u8(band_id);
        body.put_u8(128);
        body.put_u8(channel);
        body.put_slice(&bssid);
        body.put_u16_le(100);
        body.put_u64_le(0);
        body.put_u8(0);
        body.put_u8(0);
        if let Some(mac) = sta_mac {
            body.put_slice(&mac);
        }
        let mut out = vec![MULTI_BAND_ELEMENT_ID, body.len() as u8];
        out.extend(body);
        out
    }

    const BSSID: [u8; 6] = [0x02, 0, 0, 0, 0, 0x10];
    const STA: [u8; 6] = [0x02, 0, 0, 0, 0, 0x20];

    #[test]
    fn parses_bssid_when_sta_mac_absent() {
        let ies = encode(4, 36, BSSID, None);
        let parsed = parse_multi_band_elements(&ies);
        assert_eq!(
            parsed,
            vec![MultiBandElement {
                band_id: 4,
                peer_addr: PeerAddr::new(BSSID),
                channel: Some(36),
            }]
        );
    }

    #[test]
    fn prefers_sta_mac_when_present() {
        let ies = encode(5, 2, BSSID, Some(STA));
        let parsed = parse_multi_band_elements(&ies);
        assert_eq!(parsed[0].peer_addr, PeerAddr::new(STA));
    }

    #[test]
    fn channel_zero_means_no_hint() {
        let ies = encode(4, 0, BSSID, None);
        assert_eq!(parse_multi_band_elements(&ies)[0].channel, None);
    }

    #[test]
    fn skips_unrelated_elements() {
        let mut ies = vec![0u8, 4, b't', b'e', b's', b't'];
        ies.extend(encode(2, 6, BSSID, None));
        ies.extend([221u8, 3, 0x00, 0x50, 0xf2]);
        ies.extend(encode(4, 149, BSSID, Some(STA)));
        let parsed = parse_multi_band_elements(&ies);
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].band_id, 2);
        assert_eq!(parsed[1].band_id, 4);
    }

    #[test]
    fn truncated_stream_keeps_earlier_elements() {
        let mut ies = encode(2, 6, BSSID, None);
        let second = encode(4, 36, BSSID, None);
        ies.extend(&second[..second.len() - 5]);
        let parsed = parse_multi_band_elements(&ies);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].band_id, 2);
    }

    #[test]
    fn short_body_is_malformed() {
        let ies = [MULTI_BAND_ELEMENT_ID, 3, 0, 4, 1];
        assert!(parse_multi_band_elements(&ies).is_empty());
    }

    #[test]
    fn missing_sta_mac_is_malformed() {
        let mut ies = encode(4, 36, BSSID, None);
        ies[2] |= CTRL_STA_MAC_PRESENT;
        assert!(parse_multi_band_elements(&ies).is_empty());
    }

    #[test]
    fn empty_input_yields_nothing() {
        assert!(Ieee80211Parser.parse(&[]).is_empty());
        assert!(Ieee80211Parser.parse(&[MULTI_BAND_ELEMENT_ID]).is_empty());
    }
}
