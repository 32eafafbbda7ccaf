//! UDP payload extraction from captured link-layer frames.
//!
//! Only the headers needed to reach the UDP payload are parsed. Lengths come
//! from the IP and UDP headers so trailing Ethernet padding is never returned.

use byteorder::{BigEndian, ByteOrder};

pub const LINKTYPE_ETHERNET: i32 = 1;
pub const LINKTYPE_RAW: i32 = 101;
pub const LINKTYPE_LINUX_SLL: i32 = 113;
pub const LINKTYPE_IPV4: i32 = 228;
pub const LINKTYPE_IPV6: i32 = 229;
pub const LINKTYPE_LINUX_SLL2: i32 = 276;

const ETHERTYPE_IPV4: u16 = 0x0800;
const ETHERTYPE_IPV6: u16 = 0x86DD;
const ETHERTYPE_VLAN: u16 = 0x8100;
const ETHERTYPE_QINQ: u16 = 0x88A8;
const IPPROTO_UDP: u8 = 17;

/// Network-layer packet found inside a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Network<'a> {
    V4(&'a [u8]),
    V6(&'a [u8]),
}

/// UDP payload of `frame` captured with `linktype`, if it carries one.
pub fn udp_payload(linktype: i32, frame: &[u8]) -> Option<&[u8]> {
    let network = match linktype {
        LINKTYPE_ETHERNET => ethernet(frame)?,
        LINKTYPE_RAW => by_version(frame)?,
        LINKTYPE_IPV4 => Network::V4(frame),
        LINKTYPE_IPV6 => Network::V6(frame),
        LINKTYPE_LINUX_SLL => {
            let proto = BigEndian::read_u16(frame.get(14..16)?);
            by_ethertype(proto, frame.get(16..)?)?
        }
        LINKTYPE_LINUX_SLL2 => {
            let proto = BigEndian::read_u16(frame.get(0..2)?);
            by_ethertype(proto, frame.get(20..)?)?
        }
        _ => return None,
    };
    let udp = match network {
        Network::V4(packet) => ipv4_udp(packet)?,
        Network::V6(packet) => ipv6_udp(packet)?,
    };
    udp_data(udp)
}

fn by_ethertype(ethertype: u16, rest: &[u8]) -> Option<Network<'_>> {
    match ethertype {
        ETHERTYPE_IPV4 => Some(Network::V4(rest)),
        ETHERTYPE_IPV6 => Some(Network::V6(rest)),
        _ => None,
    }
}

fn by_version(packet: &[u8]) -> Option<Network<'_>> {
    match packet.first()? >> 4 {
        4 => Some(Network::V4(packet)),
        6 => Some(Network::V6(packet)),
        _ => None,
    }
}

fn ethernet(frame: &[u8]) -> Option<Network<'_>> {
    let mut at = 12;
    let mut ethertype = BigEndian::read_u16(frame.get(at..at + 2)?);
    at += 2;
    while ethertype == ETHERTYPE_VLAN || ethertype == ETHERTYPE_QINQ {
        ethertype = BigEndian::read_u16(frame.get(at + 2..at + 4)?);
        at += 4;
    }
    by_ethertype(ethertype, frame.get(at..)?)
}

/// UDP segment of an IPv4 packet, trimmed to the IP total length.
fn ipv4_udp(packet: &[u8]) -> Option<&[u8]> {
    let first = *packet.first()?;
    let header_len = usize::from(first & 0x0F) * 4;
    if first >> 4 != 4 || header_len < 20 || packet.len() < header_len {
        return None;
    }
    let total_len = usize::from(BigEndian::read_u16(&packet[2..4]));
    if total_len < header_len {
        return None;
    }
    if packet[9] != IPPROTO_UDP {
        return None;
    }
    let end = total_len.min(packet.len());
    packet.get(header_len..end)
}

/// UDP segment of an IPv6 packet whose next header is UDP.
fn ipv6_udp(packet: &[u8]) -> Option<&[u8]> {
    if packet.len() < 40 || packet[0] >> 4 != 6 || packet[6] != IPPROTO_UDP {
        return None;
    }
    let payload_len = usize::from(BigEndian::read_u16(&packet[4..6]));
    let end = (40 + payload_len).min(packet.len());
    packet.get(40..end)
}

fn udp_data(udp: &[u8]) -> Option<&[u8]> {
    let len = usize::from(BigEndian::read_u16(udp.get(4..6)?));
    if len < 8 || udp.len() < len {
        return None;
    }
    Some(&udp[8..len])
}
