//! Parsed packet representation
//!
//! Structured view of one captured frame: link layer, IPv4 header with
//! options, and transport header. Built once by `core::parser` and never
//! mutated afterwards.

use std::net::Ipv4Addr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// IP protocol numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IpProtocol {
    Icmp,
    Tcp,
    Udp,
    Other(u8),
}

impl From<u8> for IpProtocol {
    fn from(val: u8) -> Self {
        match val {
            1 => IpProtocol::Icmp,
            6 => IpProtocol::Tcp,
            17 => IpProtocol::Udp,
            other => IpProtocol::Other(other),
        }
    }
}

impl From<IpProtocol> for u8 {
    fn from(val: IpProtocol) -> Self {
        match val {
            IpProtocol::Icmp => 1,
            IpProtocol::Tcp => 6,
            IpProtocol::Udp => 17,
            IpProtocol::Other(v) => v,
        }
    }
}

impl std::fmt::Display for IpProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IpProtocol::Icmp => write!(f, "ICMP"),
            IpProtocol::Tcp => write!(f, "TCP"),
            IpProtocol::Udp => write!(f, "UDP"),
            IpProtocol::Other(n) => write!(f, "Proto({})", n),
        }
    }
}

/// TCP control flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TcpFlags {
    pub fin: bool,
    pub syn: bool,
    pub rst: bool,
    pub psh: bool,
    pub ack: bool,
    pub urg: bool,
}

impl TcpFlags {
    pub fn from_u8(flags: u8) -> Self {
        Self {
            fin: flags & 0x01 != 0,
            syn: flags & 0x02 != 0,
            rst: flags & 0x04 != 0,
            psh: flags & 0x08 != 0,
            ack: flags & 0x10 != 0,
            urg: flags & 0x20 != 0,
        }
    }

    pub fn to_u8(&self) -> u8 {
        let mut flags = 0u8;
        if self.fin {
            flags |= 0x01;
        }
        if self.syn {
            flags |= 0x02;
        }
        if self.rst {
            flags |= 0x04;
        }
        if self.psh {
            flags |= 0x08;
        }
        if self.ack {
            flags |= 0x10;
        }
        if self.urg {
            flags |= 0x20;
        }
        flags
    }

    /// True when no control bit at all is set
    pub fn none_set(&self) -> bool {
        self.to_u8() == 0
    }
}

/// IPv4 option type tags from the catalogue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IpOptionKind {
    Security,
    LooseRoute,
    RecordRoute,
    StreamId,
    StrictRoute,
    Timestamp,
    Unknown(u8),
}

impl From<u8> for IpOptionKind {
    fn from(val: u8) -> Self {
        // Option type = copied bit | class | number; match on the full octet
        // as transmitted, which is how the catalogue lists them.
        match val {
            130 => IpOptionKind::Security,
            131 => IpOptionKind::LooseRoute,
            7 => IpOptionKind::RecordRoute,
            136 => IpOptionKind::StreamId,
            137 => IpOptionKind::StrictRoute,
            68 => IpOptionKind::Timestamp,
            other => IpOptionKind::Unknown(other),
        }
    }
}

/// One decoded IPv4 option, in arrival order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpOption {
    pub kind: IpOptionKind,
    /// Raw option bytes after type and length octets
    pub data: Vec<u8>,
}

/// Decoded IPv4 header
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpHeader {
    pub version: u8,
    /// Declared header length in bytes (IHL * 4)
    pub header_length: u8,
    pub total_length: u16,
    pub identification: u16,
    pub dont_fragment: bool,
    pub more_fragments: bool,
    /// Fragment offset in 8-byte units as carried on the wire
    pub fragment_offset: u16,
    pub ttl: u8,
    pub protocol: u8,
    pub src_ip: Ipv4Addr,
    pub dst_ip: Ipv4Addr,
    pub options: Vec<IpOption>,
}

/// Decoded transport header
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TransportHeader {
    Tcp {
        src_port: u16,
        dst_port: u16,
        seq: u32,
        ack: u32,
        flags: TcpFlags,
        payload: Vec<u8>,
    },
    Udp {
        src_port: u16,
        dst_port: u16,
        /// Declared length field, not the received byte count
        length: u16,
        payload_len: usize,
    },
    Icmp {
        icmp_type: u8,
        code: u8,
        payload_len: usize,
    },
    Other {
        protocol: u8,
    },
}

/// Raw captured frame plus link metadata
#[derive(Debug, Clone)]
pub struct LinkFrame {
    pub data: Vec<u8>,
    pub arrival: DateTime<Utc>,
    pub src_mac: [u8; 6],
    pub dst_mac: [u8; 6],
    pub ethertype: u16,
}

/// Findings the parser records instead of failing
///
/// Parse problems are data for the rule engine, not errors. A flawed packet
/// still reaches classification so the Malformed-class rules can fire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParseFlaw {
    /// Frame ended before the layer being decoded
    pub truncated: bool,
    /// Declared IP header length below the 20-byte minimum or past frame end
    pub short_header: bool,
    /// Declared total length differs from received byte count
    pub length_mismatch: bool,
    /// Option length of 0/1 or running past the header end
    pub malformed_option: bool,
}

impl ParseFlaw {
    pub fn any(&self) -> bool {
        self.truncated || self.short_header || self.length_mismatch || self.malformed_option
    }
}

/// One fully decoded frame ready for rule evaluation
#[derive(Debug, Clone)]
pub struct ParsedPacket {
    pub frame: LinkFrame,
    pub ip: Option<IpHeader>,
    pub transport: Option<TransportHeader>,
    pub flaws: ParseFlaw,
}

impl ParsedPacket {
    pub fn src_ip(&self) -> Option<Ipv4Addr> {
        self.ip.as_ref().map(|h| h.src_ip)
    }

    pub fn dst_ip(&self) -> Option<Ipv4Addr> {
        self.ip.as_ref().map(|h| h.dst_ip)
    }

    pub fn src_port(&self) -> Option<u16> {
        match &self.transport {
            Some(TransportHeader::Tcp { src_port, .. }) => Some(*src_port),
            Some(TransportHeader::Udp { src_port, .. }) => Some(*src_port),
            _ => None,
        }
    }

    pub fn dst_port(&self) -> Option<u16> {
        match &self.transport {
            Some(TransportHeader::Tcp { dst_port, .. }) => Some(*dst_port),
            Some(TransportHeader::Udp { dst_port, .. }) => Some(*dst_port),
            _ => None,
        }
    }

    pub fn protocol(&self) -> Option<IpProtocol> {
        self.ip.as_ref().map(|h| IpProtocol::from(h.protocol))
    }

    pub fn tcp_flags(&self) -> Option<TcpFlags> {
        match &self.transport {
            Some(TransportHeader::Tcp { flags, .. }) => Some(*flags),
            _ => None,
        }
    }

    /// True for IPv4 packets that are part of a fragment set
    pub fn is_fragment(&self) -> bool {
        self.ip
            .as_ref()
            .map(|h| h.more_fragments || h.fragment_offset > 0)
            .unwrap_or(false)
    }

    /// Stable hash of the flow identity, used to pin a flow to one worker
    ///
    /// Both directions of a connection must hash alike, so stateful
    /// trackers on one worker see the whole exchange. The endpoint pair is
    /// ordered smaller-first before hashing.
    pub fn flow_hash(&self) -> u64 {
        use std::hash::{Hash, Hasher};
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        if let Some(ip) = &self.ip {
            ip.protocol.hash(&mut hasher);
            // Fragments of one datagram share identification, not ports,
            // and all travel in one direction
            if self.is_fragment() {
                ip.src_ip.hash(&mut hasher);
                ip.dst_ip.hash(&mut hasher);
                ip.identification.hash(&mut hasher);
            } else {
                let a = (ip.src_ip, self.src_port());
                let b = (ip.dst_ip, self.dst_port());
                let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
                lo.hash(&mut hasher);
                hi.hash(&mut hasher);
            }
        }
        hasher.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tcp_flags_roundtrip() {
        let flags = TcpFlags::from_u8(0x12); // SYN|ACK
        assert!(flags.syn);
        assert!(flags.ack);
        assert!(!flags.fin);
        assert_eq!(flags.to_u8(), 0x12);
    }

    #[test]
    fn test_tcp_flags_none_set() {
        assert!(TcpFlags::from_u8(0).none_set());
        assert!(!TcpFlags::from_u8(0x02).none_set());
    }

    #[test]
    fn test_option_kind_mapping() {
        assert_eq!(IpOptionKind::from(130), IpOptionKind::Security);
        assert_eq!(IpOptionKind::from(131), IpOptionKind::LooseRoute);
        assert_eq!(IpOptionKind::from(7), IpOptionKind::RecordRoute);
        assert_eq!(IpOptionKind::from(136), IpOptionKind::StreamId);
        assert_eq!(IpOptionKind::from(137), IpOptionKind::StrictRoute);
        assert_eq!(IpOptionKind::from(68), IpOptionKind::Timestamp);
        assert_eq!(IpOptionKind::from(99), IpOptionKind::Unknown(99));
    }

    #[test]
    fn test_protocol_mapping() {
        assert_eq!(IpProtocol::from(6), IpProtocol::Tcp);
        assert_eq!(u8::from(IpProtocol::Other(143)), 143);
    }
}
