//! Frame decoding
//!
//! Hand-rolled decoder for Ethernet/IPv4/transport headers. The input is
//! adversarial by definition, so decoding is total: malformed structure is
//! recorded in `ParseFlaw` and the packet still reaches the rule engine
//! instead of being rejected. Only fields that physically are not on the
//! wire stop decoding of deeper layers.

use chrono::{DateTime, Utc};

use super::packet::{
    IpHeader, IpOption, IpOptionKind, LinkFrame, ParseFlaw, ParsedPacket, TcpFlags,
    TransportHeader,
};

/// Ethernet header length
const ETH_HEADER_LEN: usize = 14;
/// EtherType for IPv4
const ETHERTYPE_IPV4: u16 = 0x0800;
/// Minimum IPv4 header length
const IP_MIN_HEADER_LEN: usize = 20;

/// Decode one captured frame
///
/// Never fails and never panics; structural problems end up in
/// `ParsedPacket::flaws`.
pub fn parse(data: &[u8], arrival: DateTime<Utc>) -> ParsedPacket {
    let mut flaws = ParseFlaw::default();

    let frame = link_frame(data, arrival, &mut flaws);
    let ethertype = frame.ethertype;

    if flaws.truncated || ethertype != ETHERTYPE_IPV4 {
        return ParsedPacket {
            frame,
            ip: None,
            transport: None,
            flaws,
        };
    }

    let ip_data = &data[ETH_HEADER_LEN..];
    let ip = parse_ipv4(ip_data, &mut flaws);

    // A short or truncated header makes every later offset unreliable, so
    // transport decoding stops here. Non-first fragments carry no transport
    // header either.
    let transport = match &ip {
        Some(header) if !flaws.short_header && !flaws.truncated && header.fragment_offset == 0 => {
            let hlen = header.header_length as usize;
            if hlen <= ip_data.len() {
                parse_transport(header.protocol, &ip_data[hlen..], &mut flaws)
            } else {
                None
            }
        }
        _ => None,
    };

    ParsedPacket {
        frame,
        ip,
        transport,
        flaws,
    }
}

fn link_frame(data: &[u8], arrival: DateTime<Utc>, flaws: &mut ParseFlaw) -> LinkFrame {
    let mut src_mac = [0u8; 6];
    let mut dst_mac = [0u8; 6];
    let mut ethertype = 0u16;

    if data.len() >= ETH_HEADER_LEN {
        dst_mac.copy_from_slice(&data[0..6]);
        src_mac.copy_from_slice(&data[6..12]);
        ethertype = u16::from_be_bytes([data[12], data[13]]);
    } else {
        flaws.truncated = true;
    }

    LinkFrame {
        data: data.to_vec(),
        arrival,
        src_mac,
        dst_mac,
        ethertype,
    }
}

fn parse_ipv4(data: &[u8], flaws: &mut ParseFlaw) -> Option<IpHeader> {
    if data.len() < IP_MIN_HEADER_LEN {
        flaws.truncated = true;
        return None;
    }

    let version = (data[0] >> 4) & 0x0f;
    if version != 4 {
        return None;
    }

    let header_length = ((data[0] & 0x0f) as usize) * 4;
    let total_length = u16::from_be_bytes([data[2], data[3]]);
    let identification = u16::from_be_bytes([data[4], data[5]]);
    let flags_frag = u16::from_be_bytes([data[6], data[7]]);
    let ttl = data[8];
    let protocol = data[9];
    let src_ip = std::net::Ipv4Addr::new(data[12], data[13], data[14], data[15]);
    let dst_ip = std::net::Ipv4Addr::new(data[16], data[17], data[18], data[19]);

    // Declared header length below the fixed-part minimum, or past the
    // frame end. The fixed fields above are still valid either way.
    if header_length < IP_MIN_HEADER_LEN || header_length > data.len() {
        flaws.short_header = true;
    }

    if total_length as usize != data.len() {
        flaws.length_mismatch = true;
    }

    let options = if flaws.short_header {
        Vec::new()
    } else {
        parse_options(&data[IP_MIN_HEADER_LEN..header_length], flaws)
    };

    Some(IpHeader {
        version,
        header_length: header_length as u8,
        total_length,
        identification,
        dont_fragment: flags_frag & 0x4000 != 0,
        more_fragments: flags_frag & 0x2000 != 0,
        fragment_offset: flags_frag & 0x1fff,
        ttl,
        protocol,
        src_ip,
        dst_ip,
        options,
    })
}

/// Decode the option list between the fixed header and the declared header end
///
/// Enumeration stops at end-of-list, at the first structurally broken option
/// (recorded as a flaw), or at the header end.
fn parse_options(area: &[u8], flaws: &mut ParseFlaw) -> Vec<IpOption> {
    let mut options = Vec::new();
    let mut pos = 0;

    while pos < area.len() {
        let kind_octet = area[pos];
        match kind_octet {
            // End of option list
            0 => break,
            // No-operation padding
            1 => {
                pos += 1;
            }
            _ => {
                if pos + 1 >= area.len() {
                    flaws.malformed_option = true;
                    break;
                }
                let len = area[pos + 1] as usize;
                if len < 2 || pos + len > area.len() {
                    flaws.malformed_option = true;
                    break;
                }
                options.push(IpOption {
                    kind: IpOptionKind::from(kind_octet),
                    data: area[pos + 2..pos + len].to_vec(),
                });
                pos += len;
            }
        }
    }

    options
}

fn parse_transport(protocol: u8, data: &[u8], flaws: &mut ParseFlaw) -> Option<TransportHeader> {
    match protocol {
        6 => parse_tcp(data, flaws),
        17 => parse_udp(data, flaws),
        1 => parse_icmp(data, flaws),
        other => Some(TransportHeader::Other { protocol: other }),
    }
}

fn parse_tcp(data: &[u8], flaws: &mut ParseFlaw) -> Option<TransportHeader> {
    if data.len() < 20 {
        flaws.truncated = true;
        return None;
    }

    let data_offset = ((data[12] >> 4) & 0x0f) as usize * 4;
    let payload = if data_offset >= 20 && data_offset <= data.len() {
        data[data_offset..].to_vec()
    } else {
        flaws.truncated = true;
        Vec::new()
    };

    Some(TransportHeader::Tcp {
        src_port: u16::from_be_bytes([data[0], data[1]]),
        dst_port: u16::from_be_bytes([data[2], data[3]]),
        seq: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
        ack: u32::from_be_bytes([data[8], data[9], data[10], data[11]]),
        flags: TcpFlags::from_u8(data[13] & 0x3f),
        payload,
    })
}

fn parse_udp(data: &[u8], flaws: &mut ParseFlaw) -> Option<TransportHeader> {
    if data.len() < 8 {
        flaws.truncated = true;
        return None;
    }

    Some(TransportHeader::Udp {
        src_port: u16::from_be_bytes([data[0], data[1]]),
        dst_port: u16::from_be_bytes([data[2], data[3]]),
        length: u16::from_be_bytes([data[4], data[5]]),
        payload_len: data.len() - 8,
    })
}

fn parse_icmp(data: &[u8], flaws: &mut ParseFlaw) -> Option<TransportHeader> {
    if data.len() < 8 {
        flaws.truncated = true;
        return None;
    }

    Some(TransportHeader::Icmp {
        icmp_type: data[0],
        code: data[1],
        payload_len: data.len() - 8,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::packet::IpProtocol;

    fn make_tcp_packet(flags: u8) -> Vec<u8> {
        let mut pkt = vec![
            0x00, 0x11, 0x22, 0x33, 0x44, 0x55, // dst mac
            0x66, 0x77, 0x88, 0x99, 0xaa, 0xbb, // src mac
            0x08, 0x00, // ethertype IPv4
        ];
        pkt.extend_from_slice(&[
            0x45, // version=4, ihl=5
            0x00, // dscp/ecn
            0x00, 0x28, // total length (40 = 20 IP + 20 TCP)
            0x12, 0x34, // identification
            0x40, 0x00, // flags (DF), fragment offset
            0x40, // TTL
            0x06, // protocol TCP
            0x00, 0x00, // checksum (ignored)
            192, 168, 1, 100, // src IP
            10, 0, 0, 1, // dst IP
        ]);
        pkt.extend_from_slice(&[
            0x30, 0x39, // src port 12345
            0x00, 0x50, // dst port 80
            0x00, 0x00, 0x00, 0x01, // seq
            0x00, 0x00, 0x00, 0x00, // ack
            0x50, flags, // data offset=5, flags
            0xff, 0xff, // window
            0x00, 0x00, // checksum
            0x00, 0x00, // urgent pointer
        ]);
        pkt
    }

    #[test]
    fn test_parse_tcp_syn() {
        let data = make_tcp_packet(0x02);
        let pkt = parse(&data, Utc::now());

        assert!(!pkt.flaws.any());
        let ip = pkt.ip.as_ref().unwrap();
        assert_eq!(ip.src_ip.to_string(), "192.168.1.100");
        assert_eq!(ip.dst_ip.to_string(), "10.0.0.1");
        assert_eq!(pkt.protocol(), Some(IpProtocol::Tcp));
        assert_eq!(pkt.src_port(), Some(12345));
        assert_eq!(pkt.dst_port(), Some(80));

        let flags = pkt.tcp_flags().unwrap();
        assert!(flags.syn);
        assert!(!flags.ack);
    }

    #[test]
    fn test_parse_empty_frame() {
        let pkt = parse(&[], Utc::now());
        assert!(pkt.flaws.truncated);
        assert!(pkt.ip.is_none());
        assert!(pkt.transport.is_none());
    }

    #[test]
    fn test_parse_non_ip_frame() {
        let mut data = vec![0u8; 14];
        data[12] = 0x08;
        data[13] = 0x06; // ARP
        let pkt = parse(&data, Utc::now());
        assert!(!pkt.flaws.any());
        assert!(pkt.ip.is_none());
    }

    #[test]
    fn test_short_header_flagged_but_fields_kept() {
        let mut data = make_tcp_packet(0x02);
        data[14] = 0x41; // ihl=1 -> 4 bytes, below the 20-byte minimum
        let pkt = parse(&data, Utc::now());

        assert!(pkt.flaws.short_header);
        // Fixed fields still parsed
        let ip = pkt.ip.as_ref().unwrap();
        assert_eq!(ip.src_ip.to_string(), "192.168.1.100");
        // Deeper layers not decoded
        assert!(pkt.transport.is_none());
    }

    #[test]
    fn test_length_mismatch_flagged() {
        let mut data = make_tcp_packet(0x02);
        data[16] = 0x01; // total length = 296, actual 40
        data[17] = 0x28;
        let pkt = parse(&data, Utc::now());
        assert!(pkt.flaws.length_mismatch);
        assert!(pkt.ip.is_some());
    }

    #[test]
    fn test_options_enumerated_in_order() {
        // ihl=7 -> 28 bytes: 20 fixed + 8 option bytes
        let mut data = vec![
            0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xaa, 0xbb, 0x08, 0x00,
        ];
        data.extend_from_slice(&[
            0x47, 0x00, 0x00, 0x1c, // ihl=7, total length 28
            0x00, 0x01, 0x00, 0x00, 0x40, 0x01, 0x00, 0x00, // id/flags/ttl/proto ICMP
            10, 0, 0, 1, 10, 0, 0, 2,
        ]);
        // Record route (7) len 3, then Stream ID (136) len 4, then EOL
        data.extend_from_slice(&[7, 3, 0, 136, 4, 0, 0, 0]);

        let pkt = parse(&data, Utc::now());
        let ip = pkt.ip.as_ref().unwrap();
        assert_eq!(ip.options.len(), 2);
        assert_eq!(ip.options[0].kind, IpOptionKind::RecordRoute);
        assert_eq!(ip.options[1].kind, IpOptionKind::StreamId);
        assert!(!pkt.flaws.malformed_option);
    }

    #[test]
    fn test_malformed_option_stops_enumeration() {
        let mut data = vec![
            0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xaa, 0xbb, 0x08, 0x00,
        ];
        data.extend_from_slice(&[
            0x46, 0x00, 0x00, 0x18, // ihl=6, total length 24
            0x00, 0x01, 0x00, 0x00, 0x40, 0x01, 0x00, 0x00,
            10, 0, 0, 1, 10, 0, 0, 2,
        ]);
        // Option with declared length running past the header end
        data.extend_from_slice(&[131, 40, 0, 0]);

        let pkt = parse(&data, Utc::now());
        assert!(pkt.flaws.malformed_option);
        assert!(pkt.ip.as_ref().unwrap().options.is_empty());
    }

    #[test]
    fn test_unknown_protocol_still_parses() {
        let mut data = make_tcp_packet(0x02);
        data[23] = 200; // protocol field
        let pkt = parse(&data, Utc::now());
        assert_eq!(pkt.protocol(), Some(IpProtocol::Other(200)));
        assert!(matches!(
            pkt.transport,
            Some(TransportHeader::Other { protocol: 200 })
        ));
    }
}
