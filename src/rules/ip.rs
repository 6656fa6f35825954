//! IP-layer and IP-option predicates

use crate::config::Config;
use crate::core::{IpOptionKind, ParsedPacket, RuleId};

use super::Finding;

/// Lowest unassigned IP protocol number in the catalogue
pub const UNKNOWN_PROTOCOL_MIN: u8 = 143;

pub fn unknown_ip_protocol(packet: &ParsedPacket, _config: &Config) -> Vec<Finding> {
    let Some(ip) = &packet.ip else {
        return Vec::new();
    };
    if ip.protocol >= UNKNOWN_PROTOCOL_MIN {
        vec![
            Finding::new(
                RuleId::UnknownIpProtocol,
                format!("unknown IP protocol {}", ip.protocol),
            )
            .with_evidence("protocol", ip.protocol),
        ]
    } else {
        Vec::new()
    }
}

pub fn land_attack(packet: &ParsedPacket, _config: &Config) -> Vec<Finding> {
    let Some(ip) = &packet.ip else {
        return Vec::new();
    };
    if ip.src_ip == ip.dst_ip {
        vec![
            Finding::new(
                RuleId::LandAttack,
                format!("land attack: src == dst == {}", ip.src_ip),
            )
            .with_evidence("addr", ip.src_ip.to_string()),
        ]
    } else {
        Vec::new()
    }
}

pub fn short_ip_header(packet: &ParsedPacket, _config: &Config) -> Vec<Finding> {
    if !packet.flaws.short_header {
        return Vec::new();
    }
    let declared = packet.ip.as_ref().map(|ip| ip.header_length).unwrap_or(0);
    vec![
        Finding::new(
            RuleId::ShortIpHeader,
            format!("short IP header: declared {} bytes", declared),
        )
        .with_evidence("header_length", declared),
    ]
}

pub fn malformed_ip_packet(packet: &ParsedPacket, _config: &Config) -> Vec<Finding> {
    if !packet.flaws.length_mismatch {
        return Vec::new();
    }
    let declared = packet.ip.as_ref().map(|ip| ip.total_length).unwrap_or(0);
    vec![
        Finding::new(
            RuleId::MalformedIpPacket,
            format!("malformed IP packet: declared total length {}", declared),
        )
        .with_evidence("total_length", declared),
    ]
}

pub fn malformed_ip_opt(packet: &ParsedPacket, _config: &Config) -> Vec<Finding> {
    if packet.flaws.malformed_option {
        vec![Finding::new(
            RuleId::MalformedIpOpt,
            "malformed IP option structure",
        )]
    } else {
        Vec::new()
    }
}

fn option_finding(packet: &ParsedPacket, kind: IpOptionKind, rule: RuleId) -> Vec<Finding> {
    let Some(ip) = &packet.ip else {
        return Vec::new();
    };
    if ip.options.iter().any(|o| o.kind == kind) {
        vec![Finding::new(rule, format!("IP option present: {:?}", kind))]
    } else {
        Vec::new()
    }
}

pub fn opt_security(packet: &ParsedPacket, _config: &Config) -> Vec<Finding> {
    option_finding(packet, IpOptionKind::Security, RuleId::IpOptSecurity)
}

pub fn opt_loose_route(packet: &ParsedPacket, _config: &Config) -> Vec<Finding> {
    option_finding(packet, IpOptionKind::LooseRoute, RuleId::IpOptLooseRoute)
}

pub fn opt_record_route(packet: &ParsedPacket, _config: &Config) -> Vec<Finding> {
    option_finding(packet, IpOptionKind::RecordRoute, RuleId::IpOptRecordRoute)
}

pub fn opt_stream_id(packet: &ParsedPacket, _config: &Config) -> Vec<Finding> {
    option_finding(packet, IpOptionKind::StreamId, RuleId::IpOptStreamId)
}

pub fn opt_strict_route(packet: &ParsedPacket, _config: &Config) -> Vec<Finding> {
    option_finding(packet, IpOptionKind::StrictRoute, RuleId::IpOptStrictRoute)
}

pub fn opt_timestamp(packet: &ParsedPacket, _config: &Config) -> Vec<Finding> {
    option_finding(packet, IpOptionKind::Timestamp, RuleId::IpOptTimestamp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::parse;
    use chrono::Utc;

    fn ip_packet(protocol: u8, src: [u8; 4], dst: [u8; 4]) -> Vec<u8> {
        let mut data = vec![
            0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xaa, 0xbb, 0x08, 0x00,
        ];
        data.extend_from_slice(&[
            0x45, 0x00, 0x00, 0x14, // ihl=5, total length 20
            0x00, 0x01, 0x00, 0x00, 0x40, protocol, 0x00, 0x00,
        ]);
        data.extend_from_slice(&src);
        data.extend_from_slice(&dst);
        data
    }

    #[test]
    fn test_unknown_protocol_boundary() {
        let config = Config::default();

        let pkt = parse(&ip_packet(143, [10, 0, 0, 1], [10, 0, 0, 2]), Utc::now());
        assert_eq!(unknown_ip_protocol(&pkt, &config).len(), 1);

        let pkt = parse(&ip_packet(142, [10, 0, 0, 1], [10, 0, 0, 2]), Utc::now());
        assert!(unknown_ip_protocol(&pkt, &config).is_empty());
    }

    #[test]
    fn test_land_attack_same_addresses() {
        let config = Config::default();

        let pkt = parse(&ip_packet(6, [10, 0, 0, 1], [10, 0, 0, 1]), Utc::now());
        assert_eq!(land_attack(&pkt, &config).len(), 1);

        let pkt = parse(&ip_packet(6, [10, 0, 0, 1], [10, 0, 0, 2]), Utc::now());
        assert!(land_attack(&pkt, &config).is_empty());
    }
}
