//! ICMP probing and abuse predicates

use crate::config::Config;
use crate::core::{ParsedPacket, RuleId, TransportHeader};

use super::Finding;

/// ICMP type codes flagged by the catalogue
pub mod icmp_types {
    pub const SOURCE_QUENCH: u8 = 4;
    pub const TIMESTAMP_REQUEST: u8 = 13;
    pub const TIMESTAMP_REPLY: u8 = 14;
    pub const INFO_REQUEST: u8 = 15;
    pub const INFO_REPLY: u8 = 16;
    pub const MASK_REQUEST: u8 = 17;
    pub const MASK_REPLY: u8 = 18;
}

fn icmp_header(packet: &ParsedPacket) -> Option<(u8, u8, usize)> {
    match &packet.transport {
        Some(TransportHeader::Icmp {
            icmp_type,
            code,
            payload_len,
        }) => Some((*icmp_type, *code, *payload_len)),
        _ => None,
    }
}

fn type_finding(packet: &ParsedPacket, wanted: u8, rule: RuleId, what: &str) -> Vec<Finding> {
    match icmp_header(packet) {
        Some((icmp_type, code, _)) if icmp_type == wanted => {
            vec![
                Finding::new(rule, format!("ICMP {}", what))
                    .with_evidence("icmp_type", icmp_type)
                    .with_evidence("icmp_code", code),
            ]
        }
        _ => Vec::new(),
    }
}

pub fn source_quench(packet: &ParsedPacket, _config: &Config) -> Vec<Finding> {
    type_finding(
        packet,
        icmp_types::SOURCE_QUENCH,
        RuleId::SourceQuench,
        "source quench",
    )
}

pub fn timestamp_request(packet: &ParsedPacket, _config: &Config) -> Vec<Finding> {
    type_finding(
        packet,
        icmp_types::TIMESTAMP_REQUEST,
        RuleId::TimestampRequest,
        "timestamp request",
    )
}

pub fn timestamp_reply(packet: &ParsedPacket, _config: &Config) -> Vec<Finding> {
    type_finding(
        packet,
        icmp_types::TIMESTAMP_REPLY,
        RuleId::TimestampReply,
        "timestamp reply",
    )
}

pub fn info_request(packet: &ParsedPacket, _config: &Config) -> Vec<Finding> {
    type_finding(
        packet,
        icmp_types::INFO_REQUEST,
        RuleId::InfoRequest,
        "information request",
    )
}

pub fn info_reply(packet: &ParsedPacket, _config: &Config) -> Vec<Finding> {
    type_finding(
        packet,
        icmp_types::INFO_REPLY,
        RuleId::InfoReply,
        "information reply",
    )
}

pub fn mask_request(packet: &ParsedPacket, _config: &Config) -> Vec<Finding> {
    type_finding(
        packet,
        icmp_types::MASK_REQUEST,
        RuleId::MaskRequest,
        "address mask request",
    )
}

pub fn mask_reply(packet: &ParsedPacket, _config: &Config) -> Vec<Finding> {
    type_finding(
        packet,
        icmp_types::MASK_REPLY,
        RuleId::MaskReply,
        "address mask reply",
    )
}

pub fn too_large(packet: &ParsedPacket, config: &Config) -> Vec<Finding> {
    match icmp_header(packet) {
        Some((icmp_type, _, payload_len)) if payload_len >= config.icmp.max_payload => {
            vec![
                Finding::new(
                    RuleId::IcmpTooLarge,
                    format!("oversized ICMP payload: {} bytes", payload_len),
                )
                .with_evidence("icmp_type", icmp_type)
                .with_evidence("payload_len", payload_len as u64),
            ]
        }
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::parse;
    use chrono::Utc;

    fn icmp_packet(icmp_type: u8, payload_len: usize) -> Vec<u8> {
        let total = 20 + 8 + payload_len;
        let mut data = vec![
            0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xaa, 0xbb, 0x08, 0x00,
        ];
        data.extend_from_slice(&[
            0x45,
            0x00,
            (total >> 8) as u8,
            (total & 0xff) as u8,
            0x00,
            0x01,
            0x00,
            0x00,
            0x40,
            0x01, // ICMP
            0x00,
            0x00,
            10,
            0,
            0,
            1,
            10,
            0,
            0,
            2,
        ]);
        data.extend_from_slice(&[icmp_type, 0, 0, 0, 0, 0, 0, 0]);
        data.extend(std::iter::repeat(0u8).take(payload_len));
        data
    }

    #[test]
    fn test_probe_types_fire() {
        let config = Config::default();
        for (icmp_type, expected) in [
            (icmp_types::SOURCE_QUENCH, RuleId::SourceQuench),
            (icmp_types::TIMESTAMP_REQUEST, RuleId::TimestampRequest),
            (icmp_types::MASK_REPLY, RuleId::MaskReply),
        ] {
            let pkt = parse(&icmp_packet(icmp_type, 0), Utc::now());
            let findings = match expected {
                RuleId::SourceQuench => source_quench(&pkt, &config),
                RuleId::TimestampRequest => timestamp_request(&pkt, &config),
                RuleId::MaskReply => mask_reply(&pkt, &config),
                _ => unreachable!(),
            };
            assert_eq!(findings.len(), 1);
            assert_eq!(findings[0].rule, expected);
        }
    }

    #[test]
    fn test_echo_request_not_flagged() {
        let config = Config::default();
        let pkt = parse(&icmp_packet(8, 0), Utc::now());
        assert!(source_quench(&pkt, &config).is_empty());
        assert!(timestamp_request(&pkt, &config).is_empty());
    }

    #[test]
    fn test_too_large_threshold() {
        let config = Config::default();

        let pkt = parse(&icmp_packet(8, 1026), Utc::now());
        assert_eq!(too_large(&pkt, &config).len(), 1);

        let pkt = parse(&icmp_packet(8, 1024), Utc::now());
        assert!(too_large(&pkt, &config).is_empty());
    }
}
