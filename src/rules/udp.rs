//! UDP length abuse predicates

use crate::config::Config;
use crate::core::{ParsedPacket, RuleId, TransportHeader};

use super::Finding;

/// UDP header size; a declared length below this cannot be valid
pub const UDP_HEADER_LEN: u16 = 8;

fn udp_length(packet: &ParsedPacket) -> Option<u16> {
    match &packet.transport {
        Some(TransportHeader::Udp { length, .. }) => Some(*length),
        _ => None,
    }
}

pub fn short_header(packet: &ParsedPacket, _config: &Config) -> Vec<Finding> {
    match udp_length(packet) {
        Some(length) if length < UDP_HEADER_LEN => {
            vec![
                Finding::new(
                    RuleId::UdpShortHeader,
                    format!("UDP length field {} below header size", length),
                )
                .with_evidence("udp_length", length),
            ]
        }
        _ => Vec::new(),
    }
}

pub fn bomb(packet: &ParsedPacket, config: &Config) -> Vec<Finding> {
    match udp_length(packet) {
        Some(length) if length > config.udp.bomb_max_length => {
            vec![
                Finding::new(
                    RuleId::UdpBomb,
                    format!("UDP bomb: declared length {}", length),
                )
                .with_evidence("udp_length", length),
            ]
        }
        _ => Vec::new(),
    }
}
