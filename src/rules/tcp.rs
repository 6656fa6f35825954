//! TCP flag anomaly predicates

use crate::config::Config;
use crate::core::{ParsedPacket, RuleId, TcpFlags};

use super::Finding;

fn flags(packet: &ParsedPacket) -> Option<TcpFlags> {
    packet.tcp_flags()
}

pub fn no_bits_set(packet: &ParsedPacket, _config: &Config) -> Vec<Finding> {
    match flags(packet) {
        Some(f) if f.none_set() => {
            vec![Finding::new(
                RuleId::TcpNoBitsSet,
                "TCP segment with no control flags set",
            )
            .with_evidence("flags", 0u8)]
        }
        _ => Vec::new(),
    }
}

pub fn syn_and_fin(packet: &ParsedPacket, _config: &Config) -> Vec<Finding> {
    match flags(packet) {
        Some(f) if f.syn && f.fin => {
            vec![Finding::new(
                RuleId::TcpSynAndFin,
                "TCP segment with SYN and FIN both set",
            )
            .with_evidence("flags", f.to_u8())]
        }
        _ => Vec::new(),
    }
}

pub fn fin_no_ack(packet: &ParsedPacket, _config: &Config) -> Vec<Finding> {
    match flags(packet) {
        Some(f) if f.fin && !f.ack => {
            vec![Finding::new(
                RuleId::TcpFinNoAck,
                "TCP FIN without ACK",
            )
            .with_evidence("flags", f.to_u8())]
        }
        _ => Vec::new(),
    }
}
