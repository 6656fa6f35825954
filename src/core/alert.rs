//! Alert records
//!
//! Immutable alert format emitted by the rule engine. Once emitted an alert
//! is never mutated or retracted; the sink owns delivery and persistence.

use std::collections::HashMap;
use std::net::Ipv4Addr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Alert severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum Severity {
    Info = 0,
    Low = 1,
    Medium = 2,
    High = 3,
    Critical = 4,
}

impl Default for Severity {
    fn default() -> Self {
        Severity::Medium
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "INFO"),
            Severity::Low => write!(f, "LOW"),
            Severity::Medium => write!(f, "MEDIUM"),
            Severity::High => write!(f, "HIGH"),
            Severity::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// The fixed rule catalogue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleId {
    // IP layer
    UnknownIpProtocol,
    LandAttack,
    ShortIpHeader,
    MalformedIpPacket,

    // IP options
    IpOptSecurity,
    IpOptLooseRoute,
    IpOptRecordRoute,
    IpOptStreamId,
    IpOptStrictRoute,
    IpOptTimestamp,
    MalformedIpOpt,

    // Fragmentation
    FragmentStorm,
    LargeFragmentOffset,
    TooManyFragment,
    Teardrop,
    SameFragmentOffset,
    InvalidFragment,

    // ICMP
    SourceQuench,
    TimestampRequest,
    TimestampReply,
    InfoRequest,
    InfoReply,
    MaskRequest,
    MaskReply,
    IcmpTooLarge,

    // UDP
    UdpShortHeader,
    UdpBomb,

    // TCP
    TcpNoBitsSet,
    TcpSynAndFin,
    TcpFinNoAck,

    // FTP
    FtpImproperPort,
}

impl std::fmt::Display for RuleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RuleId::UnknownIpProtocol => "unknown_ip_protocol",
            RuleId::LandAttack => "land_attack",
            RuleId::ShortIpHeader => "short_ip_header",
            RuleId::MalformedIpPacket => "malformed_ip_packet",
            RuleId::IpOptSecurity => "ip_opt_security",
            RuleId::IpOptLooseRoute => "ip_opt_loose_route",
            RuleId::IpOptRecordRoute => "ip_opt_record_route",
            RuleId::IpOptStreamId => "ip_opt_stream_id",
            RuleId::IpOptStrictRoute => "ip_opt_strict_route",
            RuleId::IpOptTimestamp => "ip_opt_timestamp",
            RuleId::MalformedIpOpt => "malformed_ip_opt",
            RuleId::FragmentStorm => "fragment_storm",
            RuleId::LargeFragmentOffset => "large_fragment_offset",
            RuleId::TooManyFragment => "too_many_fragment",
            RuleId::Teardrop => "teardrop",
            RuleId::SameFragmentOffset => "same_fragment_offset",
            RuleId::InvalidFragment => "invalid_fragment",
            RuleId::SourceQuench => "source_quench",
            RuleId::TimestampRequest => "timestamp_request",
            RuleId::TimestampReply => "timestamp_reply",
            RuleId::InfoRequest => "info_request",
            RuleId::InfoReply => "info_reply",
            RuleId::MaskRequest => "mask_request",
            RuleId::MaskReply => "mask_reply",
            RuleId::IcmpTooLarge => "icmp_too_large",
            RuleId::UdpShortHeader => "udp_short_header",
            RuleId::UdpBomb => "udp_bomb",
            RuleId::TcpNoBitsSet => "tcp_no_bits_set",
            RuleId::TcpSynAndFin => "tcp_syn_and_fin",
            RuleId::TcpFinNoAck => "tcp_fin_no_ack",
            RuleId::FtpImproperPort => "ftp_improper_port",
        };
        write!(f, "{}", name)
    }
}

/// One fired detection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    /// Unique alert ID
    pub id: Uuid,
    /// Fired rule
    pub rule: RuleId,
    /// Severity from the catalogue entry
    pub severity: Severity,
    /// Packet arrival time
    pub timestamp: DateTime<Utc>,
    /// Source address
    pub src_ip: Ipv4Addr,
    /// Destination address
    pub dst_ip: Ipv4Addr,
    /// Source port where the transport layer has one
    pub src_port: Option<u16>,
    /// Destination port where the transport layer has one
    pub dst_port: Option<u16>,
    /// Human-readable description
    pub message: String,
    /// Raw offending field values
    pub evidence: HashMap<String, serde_json::Value>,
}

impl Alert {
    pub fn new(
        rule: RuleId,
        severity: Severity,
        timestamp: DateTime<Utc>,
        src_ip: Ipv4Addr,
        dst_ip: Ipv4Addr,
        message: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            rule,
            severity,
            timestamp,
            src_ip,
            dst_ip,
            src_port: None,
            dst_port: None,
            message,
            evidence: HashMap::new(),
        }
    }

    pub fn with_ports(mut self, src_port: Option<u16>, dst_port: Option<u16>) -> Self {
        self.src_port = src_port;
        self.dst_port = dst_port;
        self
    }

    pub fn with_evidence(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.evidence.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alert_builder() {
        let alert = Alert::new(
            RuleId::LandAttack,
            Severity::High,
            Utc::now(),
            Ipv4Addr::new(10, 0, 0, 1),
            Ipv4Addr::new(10, 0, 0, 1),
            "land attack".into(),
        )
        .with_ports(Some(80), Some(80))
        .with_evidence("src_ip", "10.0.0.1");

        assert_eq!(alert.rule, RuleId::LandAttack);
        assert_eq!(alert.src_port, Some(80));
        assert!(alert.evidence.contains_key("src_ip"));
    }

    #[test]
    fn test_rule_id_display() {
        assert_eq!(RuleId::TcpSynAndFin.to_string(), "tcp_syn_and_fin");
        assert_eq!(RuleId::FtpImproperPort.to_string(), "ftp_improper_port");
    }

    #[test]
    fn test_alert_serializes() {
        let alert = Alert::new(
            RuleId::UdpBomb,
            Severity::High,
            Utc::now(),
            Ipv4Addr::new(1, 2, 3, 4),
            Ipv4Addr::new(5, 6, 7, 8),
            "udp bomb".into(),
        );
        let json = serde_json::to_string(&alert).unwrap();
        assert!(json.contains("udp_bomb"));
    }
}
