//! Anomaly rule catalogue
//!
//! The catalogue is data: every rule is an entry mapping `RuleId` to
//! severity, description and (for stateless rules) a predicate over the
//! parsed packet. Stateful findings from the fragmentation and FTP trackers
//! enter through the same table so per-rule switches and severities apply
//! uniformly. Rules are mutually non-exclusive; one packet may fire several.
//!
//! Evaluation order is fixed (IP -> options -> fragmentation -> protocol
//! specific) but only affects emission sequence, never which rules fire.

pub mod icmp;
pub mod ip;
pub mod tcp;
pub mod udp;

use std::collections::HashSet;

use crate::config::Config;
use crate::core::{Alert, ParsedPacket, RuleId, Severity};

/// A rule that fired, before alert construction
#[derive(Debug, Clone)]
pub struct Finding {
    pub rule: RuleId,
    pub message: String,
    pub evidence: Vec<(String, serde_json::Value)>,
}

impl Finding {
    pub fn new(rule: RuleId, message: impl Into<String>) -> Self {
        Self {
            rule,
            message: message.into(),
            evidence: Vec::new(),
        }
    }

    pub fn with_evidence(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.evidence.push((key.into(), value.into()));
        self
    }
}

/// Stateless predicate over one parsed packet
///
/// May return several findings for option rules where each decoded option
/// type is independently notable.
type Predicate = fn(&ParsedPacket, &Config) -> Vec<Finding>;

/// One catalogue entry
pub struct RuleDef {
    pub id: RuleId,
    pub severity: Severity,
    pub description: &'static str,
    /// None for rules whose findings come from a stateful tracker
    predicate: Option<Predicate>,
}

/// The full rule table in fixed evaluation order
fn catalogue() -> Vec<RuleDef> {
    use RuleId::*;
    use Severity::*;

    let entry = |id, severity, description, predicate| RuleDef {
        id,
        severity,
        description,
        predicate,
    };

    vec![
        // IP layer
        entry(UnknownIpProtocol, Low, "IP protocol number outside the assigned range", Some(ip::unknown_ip_protocol as Predicate)),
        entry(LandAttack, High, "source and destination address identical", Some(ip::land_attack)),
        entry(ShortIpHeader, Medium, "declared IP header length below minimum", Some(ip::short_ip_header)),
        entry(MalformedIpPacket, Low, "declared total length disagrees with received bytes", Some(ip::malformed_ip_packet)),
        // IP options, each independently notable
        entry(IpOptSecurity, Info, "security IP option present", Some(ip::opt_security)),
        entry(IpOptLooseRoute, Info, "loose source routing IP option present", Some(ip::opt_loose_route)),
        entry(IpOptRecordRoute, Info, "record route IP option present", Some(ip::opt_record_route)),
        entry(IpOptStreamId, Info, "stream identifier IP option present", Some(ip::opt_stream_id)),
        entry(IpOptStrictRoute, Info, "strict source routing IP option present", Some(ip::opt_strict_route)),
        entry(IpOptTimestamp, Info, "timestamp IP option present", Some(ip::opt_timestamp)),
        entry(MalformedIpOpt, Low, "structurally broken IP option", Some(ip::malformed_ip_opt)),
        // Fragmentation, delegated to the fragment tracker
        entry(FragmentStorm, High, "fragment arrival rate from one source over threshold", None),
        entry(LargeFragmentOffset, High, "fragment offset past maximum reassembled size", None),
        entry(TooManyFragment, Medium, "fragment count ceiling exceeded for one datagram", None),
        entry(Teardrop, High, "overlapping fragments with inconsistent boundaries", None),
        entry(SameFragmentOffset, Medium, "duplicate fragment offset within one datagram", None),
        entry(InvalidFragment, Low, "fragment set expired without completing reassembly", None),
        // ICMP
        entry(SourceQuench, Low, "deprecated ICMP source quench", Some(icmp::source_quench as Predicate)),
        entry(TimestampRequest, Low, "ICMP timestamp request probe", Some(icmp::timestamp_request)),
        entry(TimestampReply, Low, "ICMP timestamp reply", Some(icmp::timestamp_reply)),
        entry(InfoRequest, Low, "ICMP information request probe", Some(icmp::info_request)),
        entry(InfoReply, Low, "ICMP information reply", Some(icmp::info_reply)),
        entry(MaskRequest, Low, "ICMP address mask request probe", Some(icmp::mask_request)),
        entry(MaskReply, Low, "ICMP address mask reply", Some(icmp::mask_reply)),
        entry(IcmpTooLarge, Medium, "oversized ICMP payload", Some(icmp::too_large)),
        // UDP
        entry(UdpShortHeader, Medium, "UDP length field below header size", Some(udp::short_header as Predicate)),
        entry(UdpBomb, High, "UDP length field over configured maximum", Some(udp::bomb)),
        // TCP
        entry(TcpNoBitsSet, Medium, "TCP segment with no control flags", Some(tcp::no_bits_set as Predicate)),
        entry(TcpSynAndFin, High, "TCP segment with SYN and FIN both set", Some(tcp::syn_and_fin)),
        entry(TcpFinNoAck, Medium, "TCP FIN without ACK", Some(tcp::fin_no_ack)),
        // FTP, delegated to the control tracker
        entry(FtpImproperPort, Medium, "FTP data port announced outside allowed range", None),
    ]
}

/// Table-driven rule evaluator
pub struct RuleCatalog {
    defs: Vec<RuleDef>,
}

impl RuleCatalog {
    pub fn new() -> Self {
        Self { defs: catalogue() }
    }

    pub fn severity(&self, rule: RuleId) -> Severity {
        self.defs
            .iter()
            .find(|d| d.id == rule)
            .map(|d| d.severity)
            .unwrap_or_default()
    }

    pub fn description(&self, rule: RuleId) -> &'static str {
        self.defs
            .iter()
            .find(|d| d.id == rule)
            .map(|d| d.description)
            .unwrap_or("")
    }

    /// Run every stateless predicate against one packet
    pub fn evaluate(&self, packet: &ParsedPacket, config: &Config) -> Vec<Finding> {
        let mut findings = Vec::new();
        for def in &self.defs {
            if !config.rules.is_enabled(def.id) {
                continue;
            }
            if let Some(predicate) = def.predicate {
                findings.extend(predicate(packet, config));
            }
        }
        findings
    }

    fn index(&self, rule: RuleId) -> usize {
        self.defs
            .iter()
            .position(|d| d.id == rule)
            .unwrap_or(usize::MAX)
    }

    /// Turn findings into alerts
    ///
    /// Applies per-rule switches to tracker-sourced findings, enforces at
    /// most one alert per (rule, packet) pair, and emits in fixed catalogue
    /// order (IP, options, fragmentation, protocol-specific) no matter how
    /// the findings were collected.
    pub fn finalize(
        &self,
        packet: &ParsedPacket,
        mut findings: Vec<Finding>,
        config: &Config,
    ) -> Vec<Alert> {
        findings.sort_by_key(|f| self.index(f.rule));
        let src_ip = packet.src_ip().unwrap_or(std::net::Ipv4Addr::UNSPECIFIED);
        let dst_ip = packet.dst_ip().unwrap_or(std::net::Ipv4Addr::UNSPECIFIED);

        let mut fired: HashSet<RuleId> = HashSet::new();
        let mut alerts = Vec::new();

        for finding in findings {
            if !config.rules.is_enabled(finding.rule) {
                continue;
            }
            if !fired.insert(finding.rule) {
                continue;
            }
            let mut alert = Alert::new(
                finding.rule,
                self.severity(finding.rule),
                packet.frame.arrival,
                src_ip,
                dst_ip,
                finding.message,
            )
            .with_ports(packet.src_port(), packet.dst_port());
            for (key, value) in finding.evidence {
                alert = alert.with_evidence(key, value);
            }
            alerts.push(alert);
        }

        alerts
    }
}

impl Default for RuleCatalog {
    fn default() -> Self {
        Self::new()
    }
}
