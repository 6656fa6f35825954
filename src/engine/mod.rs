//! Classification engine
//!
//! Ties the parser, the rule catalogue and the two stateful trackers into
//! one per-worker unit. `AnalysisEngine` is single-threaded by design; the
//! worker pool gives each worker its own instance and routes every flow to
//! exactly one of them.

pub mod sink;
pub mod workers;

use std::time::Instant;

use chrono::{DateTime, Utc};

use crate::config::Config;
use crate::core::{parse, Alert, ParsedPacket, RuleId};
use crate::fragment::{expired_finding, ExpiredGroup, FragmentStats, FragmentTracker};
use crate::ftp::{FtpStats, FtpTracker};
use crate::rules::RuleCatalog;

/// Engine counters
#[derive(Debug, Default, Clone)]
pub struct EngineStats {
    pub packets_processed: u64,
    pub parse_flawed: u64,
    pub alerts_emitted: u64,
}

/// One worker's worth of classification state
pub struct AnalysisEngine {
    config: Config,
    catalog: RuleCatalog,
    fragments: FragmentTracker,
    ftp: FtpTracker,
    stats: EngineStats,
}

impl AnalysisEngine {
    pub fn new(config: Config) -> Self {
        let fragments = FragmentTracker::new(config.fragment.clone());
        let ftp = FtpTracker::new(config.ftp.clone());
        Self {
            config,
            catalog: RuleCatalog::new(),
            fragments,
            ftp,
            stats: EngineStats::default(),
        }
    }

    /// Parse and classify one raw frame
    pub fn process_frame(&mut self, data: &[u8], arrival: DateTime<Utc>) -> Vec<Alert> {
        let packet = parse(data, arrival);
        self.process(packet)
    }

    /// Classify an already parsed packet
    ///
    /// Runs the stateless catalogue, feeds the trackers, and merges all
    /// findings into alerts. Order of emission is the fixed catalogue
    /// order; which rules fire does not depend on it.
    pub fn process(&mut self, packet: ParsedPacket) -> Vec<Alert> {
        self.stats.packets_processed += 1;
        if packet.flaws.any() {
            self.stats.parse_flawed += 1;
        }

        let mut findings = self.catalog.evaluate(&packet, &self.config);

        // Expired groups swept on the packet path are unrelated to this
        // packet; their alerts are built from the group key, never stamped
        // with the arriving packet's addresses.
        let mut expired_alerts = Vec::new();
        if packet.is_fragment() {
            for expired in self.fragments.maybe_cleanup(Instant::now()) {
                expired_alerts.extend(self.expired_alert(&expired));
            }
            findings.extend(self.fragments.observe(&packet));
        }
        findings.extend(self.ftp.observe(&packet));

        let mut alerts = self.catalog.finalize(&packet, findings, &self.config);
        alerts.extend(expired_alerts);
        self.stats.alerts_emitted += alerts.len() as u64;
        alerts
    }

    /// Timer-driven expiration sweep
    ///
    /// Expired fragment groups surface as `InvalidFragment` alerts built
    /// from the group key, since no packet is in flight to attribute them
    /// to. Idle FTP sessions are evicted silently.
    pub fn sweep(&mut self, now: Instant) -> Vec<Alert> {
        let mut alerts = Vec::new();
        for expired in self.fragments.sweep(now) {
            alerts.extend(self.expired_alert(&expired));
        }
        self.ftp.sweep(now);
        self.stats.alerts_emitted += alerts.len() as u64;
        alerts
    }

    /// One alert per expired group, attributed to the group key
    fn expired_alert(&self, expired: &ExpiredGroup) -> Option<Alert> {
        if !self.config.rules.is_enabled(RuleId::InvalidFragment) {
            return None;
        }
        let finding = expired_finding(expired);
        let mut alert = Alert::new(
            finding.rule,
            self.catalog.severity(finding.rule),
            Utc::now(),
            expired.key.src_ip,
            expired.key.dst_ip,
            finding.message,
        );
        for (key, value) in finding.evidence {
            alert = alert.with_evidence(key, value);
        }
        Some(alert)
    }

    /// Shutdown path: discard all per-flow state without emitting alerts
    pub fn clear(&mut self) {
        self.fragments.clear();
        self.ftp.clear();
    }

    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    pub fn fragment_stats(&self) -> &FragmentStats {
        self.fragments.stats()
    }

    pub fn ftp_stats(&self) -> &FtpStats {
        self.ftp.stats()
    }
}
