//! IP fragment reassembly monitoring
//!
//! Tracks fragment sets per (src, dst, protocol, identification) and raises
//! the fragmentation entries of the catalogue: duplicate offsets, teardrop
//! overlaps, offsets past the reassembly limit, oversized sets, per-source
//! storms, and sets that expire without completing.
//!
//! State is bounded two ways: a TTL on every group and a live-group cap per
//! source address with oldest-first eviction, since fragment storms aim at
//! exactly this memory.

pub mod storm;

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::config::FragmentConfig;
use crate::core::{ParsedPacket, RuleId};
use crate::rules::Finding;

use storm::StormMonitor;

/// Identity of one original datagram's fragment set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FragmentKey {
    pub src_ip: Ipv4Addr,
    pub dst_ip: Ipv4Addr,
    pub protocol: u8,
    pub identification: u16,
}

/// One recorded fragment
#[derive(Debug, Clone, Copy)]
struct FragmentRecord {
    /// Offset in bytes
    start: u32,
    /// Fragment payload length in bytes
    len: u32,
    more_fragments: bool,
}

impl FragmentRecord {
    fn end(&self) -> u32 {
        self.start.saturating_add(self.len)
    }
}

/// Accumulating reassembly state for one key
#[derive(Debug)]
struct FragmentGroup {
    fragments: Vec<FragmentRecord>,
    created: Instant,
    /// Total size once the MF=0 fragment was seen
    expected_size: Option<u32>,
}

impl FragmentGroup {
    fn new(now: Instant) -> Self {
        Self {
            fragments: Vec::new(),
            created: now,
            expected_size: None,
        }
    }

    /// Gap-free coverage of [0, expected_size)
    fn is_complete(&self) -> bool {
        let Some(expected) = self.expected_size else {
            return false;
        };
        let mut sorted: Vec<_> = self.fragments.iter().map(|f| (f.start, f.end())).collect();
        sorted.sort_unstable();

        let mut covered = 0u32;
        for (start, end) in sorted {
            if start > covered {
                return false;
            }
            covered = covered.max(end);
        }
        covered >= expected
    }
}

/// Tracker statistics
#[derive(Debug, Default, Clone)]
pub struct FragmentStats {
    pub total_fragments: u64,
    pub groups_created: u64,
    pub completed: u64,
    pub expired: u64,
    pub duplicate_offsets: u64,
    pub overlaps: u64,
    pub storms: u64,
    pub capacity_evictions: u64,
}

/// Finding raised outside the packet path, during a TTL sweep
#[derive(Debug, Clone)]
pub struct ExpiredGroup {
    pub key: FragmentKey,
    pub fragment_count: usize,
}

/// Stateful fragment reassembly monitor
pub struct FragmentTracker {
    config: FragmentConfig,
    groups: HashMap<FragmentKey, FragmentGroup>,
    storm: StormMonitor,
    stats: FragmentStats,
    last_cleanup: Instant,
}

impl FragmentTracker {
    pub fn new(config: FragmentConfig) -> Self {
        let storm = StormMonitor::new(config.storm_window_secs, config.storm_rate_threshold);
        Self {
            config,
            groups: HashMap::new(),
            storm,
            stats: FragmentStats::default(),
            last_cleanup: Instant::now(),
        }
    }

    /// Feed one fragment; returns the findings its arrival raised.
    ///
    /// Caller ensures the packet is an IPv4 fragment (`ParsedPacket::is_fragment`).
    pub fn observe(&mut self, packet: &ParsedPacket) -> Vec<Finding> {
        let now = Instant::now();
        let Some(ip) = &packet.ip else {
            return Vec::new();
        };

        let key = FragmentKey {
            src_ip: ip.src_ip,
            dst_ip: ip.dst_ip,
            protocol: ip.protocol,
            identification: ip.identification,
        };
        let start = u32::from(ip.fragment_offset) * 8;
        let len = (packet.frame.data.len() as u32)
            .saturating_sub(14)
            .saturating_sub(u32::from(ip.header_length));
        let record = FragmentRecord {
            start,
            len,
            more_fragments: ip.more_fragments,
        };

        self.stats.total_fragments += 1;
        let mut findings = Vec::new();

        if !self.groups.contains_key(&key) {
            self.enforce_source_capacity(key.src_ip);
            self.stats.groups_created += 1;
        }
        let group = self.groups.entry(key).or_insert_with(|| FragmentGroup::new(now));

        // Duplicate offset
        if group.fragments.iter().any(|f| f.start == record.start) {
            self.stats.duplicate_offsets += 1;
            findings.push(
                Finding::new(
                    RuleId::SameFragmentOffset,
                    format!("duplicate fragment offset {} for id {}", start, key.identification),
                )
                .with_evidence("offset", start)
                .with_evidence("identification", key.identification),
            );
        }

        // Teardrop: overlapping range with mismatched boundaries
        if let Some(existing) = group.fragments.iter().find(|f| {
            record.start < f.end()
                && record.end() > f.start
                && !(record.start == f.start && record.end() == f.end())
        }) {
            self.stats.overlaps += 1;
            findings.push(
                Finding::new(
                    RuleId::Teardrop,
                    format!(
                        "teardrop: fragment [{}, {}) overlaps [{}, {})",
                        record.start,
                        record.end(),
                        existing.start,
                        existing.end()
                    ),
                )
                .with_evidence("offset", start)
                .with_evidence("existing_offset", existing.start),
            );
        }

        // Offset past the reassembly limit
        if record.end() > self.config.max_reassembled_size {
            findings.push(
                Finding::new(
                    RuleId::LargeFragmentOffset,
                    format!("fragment reaches byte {} past reassembly limit", record.end()),
                )
                .with_evidence("offset", start)
                .with_evidence("end", record.end()),
            );
        }

        if !record.more_fragments {
            group.expected_size = Some(record.end());
        }
        group.fragments.push(record);

        if group.fragments.len() > self.config.max_group_fragments {
            findings.push(
                Finding::new(
                    RuleId::TooManyFragment,
                    format!("{} fragments for one datagram", group.fragments.len()),
                )
                .with_evidence("fragment_count", group.fragments.len() as u64),
            );
        }

        // Completed sets leave the tracker immediately
        if group.is_complete() {
            self.groups.remove(&key);
            self.stats.completed += 1;
        }

        // Source-scoped storm check, across all of this source's groups
        if self.storm.record(key.src_ip, now) {
            self.stats.storms += 1;
            findings.push(
                Finding::new(
                    RuleId::FragmentStorm,
                    format!("fragment storm from {}", key.src_ip),
                )
                .with_evidence("src_ip", key.src_ip.to_string()),
            );
        }

        findings
    }

    /// Packet-path cleanup, so a quiet sweep timer cannot let state pile up.
    ///
    /// Runs a full sweep at most once per interval; callers report the
    /// returned groups the same way as timer-driven sweep results, keyed to
    /// their own flows rather than whatever packet happened to arrive.
    pub fn maybe_cleanup(&mut self, now: Instant) -> Vec<ExpiredGroup> {
        if now.duration_since(self.last_cleanup) < Duration::from_secs(5) {
            return Vec::new();
        }
        self.last_cleanup = now;
        self.sweep(now)
    }

    /// TTL sweep, run from the timer thread and piggybacked on arrivals.
    ///
    /// Every expired group is reported exactly once and removed; late
    /// fragments for the same key start a fresh group.
    pub fn sweep(&mut self, now: Instant) -> Vec<ExpiredGroup> {
        let ttl = Duration::from_secs(self.config.group_ttl_secs);
        let mut expired = Vec::new();

        self.groups.retain(|key, group| {
            if now.duration_since(group.created) > ttl {
                expired.push(ExpiredGroup {
                    key: *key,
                    fragment_count: group.fragments.len(),
                });
                false
            } else {
                true
            }
        });

        if !expired.is_empty() {
            debug!(count = expired.len(), "expired fragment groups evicted");
            self.stats.expired += expired.len() as u64;
        }
        self.storm.sweep(now);
        expired
    }

    /// Capacity bound per source: evict that source's oldest group first
    fn enforce_source_capacity(&mut self, src_ip: Ipv4Addr) {
        let count = self.groups.keys().filter(|k| k.src_ip == src_ip).count();
        if count < self.config.max_groups_per_source {
            return;
        }
        let oldest = self
            .groups
            .iter()
            .filter(|(k, _)| k.src_ip == src_ip)
            .min_by_key(|(_, g)| g.created)
            .map(|(k, _)| *k);
        if let Some(key) = oldest {
            self.groups.remove(&key);
            self.stats.capacity_evictions += 1;
            debug!(src = %src_ip, "fragment group evicted at source capacity");
        }
    }

    pub fn active_groups(&self) -> usize {
        self.groups.len()
    }

    pub fn stats(&self) -> &FragmentStats {
        &self.stats
    }

    /// Shutdown path: discard all state without reporting anything
    pub fn clear(&mut self) {
        self.groups.clear();
        self.storm.clear();
    }
}

/// Convert an expired group into its catalogue finding
pub fn expired_finding(expired: &ExpiredGroup) -> Finding {
    Finding::new(
        RuleId::InvalidFragment,
        format!(
            "fragment set id {} expired with {} fragments and no completion",
            expired.key.identification, expired.fragment_count
        ),
    )
    .with_evidence("identification", expired.key.identification)
    .with_evidence("fragment_count", expired.fragment_count as u64)
}
