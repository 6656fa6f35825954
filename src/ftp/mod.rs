//! FTP control-channel tracking
//!
//! Watches TCP payloads on recognized FTP control connections for the two
//! data-port negotiation patterns: the client `PORT h1,h2,h3,h4,p1,p2`
//! command and the server `227 ... (h1,h2,h3,h4,p1,p2)` PASV reply. The
//! announced port (p1 * 256 + p2) is validated once per announcement;
//! out-of-range ports raise `FtpImproperPort` against the control
//! connection's endpoints.
//!
//! Sessions live from the first relevant payload until FIN/RST or idle
//! timeout; only this tracker mutates them.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use regex::Regex;
use tracing::debug;

use crate::config::FtpConfig;
use crate::core::{ParsedPacket, RuleId, TransportHeader};
use crate::rules::Finding;

/// Control-connection identity, oriented client -> server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FtpKey {
    pub client_ip: Ipv4Addr,
    pub client_port: u16,
    pub server_ip: Ipv4Addr,
    pub server_port: u16,
}

/// Which side announced the data port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnounceKind {
    /// Client PORT command
    Port,
    /// Server 227 PASV reply
    Pasv,
}

/// The last data-port announcement on one control connection
#[derive(Debug, Clone, Copy)]
pub struct Announcement {
    pub kind: AnnounceKind,
    pub data_port: u16,
    pub at: DateTime<Utc>,
}

/// Per-control-connection state
#[derive(Debug)]
struct FtpSession {
    last_announcement: Option<Announcement>,
    created: Instant,
    last_seen: Instant,
}

/// Tracker statistics
#[derive(Debug, Default, Clone)]
pub struct FtpStats {
    pub payloads_seen: u64,
    pub sessions_created: u64,
    pub sessions_closed: u64,
    pub sessions_idle_evicted: u64,
    pub announcements: u64,
    pub improper_ports: u64,
}

/// Stateful FTP control-channel monitor
pub struct FtpTracker {
    config: FtpConfig,
    sessions: HashMap<FtpKey, FtpSession>,
    port_re: Regex,
    pasv_re: Regex,
    stats: FtpStats,
}

impl FtpTracker {
    pub fn new(config: FtpConfig) -> Self {
        // Both patterns anchor on line starts; control payloads are
        // CRLF-separated command lines.
        let port_re = Regex::new(
            r"(?mi)^PORT\s+(\d{1,3}),(\d{1,3}),(\d{1,3}),(\d{1,3}),(\d{1,3}),(\d{1,3})",
        )
        .expect("static regex");
        let pasv_re = Regex::new(
            r"(?m)^227[^\r\n]*\((\d{1,3}),(\d{1,3}),(\d{1,3}),(\d{1,3}),(\d{1,3}),(\d{1,3})\)",
        )
        .expect("static regex");

        Self {
            config,
            sessions: HashMap::new(),
            port_re,
            pasv_re,
            stats: FtpStats::default(),
        }
    }

    /// Feed one packet; non-FTP traffic is ignored.
    pub fn observe(&mut self, packet: &ParsedPacket) -> Vec<Finding> {
        let Some(ip) = &packet.ip else {
            return Vec::new();
        };
        let Some(TransportHeader::Tcp {
            src_port,
            dst_port,
            flags,
            payload,
            ..
        }) = &packet.transport
        else {
            return Vec::new();
        };

        // Orient the 4-tuple: the side on a control port is the server.
        let key = if self.config.control_ports.contains(dst_port) {
            FtpKey {
                client_ip: ip.src_ip,
                client_port: *src_port,
                server_ip: ip.dst_ip,
                server_port: *dst_port,
            }
        } else if self.config.control_ports.contains(src_port) {
            FtpKey {
                client_ip: ip.dst_ip,
                client_port: *dst_port,
                server_ip: ip.src_ip,
                server_port: *src_port,
            }
        } else {
            return Vec::new();
        };
        let from_client = ip.src_ip == key.client_ip && *src_port == key.client_port;

        // Teardown ends the session regardless of payload
        if flags.fin || flags.rst {
            if self.sessions.remove(&key).is_some() {
                self.stats.sessions_closed += 1;
                debug!(?key, "ftp control session closed");
            }
            return Vec::new();
        }

        if payload.is_empty() {
            return Vec::new();
        }
        self.stats.payloads_seen += 1;

        let announcement = if from_client {
            self.match_port(payload)
        } else {
            self.match_pasv(payload)
        };
        let Some((kind, data_port)) = announcement else {
            return Vec::new();
        };

        let now = Instant::now();
        if !self.sessions.contains_key(&key) {
            if self.sessions.len() >= self.config.max_sessions {
                self.evict_oldest();
            }
            self.stats.sessions_created += 1;
        }
        let session = self.sessions.entry(key).or_insert_with(|| FtpSession {
            last_announcement: None,
            created: now,
            last_seen: now,
        });
        session.last_seen = now;
        session.last_announcement = Some(Announcement {
            kind,
            data_port,
            at: packet.frame.arrival,
        });
        self.stats.announcements += 1;

        // Validity is judged exactly once, here, per announcement
        if data_port < self.config.data_port_min || data_port > self.config.data_port_max {
            self.stats.improper_ports += 1;
            let what = match kind {
                AnnounceKind::Port => "PORT command",
                AnnounceKind::Pasv => "PASV reply",
            };
            return vec![
                Finding::new(
                    RuleId::FtpImproperPort,
                    format!("FTP {} announced improper data port {}", what, data_port),
                )
                .with_evidence("data_port", data_port)
                .with_evidence("announced_by", what),
            ];
        }

        Vec::new()
    }

    fn match_port(&self, payload: &[u8]) -> Option<(AnnounceKind, u16)> {
        let text = String::from_utf8_lossy(payload);
        let caps = self.port_re.captures(&text)?;
        Some((AnnounceKind::Port, announced_port(&caps)?))
    }

    fn match_pasv(&self, payload: &[u8]) -> Option<(AnnounceKind, u16)> {
        let text = String::from_utf8_lossy(payload);
        let caps = self.pasv_re.captures(&text)?;
        Some((AnnounceKind::Pasv, announced_port(&caps)?))
    }

    /// Last announcement recorded for a control connection, if any
    pub fn last_announcement(&self, key: &FtpKey) -> Option<Announcement> {
        self.sessions.get(key).and_then(|s| s.last_announcement)
    }

    /// Idle-session sweep, run from the timer thread
    pub fn sweep(&mut self, now: Instant) {
        let idle = Duration::from_secs(self.config.session_idle_secs);
        let before = self.sessions.len();
        self.sessions
            .retain(|_, s| now.duration_since(s.last_seen) <= idle);
        let removed = before - self.sessions.len();
        if removed > 0 {
            self.stats.sessions_idle_evicted += removed as u64;
            debug!(count = removed, "idle ftp sessions evicted");
        }
    }

    fn evict_oldest(&mut self) {
        if let Some(key) = self
            .sessions
            .iter()
            .min_by_key(|(_, s)| s.created)
            .map(|(k, _)| *k)
        {
            self.sessions.remove(&key);
        }
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    pub fn stats(&self) -> &FtpStats {
        &self.stats
    }

    /// Shutdown path: discard all state without reporting anything
    pub fn clear(&mut self) {
        self.sessions.clear();
    }
}

/// p1 * 256 + p2 from the last two capture groups
fn announced_port(caps: &regex::Captures<'_>) -> Option<u16> {
    let p1: u16 = caps.get(5)?.as_str().parse().ok()?;
    let p2: u16 = caps.get(6)?.as_str().parse().ok()?;
    if p1 > 255 || p2 > 255 {
        return None;
    }
    Some(p1 * 256 + p2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::parse;

    fn ftp_packet(
        src: [u8; 4],
        dst: [u8; 4],
        src_port: u16,
        dst_port: u16,
        flags: u8,
        payload: &[u8],
    ) -> ParsedPacket {
        let total = 40 + payload.len();
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
            0x06,
            0x00,
            0x00,
        ]);
        data.extend_from_slice(&src);
        data.extend_from_slice(&dst);
        data.extend_from_slice(&[
            (src_port >> 8) as u8,
            (src_port & 0xff) as u8,
            (dst_port >> 8) as u8,
            (dst_port & 0xff) as u8,
            0,
            0,
            0,
            1,
            0,
            0,
            0,
            0,
            0x50,
            flags,
            0xff,
            0xff,
            0,
            0,
            0,
            0,
        ]);
        data.extend_from_slice(payload);
        parse(&data, Utc::now())
    }

    const CLIENT: [u8; 4] = [192, 168, 1, 10];
    const SERVER: [u8; 4] = [10, 0, 0, 1];
    const ACK: u8 = 0x10;

    fn tracker() -> FtpTracker {
        FtpTracker::new(FtpConfig::default())
    }

    #[test]
    fn test_port_command_low_port_fires() {
        let mut t = tracker();
        // PORT announcing 0,80 -> port 80
        let pkt = ftp_packet(
            CLIENT,
            SERVER,
            40001,
            21,
            ACK,
            b"PORT 192,168,1,10,0,80\r\n",
        );
        let findings = t.observe(&pkt);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].rule, RuleId::FtpImproperPort);
        assert_eq!(t.active_sessions(), 1);
    }

    #[test]
    fn test_port_command_valid_port_quiet() {
        let mut t = tracker();
        // 195 * 256 + 80 = 50000
        let pkt = ftp_packet(
            CLIENT,
            SERVER,
            40001,
            21,
            ACK,
            b"PORT 192,168,1,10,195,80\r\n",
        );
        assert!(t.observe(&pkt).is_empty());
        assert_eq!(t.stats().announcements, 1);

        let key = FtpKey {
            client_ip: CLIENT.into(),
            client_port: 40001,
            server_ip: SERVER.into(),
            server_port: 21,
        };
        let ann = t.last_announcement(&key).unwrap();
        assert_eq!(ann.kind, AnnounceKind::Port);
        assert_eq!(ann.data_port, 50000);
    }

    #[test]
    fn test_pasv_reply_from_server() {
        let mut t = tracker();
        // Server-side reply; 3 * 256 + 233 = 1001 < 1024
        let pkt = ftp_packet(
            SERVER,
            CLIENT,
            21,
            40001,
            ACK,
            b"227 Entering Passive Mode (10,0,0,1,3,233)\r\n",
        );
        let findings = t.observe(&pkt);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].rule, RuleId::FtpImproperPort);
    }

    #[test]
    fn test_pasv_pattern_ignored_from_client() {
        let mut t = tracker();
        let pkt = ftp_packet(
            CLIENT,
            SERVER,
            40001,
            21,
            ACK,
            b"227 Entering Passive Mode (10,0,0,1,3,233)\r\n",
        );
        assert!(t.observe(&pkt).is_empty());
    }

    #[test]
    fn test_non_control_port_ignored() {
        let mut t = tracker();
        let pkt = ftp_packet(CLIENT, SERVER, 40001, 8080, ACK, b"PORT 1,2,3,4,0,80\r\n");
        assert!(t.observe(&pkt).is_empty());
        assert_eq!(t.active_sessions(), 0);
    }

    #[test]
    fn test_fin_tears_down_session() {
        let mut t = tracker();
        t.observe(&ftp_packet(
            CLIENT,
            SERVER,
            40001,
            21,
            ACK,
            b"PORT 192,168,1,10,195,80\r\n",
        ));
        assert_eq!(t.active_sessions(), 1);

        t.observe(&ftp_packet(CLIENT, SERVER, 40001, 21, 0x11, b"")); // FIN|ACK
        assert_eq!(t.active_sessions(), 0);
        assert_eq!(t.stats().sessions_closed, 1);
    }

    #[test]
    fn test_idle_sweep() {
        let config = FtpConfig {
            session_idle_secs: 0,
            ..FtpConfig::default()
        };
        let mut t = FtpTracker::new(config);
        t.observe(&ftp_packet(
            CLIENT,
            SERVER,
            40001,
            21,
            ACK,
            b"PORT 192,168,1,10,195,80\r\n",
        ));
        assert_eq!(t.active_sessions(), 1);

        t.sweep(Instant::now() + Duration::from_secs(1));
        assert_eq!(t.active_sessions(), 0);
        assert_eq!(t.stats().sessions_idle_evicted, 1);
    }

    #[test]
    fn test_port_boundaries() {
        let mut t = tracker();
        // 4 * 256 + 0 = 1024, lowest acceptable
        let pkt = ftp_packet(
            CLIENT,
            SERVER,
            40001,
            21,
            ACK,
            b"PORT 192,168,1,10,4,0\r\n",
        );
        assert!(t.observe(&pkt).is_empty());

        // 3 * 256 + 255 = 1023, one below
        let pkt = ftp_packet(
            CLIENT,
            SERVER,
            40002,
            21,
            ACK,
            b"PORT 192,168,1,10,3,255\r\n",
        );
        assert_eq!(t.observe(&pkt).len(), 1);
    }
}
