//! Synthetic frame replay for exercising the rule catalogue
//!
//! Builds one or more crafted frames per detection rule and feeds them
//! through the worker pool, then prints the resulting alerts. Useful for
//! smoke-testing a config file: every enabled rule should appear in the
//! output at least once.

use std::collections::HashMap;
use std::net::Ipv4Addr;

use framewatch::{BufferedSink, Config, WorkerPool};

/// TCP flags
const TCP_FIN: u8 = 0x01;
const TCP_SYN: u8 = 0x02;
const TCP_ACK: u8 = 0x10;
const TCP_PSH: u8 = 0x08;

const SRC: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 100);
const DST: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let as_json = args.iter().any(|a| a == "--json");
    let config = match args.iter().position(|a| a == "--config") {
        Some(i) => {
            let path = args
                .get(i + 1)
                .ok_or_else(|| anyhow::anyhow!("--config requires a path"))?;
            Config::from_file(path)?
        }
        None => Config::default(),
    };

    let sink = BufferedSink::new(config.sink.buffer_capacity);
    let mut pool = WorkerPool::start(config, sink.clone());

    let frames = build_frames();
    println!("Replaying {} synthetic frames...", frames.len());
    for (label, frame) in &frames {
        tracing::debug!(label, "submitting frame");
        pool.submit(frame)?;
    }
    pool.shutdown()?;

    let alerts = sink.drain();
    println!("\n{} alerts:", alerts.len());

    let mut by_rule: HashMap<String, u64> = HashMap::new();
    for alert in &alerts {
        *by_rule.entry(alert.rule.to_string()).or_insert(0) += 1;
        if as_json {
            println!("{}", serde_json::to_string(alert)?);
        } else {
            println!(
                "  [{}] {} {} -> {} {}",
                alert.severity, alert.rule, alert.src_ip, alert.dst_ip, alert.message
            );
        }
    }

    println!("\nBy rule:");
    let mut counts: Vec<_> = by_rule.iter().collect();
    counts.sort_by_key(|(_, v)| std::cmp::Reverse(**v));
    for (rule, count) in counts {
        println!("  {}: {}", rule, count);
    }

    Ok(())
}

/// One labelled frame per catalogue family
fn build_frames() -> Vec<(&'static str, Vec<u8>)> {
    let mut frames: Vec<(&'static str, Vec<u8>)> = Vec::new();

    // IP layer
    frames.push(("unknown_protocol", build_ip_frame(SRC, DST, 200, 0, false, 0, &[], &[0u8; 8])));
    frames.push(("land", build_tcp_frame(DST, DST, 80, 80, TCP_SYN, &[])));
    frames.push(("length_mismatch", {
        let mut f = build_tcp_frame(SRC, DST, 1234, 80, TCP_SYN, &[]);
        // Declare 4 more bytes than the frame carries
        let total = (f.len() - 14 + 4) as u16;
        f[16] = (total >> 8) as u8;
        f[17] = (total & 0xff) as u8;
        f
    }));
    frames.push(("short_header", {
        let mut f = build_tcp_frame(SRC, DST, 1234, 80, TCP_SYN, &[]);
        f[14] = 0x44; // ihl = 4, below minimum
        f
    }));

    // IP options
    for (label, opt) in [
        ("opt_security", 130u8),
        ("opt_loose_route", 131),
        ("opt_record_route", 7),
        ("opt_stream_id", 136),
        ("opt_strict_route", 137),
        ("opt_timestamp", 68),
    ] {
        frames.push((label, build_ip_frame(SRC, DST, 1, 0, false, 0, &[opt, 4, 0, 0], &[0u8; 8])));
    }
    // Option length octet of 1 can never be valid
    frames.push(("opt_malformed", build_ip_frame(SRC, DST, 1, 0, false, 0, &[7, 1, 0, 0], &[0u8; 8])));

    // Fragmentation
    frames.push(("frag_first", build_ip_frame(SRC, DST, 17, 0x0042, true, 0, &[], &[0u8; 64])));
    frames.push(("frag_dup_offset", build_ip_frame(SRC, DST, 17, 0x0042, true, 0, &[], &[0u8; 64])));
    frames.push(("frag_overlap", build_ip_frame(SRC, DST, 17, 0x0042, true, 4, &[], &[0u8; 64])));
    frames.push(("frag_huge_offset", build_ip_frame(SRC, DST, 17, 0x0043, false, 8189, &[], &[0u8; 64])));

    // ICMP probe types
    for (label, icmp_type) in [
        ("icmp_source_quench", 4u8),
        ("icmp_ts_request", 13),
        ("icmp_ts_reply", 14),
        ("icmp_info_request", 15),
        ("icmp_info_reply", 16),
        ("icmp_mask_request", 17),
        ("icmp_mask_reply", 18),
    ] {
        frames.push((label, build_icmp_frame(SRC, DST, icmp_type, 0, 16)));
    }
    frames.push(("icmp_too_large", build_icmp_frame(SRC, DST, 8, 0, 1400)));

    // UDP
    frames.push(("udp_short", build_udp_frame(SRC, DST, 1234, 53, 4, 0)));
    frames.push(("udp_bomb", build_udp_frame(SRC, DST, 1234, 53, 65535, 16)));

    // TCP flag anomalies
    frames.push(("tcp_null", build_tcp_frame(SRC, DST, 1234, 80, 0, &[])));
    frames.push(("tcp_syn_fin", build_tcp_frame(SRC, DST, 1234, 80, TCP_SYN | TCP_FIN, &[])));
    frames.push(("tcp_fin_no_ack", build_tcp_frame(SRC, DST, 1234, 80, TCP_FIN, &[])));

    // FTP PORT announcing a privileged data port
    frames.push((
        "ftp_improper_port",
        build_tcp_frame(SRC, DST, 40000, 21, TCP_ACK | TCP_PSH, b"PORT 192,168,1,100,0,20\r\n"),
    ));

    frames
}

fn build_ip_frame(
    src: Ipv4Addr,
    dst: Ipv4Addr,
    protocol: u8,
    identification: u16,
    more_fragments: bool,
    fragment_offset: u16,
    options: &[u8],
    payload: &[u8],
) -> Vec<u8> {
    assert!(options.len() % 4 == 0);
    let ihl = 5 + options.len() / 4;
    let total_length = (ihl * 4 + payload.len()) as u16;

    let mut f = Vec::with_capacity(14 + total_length as usize);
    // Ethernet header
    f.extend_from_slice(&[0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);
    f.extend_from_slice(&[0x00, 0x00, 0x00, 0x00, 0x00, 0x01]);
    f.extend_from_slice(&[0x08, 0x00]);
    // IP header
    f.push(0x40 | ihl as u8);
    f.push(0);
    f.extend_from_slice(&total_length.to_be_bytes());
    f.extend_from_slice(&identification.to_be_bytes());
    let frag_word = (if more_fragments { 0x2000 } else { 0 }) | (fragment_offset & 0x1fff);
    f.extend_from_slice(&frag_word.to_be_bytes());
    f.push(64); // ttl
    f.push(protocol);
    f.extend_from_slice(&[0, 0]); // checksum, not verified
    f.extend_from_slice(&src.octets());
    f.extend_from_slice(&dst.octets());
    f.extend_from_slice(options);
    f.extend_from_slice(payload);
    f
}

fn build_tcp_frame(
    src: Ipv4Addr,
    dst: Ipv4Addr,
    src_port: u16,
    dst_port: u16,
    flags: u8,
    payload: &[u8],
) -> Vec<u8> {
    let mut tcp = Vec::with_capacity(20 + payload.len());
    tcp.extend_from_slice(&src_port.to_be_bytes());
    tcp.extend_from_slice(&dst_port.to_be_bytes());
    tcp.extend_from_slice(&1000u32.to_be_bytes()); // seq
    tcp.extend_from_slice(&0u32.to_be_bytes()); // ack
    tcp.push(0x50); // data offset 5
    tcp.push(flags);
    tcp.extend_from_slice(&65535u16.to_be_bytes()); // window
    tcp.extend_from_slice(&[0, 0, 0, 0]); // checksum, urgent
    tcp.extend_from_slice(payload);
    build_ip_frame(src, dst, 6, 1, false, 0, &[], &tcp)
}

fn build_udp_frame(
    src: Ipv4Addr,
    dst: Ipv4Addr,
    src_port: u16,
    dst_port: u16,
    declared_length: u16,
    payload_len: usize,
) -> Vec<u8> {
    let mut udp = Vec::with_capacity(8 + payload_len);
    udp.extend_from_slice(&src_port.to_be_bytes());
    udp.extend_from_slice(&dst_port.to_be_bytes());
    udp.extend_from_slice(&declared_length.to_be_bytes());
    udp.extend_from_slice(&[0, 0]); // checksum
    udp.extend(std::iter::repeat(0u8).take(payload_len));
    build_ip_frame(src, dst, 17, 1, false, 0, &[], &udp)
}

fn build_icmp_frame(
    src: Ipv4Addr,
    dst: Ipv4Addr,
    icmp_type: u8,
    code: u8,
    payload_len: usize,
) -> Vec<u8> {
    let mut icmp = Vec::with_capacity(8 + payload_len);
    icmp.push(icmp_type);
    icmp.push(code);
    icmp.extend_from_slice(&[0, 0]); // checksum
    icmp.extend_from_slice(&[0, 1, 0, 1]); // id, seq
    icmp.extend(std::iter::repeat(0u8).take(payload_len));
    build_ip_frame(src, dst, 1, 1, false, 0, &[], &icmp)
}
