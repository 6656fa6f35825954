//! Packet anomaly classification engine
//!
//! Classifies captured Ethernet/IPv4 frames against a fixed catalogue of
//! header anomalies and protocol-misuse patterns, emitting structured
//! alerts. Parsing is total: malformed input becomes classification data,
//! never an error.
//!
//! - `core`: frame parser, packet model and alert records
//! - `rules`: the table-driven rule catalogue
//! - `fragment`: stateful fragment set tracking (teardrop, storms, expiry)
//! - `ftp`: FTP control-channel tracking for data-port announcements
//! - `engine`: per-worker engine, sharded worker pool and alert sinks
//!
//! Embed via [`engine::AnalysisEngine`] for single-threaded use, or
//! [`engine::workers::WorkerPool`] to fan frames out across cores while
//! keeping each flow's state on one thread.

pub mod config;
pub mod core;
pub mod engine;
pub mod error;
pub mod fragment;
pub mod ftp;
pub mod rules;

pub use config::Config;
pub use core::{Alert, ParsedPacket, RuleId, Severity};
pub use engine::sink::{AlertSink, BufferedSink, ChannelSink};
pub use engine::workers::WorkerPool;
pub use engine::AnalysisEngine;
pub use error::{FramewatchError, Result};
