//! Sharded worker pool
//!
//! Frames are parsed on the submitting thread and routed to a fixed worker
//! by flow hash, so all fragments of one datagram and both directions of
//! one FTP control connection land on the same engine instance. Each worker
//! has a bounded inbound queue; under overload the oldest queued packet is
//! dropped rather than blocking the submitter.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use chrono::Utc;
use crossbeam_channel::{Receiver, Sender, TrySendError};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::engine::sink::AlertSink;
use crate::engine::AnalysisEngine;
use crate::error::{FramewatchError, Result};

/// Work item for one worker
enum Job {
    Packet(crate::core::ParsedPacket),
    Sweep,
    Shutdown,
}

/// Shared pool counters
#[derive(Default)]
pub struct PoolStats {
    pub packets_submitted: AtomicU64,
    pub packets_dropped: AtomicU64,
    pub alerts_emitted: AtomicU64,
    pub sweeps_run: AtomicU64,
}

struct WorkerSlot {
    tx: Sender<Job>,
    /// Receiver clone kept for the drop-oldest path on a full queue
    rx: Receiver<Job>,
    /// One saturation warning per overload episode
    saturated: AtomicBool,
}

/// Fixed set of classification workers plus a sweep timer
pub struct WorkerPool {
    slots: Vec<WorkerSlot>,
    handles: Vec<JoinHandle<()>>,
    sweep_stop: Sender<()>,
    sweep_handle: Option<JoinHandle<()>>,
    stats: Arc<PoolStats>,
    queue_depth: usize,
    running: AtomicBool,
}

impl WorkerPool {
    /// Spawn the workers and the sweep timer
    pub fn start(config: Config, sink: Arc<dyn AlertSink>) -> Self {
        let num_workers = config.workers.actual_workers();
        let queue_depth = config.workers.queue_depth.max(1);
        let sweep_interval = Duration::from_secs(config.workers.sweep_interval_secs.max(1));
        let stats = Arc::new(PoolStats::default());

        let mut slots = Vec::with_capacity(num_workers);
        let mut handles = Vec::with_capacity(num_workers);

        for worker_id in 0..num_workers {
            let (tx, rx) = crossbeam_channel::bounded(queue_depth);
            let worker_rx = rx.clone();
            let worker_sink = Arc::clone(&sink);
            let worker_config = config.clone();
            let worker_stats = Arc::clone(&stats);

            let handle = std::thread::Builder::new()
                .name(format!("classify-{}", worker_id))
                .spawn(move || {
                    worker_loop(worker_id, worker_rx, worker_config, worker_sink, worker_stats)
                })
                .unwrap_or_else(|e| panic!("failed to spawn worker thread: {}", e));

            slots.push(WorkerSlot {
                tx,
                rx,
                saturated: AtomicBool::new(false),
            });
            handles.push(handle);
        }

        let (sweep_stop, stop_rx) = crossbeam_channel::bounded(1);
        let sweep_txs: Vec<Sender<Job>> = slots.iter().map(|s| s.tx.clone()).collect();
        let sweep_handle = std::thread::Builder::new()
            .name("sweep-timer".into())
            .spawn(move || sweep_loop(sweep_interval, sweep_txs, stop_rx))
            .unwrap_or_else(|e| panic!("failed to spawn sweep thread: {}", e));

        info!(workers = num_workers, queue_depth, "worker pool started");

        Self {
            slots,
            handles,
            sweep_stop,
            sweep_handle: Some(sweep_handle),
            stats,
            queue_depth,
            running: AtomicBool::new(true),
        }
    }

    pub fn stats(&self) -> &PoolStats {
        &self.stats
    }

    pub fn num_workers(&self) -> usize {
        self.slots.len()
    }

    /// Parse one raw frame and queue it on its flow's worker
    ///
    /// Never blocks. When the target queue is full the oldest queued packet
    /// is discarded to make room, counted in `packets_dropped`.
    pub fn submit(&self, data: &[u8]) -> Result<()> {
        if !self.running.load(Ordering::Acquire) {
            return Err(FramewatchError::NotRunning);
        }

        let packet = crate::core::parse(data, Utc::now());
        let slot = &self.slots[(packet.flow_hash() % self.slots.len() as u64) as usize];
        self.stats.packets_submitted.fetch_add(1, Ordering::Relaxed);

        let mut job = Job::Packet(packet);
        loop {
            match slot.tx.try_send(job) {
                Ok(()) => break,
                Err(TrySendError::Full(back)) => {
                    if !slot.saturated.swap(true, Ordering::Relaxed) {
                        warn!(depth = self.queue_depth, "worker queue saturated, dropping oldest");
                    }
                    // Timer jobs are re-sent next tick, only packets count as lost
                    if let Ok(Job::Packet(_)) = slot.rx.try_recv() {
                        self.stats.packets_dropped.fetch_add(1, Ordering::Relaxed);
                    }
                    job = back;
                }
                Err(TrySendError::Disconnected(_)) => {
                    return Err(FramewatchError::SinkClosed);
                }
            }
        }

        // Episode ends once the queue has drained below half depth
        if slot.saturated.load(Ordering::Relaxed) && slot.tx.len() < self.queue_depth / 2 {
            slot.saturated.store(false, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Stop the timer, drain the workers and join them
    ///
    /// Per-flow state held by the workers is discarded without emitting
    /// alerts for incomplete fragment sets or open FTP sessions. Further
    /// `submit` calls fail with `NotRunning`.
    pub fn shutdown(&mut self) -> Result<()> {
        if !self.running.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        let _ = self.sweep_stop.send(());
        if let Some(handle) = self.sweep_handle.take() {
            handle
                .join()
                .map_err(|_| FramewatchError::ConfigError("sweep thread panicked".into()))?;
        }

        for slot in &self.slots {
            let _ = slot.tx.send(Job::Shutdown);
        }
        for handle in self.handles.drain(..) {
            handle
                .join()
                .map_err(|_| FramewatchError::ConfigError("worker thread panicked".into()))?;
        }
        info!("worker pool stopped");
        Ok(())
    }
}

fn worker_loop(
    worker_id: usize,
    rx: Receiver<Job>,
    config: Config,
    sink: Arc<dyn AlertSink>,
    stats: Arc<PoolStats>,
) {
    let mut engine = AnalysisEngine::new(config);
    debug!(worker_id, "worker started");

    while let Ok(job) = rx.recv() {
        match job {
            Job::Packet(packet) => {
                for alert in engine.process(packet) {
                    stats.alerts_emitted.fetch_add(1, Ordering::Relaxed);
                    sink.deliver(alert);
                }
            }
            Job::Sweep => {
                for alert in engine.sweep(Instant::now()) {
                    stats.alerts_emitted.fetch_add(1, Ordering::Relaxed);
                    sink.deliver(alert);
                }
                stats.sweeps_run.fetch_add(1, Ordering::Relaxed);
            }
            Job::Shutdown => break,
        }
    }

    engine.clear();
    debug!(worker_id, packets = engine.stats().packets_processed, "worker stopped");
}

fn sweep_loop(interval: Duration, workers: Vec<Sender<Job>>, stop: Receiver<()>) {
    let ticker = crossbeam_channel::tick(interval);
    loop {
        crossbeam_channel::select! {
            recv(ticker) -> _ => {
                for tx in &workers {
                    // A full queue skips this tick, the next one covers it
                    let _ = tx.try_send(Job::Sweep);
                }
            }
            recv(stop) -> _ => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::sink::BufferedSink;

    fn land_frame() -> Vec<u8> {
        let mut data = vec![
            0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xaa, 0xbb, 0x08, 0x00,
        ];
        data.extend_from_slice(&[
            0x45, 0x00, 0x00, 0x28, 0x00, 0x01, 0x00, 0x00, 0x40, 0x06, 0x00, 0x00,
            10, 0, 0, 1, 10, 0, 0, 1,
        ]);
        data.extend_from_slice(&[
            0x30, 0x39, 0x00, 0x50, 0, 0, 0, 1, 0, 0, 0, 0, 0x50, 0x02,
            0xff, 0xff, 0, 0, 0, 0,
        ]);
        data
    }

    #[test]
    fn test_pool_delivers_alerts() {
        let mut config = Config::default();
        config.workers.num_workers = 2;
        let sink = BufferedSink::new(100);

        let mut pool = WorkerPool::start(config, sink.clone());
        pool.submit(&land_frame()).unwrap();
        pool.shutdown().unwrap();

        let alerts = sink.drain();
        assert!(alerts
            .iter()
            .any(|a| a.rule == crate::core::RuleId::LandAttack));
    }

    #[test]
    fn test_submit_after_shutdown_rejected() {
        let mut config = Config::default();
        config.workers.num_workers = 1;
        let sink = BufferedSink::new(10);

        let mut pool = WorkerPool::start(config, sink);
        pool.shutdown().unwrap();
        assert!(matches!(
            pool.submit(&land_frame()),
            Err(FramewatchError::NotRunning)
        ));
        // Second shutdown is a no-op
        pool.shutdown().unwrap();
    }

    #[test]
    fn test_overload_drops_oldest_without_blocking() {
        let mut config = Config::default();
        config.workers.num_workers = 1;
        config.workers.queue_depth = 4;
        let sink = BufferedSink::new(10_000);

        let mut pool = WorkerPool::start(config, sink);
        for _ in 0..500 {
            pool.submit(&land_frame()).unwrap();
        }
        let submitted = pool.stats().packets_submitted.load(Ordering::Relaxed);
        assert_eq!(submitted, 500);
        pool.shutdown().unwrap();
    }
}
