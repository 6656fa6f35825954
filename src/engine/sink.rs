//! Alert delivery
//!
//! Workers hand finished alerts to an `AlertSink`. The built-in sinks are
//! deliberately small: a bounded in-memory buffer for embedding and tests,
//! and a channel adapter for callers that consume alerts on their own
//! thread. Both prefer dropping the oldest alert over blocking a worker.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;

use crate::core::Alert;

/// Consumer of finished alerts
///
/// Implementations must be cheap and non-blocking; they run on the worker
/// threads.
pub trait AlertSink: Send + Sync {
    fn deliver(&self, alert: Alert);
}

/// Bounded in-memory alert buffer
///
/// Holds the newest `capacity` alerts; when full, the oldest is dropped and
/// counted. `drain` hands the buffered alerts to the caller in arrival
/// order.
pub struct BufferedSink {
    inner: Mutex<BufferedInner>,
    capacity: usize,
}

struct BufferedInner {
    alerts: VecDeque<Alert>,
    dropped: u64,
}

impl BufferedSink {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(BufferedInner {
                alerts: VecDeque::with_capacity(capacity.min(1024)),
                dropped: 0,
            }),
            capacity: capacity.max(1),
        })
    }

    /// Remove and return all buffered alerts, oldest first
    pub fn drain(&self) -> Vec<Alert> {
        let mut inner = self.inner.lock();
        inner.alerts.drain(..).collect()
    }

    /// Alerts dropped because the buffer was full
    pub fn dropped(&self) -> u64 {
        self.inner.lock().dropped
    }

    pub fn len(&self) -> usize {
        self.inner.lock().alerts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AlertSink for BufferedSink {
    fn deliver(&self, alert: Alert) {
        let mut inner = self.inner.lock();
        if inner.alerts.len() >= self.capacity {
            inner.alerts.pop_front();
            inner.dropped += 1;
            if inner.dropped == 1 || inner.dropped % 1000 == 0 {
                warn!(dropped = inner.dropped, "alert buffer full, dropping oldest");
            }
        }
        inner.alerts.push_back(alert);
    }
}

/// Channel adapter over a crossbeam sender
///
/// With a bounded channel the oldest queued alert is displaced when the
/// consumer lags, matching the buffer sink's drop policy. Delivery to a
/// closed channel is counted and otherwise ignored.
pub struct ChannelSink {
    tx: crossbeam_channel::Sender<Alert>,
    rx: crossbeam_channel::Receiver<Alert>,
    dropped: Mutex<u64>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Arc<Self>, crossbeam_channel::Receiver<Alert>) {
        let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
        let sink = Arc::new(Self {
            tx,
            rx: rx.clone(),
            dropped: Mutex::new(0),
        });
        (sink, rx)
    }

    pub fn dropped(&self) -> u64 {
        *self.dropped.lock()
    }
}

impl AlertSink for ChannelSink {
    fn deliver(&self, alert: Alert) {
        let mut alert = alert;
        loop {
            match self.tx.try_send(alert) {
                Ok(()) => return,
                Err(crossbeam_channel::TrySendError::Full(back)) => {
                    // Displace the oldest queued alert and retry
                    if self.rx.try_recv().is_ok() {
                        *self.dropped.lock() += 1;
                    }
                    alert = back;
                }
                Err(crossbeam_channel::TrySendError::Disconnected(_)) => {
                    *self.dropped.lock() += 1;
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{RuleId, Severity};
    use chrono::Utc;
    use std::net::Ipv4Addr;

    fn alert(n: u8) -> Alert {
        Alert::new(
            RuleId::LandAttack,
            Severity::High,
            Utc::now(),
            Ipv4Addr::new(10, 0, 0, n),
            Ipv4Addr::new(10, 0, 0, n),
            format!("alert {}", n),
        )
    }

    #[test]
    fn test_buffered_sink_keeps_arrival_order() {
        let sink = BufferedSink::new(10);
        sink.deliver(alert(1));
        sink.deliver(alert(2));

        let drained = sink.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].src_ip, Ipv4Addr::new(10, 0, 0, 1));
        assert!(sink.is_empty());
    }

    #[test]
    fn test_buffered_sink_drops_oldest_when_full() {
        let sink = BufferedSink::new(2);
        sink.deliver(alert(1));
        sink.deliver(alert(2));
        sink.deliver(alert(3));

        assert_eq!(sink.dropped(), 1);
        let drained = sink.drain();
        assert_eq!(drained[0].src_ip, Ipv4Addr::new(10, 0, 0, 2));
        assert_eq!(drained[1].src_ip, Ipv4Addr::new(10, 0, 0, 3));
    }

    #[test]
    fn test_channel_sink_displaces_oldest() {
        let (sink, rx) = ChannelSink::new(2);
        sink.deliver(alert(1));
        sink.deliver(alert(2));
        sink.deliver(alert(3));

        assert_eq!(sink.dropped(), 1);
        assert_eq!(rx.try_recv().unwrap().src_ip, Ipv4Addr::new(10, 0, 0, 2));
        assert_eq!(rx.try_recv().unwrap().src_ip, Ipv4Addr::new(10, 0, 0, 3));
    }
}
