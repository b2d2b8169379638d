//! Playback telemetry collector and helpers.
//!
//! The collector multiplexes context lifecycle, active-slot changes and
//! session outcomes into a bounded history plus async broadcast stream.
//! Only control-domain code publishes; the render path never touches it.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};

pub mod events;

pub use events::PlaybackMetric;

/// Global telemetry hub shared across the crate.
static HUB: Lazy<TelemetryHub> = Lazy::new(TelemetryHub::default);

/// Access the global telemetry hub.
pub fn hub() -> &'static TelemetryHub {
    &HUB
}

/// Snapshot of collector state for CLI reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    pub recent: Vec<PlaybackMetric>,
    pub total_events: u64,
    pub dropped_events: u64,
    pub counters: PlaybackCounters,
}

/// Running totals kept independently of the bounded history
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybackCounters {
    pub contexts_initialized: u64,
    pub sessions_ended: u64,
    pub sessions_failed: u64,
    pub events_dropped: u64,
}

/// Broadcast-based collector retaining a bounded history of metrics.
pub struct TelemetryCollector {
    tx: broadcast::Sender<PlaybackMetric>,
    history: Mutex<VecDeque<PlaybackMetric>>,
    history_capacity: usize,
    total_events: AtomicU64,
    dropped_history: AtomicU64,
}

impl TelemetryCollector {
    pub fn new(buffer: usize, history_capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(buffer);
        Self {
            tx,
            history: Mutex::new(VecDeque::with_capacity(history_capacity)),
            history_capacity,
            total_events: AtomicU64::new(0),
            dropped_history: AtomicU64::new(0),
        }
    }

    fn history(&self) -> MutexGuard<'_, VecDeque<PlaybackMetric>> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn publish(&self, event: PlaybackMetric) {
        self.total_events.fetch_add(1, Ordering::Relaxed);
        {
            let mut history = self.history();
            if history.len() == self.history_capacity {
                history.pop_front();
                self.dropped_history.fetch_add(1, Ordering::Relaxed);
            }
            history.push_back(event.clone());
        }

        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlaybackMetric> {
        self.tx.subscribe()
    }

    /// Forward the broadcast into an unbounded channel
    ///
    /// Must be called from within a tokio runtime.
    pub fn subscribe_unbounded(&self) -> mpsc::UnboundedReceiver<PlaybackMetric> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut broadcast_rx = self.tx.subscribe();

        tokio::spawn(async move {
            while let Ok(event) = broadcast_rx.recv().await {
                if tx.send(event).is_err() {
                    break;
                }
            }
        });

        rx
    }

    fn recent(&self) -> Vec<PlaybackMetric> {
        self.history().iter().cloned().collect()
    }
}

impl Default for TelemetryCollector {
    fn default() -> Self {
        Self::new(256, 64)
    }
}

/// Top-level hub wrapping the collector plus running counters.
pub struct TelemetryHub {
    collector: TelemetryCollector,
    contexts_initialized: AtomicU64,
    sessions_ended: AtomicU64,
    sessions_failed: AtomicU64,
    events_dropped: AtomicU64,
}

impl TelemetryHub {
    pub fn new(channel_capacity: usize, history_capacity: usize) -> Self {
        Self {
            collector: TelemetryCollector::new(channel_capacity, history_capacity),
            contexts_initialized: AtomicU64::new(0),
            sessions_ended: AtomicU64::new(0),
            sessions_failed: AtomicU64::new(0),
            events_dropped: AtomicU64::new(0),
        }
    }

    pub fn collector(&self) -> &TelemetryCollector {
        &self.collector
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            recent: self.collector.recent(),
            total_events: self.collector.total_events.load(Ordering::Relaxed),
            dropped_events: self.collector.dropped_history.load(Ordering::Relaxed),
            counters: self.counters(),
        }
    }

    pub fn counters(&self) -> PlaybackCounters {
        PlaybackCounters {
            contexts_initialized: self.contexts_initialized.load(Ordering::Relaxed),
            sessions_ended: self.sessions_ended.load(Ordering::Relaxed),
            sessions_failed: self.sessions_failed.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
        }
    }

    pub fn record_context_initialized(&self, sample_rate: u32) {
        self.contexts_initialized.fetch_add(1, Ordering::Relaxed);
        self.collector.publish(PlaybackMetric::ContextInitialized {
            sample_rate,
            timestamp_ms: now_timestamp_ms(),
        });
    }

    pub fn record_context_torn_down(&self, sample_rate: u32) {
        self.collector.publish(PlaybackMetric::ContextTornDown {
            sample_rate,
            timestamp_ms: now_timestamp_ms(),
        });
    }

    pub fn record_active_changed(&self, controller: Option<u64>) {
        self.collector
            .publish(PlaybackMetric::ActiveChanged { controller });
    }

    pub fn record_session_ended(&self, controller: u64) {
        self.sessions_ended.fetch_add(1, Ordering::Relaxed);
        self.collector
            .publish(PlaybackMetric::SessionEnded { controller });
    }

    pub fn record_session_failed(&self, controller: u64, message: impl Into<String>) {
        self.sessions_failed.fetch_add(1, Ordering::Relaxed);
        self.collector.publish(PlaybackMetric::SessionFailed {
            controller,
            message: message.into(),
        });
    }

    pub fn record_events_dropped(&self, controller: u64, count: u64) {
        self.events_dropped.fetch_add(count, Ordering::Relaxed);
        self.collector
            .publish(PlaybackMetric::EventsDropped { controller, count });
    }
}

impl Default for TelemetryHub {
    fn default() -> Self {
        Self::new(256, 64)
    }
}

fn now_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collector_preserves_order_within_history() {
        let collector = TelemetryCollector::new(8, 3);
        collector.publish(PlaybackMetric::ActiveChanged {
            controller: Some(1),
        });
        collector.publish(PlaybackMetric::SessionEnded { controller: 1 });
        collector.publish(PlaybackMetric::ActiveChanged { controller: None });

        let recent = collector.recent();
        assert_eq!(recent.len(), 3);
        assert!(matches!(
            recent[0],
            PlaybackMetric::ActiveChanged {
                controller: Some(1)
            }
        ));
        assert!(matches!(
            recent[2],
            PlaybackMetric::ActiveChanged { controller: None }
        ));
    }

    #[test]
    fn collector_drops_history_when_full() {
        let hub = TelemetryHub::new(8, 2);
        hub.record_session_ended(1);
        hub.record_session_ended(2);
        hub.record_session_ended(3);

        let snapshot = hub.snapshot();
        assert_eq!(snapshot.recent.len(), 2);
        assert_eq!(snapshot.dropped_events, 1);
        assert_eq!(snapshot.total_events, 3);
        assert!(matches!(
            snapshot.recent[0],
            PlaybackMetric::SessionEnded { controller: 2 }
        ));
    }

    #[test]
    fn hub_counts_outcomes() {
        let hub = TelemetryHub::new(8, 8);
        hub.record_context_initialized(44100);
        hub.record_session_ended(1);
        hub.record_session_failed(2, "unexpected token");
        hub.record_events_dropped(2, 3);

        assert_eq!(
            hub.counters(),
            PlaybackCounters {
                contexts_initialized: 1,
                sessions_ended: 1,
                sessions_failed: 1,
                events_dropped: 3,
            }
        );
    }

    #[test]
    fn metric_wire_shape() {
        let value = serde_json::to_value(PlaybackMetric::SessionFailed {
            controller: 7,
            message: "boom".to_string(),
        })
        .unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "type": "session_failed",
                "payload": {"controller": 7, "message": "boom"}
            })
        );
    }

    #[tokio::test]
    async fn subscribers_receive_published_metrics() {
        let hub = TelemetryHub::new(8, 8);
        let mut rx = hub.collector().subscribe_unbounded();

        hub.record_context_torn_down(48000);

        let event = rx.recv().await.unwrap();
        assert!(matches!(
            event,
            PlaybackMetric::ContextTornDown {
                sample_rate: 48000,
                ..
            }
        ));
    }
}
