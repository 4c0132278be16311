//! Prometheus export of the virtualization stats.

use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

use crate::host::{StatsSink, StatsSnapshot};

/// A [`StatsSink`] that mirrors each snapshot into Prometheus gauges.
pub struct MetricsStatsSink {
    registry: Registry,
    virtualized: IntGauge,
    tracked: IntGauge,
    publishes: IntCounter,
}

impl MetricsStatsSink {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();
        let virtualized = IntGauge::new(
            "virtualized_blocks",
            "Blocks whose content is currently evicted",
        )?;
        let tracked = IntGauge::new("tracked_blocks", "Blocks observed for visibility")?;
        let publishes = IntCounter::new(
            "stats_publishes_total",
            "Debounced stats snapshots published",
        )?;
        registry.register(Box::new(virtualized.clone()))?;
        registry.register(Box::new(tracked.clone()))?;
        registry.register(Box::new(publishes.clone()))?;
        Ok(Self {
            registry,
            virtualized,
            tracked,
            publishes,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render all metrics in the Prometheus text exposition format.
    pub fn gather_text(&self) -> String {
        render_registry(&self.registry)
    }
}

/// Render a registry in the Prometheus text exposition format.
pub fn render_registry(registry: &Registry) -> String {
    let mut buf = Vec::new();
    let encoder = TextEncoder::new();
    if let Err(e) = encoder.encode(&registry.gather(), &mut buf) {
        tracing::warn!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8_lossy(&buf).into_owned()
}

impl StatsSink for MetricsStatsSink {
    fn publish(&mut self, snapshot: StatsSnapshot) {
        self.virtualized.set(snapshot.virtualized as i64);
        self.tracked.set(snapshot.total as i64);
        self.publishes.inc();
    }
}

/// Forwards every snapshot to several sinks.
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Box<dyn StatsSink + Send>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: impl StatsSink + Send + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }
}

impl StatsSink for FanoutSink {
    fn publish(&mut self, snapshot: StatsSnapshot) {
        for sink in &mut self.sinks {
            sink.publish(snapshot);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gauges_follow_snapshot() {
        let mut sink = MetricsStatsSink::new().unwrap();
        sink.publish(StatsSnapshot {
            virtualized: 12,
            total: 40,
        });
        sink.publish(StatsSnapshot {
            virtualized: 9,
            total: 41,
        });

        let text = sink.gather_text();
        assert!(text.contains("virtualized_blocks 9"));
        assert!(text.contains("tracked_blocks 41"));
        assert!(text.contains("stats_publishes_total 2"));
    }

    #[test]
    fn test_fanout_reaches_every_sink() {
        let (tx, rx) = tokio::sync::watch::channel(StatsSnapshot::default());
        let mut fanout = FanoutSink::new().with(tx).with(Vec::<StatsSnapshot>::new());
        let snap = StatsSnapshot {
            virtualized: 1,
            total: 2,
        };
        fanout.publish(snap);
        assert_eq!(*rx.borrow(), snap);
    }
}
