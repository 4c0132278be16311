//! Lifecycle coordinator: the engine instance the host integration owns.
//!
//! The engine reacts to four event sources, all delivered on one logical
//! queue: visibility batches, mutation batches, navigation notifications and
//! config changes. Time is injected so every timer (stats debounce,
//! navigation coalescing, init retries) is driven by [`Engine::poll_timers`].
//!
//! ```text
//! Disabled --start--> Initializing --root found--> Active
//!                       |      ^                     |
//!           retries out |      | window closed       | navigation
//!                       v      |                     v
//!                   Abandoned --navigation--> Reinitializing
//!
//! stop (any state) --> Disabled, every cached block restored
//! ```

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{ConfigChange, EngineConfig, Settings, TimingConfig};
use crate::host::{
    BlockId, DocumentTree, Host, MutationRecord, ObserverOptions, StatsSink, StatsSnapshot,
    VisibilityEntry,
};
use crate::virtualize::cache::EvictionCache;
use crate::virtualize::controller::{BatchOutcome, Controller};
use crate::virtualize::debounce::Debouncer;
use crate::virtualize::registry::TrackingRegistry;

/// Where the engine is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// No subscriptions, empty cache.
    Disabled,
    /// Waiting for the scroll root; `attempts` failed so far.
    Initializing { attempts: u32 },
    /// Observer connected, registry populated.
    Active,
    /// A navigation was accepted; teardown runs when the coalescing window closes.
    Reinitializing,
    /// Gave up looking for the scroll root. Inactive until the next
    /// navigation or enable.
    Abandoned,
}

/// An external notification for the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    Visibility(Vec<VisibilityEntry>),
    Mutations(Vec<MutationRecord>),
    /// The observable location identity, e.g. the URL path.
    Navigation(String),
    ConfigChanged(ConfigChange),
    /// The host page is going away: restore everything.
    Unload,
}

pub struct Engine<H: Host, S: StatsSink> {
    host: H,
    config: EngineConfig,
    timing: TimingConfig,
    state: LifecycleState,

    /// Whether the visibility source currently has a live subscription.
    connected: bool,

    controller: Controller<H::Fragment>,
    registry: TrackingRegistry,

    stats: S,
    stats_timer: Debouncer,
    reinit_timer: Debouncer,
    retry_at: Option<Instant>,

    location: String,
}

impl<H: Host, S: StatsSink> Engine<H, S> {
    /// Build a stopped engine. Call [`Engine::start`] to begin.
    pub fn new(host: H, settings: &Settings, stats: S, location: impl Into<String>) -> Self {
        Self {
            host,
            config: settings.engine,
            timing: settings.timing.clone(),
            state: LifecycleState::Disabled,
            connected: false,
            controller: Controller::new(settings.protection.clone()),
            registry: TrackingRegistry::new(),
            stats,
            stats_timer: Debouncer::new(settings.timing.stats_debounce()),
            reinit_timer: Debouncer::new(settings.timing.reinit_debounce()),
            retry_at: None,
            location: location.into(),
        }
    }

    /// Begin initialization if the feature is enabled.
    pub fn start(&mut self, now: Instant) {
        if !self.config.enabled {
            debug!("Engine disabled, not starting");
            self.state = LifecycleState::Disabled;
            return;
        }
        self.state = LifecycleState::Initializing { attempts: 0 };
        self.try_init(now);
    }

    /// Full teardown: disconnect and restore every cached block.
    pub fn stop(&mut self, now: Instant) {
        self.reinit_timer.cancel();
        self.retry_at = None;
        self.disconnect();
        let restored = self.controller.restore_all(&mut self.host);
        self.state = LifecycleState::Disabled;
        self.stats_timer.schedule(now);
        info!(restored, "Engine stopped");
    }

    /// Apply an external config change.
    pub fn reconfigure(&mut self, change: ConfigChange, now: Instant) {
        if change.is_empty() {
            return;
        }
        let was_running = self.is_running();
        change.apply_to(&mut self.config);

        match change.enabled {
            Some(false) => {
                self.stop(now);
                return;
            }
            Some(true) if !was_running => {
                self.start(now);
                return;
            }
            _ => {}
        }

        if let Some(buffer_distance) = change.buffer_distance {
            if self.config.enabled {
                info!(buffer_distance, "Buffer distance changed, reinitializing");
                self.stop(now);
                self.start(now);
            }
        }
    }

    /// Dispatch any event.
    pub fn handle(&mut self, event: EngineEvent, now: Instant) {
        match event {
            EngineEvent::Visibility(batch) => {
                self.on_visibility(&batch, now);
            }
            EngineEvent::Mutations(records) => {
                self.on_mutations(&records, now);
            }
            EngineEvent::Navigation(location) => {
                self.on_navigation(location, now);
            }
            EngineEvent::ConfigChanged(change) => self.reconfigure(change, now),
            EngineEvent::Unload => self.stop(now),
        }
    }

    /// Process one visibility batch. Returns `None` when the engine is not observing.
    pub fn on_visibility(&mut self, batch: &[VisibilityEntry], now: Instant) -> Option<BatchOutcome> {
        if !self.config.enabled || !self.connected {
            return None;
        }
        let tracked: Vec<VisibilityEntry> = batch
            .iter()
            .filter(|e| self.registry.contains(e.block))
            .copied()
            .collect();

        let outcome = self
            .controller
            .apply_batch(&mut self.host, &self.registry, &tracked);
        debug!(
            entries = batch.len(),
            evicted = outcome.evicted,
            restored = outcome.restored,
            kept = outcome.kept,
            "Visibility batch applied"
        );
        self.stats_timer.schedule(now);
        Some(outcome)
    }

    /// Register blocks inserted by one mutation batch. Returns how many were new.
    pub fn on_mutations(&mut self, records: &[MutationRecord], now: Instant) -> usize {
        if !self.config.enabled || !self.connected {
            return 0;
        }
        let added = self.registry.register_inserted(&mut self.host, records);
        if added > 0 {
            debug!(added, tracked = self.registry.len(), "Registered inserted blocks");
            self.stats_timer.schedule(now);
        }
        added
    }

    /// Note a location change. Returns `false` if the location did not change.
    ///
    /// Reinitialization is coalesced: the teardown runs once the window has
    /// been quiet, however many navigations arrive in it.
    pub fn on_navigation(&mut self, location: impl Into<String>, now: Instant) -> bool {
        let location = location.into();
        if location == self.location {
            debug!(%location, "Same location, ignoring navigation");
            return false;
        }
        info!(from = %self.location, to = %location, "Navigation detected");
        self.location = location;
        self.reinit_timer.schedule(now);
        if !matches!(self.state, LifecycleState::Disabled) {
            self.state = LifecycleState::Reinitializing;
            self.retry_at = None;
        }
        true
    }

    /// Run every timer whose deadline has passed.
    pub fn poll_timers(&mut self, now: Instant) {
        if self.reinit_timer.fire_if_due(now) {
            self.navigation_reset(now);
        }

        if self.retry_at.is_some_and(|at| now >= at) {
            self.retry_at = None;
            if matches!(self.state, LifecycleState::Initializing { .. }) {
                self.try_init(now);
            }
        }

        if self.stats_timer.fire_if_due(now) {
            self.publish_stats();
        }
    }

    /// Earliest pending timer deadline, if any.
    pub fn next_deadline(&self) -> Option<Instant> {
        [
            self.reinit_timer.deadline(),
            self.retry_at,
            self.stats_timer.deadline(),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    fn try_init(&mut self, now: Instant) {
        let LifecycleState::Initializing { attempts } = self.state else {
            return;
        };

        if self.host.has_scroll_root() {
            self.activate(now);
            return;
        }

        let attempts = attempts + 1;
        if attempts < self.timing.max_init_retries {
            debug!(attempts, "Scroll root not found, retrying");
            self.state = LifecycleState::Initializing { attempts };
            self.retry_at = Some(now + self.timing.init_retry_interval());
        } else {
            warn!(attempts, "Scroll root never appeared, virtualization inactive");
            self.state = LifecycleState::Abandoned;
        }
    }

    fn activate(&mut self, now: Instant) {
        let options = ObserverOptions::with_buffer(self.config.buffer_distance);
        self.host.connect(&options);
        self.connected = true;
        let tracked = self.registry.register_all(&mut self.host);
        self.state = LifecycleState::Active;
        self.stats_timer.schedule(now);
        info!(
            tracked,
            root_margin = %options.root_margin,
            "Virtualization engine initialized"
        );
    }

    fn disconnect(&mut self) {
        if self.connected {
            self.host.disconnect();
            self.connected = false;
        }
        self.registry.clear();
    }

    /// The document is being replaced: drop cached content without restoring it.
    fn navigation_reset(&mut self, now: Instant) {
        let resume = self.config.enabled && self.state != LifecycleState::Disabled;
        self.state = LifecycleState::Reinitializing;
        self.disconnect();
        let dropped = self.controller.discard_all();
        info!(dropped, location = %self.location, "Navigation reset");

        self.stats_timer.schedule(now);
        if resume {
            self.start(now);
        } else {
            self.state = LifecycleState::Disabled;
        }
    }

    /// Publish immediately if a stats update is pending.
    pub fn flush_stats(&mut self) {
        if self.stats_timer.is_pending() {
            self.stats_timer.cancel();
            self.publish_stats();
        }
    }

    fn publish_stats(&mut self) {
        let snapshot = self.stats_snapshot();
        debug!(
            virtualized = snapshot.virtualized,
            total = snapshot.total,
            "Publishing stats"
        );
        self.stats.publish(snapshot);
    }

    fn is_running(&self) -> bool {
        matches!(
            self.state,
            LifecycleState::Active
                | LifecycleState::Initializing { .. }
                | LifecycleState::Reinitializing
        )
    }

    pub fn stats_snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            virtualized: self.controller.virtualized_count(),
            total: self.registry.len(),
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn is_tracked(&self, block: BlockId) -> bool {
        self.registry.contains(block)
    }

    pub fn cache(&self) -> &EvictionCache<H::Fragment> {
        self.controller.cache()
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    /// Mutable host access, for integrations that change the document between events.
    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn stats_sink(&self) -> &S {
        &self.stats
    }

    /// Blocks whose status flag disagrees with the cache. Empty in every
    /// consistent state.
    pub fn inconsistent_blocks(&self) -> Vec<BlockId> {
        self.host
            .blocks()
            .into_iter()
            .filter(|&b| self.host.is_virtualized(b) != self.controller.cache().contains(b))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::host::memory::MemoryDocument;

    type TestEngine = Engine<MemoryDocument, Vec<StatsSnapshot>>;

    fn engine_with(doc: MemoryDocument) -> TestEngine {
        Engine::new(doc, &Settings::default(), Vec::new(), "/c/first")
    }

    #[test]
    fn test_start_activates_when_root_present() {
        let mut doc = MemoryDocument::new();
        doc.push_blocks(4, 100.0);
        let mut engine = engine_with(doc);
        engine.start(Instant::now());

        assert_eq!(engine.state(), LifecycleState::Active);
        assert!(engine.is_connected());
        assert_eq!(engine.stats_snapshot().total, 4);
        assert_eq!(
            engine.host().observer().unwrap().root_margin.to_string(),
            "2000px 0px 2000px 0px"
        );
    }

    #[test]
    fn test_disabled_config_does_not_start() {
        let mut settings = Settings::default();
        settings.engine.enabled = false;
        let mut engine: TestEngine = Engine::new(MemoryDocument::new(), &settings, Vec::new(), "/");
        engine.start(Instant::now());
        assert_eq!(engine.state(), LifecycleState::Disabled);
        assert_eq!(engine.host().counters().connects, 0);
    }

    #[test]
    fn test_retry_until_root_appears() {
        let t0 = Instant::now();
        let mut engine = engine_with(MemoryDocument::without_scroll_root());
        engine.start(t0);
        assert_eq!(engine.state(), LifecycleState::Initializing { attempts: 1 });
        assert_eq!(engine.next_deadline(), Some(t0 + Duration::from_millis(500)));

        // Too early: nothing happens.
        engine.poll_timers(t0 + Duration::from_millis(100));
        assert_eq!(engine.state(), LifecycleState::Initializing { attempts: 1 });

        engine.host_mut().set_scroll_root(true);
        engine.poll_timers(t0 + Duration::from_millis(500));
        assert_eq!(engine.state(), LifecycleState::Active);
    }

    #[test]
    fn test_retry_exhaustion_abandons_silently() {
        let mut now = Instant::now();
        let mut engine = engine_with(MemoryDocument::without_scroll_root());
        engine.start(now);
        for _ in 0..20 {
            now += Duration::from_millis(500);
            engine.poll_timers(now);
        }
        assert_eq!(engine.state(), LifecycleState::Abandoned);
        assert!(!engine.is_connected());
        assert_eq!(engine.host().counters().connects, 0);
    }

    #[test]
    fn test_events_ignored_while_disconnected() {
        let mut doc = MemoryDocument::without_scroll_root();
        let ids = doc.push_blocks(5, 100.0);
        let mut engine = engine_with(doc);
        let now = Instant::now();
        engine.start(now);

        let batch: Vec<_> = ids.iter().map(|&b| VisibilityEntry::hidden(b)).collect();
        assert!(engine.on_visibility(&batch, now).is_none());
        assert_eq!(
            engine.on_mutations(&[MutationRecord { added: ids.clone() }], now),
            0
        );
        assert!(engine.cache().is_empty());
    }

    #[test]
    fn test_same_location_navigation_ignored() {
        let mut doc = MemoryDocument::new();
        doc.push_blocks(2, 100.0);
        let mut engine = engine_with(doc);
        let now = Instant::now();
        engine.start(now);

        assert!(!engine.on_navigation("/c/first", now));
        assert_eq!(engine.state(), LifecycleState::Active);
        assert!(!engine.reinit_timer.is_pending());
    }

    #[test]
    fn test_stats_published_after_window() {
        let mut doc = MemoryDocument::new();
        let ids = doc.push_blocks(6, 100.0);
        let mut engine = engine_with(doc);
        let t0 = Instant::now();
        engine.start(t0);

        engine.on_visibility(&[VisibilityEntry::hidden(ids[0])], t0);
        engine.poll_timers(t0 + Duration::from_millis(499));
        assert!(engine.stats_sink().is_empty());

        engine.poll_timers(t0 + Duration::from_millis(500));
        assert_eq!(
            engine.stats_sink().as_slice(),
            &[StatsSnapshot {
                virtualized: 1,
                total: 6
            }]
        );
    }
}
