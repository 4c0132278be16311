//! Serialized executor: one tokio task owns the engine.
//!
//! Every event source (visibility, mutations, navigation, config) is funneled
//! through a single unbounded channel, so the engine's cache and registry are
//! only ever touched from one place and need no locking. Timers are driven by
//! sleeping until the engine's next deadline.

use futures::stream::Stream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, info};

use crate::config::ConfigChange;
use crate::host::{Host, MutationRecord, StatsSink, StatsSnapshot, VisibilityEntry};
use crate::lifecycle::{Engine, EngineEvent};

type InspectFn<H, S> = Box<dyn FnOnce(&mut Engine<H, S>) + Send>;

enum Command<H: Host, S: StatsSink> {
    Event(EngineEvent),
    Inspect(InspectFn<H, S>),
    Shutdown,
}

/// Handle to an engine running on its own task.
pub struct EngineHandle<H: Host, S: StatsSink> {
    tx: mpsc::UnboundedSender<Command<H, S>>,
    task: JoinHandle<Engine<H, S>>,
}

/// Start `engine` and run it on a dedicated task until shutdown.
pub fn spawn<H, S>(mut engine: Engine<H, S>) -> EngineHandle<H, S>
where
    H: Host + Send + 'static,
    H::Fragment: Send + 'static,
    S: StatsSink + Send + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<Command<H, S>>();

    let task = tokio::spawn(async move {
        engine.start(Instant::now());
        info!(state = ?engine.state(), "Engine task started");

        loop {
            let deadline = engine.next_deadline();
            tokio::select! {
                cmd = rx.recv() => match cmd {
                    Some(Command::Event(event)) => engine.handle(event, Instant::now()),
                    Some(Command::Inspect(f)) => f(&mut engine),
                    Some(Command::Shutdown) | None => {
                        engine.stop(Instant::now());
                        engine.flush_stats();
                        break;
                    }
                },
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    engine.poll_timers(Instant::now());
                }
            }
        }

        debug!("Engine task finished");
        engine
    });

    EngineHandle { tx, task }
}

impl<H, S> EngineHandle<H, S>
where
    H: Host + Send + 'static,
    H::Fragment: Send + 'static,
    S: StatsSink + Send + 'static,
{
    /// Queue an event. Returns `false` if the engine task has exited.
    pub fn send(&self, event: EngineEvent) -> bool {
        self.tx.send(Command::Event(event)).is_ok()
    }

    pub fn visibility(&self, batch: Vec<VisibilityEntry>) -> bool {
        self.send(EngineEvent::Visibility(batch))
    }

    pub fn mutations(&self, records: Vec<MutationRecord>) -> bool {
        self.send(EngineEvent::Mutations(records))
    }

    pub fn navigate(&self, location: impl Into<String>) -> bool {
        self.send(EngineEvent::Navigation(location.into()))
    }

    pub fn configure(&self, change: ConfigChange) -> bool {
        self.send(EngineEvent::ConfigChanged(change))
    }

    /// Run `f` against the engine on its own task, after every event queued before it.
    pub async fn inspect<R, F>(&self, f: F) -> Option<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut Engine<H, S>) -> R + Send + 'static,
    {
        let (reply, rx) = oneshot::channel();
        let job: InspectFn<H, S> = Box::new(move |engine| {
            let _ = reply.send(f(engine));
        });
        self.tx.send(Command::Inspect(job)).ok()?;
        rx.await.ok()
    }

    /// Full teardown (as on page unload), returning the engine.
    pub async fn shutdown(self) -> Option<Engine<H, S>> {
        let _ = self.tx.send(Command::Shutdown);
        self.task.await.ok()
    }
}

/// A stats sink/receiver pair for observing the latest snapshot.
pub fn stats_channel() -> (watch::Sender<StatsSnapshot>, watch::Receiver<StatsSnapshot>) {
    watch::channel(StatsSnapshot::default())
}

/// Stream every published snapshot (the current value first).
pub fn stats_stream(rx: watch::Receiver<StatsSnapshot>) -> impl Stream<Item = StatsSnapshot> {
    WatchStream::new(rx)
}
