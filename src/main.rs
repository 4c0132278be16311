//! scroll-virtualizer simulation driver.
//!
//! Builds an in-memory conversation, runs the engine on its serialized task,
//! scrolls from the newest block up to the oldest and back, appends a
//! streaming turn, then unloads and checks every block came back intact.

use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use scroll_virtualizer::config::{Cli, Settings};
use scroll_virtualizer::host::memory::MemoryDocument;
use scroll_virtualizer::host::MutationRecord;
use scroll_virtualizer::metrics::{render_registry, FanoutSink, MetricsStatsSink};
use scroll_virtualizer::runtime::{self, stats_channel};
use scroll_virtualizer::Engine;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "scroll_virtualizer=debug"
    } else {
        "scroll_virtualizer=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with_target(true)
        .init();

    info!("scroll-virtualizer v{}", env!("CARGO_PKG_VERSION"));

    let mut settings = Settings::load(&cli.config).context("loading settings")?;
    if let Some(buffer) = cli.buffer {
        settings.engine.buffer_distance = buffer;
    }

    info!(
        enabled = settings.engine.enabled,
        buffer_distance = settings.engine.buffer_distance,
        blocks = cli.blocks,
        "Configuration loaded"
    );

    let mut doc = MemoryDocument::new();
    let ids = doc.push_blocks(cli.blocks, cli.block_height);

    let metrics = MetricsStatsSink::new().context("registering metrics")?;
    let registry = metrics.registry().clone();
    let (stats_tx, stats_rx) = stats_channel();
    let sink = FanoutSink::new().with(metrics).with(stats_tx);

    let handle = runtime::spawn(Engine::new(doc, &settings, sink, "/c/simulated"));

    let viewport = cli.viewport;
    let bottom = (cli.blocks as f64 * cli.block_height - viewport).max(0.0);
    let step = viewport;

    // Top of the document is reached from the bottom, the way a reader
    // scrolls back through a long conversation.
    let mut positions = Vec::new();
    let mut top = bottom;
    while top > 0.0 {
        positions.push(top);
        top -= step;
    }
    positions.push(0.0);
    positions.extend(positions.clone().into_iter().rev().skip(1));

    for scroll_top in positions {
        let batch = handle
            .inspect(move |engine| engine.host_mut().scroll_to(scroll_top, viewport))
            .await
            .context("engine task exited")?;
        if !batch.is_empty() {
            handle.visibility(batch);
        }
    }

    // A new turn streams in at the end of the conversation.
    let block_height = cli.block_height;
    let new_turn = handle
        .inspect(move |engine| {
            let doc = engine.host_mut();
            let id = doc.push_block(vec!["turn-streaming".to_string()], block_height);
            doc.set_streaming(id, true);
            id
        })
        .await
        .context("engine task exited")?;
    handle.mutations(vec![MutationRecord {
        added: vec![new_turn],
    }]);

    tokio::time::sleep(settings.timing.stats_debounce() + Duration::from_millis(50)).await;
    let snapshot = *stats_rx.borrow();
    info!(%snapshot, "Stats after scrolling");

    let engine = handle.shutdown().await.context("engine task panicked")?;
    let inconsistent = engine.inconsistent_blocks();
    let intact = ids
        .iter()
        .filter(|&&id| engine.host().block(id).is_some_and(|b| b.children.len() == 2))
        .count();
    info!(
        restored_intact = intact,
        total = ids.len(),
        inconsistent = inconsistent.len(),
        cached = engine.cache().len(),
        "Engine unloaded"
    );

    print!("{}", render_registry(&registry));
    Ok(())
}
