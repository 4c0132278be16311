//! Integration tests for the serialized engine task.

use std::time::Duration;

use futures::StreamExt;

use scroll_virtualizer::config::{ConfigChange, Settings};
use scroll_virtualizer::host::memory::MemoryDocument;
use scroll_virtualizer::host::{MutationRecord, StatsSnapshot, VisibilityEntry};
use scroll_virtualizer::lifecycle::{Engine, LifecycleState};
use scroll_virtualizer::runtime::{self, stats_channel, stats_stream};

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn test_mutation_burst_publishes_once() {
    let mut doc = MemoryDocument::new();
    doc.push_blocks(3, 200.0);
    let engine = Engine::new(doc, &Settings::default(), Vec::<StatsSnapshot>::new(), "/c/a");
    let handle = runtime::spawn(engine);

    // Let the startup publish go out first.
    tokio::time::sleep(Duration::from_secs(1)).await;
    let baseline = handle
        .inspect(|e| e.stats_sink().len())
        .await
        .unwrap();
    assert_eq!(baseline, 1);

    for _ in 0..10 {
        let id = handle
            .inspect(|e| e.host_mut().push_block(vec!["turn".into()], 200.0))
            .await
            .unwrap();
        handle.mutations(vec![MutationRecord { added: vec![id] }]);
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    tokio::time::sleep(Duration::from_secs(1)).await;
    let published = handle
        .inspect(|e| e.stats_sink().clone())
        .await
        .unwrap();
    assert_eq!(published.len(), 2);
    assert_eq!(
        published[1],
        StatsSnapshot {
            virtualized: 0,
            total: 13
        }
    );

    handle.shutdown().await.unwrap();
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn test_waits_for_scroll_root() {
    let mut doc = MemoryDocument::without_scroll_root();
    doc.push_blocks(4, 200.0);
    let handle = runtime::spawn(Engine::new(
        doc,
        &Settings::default(),
        Vec::<StatsSnapshot>::new(),
        "/c/a",
    ));

    let state = handle.inspect(|e| e.state()).await.unwrap();
    assert_eq!(state, LifecycleState::Initializing { attempts: 1 });

    tokio::time::sleep(Duration::from_millis(1200)).await;
    handle
        .inspect(|e| e.host_mut().set_scroll_root(true))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(600)).await;

    let state = handle.inspect(|e| e.state()).await.unwrap();
    assert_eq!(state, LifecycleState::Active);
    handle.shutdown().await.unwrap();
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn test_shutdown_restores_virtualized_blocks() {
    let mut doc = MemoryDocument::new();
    let ids = doc.push_blocks(8, 200.0);
    let (tx, rx) = stats_channel();
    let handle = runtime::spawn(Engine::new(doc, &Settings::default(), tx, "/c/a"));

    handle.visibility(ids.iter().map(|&b| VisibilityEntry::hidden(b)).collect());
    let cached = handle.inspect(|e| e.cache().len()).await.unwrap();
    assert_eq!(cached, 5);

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(
        *rx.borrow(),
        StatsSnapshot {
            virtualized: 5,
            total: 8
        }
    );

    let engine = handle.shutdown().await.unwrap();
    assert_eq!(engine.state(), LifecycleState::Disabled);
    assert!(engine.cache().is_empty());
    for &b in &ids {
        let block = engine.host().block(b).unwrap();
        assert_eq!(block.children.len(), 2);
        assert!(!block.virtualized);
    }
    // Teardown flushes the final counts.
    assert_eq!(*rx.borrow(), StatsSnapshot::default());
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn test_navigation_burst_resets_once() {
    let mut doc = MemoryDocument::new();
    let ids = doc.push_blocks(6, 200.0);
    let handle = runtime::spawn(Engine::new(
        doc,
        &Settings::default(),
        Vec::<StatsSnapshot>::new(),
        "/c/a",
    ));
    handle.visibility(ids.iter().map(|&b| VisibilityEntry::hidden(b)).collect());

    handle
        .inspect(|e| e.host_mut().replace_document())
        .await
        .unwrap();
    for path in ["/c/b", "/c/b", "/c/c", "/c/d"] {
        handle.navigate(path);
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    tokio::time::sleep(Duration::from_secs(1)).await;

    let (state, connects, cached, location) = handle
        .inspect(|e| {
            (
                e.state(),
                e.host().counters().connects,
                e.cache().len(),
                e.location().to_string(),
            )
        })
        .await
        .unwrap();
    assert_eq!(state, LifecycleState::Active);
    assert_eq!(connects, 2);
    assert_eq!(cached, 0);
    assert_eq!(location, "/c/d");

    handle.shutdown().await.unwrap();
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn test_stats_stream_sees_config_disable() {
    let mut doc = MemoryDocument::new();
    let ids = doc.push_blocks(5, 200.0);
    let (tx, rx) = stats_channel();
    let handle = runtime::spawn(Engine::new(doc, &Settings::default(), tx, "/c/a"));
    let mut stream = stats_stream(rx);

    // Current value first.
    assert_eq!(stream.next().await, Some(StatsSnapshot::default()));

    handle.visibility(ids.iter().map(|&b| VisibilityEntry::hidden(b)).collect());
    let snap = stream.next().await.unwrap();
    assert_eq!(
        snap,
        StatsSnapshot {
            virtualized: 2,
            total: 5
        }
    );

    handle.configure(ConfigChange {
        enabled: Some(false),
        buffer_distance: None,
    });
    let snap = stream.next().await.unwrap();
    assert_eq!(snap, StatsSnapshot::default());

    let engine = handle.shutdown().await.unwrap();
    assert!(engine.inconsistent_blocks().is_empty());
}
