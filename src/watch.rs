use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::mpsc::channel;
use std::time::Duration;

use anyhow::{Context as _, Result};
use log::debug;
use notify::{RecommendedWatcher, RecursiveMode, Watcher as _};
use tokio::sync::mpsc;

/// Watch `root` recursively and deliver batches of changed paths.
///
/// Raw watcher events arrive in rapid bursts (editors write temp files,
/// builds touch whole trees), so events are drained until the stream has
/// been quiet for `settle` and delivered as one deduplicated batch. The
/// watcher lives on its own thread; it shuts down when the receiver is
/// dropped.
pub fn changed_paths(root: &Path, settle: Duration) -> Result<mpsc::UnboundedReceiver<Vec<PathBuf>>> {
    let (raw_tx, raw_rx) = channel();
    let mut watcher = RecommendedWatcher::new(
        move |event| {
            let _ = raw_tx.send(event);
        },
        notify::Config::default(),
    )
    .context("creating filesystem watcher")?;
    watcher
        .watch(root, RecursiveMode::Recursive)
        .with_context(|| format!("watching {}", root.display()))?;

    let (batch_tx, batch_rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        // The watcher must stay alive as long as this thread runs.
        let _watcher = watcher;
        while let Ok(first) = raw_rx.recv() {
            let mut events = vec![first];
            while let Ok(event) = raw_rx.recv_timeout(settle) {
                events.push(event);
            }
            let paths = coalesce(events);
            if !paths.is_empty() && batch_tx.send(paths).is_err() {
                break;
            }
        }
    });
    Ok(batch_rx)
}

/// Deduplicated paths named by a batch of raw events. Watcher errors don't
/// carry a usable path, so they are logged and dropped.
fn coalesce(events: Vec<notify::Result<notify::Event>>) -> Vec<PathBuf> {
    let mut paths = BTreeSet::new();
    for event in events {
        match event {
            Ok(event) => paths.extend(event.paths),
            Err(err) => debug!("Watcher error: {err}"),
        }
    }
    paths.into_iter().collect()
}
