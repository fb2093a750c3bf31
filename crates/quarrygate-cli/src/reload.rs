//! `hotReload`: watches the collection/procedure directories and
//! swaps in a freshly-built `SchemaRegistry` on change, using a
//! `notify::recommended_watcher` feeding a debounced channel loop. The
//! old registry is never mutated in place — a full rebuild is swapped
//! in behind an `ArcSwap`.

use arc_swap::ArcSwap;
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use quarrygate_schema::SchemaRegistry;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Starts a background watcher over `collections_dir`/`procedures_dir`.
/// Returns the `RecommendedWatcher` handle; dropping it stops watching.
/// Every filesystem event (debounced by `debounce_ms`) triggers one
/// `SchemaRegistry::load_from_dirs` rebuild; a rebuild that fails to
/// parse is logged and the previously-published registry is left alone.
pub fn spawn(
    collections_dir: PathBuf,
    procedures_dir: PathBuf,
    debounce: Duration,
    cell: Arc<ArcSwap<SchemaRegistry>>,
) -> notify::Result<RecommendedWatcher> {
    let (tx, mut rx) = mpsc::unbounded_channel::<()>();

    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
        if res.is_ok() {
            let _ = tx.send(());
        }
    })?;
    watcher.watch(&collections_dir, RecursiveMode::Recursive)?;
    watcher.watch(&procedures_dir, RecursiveMode::Recursive)?;

    tokio::spawn(async move {
        while rx.recv().await.is_some() {
            // Drain any events that arrived during the debounce window
            // so a burst of saves triggers one rebuild, not N.
            tokio::time::sleep(debounce).await;
            while rx.try_recv().is_ok() {}

            match SchemaRegistry::load_from_dirs(&collections_dir, &procedures_dir) {
                Ok(fresh) => {
                    tracing::info!(
                        collections = fresh.collection_names().count(),
                        procedures = fresh.procedure_names().count(),
                        "schema registry reloaded"
                    );
                    cell.store(Arc::new(fresh));
                }
                Err(err) => {
                    tracing::warn!(error = %err, "schema reload failed, keeping previous registry");
                }
            }
        }
    });

    Ok(watcher)
}
