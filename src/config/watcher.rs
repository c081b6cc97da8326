//! Configuration file watcher for hot reload.
//!
//! # Responsibilities
//! - Turn file system events for one config file into validated `GuardConfig`s
//! - Collapse the bursts of events a single save produces
//! - Skip reloads that change nothing
//!
//! # Design Decisions
//! - Watches the parent directory, so editors that save by rename are seen
//! - A broken edit is logged and dropped; the running configuration stays

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::load_config;
use crate::config::schema::GuardConfig;

/// Quiet period after the last file event before the file is re-read.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(250);

/// Watches one configuration file and forwards each new valid configuration.
pub struct ConfigWatcher {
    path: PathBuf,
    debounce: Duration,
    update_tx: mpsc::UnboundedSender<GuardConfig>,
}

impl ConfigWatcher {
    /// Returns the watcher and a receiver for configuration updates.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<GuardConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();

        (
            Self {
                path: path.to_path_buf(),
                debounce: DEFAULT_DEBOUNCE,
                update_tx,
            },
            update_rx,
        )
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Start watching. Must be called inside a Tokio runtime.
    ///
    /// The returned handle must be kept alive; dropping it stops the reload
    /// task and closes the update channel.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let file_name = self.path.file_name().map(|name| name.to_os_string());

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    let relevant = (event.kind.is_modify() || event.kind.is_create())
                        && event
                            .paths
                            .iter()
                            .any(|p| p.file_name().map(|n| n.to_os_string()) == file_name);
                    if relevant {
                        let _ = event_tx.send(());
                    }
                }
                Err(e) => tracing::error!(error = ?e, "Watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;

        // the file as it is now is the baseline, not an update
        let current = load_config(&self.path).ok();
        tokio::spawn(forward_changes(
            self.path.clone(),
            self.debounce,
            event_rx,
            self.update_tx,
            current,
        ));

        tracing::info!(path = ?self.path, debounce = ?self.debounce, "Config watcher started");
        Ok(watcher)
    }
}

async fn forward_changes(
    path: PathBuf,
    debounce: Duration,
    mut events: mpsc::UnboundedReceiver<()>,
    updates: mpsc::UnboundedSender<GuardConfig>,
    mut current: Option<GuardConfig>,
) {
    while events.recv().await.is_some() {
        tokio::time::sleep(debounce).await;
        while events.try_recv().is_ok() {}

        match load_config(&path) {
            Ok(config) if current.as_ref() == Some(&config) => {
                tracing::debug!(path = ?path, "Config file touched without changes");
            }
            Ok(config) => {
                tracing::info!(path = ?path, "Config file change detected, reloading");
                current = Some(config.clone());
                if updates.send(config).is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::error!(path = ?path, error = %e, "Failed to reload config, keeping current configuration");
            }
        }
    }
    tracing::debug!(path = ?path, "Config watcher stopped");
}
