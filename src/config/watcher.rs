//! Hot reload of the configuration file.
//!
//! Editors and `notify` backends often report one save as several events,
//! so a reload is only forwarded when the parsed snapshot differs from the
//! last one sent.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::load_config;
use crate::config::schema::ResilienceConfig;

/// Watches one config file and emits validated snapshots on change.
pub struct ConfigWatcher {
    path: PathBuf,
    last_sent: Mutex<Option<ResilienceConfig>>,
    updates: mpsc::UnboundedSender<ResilienceConfig>,
}

impl ConfigWatcher {
    /// Returns the watcher and the stream of validated snapshots.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<ResilienceConfig>) {
        let (updates, rx) = mpsc::unbounded_channel();
        let watcher = Self {
            path: path.to_path_buf(),
            last_sent: Mutex::new(None),
            updates,
        };
        (watcher, rx)
    }

    /// Start the OS watcher. Reloads stop when the returned handle is dropped.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let path = self.path.clone();
        let mut handle = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    self.handle_event(&event);
                }
                Err(e) => tracing::error!(error = ?e, "Config watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        handle.watch(&path, RecursiveMode::NonRecursive)?;
        tracing::info!(path = %path.display(), "Config watcher started");
        Ok(handle)
    }

    /// React to one filesystem event. Returns `true` if a snapshot was sent.
    pub fn handle_event(&self, event: &Event) -> bool {
        if !(event.kind.is_modify() || event.kind.is_create()) {
            return false;
        }
        if !event.paths.is_empty() && !event.paths.iter().any(|p| p.ends_with(&self.path)) {
            return false;
        }

        let config = match load_config(&self.path) {
            Ok(config) => config,
            Err(e) => {
                tracing::error!(
                    path = %self.path.display(),
                    error = %e,
                    "Config reload rejected, keeping current configuration"
                );
                return false;
            }
        };

        let mut last = self.last_sent.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if last.as_ref() == Some(&config) {
            return false;
        }

        tracing::info!(path = %self.path.display(), "Config file changed, forwarding new snapshot");
        if self.updates.send(config.clone()).is_err() {
            tracing::debug!("Config update receiver dropped");
            return false;
        }
        *last = Some(config);
        true
    }
}
