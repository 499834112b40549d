//! Configuration file watcher for hot reload.
//!
//! Editors often emit several modify events per save, and watching the
//! parent directory reports sibling files too. Each event is reduced to a
//! content digest; only a digest change produces a reload attempt.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tokio::sync::mpsc;

use crate::config::loader::parse_config;
use crate::config::schema::GatewayConfig;

/// What a change notification led to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReloadOutcome {
    /// A new validated configuration was published.
    Published,
    /// The file content is the same as last time.
    Unchanged,
    /// The new content was rejected; the running configuration stays.
    Rejected(String),
}

/// Watches the gateway configuration file and publishes validated updates.
pub struct ConfigWatcher {
    path: PathBuf,
    update_tx: mpsc::UnboundedSender<GatewayConfig>,
    last_digest: Mutex<Option<[u8; 32]>>,
}

impl ConfigWatcher {
    /// Returns the watcher and a receiver for validated configuration updates.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<GatewayConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        let watcher = Self {
            path: path.to_path_buf(),
            update_tx,
            last_digest: Mutex::new(None),
        };
        // The content already loaded at startup is not an update.
        if let Ok(content) = std::fs::read(path) {
            *watcher.last_digest.lock() = Some(Sha256::digest(&content).into());
        }
        (watcher, update_rx)
    }

    /// Re-read the file and publish it if its content changed and validates.
    pub fn reload(&self) -> ReloadOutcome {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!(path = ?self.path, error = %e, "Config file unreadable, keeping current configuration");
                return ReloadOutcome::Rejected(e.to_string());
            }
        };

        let digest: [u8; 32] = Sha256::digest(content.as_bytes()).into();
        {
            let mut last = self.last_digest.lock();
            if *last == Some(digest) {
                return ReloadOutcome::Unchanged;
            }
            *last = Some(digest);
        }

        match parse_config(&content) {
            Ok(config) => {
                tracing::info!(path = ?self.path, "Configuration change detected, publishing new generation");
                let _ = self.update_tx.send(config);
                ReloadOutcome::Published
            }
            Err(e) => {
                tracing::error!(path = ?self.path, error = %e, "Rejected configuration change, keeping current configuration");
                ReloadOutcome::Rejected(e.to_string())
            }
        }
    }

    /// Start watching. Keep the returned watcher alive to keep watching.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let file_name = self.path.file_name().map(|n| n.to_os_string());
        let path = self.path.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    let relevant = (event.kind.is_modify() || event.kind.is_create())
                        && event
                            .paths
                            .iter()
                            .any(|p| p.file_name().map(|n| n.to_os_string()) == file_name);
                    if relevant {
                        self.reload();
                    }
                }
                Err(e) => tracing::error!(error = %e, "Config watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        // Editors replace files by rename, so watch the directory.
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?path, "Config watcher started");
        Ok(watcher)
    }
}
