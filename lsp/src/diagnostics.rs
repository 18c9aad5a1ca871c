//! Per-file diagnostics published by one language server, and the waiter
//! used to block until the next publish for a file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::broadcast;

use crate::types::{Diagnostic, DiagnosticsSnapshot};

#[derive(Debug, Default)]
pub(crate) struct DiagnosticsStore {
    data: HashMap<PathBuf, Vec<Diagnostic>>,
}

impl DiagnosticsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the list for `path`. Returns whether the path already had an
    /// entry (an empty publish still counts as an entry).
    pub fn replace(&mut self, path: PathBuf, items: Vec<Diagnostic>) -> bool {
        self.data.insert(path, items).is_some()
    }

    pub fn clear(&mut self, path: &Path) {
        self.data.remove(path);
    }

    pub fn get(&self, path: &Path) -> Option<&[Diagnostic]> {
        self.data.get(path).map(Vec::as_slice)
    }

    pub fn to_map(&self) -> HashMap<PathBuf, Vec<Diagnostic>> {
        self.data.clone()
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot::new(
            self.data
                .iter()
                .map(|(path, items)| (path.clone(), items.clone()))
                .collect(),
        )
    }
}

/// Receives the paths of diagnostics publishes from one client.
///
/// Subscribe before opening the file so a fast publish is not missed.
#[derive(Debug)]
pub struct DiagnosticsWaiter {
    rx: broadcast::Receiver<PathBuf>,
}

impl DiagnosticsWaiter {
    pub(crate) fn new(rx: broadcast::Receiver<PathBuf>) -> Self {
        Self { rx }
    }

    /// Wait for the next publish for exactly `path`.
    ///
    /// Returns `false` on timeout or when the client went away; neither is an
    /// error for callers.
    pub async fn wait(mut self, path: &Path, timeout: Duration) -> bool {
        let wait = async {
            loop {
                match self.rx.recv().await {
                    Ok(published) if published == path => return true,
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::trace!("Diagnostics waiter skipped {skipped} publishes");
                    }
                    Err(broadcast::error::RecvError::Closed) => return false,
                }
            }
        };
        tokio::time::timeout(timeout, wait).await.unwrap_or(false)
    }
}
