use std::sync::{Arc, Mutex};

use tokio::sync::watch;

use crate::command::token_is_self_or_descendant;

/// Cooperative cancellation signal shared by every context of a command tree.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    tx: Arc<watch::Sender<bool>>,
}

impl CancellationToken {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once `cancel` has been called. Resolves immediately if it
    /// already was.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

struct Entry {
    token: String,
    root: String,
    cancellation: CancellationToken,
}

/// Commands currently executing on one kernel, with their cancellation
/// signals. Entries are removed when their guard drops.
#[derive(Default)]
pub(crate) struct InFlightTable {
    entries: Mutex<Vec<Entry>>,
}

impl InFlightTable {
    pub(crate) fn enter(
        self: &Arc<Self>,
        token: &str,
        root: &str,
        cancellation: CancellationToken,
    ) -> InFlightGuard {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(Entry {
                token: token.to_string(),
                root: root.to_string(),
                cancellation,
            });
        }
        InFlightGuard {
            table: self.clone(),
            token: token.to_string(),
        }
    }

    /// Cancels every entry at or below `token`, or every entry when no token
    /// is given. A token only reaches entries of the tree it belongs to, so a
    /// dotted root such as `abc.1` is out of reach of a cancel for `abc`.
    /// Returns whether anything was cancelled.
    pub(crate) fn cancel(&self, token: Option<&str>) -> bool {
        let Ok(entries) = self.entries.lock() else {
            return false;
        };
        let mut hit = false;
        for entry in entries.iter() {
            let matches = token.is_none_or(|t| {
                token_is_self_or_descendant(&entry.token, t)
                    && token_is_self_or_descendant(t, &entry.root)
            });
            if matches {
                entry.cancellation.cancel();
                hit = true;
            }
        }
        hit
    }

    pub(crate) fn runs_tree(&self, root_token: &str) -> bool {
        self.entries
            .lock()
            .map(|entries| entries.iter().any(|entry| entry.root == root_token))
            .unwrap_or(false)
    }
}

pub(crate) struct InFlightGuard {
    table: Arc<InFlightTable>,
    token: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if let Ok(mut entries) = self.table.entries.lock() {
            if let Some(pos) = entries.iter().rposition(|e| e.token == self.token) {
                entries.remove(pos);
            }
        }
    }
}
