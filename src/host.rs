//! User-facing hooks the cache calls into during conflict handling.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictChoice {
    /// Show remote and local content side by side.
    Compare,
    /// Replace the remote content with the local save.
    Overwrite,
}

/// Everything needed to present a remote-vs-local comparison.
#[derive(Debug, Clone)]
pub struct DiffRequest {
    pub title: String,
    /// Virtual path of the conflict shadow entry (remote side).
    pub remote_path: String,
    /// Virtual path of the local entry.
    pub local_path: String,
    pub remote: Bytes,
    pub local: Bytes,
}

#[async_trait]
pub trait HostShell: Send + Sync {
    /// Ask how to resolve a rejected save of `file_name`. `None` means the
    /// prompt was dismissed.
    async fn prompt_conflict(&self, file_name: &str) -> Option<ConflictChoice>;

    async fn open_diff(&self, request: DiffRequest);

    async fn close_diff(&self, _remote_path: &str) {}

    fn status_message(&self, message: &str) {
        tracing::info!("{}", message);
    }
}

/// A host with no user: answers every prompt with a fixed choice and
/// records the comparisons it was asked to show.
#[derive(Debug, Default)]
pub struct HeadlessHost {
    choice: Option<ConflictChoice>,
    opened: Mutex<Vec<DiffRequest>>,
    closed: Mutex<Vec<String>>,
    messages: Mutex<Vec<String>>,
}

impl HeadlessHost {
    pub fn new(choice: Option<ConflictChoice>) -> Self {
        HeadlessHost {
            choice,
            ..Default::default()
        }
    }

    pub fn opened_diffs(&self) -> Vec<DiffRequest> {
        self.opened.lock().clone()
    }

    pub fn closed_diffs(&self) -> Vec<String> {
        self.closed.lock().clone()
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().clone()
    }
}

#[async_trait]
impl HostShell for HeadlessHost {
    async fn prompt_conflict(&self, file_name: &str) -> Option<ConflictChoice> {
        tracing::debug!("Conflict on {}, answering {:?}", file_name, self.choice);
        self.choice
    }

    async fn open_diff(&self, request: DiffRequest) {
        self.opened.lock().push(request);
    }

    async fn close_diff(&self, remote_path: &str) {
        self.closed.lock().push(remote_path.to_string());
    }

    fn status_message(&self, message: &str) {
        tracing::info!("{}", message);
        self.messages.lock().push(message.to_string());
    }
}
