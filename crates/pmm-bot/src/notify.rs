//! Operator notifications.
//!
//! The transport (chat, pager, ...) is a black box behind [`Notifier`];
//! the shipped implementation routes messages into the structured log.

use async_trait::async_trait;
use tracing::info;

/// Outbound notification sink.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, text: &str);
}

/// Notifier writing to the log at info level.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, text: &str) {
        info!(target: "pmm::notify", "{text}");
    }
}
