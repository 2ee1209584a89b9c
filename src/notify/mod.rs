//! Notification channels.
//!
//! Defines the `Notifier` trait and the Slack incoming-webhook
//! implementation.

pub mod slack;

use async_trait::async_trait;

use crate::types::DispatchError;

/// Abstraction over an outbound message channel.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver one pre-formatted message.
    async fn send(&self, text: &str) -> Result<(), DispatchError>;
}
