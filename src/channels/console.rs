//! Console sink: logs outgoing messages instead of delivering them.

use async_trait::async_trait;
use tracing::info;

use crate::channels::MessageSink;
use crate::error::SendError;

/// Dry-run transport for channels without a configured provider.
pub struct ConsoleSink {
    name: String,
}

impl ConsoleSink {
    pub fn new(channel: &str) -> Self {
        Self {
            name: format!("console:{channel}"),
        }
    }
}

#[async_trait]
impl MessageSink for ConsoleSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, phone: &str, text: &str) -> Result<(), SendError> {
        if phone.is_empty() {
            return Err(SendError::Transport {
                channel: self.name.clone(),
                reason: "empty phone number".to_string(),
            });
        }
        info!(sink = %self.name, phone = %phone, chars = text.chars().count(), "📤 {}", text);
        Ok(())
    }
}
