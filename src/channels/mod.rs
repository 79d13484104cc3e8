//! Outbound message transports.

pub mod console;
pub mod sms;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::blast::model::Channel;
use crate::error::SendError;

pub use console::ConsoleSink;
pub use sms::{SmsConfig, SmsProvider, SmsSink};

/// A transport able to deliver one text message to one phone number.
#[async_trait]
pub trait MessageSink: Send + Sync {
    /// Transport name for logs.
    fn name(&self) -> &str;

    /// Deliver `text` to `phone` (international digits, no `+`).
    async fn send(&self, phone: &str, text: &str) -> Result<(), SendError>;
}

/// Transports registered per blast channel.
#[derive(Clone, Default)]
pub struct SinkRegistry {
    sinks: HashMap<Channel, Arc<dyn MessageSink>>,
}

impl SinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, channel: Channel, sink: Arc<dyn MessageSink>) -> Self {
        self.register(channel, sink);
        self
    }

    pub fn register(&mut self, channel: Channel, sink: Arc<dyn MessageSink>) {
        tracing::debug!(channel = %channel, sink = sink.name(), "Registered message sink");
        self.sinks.insert(channel, sink);
    }

    pub fn get(&self, channel: Channel) -> Option<Arc<dyn MessageSink>> {
        self.sinks.get(&channel).cloned()
    }

    pub fn contains(&self, channel: Channel) -> bool {
        self.sinks.contains_key(&channel)
    }
}
