//! Per-stage at-least-once completion channels.
//!
//! Each stage owns one channel. Actors and completion adapters send
//! [`Message`] bodies; the stage's await phase drains and acknowledges them.

mod memory;
mod registry;

pub use memory::InMemoryStageChannel;
pub use registry::ChannelRegistry;

use crate::core::{Message, Stage};
use crate::errors::Result;
use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

/// Handle for acknowledging one delivery of a message.
///
/// A redelivered message gets a fresh receipt; only the latest one acks it.
pub type Receipt = Uuid;

/// One delivery of a channel message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Receipt to pass to [`StageChannel::ack`].
    pub receipt: Receipt,
    /// The raw message body.
    pub body: String,
    /// How many times this message has been delivered, including this one.
    pub receive_count: u32,
}

impl Envelope {
    /// Decodes the body as a [`Message`].
    pub fn message(&self) -> Result<Message> {
        Message::from_body(&self.body)
    }
}

/// Contract for one stage's completion channel.
#[async_trait]
pub trait StageChannel: Send + Sync {
    /// The stage this channel delivers to.
    fn stage(&self) -> Stage;

    /// Enqueues a raw body.
    async fn send(&self, body: String) -> Result<()>;

    /// Returns up to one batch of visible messages.
    ///
    /// A single call is not a full read; see [`drain`].
    async fn receive_batch(&self) -> Result<Vec<Envelope>>;

    /// Removes a delivered message. Returns false for a stale receipt.
    async fn ack(&self, receipt: &Receipt) -> Result<bool>;

    /// Removes every message, delivered or not. Returns how many were removed.
    async fn purge_all(&self) -> Result<usize>;
}

/// Channel handle shared between components.
pub type SharedChannel = Arc<dyn StageChannel>;

/// Encodes and enqueues a message.
pub async fn send_message(channel: &dyn StageChannel, message: &Message) -> Result<()> {
    channel.send(message.to_body()?).await
}

/// Receives batches until the channel returns an empty one.
pub async fn drain(channel: &dyn StageChannel) -> Result<Vec<Envelope>> {
    let mut drained = Vec::new();
    loop {
        let batch = channel.receive_batch().await?;
        if batch.is_empty() {
            return Ok(drained);
        }
        drained.extend(batch);
    }
}
