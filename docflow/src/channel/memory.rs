//! In-process stage channel with visibility timeouts.

use super::{Envelope, Receipt, StageChannel};
use crate::config::ChannelSettings;
use crate::core::Stage;
use crate::errors::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug)]
struct Slot {
    body: String,
    receive_count: u32,
    receipt: Option<Receipt>,
    hidden_until: Option<Instant>,
}

impl Slot {
    fn is_visible(&self, now: Instant) -> bool {
        self.hidden_until.map_or(true, |until| until <= now)
    }
}

/// An at-least-once channel held in memory.
///
/// A received message is hidden for the visibility timeout; if it is not
/// acknowledged by then it becomes visible again and is redelivered with a
/// new receipt. Time is read from `tokio::time`, so paused-clock tests can
/// drive redelivery.
#[derive(Debug)]
pub struct InMemoryStageChannel {
    stage: Stage,
    batch_size: usize,
    visibility_timeout: Duration,
    slots: Mutex<VecDeque<Slot>>,
}

impl InMemoryStageChannel {
    /// Creates an empty channel for a stage.
    #[must_use]
    pub fn new(stage: Stage, settings: ChannelSettings) -> Self {
        Self {
            stage,
            batch_size: settings.batch_size.max(1),
            visibility_timeout: settings.visibility_timeout(),
            slots: Mutex::new(VecDeque::new()),
        }
    }

    /// Number of messages held, visible or in flight.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    /// Returns true if the channel holds no messages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }

    /// Number of messages received but not yet acknowledged.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        let now = Instant::now();
        self.slots.lock().iter().filter(|slot| !slot.is_visible(now)).count()
    }
}

#[async_trait]
impl StageChannel for InMemoryStageChannel {
    fn stage(&self) -> Stage {
        self.stage
    }

    async fn send(&self, body: String) -> Result<()> {
        self.slots.lock().push_back(Slot {
            body,
            receive_count: 0,
            receipt: None,
            hidden_until: None,
        });
        Ok(())
    }

    async fn receive_batch(&self) -> Result<Vec<Envelope>> {
        let now = Instant::now();
        let hidden_until = now + self.visibility_timeout;
        let mut slots = self.slots.lock();

        let batch = slots
            .iter_mut()
            .filter(|slot| slot.is_visible(now))
            .take(self.batch_size)
            .map(|slot| {
                let receipt = Uuid::new_v4();
                slot.receipt = Some(receipt);
                slot.hidden_until = Some(hidden_until);
                slot.receive_count += 1;
                Envelope {
                    receipt,
                    body: slot.body.clone(),
                    receive_count: slot.receive_count,
                }
            })
            .collect();

        Ok(batch)
    }

    async fn ack(&self, receipt: &Receipt) -> Result<bool> {
        let mut slots = self.slots.lock();
        match slots.iter().position(|slot| slot.receipt.as_ref() == Some(receipt)) {
            Some(index) => {
                slots.remove(index);
                Ok(true)
            }
            None => {
                debug!(stage = %self.stage, receipt = %receipt, "Ignoring stale receipt");
                Ok(false)
            }
        }
    }

    async fn purge_all(&self) -> Result<usize> {
        let mut slots = self.slots.lock();
        let purged = slots.len();
        slots.clear();
        Ok(purged)
    }
}
