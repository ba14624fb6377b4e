//! # Docflow
//!
//! Orchestration core for a seven-stage document processing pipeline.
//!
//! Every document moves `acquire → convert → extract → reshape → operate →
//! augment → catalog`. Within a stage it is `WAITING`, `RUNNING`, `HOLDING`,
//! `SUCCESS`, `FAILURE`, or `TIMEOUT`. The crate provides:
//!
//! - **Document model**: the `Stage#State` key, `Order#Stamp` ordering, and
//!   one stage map per stage
//! - **Begin phase**: launches stage actors with retry accounting and
//!   backpressure
//! - **Await phase**: absorbs completion messages and expires stalled launches
//! - **Promotion**: moves successful documents to the next stage
//! - **Scheduler**: the `STARTUP → PROMOTE → CHECKUP → PROCESS → STANDBY`
//!   loop behind a single-flight trigger
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use docflow::prelude::*;
//!
//! let config = PipelineConfig::from_env()?;
//! let store = Arc::new(InMemoryDocumentStore::new());
//! let channels = ChannelRegistry::in_memory(&config);
//! let ctx = PhaseContext::new(store.clone(), SystemClock::shared(), NoOpEventSink::shared());
//! let invoker = LocalInvoker::pass_through(&config, channels.clone(), SystemClock::shared());
//!
//! let scheduler = PipelineScheduler::new(&config, ctx, &channels, Arc::new(invoker))?;
//! let trigger = Arc::new(PipelineTrigger::new(Arc::new(scheduler)));
//! Ingestor::new(store, NoOpEventSink::shared())
//!     .with_trigger(trigger.clone())
//!     .ingest(&notices)
//!     .await?;
//! trigger.join().await;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod adapters;
pub mod channel;
pub mod config;
pub mod core;
pub mod errors;
pub mod events;
pub mod ingest;
pub mod invoke;
pub mod observability;
pub mod phases;
pub mod pipeline;
pub mod store;
pub mod testing;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::channel::{ChannelRegistry, InMemoryStageChannel, StageChannel};
    pub use crate::config::{PipelineConfig, StagePolicy};
    pub use crate::core::{
        BlobRef, Document, DocumentId, Grade, MapUpdate, Message, OrderStamp, Stage, StageState,
        State,
    };
    pub use crate::errors::{DocflowError, Result};
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::ingest::{ArrivalNotice, Ingestor};
    pub use crate::invoke::{Actor, ActorOutcome, Invocation, Invoker, LocalInvoker};
    pub use crate::phases::{AwaitPhase, BeginPhase, PhaseContext};
    pub use crate::pipeline::{
        FireOutcome, ManagerStep, PipelineScheduler, PipelineTrigger, PromotionManager,
        ShutdownToken,
    };
    pub use crate::store::{DocumentStore, InMemoryDocumentStore};
    pub use crate::utils::{Clock, SystemClock, Timestamp};
    pub use std::sync::Arc;
}
