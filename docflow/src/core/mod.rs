//! Core data model: stages, states, grades, documents, and messages.

mod blob;
mod document;
mod message;
mod status;
mod update;

pub use blob::BlobRef;
pub use document::{AugmentMap, Document, DocumentId, ExtractMap, OrderStamp, StageMap, StageMaps};
pub use message::Message;
pub use status::{Grade, Stage, StageState, State, HASH};
pub use update::{MapUpdate, StageExtras};
