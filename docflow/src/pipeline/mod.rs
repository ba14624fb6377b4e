//! Pipeline orchestration: promotion, the scheduler state machine, and the
//! single-flight trigger that starts scheduler runs.

mod promotion;
mod scheduler;
mod shutdown;
mod trigger;


pub use promotion::{PromotionManager, PromotionReport};
pub use scheduler::{CheckupFlags, ManagerStep, PipelineScheduler, RunReport, RunState};
pub use shutdown::ShutdownToken;
pub use trigger::{FireOutcome, PipelineTrigger};
