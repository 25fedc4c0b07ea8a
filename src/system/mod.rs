//! Thread orchestration for pipeline stages.
//!
//! This module contains the `StageRunner` that moves a stage onto its own
//! thread, along with the shared runner state and the message types
//! exchanged with it.

pub mod messages;
pub mod shared_state;
mod runner;

pub use messages::{ControlMsg, StageOutput};
pub use shared_state::RunnerState;
pub use runner::StageRunner;
