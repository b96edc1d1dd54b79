pub mod attribution;
pub mod cache;
pub mod cli;
pub mod coherence;
pub mod engine;
pub mod error;
pub mod falsesharing;
pub mod prefetch;
pub mod presets;
pub mod report;
pub mod suggest;
pub mod tlb;
pub mod trace;

pub use crate::engine::{Engine, EngineConfig, RunOptions};
pub use crate::error::{Result, SimError};
pub use crate::report::Report;
