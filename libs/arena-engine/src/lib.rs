//! Sandboxed execution engine: ships a job into the shared executor
//! container, compiles it, runs it under a deadline and reads the output back.

pub mod archive;
pub mod config;
pub mod docker;
pub mod environment;
pub mod error;
pub mod judge;
pub mod pipeline;
pub mod sandbox;
pub mod sanitize;

pub use environment::EnvironmentHandle;
pub use error::EngineError;
pub use judge::{Judge, Judgement};
pub use pipeline::Pipeline;
pub use sandbox::{CommandOutput, Sandbox};
