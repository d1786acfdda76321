//! MathSense "Other" pathway: turn a free-text prompt into plotting code via a
//! generation service, then run that code in a sandbox and capture one figure.

pub mod concepts;
pub mod config;
pub mod error;
pub mod generation;
pub mod llm;
pub mod pipeline;
pub mod role;
pub mod sandbox;
pub mod session;

pub use error::{ExecutionError, GenerationError, PipelineError};
pub use generation::{CodeGenerator, GeneratedCode, GenerationRequest};
pub use pipeline::Pipeline;
pub use sandbox::{ExecutionPhase, ExecutionResult, Figure, SandboxExecutor};
pub use session::Session;
