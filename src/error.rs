//! Error taxonomy for the generate-then-execute pipeline.

use std::time::Duration;

use thiserror::Error;

/// Failures of the code generation phase.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationError {
    #[error("the prompt is empty; describe the concept you want to visualize")]
    EmptyPrompt,

    #[error("generation service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("authentication with the generation service failed: {0}")]
    Authentication(String),

    #[error("the generation service returned no usable code: {0}")]
    MalformedResponse(String),
}

/// Failures of the sandboxed execution phase.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    #[error("disallowed operation on line {line}: {reason}")]
    DisallowedOperation { reason: String, line: usize },

    #[error("generated code did not finish within {}", humanize(*.0))]
    Timeout(Duration),

    #[error("generated code raised an error: {0}")]
    GeneratedCodeRuntime(String),

    #[error("generated code must produce exactly one figure, it produced {figures}")]
    AmbiguousOutput { figures: usize },

    /// The interpreter could not be started or lacks numpy/matplotlib.
    #[error("sandbox unavailable: {0}")]
    SandboxUnavailable(String),
}

/// Pipeline-level failure; the message always names the phase.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    #[error("generation failed: {0}")]
    Generation(#[from] GenerationError),

    #[error("execution failed: {0}")]
    Execution(#[from] ExecutionError),

    #[error("execution failed: no generated code in this session yet")]
    NothingToRun,

    #[error("generation failed: a request is already in flight; wait for it to finish")]
    Busy,
}

impl PipelineError {
    pub fn phase(&self) -> &'static str {
        match self {
            PipelineError::Generation(_) | PipelineError::Busy => "generation",
            PipelineError::Execution(_) | PipelineError::NothingToRun => "execution",
        }
    }
}

fn humanize(d: Duration) -> String {
    if d.subsec_millis() == 0 {
        format!("{}s", d.as_secs())
    } else {
        format!("{:.1}s", d.as_secs_f64())
    }
}
