//! Generate → store → execute, with every phase outcome returned explicitly.

use tracing::Instrument;

use crate::{
    error::PipelineError,
    generation::{CodeGenerator, GeneratedCode, GenerationRequest},
    llm::CompletionBackend,
    sandbox::{ExecutionResult, Figure, SandboxExecutor},
    session::Session,
};

/// What one generate-and-run action produced once code was stored.
#[derive(Debug)]
pub struct Attempt {
    pub code: GeneratedCode,
    pub figure: Result<Figure, PipelineError>,
}

#[derive(Debug)]
pub struct Pipeline<B> {
    generator: CodeGenerator<B>,
    executor: SandboxExecutor,
}

impl<B: CompletionBackend> Pipeline<B> {
    pub fn new(generator: CodeGenerator<B>, executor: SandboxExecutor) -> Self {
        Self { generator, executor }
    }

    pub fn executor(&self) -> &SandboxExecutor {
        &self.executor
    }

    pub fn generator(&self) -> &CodeGenerator<B> {
        &self.generator
    }

    /// Ask the service for code and store it. On failure the store keeps its previous value.
    pub async fn generate(
        &self,
        session: &Session,
        prompt: &str,
    ) -> Result<GeneratedCode, PipelineError> {
        let _guard = session.try_begin().ok_or(PipelineError::Busy)?;
        self.generate_locked(session, prompt).await
    }

    /// Execute whatever the session currently holds.
    pub async fn run_stored(&self, session: &Session) -> Result<Figure, PipelineError> {
        let _guard = session.try_begin().ok_or(PipelineError::Busy)?;
        self.run_locked(session).await
    }

    /// One user action: generate, store, then execute the stored code.
    ///
    /// Fails outright only when nothing was stored; execution failures come
    /// back inside the [`Attempt`] next to the code that caused them.
    pub async fn generate_and_run(
        &self,
        session: &Session,
        prompt: &str,
    ) -> Result<Attempt, PipelineError> {
        let _guard = session.try_begin().ok_or(PipelineError::Busy)?;
        let code = self.generate_locked(session, prompt).await?;
        let figure = self.run_locked(session).await;
        Ok(Attempt { code, figure })
    }

    async fn generate_locked(
        &self,
        session: &Session,
        prompt: &str,
    ) -> Result<GeneratedCode, PipelineError> {
        let code = self
            .generator
            .generate(GenerationRequest::new(prompt))
            .await?;
        session.store(code.clone());
        Ok(code)
    }

    async fn run_locked(&self, session: &Session) -> Result<Figure, PipelineError> {
        let code = session.current().ok_or(PipelineError::NothingToRun)?;
        let span = tracing::info_span!("execution", fingerprint = %code.fingerprint());
        match self.executor.execute(&code).instrument(span).await {
            ExecutionResult::Success(fig) => Ok(fig),
            ExecutionResult::Failure(e) => Err(e.into()),
        }
    }
}
