use std::fmt;

use kpipe_core::Cancelled;

/// Failure inside the filter/transform applier. Carries the identity of the
/// document being processed (`Kind:name (namespace)`) and the underlying cause.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("filter error for {identity}")]
    Filter {
        identity: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("transformer error for {identity}")]
    Transform {
        identity: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("render cancelled")]
    Cancelled,
}

impl From<Cancelled> for PipelineError {
    fn from(_: Cancelled) -> Self { PipelineError::Cancelled }
}

/// Which pass of the engine pipeline failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    EngineFilter,
    RenderFilter,
    EngineTransform,
    RenderTransform,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::EngineFilter => "engine filter",
            Stage::RenderFilter => "render filter",
            Stage::EngineTransform => "engine transform",
            Stage::RenderTransform => "render transform",
        };
        f.write_str(s)
    }
}

/// Errors returned by [`crate::Engine::render`]. A render either returns every
/// document or exactly one of these.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("generator #{index} ({name}) failed")]
    Generator {
        index: usize,
        name: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("{stage} stage failed")]
    Pipeline {
        stage: Stage,
        #[source]
        source: PipelineError,
    },
    #[error("generator task #{index} ({name}) did not complete: {reason}")]
    Join { index: usize, name: String, reason: String },
    #[error("render cancelled")]
    Cancelled,
}

impl From<Cancelled> for EngineError {
    fn from(_: Cancelled) -> Self { EngineError::Cancelled }
}

impl EngineError {
    pub(crate) fn at(stage: Stage, err: PipelineError) -> Self {
        match err {
            PipelineError::Cancelled => EngineError::Cancelled,
            source => EngineError::Pipeline { stage, source },
        }
    }

    pub fn is_cancelled(&self) -> bool { matches!(self, EngineError::Cancelled) }
}
