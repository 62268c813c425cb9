use thiserror::Error;

/// Result type returned by a single task body. Task code reports failures
/// through `anyhow` so that userland steps can bubble any error type up.
pub type TaskResult = anyhow::Result<()>;

/// Top-level pipeline failure.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error("Task '{0}':\n{1}")]
    Task(String, anyhow::Error),
}

/// A malformed composite plan. These are raised while wiring the pipeline,
/// strictly before any task runs.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("Unknown task or plan name '{0}'")]
    UnknownName(String),

    #[error("Task '{0}' registered twice")]
    DuplicateTask(String),

    #[error("Plan '{0}' registered twice")]
    DuplicatePlan(String),

    #[error("Plans reference each other in a cycle")]
    Cycle,
}

/// Failure while resolving a glob-described file set.
#[derive(Debug, Error)]
pub enum SelectError {
    #[error("Couldn't compile glob pattern.\n{0}")]
    Pattern(#[from] glob::PatternError),

    #[error("Couldn't run glob.\n{0}")]
    Glob(#[from] glob::GlobError),

    #[error("Couldn't convert path to UTF-8.\n{0}")]
    PathFormat(#[from] camino::FromPathBufError),
}

/// Failure in the file watcher or the live-reload channel.
#[derive(Debug, Error)]
pub enum WatchError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Couldn't bind the live-reload websocket.\n{0}")]
    Bind(std::io::Error),

    #[error(transparent)]
    Pattern(#[from] glob::PatternError),
}
