use thiserror::Error;

/// Typed failures surfaced by the engine. Everything here is terminal for the
/// operation that raised it; whether it aborts a whole workflow run depends on
/// the failing step's error policy.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A required credential could not be produced by any source. This is a
    /// user-actionable configuration problem, never retried automatically.
    #[error(
        "'{platform}' is not configured: missing credential field '{field}'. \
         Add it on the credentials page or set the matching environment variable."
    )]
    ConfigurationError { platform: String, field: String },

    /// The OAuth state token is unknown or was already consumed. Replaying a
    /// consumed state must always land here.
    #[error("invalid or already consumed authorization state")]
    InvalidState,

    /// Unknown module path or workflow id.
    #[error("not found: {0}")]
    NotFound(String),

    /// A workflow parameter references a step output that is not available:
    /// a forward reference, an unknown step id, or a step that failed or was
    /// skipped earlier in the run.
    #[error("step '{step}' has an unresolvable binding to output of '{reference}'")]
    InvalidBinding { step: String, reference: String },

    /// A single step's external call failed. Recoverable per step policy.
    #[error("step '{step}' failed: {message}")]
    StepFailed { step: String, message: String },
}

impl EngineError {
    pub fn step_failed(step: impl Into<String>, err: impl std::fmt::Display) -> Self {
        EngineError::StepFailed {
            step: step.into(),
            message: err.to_string(),
        }
    }
}
