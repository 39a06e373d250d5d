use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Directory not accessible: {0}")]
    NotAccessible(String),

    #[error("Classifier transport error: {0}")]
    Transport(String),

    #[error("Classifier returned an empty response")]
    EmptyResponse,

    #[error("Classifier response was truncated: {0}")]
    Truncated(String),

    #[error("Invalid classifier response: {0}")]
    InvalidStructure(String),

    #[error("Move failed for {name}: {reason}")]
    MoveFailure { name: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid undo record: {0}")]
    InvalidRecord(String),

    #[error("Grouping does not cover the snapshot: {0}")]
    CoverageViolation(String),

    #[error("{0}")]
    General(String),
}

impl AppError {
    /// Batch-local failures that earn the single retry. A truncated reply is
    /// discarded outright: resending the same payload rarely fits next time.
    pub fn is_batch_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::EmptyResponse | Self::InvalidStructure(_)
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Io(_) => "io",
            Self::Serde(_) => "serde",
            Self::NotAccessible(_) => "not_accessible",
            Self::Transport(_) => "transport",
            Self::EmptyResponse => "empty_response",
            Self::Truncated(_) => "truncated",
            Self::InvalidStructure(_) => "invalid_structure",
            Self::MoveFailure { .. } => "move_failure",
            Self::Config(_) => "config",
            Self::InvalidRecord(_) => "invalid_record",
            Self::CoverageViolation(_) => "coverage_violation",
            Self::General(_) => "general",
        }
    }
}

impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
