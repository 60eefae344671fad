// ============================================================================
// batch-observe - Errors
// Failure reported through a flush's completion signal
// ============================================================================

/// Why a flush cycle did not complete successfully.
///
/// Only callers awaiting [`when_update_complete`] ever see this. The error is
/// `Clone` because every awaiter of a completion signal receives the same
/// result.
///
/// [`when_update_complete`]: crate::UpdatePipeline::when_update_complete
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UpdateError {
    /// The callback, or the deferred work it returned, reported failure.
    #[error("update failed: {0}")]
    Failed(String),

    /// The flush task was dropped or refused before it could finish.
    #[error("flush abandoned before completion")]
    Abandoned,
}

impl UpdateError {
    /// Wrap any displayable error as a callback failure.
    pub fn failed(err: impl std::fmt::Display) -> Self {
        Self::Failed(err.to_string())
    }
}

/// Result of one flush cycle.
pub type UpdateResult = Result<(), UpdateError>;
