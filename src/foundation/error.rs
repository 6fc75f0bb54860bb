/// Crate-wide result alias.
pub type DatelapseResult<T> = Result<T, DatelapseError>;

/// Top-level error taxonomy.
///
/// Each variant maps to one failure class: configuration problems fail fast before any work is
/// scheduled, ordering and assembly problems abort their single call, and capture problems are
/// only surfaced here when a caller asks for a hard failure (per-date failures normally land in a
/// [`crate::CaptureReport`]).
#[derive(thiserror::Error, Debug)]
pub enum DatelapseError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("capture error: {0}")]
    Capture(String),

    #[error("ordering error: {0}")]
    Ordering(String),

    #[error("assembly error: {0}")]
    Assembly(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DatelapseError {
    /// Build a [`DatelapseError::Config`] value.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Build a [`DatelapseError::Capture`] value.
    pub fn capture(msg: impl Into<String>) -> Self {
        Self::Capture(msg.into())
    }

    /// Build a [`DatelapseError::Ordering`] value.
    pub fn ordering(msg: impl Into<String>) -> Self {
        Self::Ordering(msg.into())
    }

    /// Build a [`DatelapseError::Assembly`] value.
    pub fn assembly(msg: impl Into<String>) -> Self {
        Self::Assembly(msg.into())
    }
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/error.rs"]
mod tests;
