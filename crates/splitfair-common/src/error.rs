use thiserror::Error;

/// Errors raised while turning backend rows into domain records.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("assignment lists no assignees")]
    EmptyAssignment,

    #[error("assignment marked single but lists {count} assignees")]
    AssignmentShapeMismatch { count: usize },

    #[error("unknown resource '{0}'")]
    UnknownResource(String),
}
