//! Error types for the compilation layer.
//!
//! Every variant is a deterministic validation failure: compilation aborts
//! and the run must transition to Failed without a submission. Aggregate
//! variants carry every offending name, not just the first, so one failed
//! compile yields a complete diagnostic.

use thiserror::Error;

/// Result type for compilation operations.
pub type Result<T> = std::result::Result<T, CompileError>;

/// Errors that can occur while compiling a task run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    /// A user-supplied environment variable collides with one a strategy
    /// step defines itself.
    #[error("environment variable conflict in strategy {strategy:?} steps: {}", .names.join(", "))]
    EnvironmentConflict {
        strategy: String,
        names: Vec<String>,
    },

    /// User-supplied parameters use system-reserved names.
    #[error("restricted parameters in use: {}", .names.join(", "))]
    ReservedParameters { names: Vec<String> },

    /// Strategy parameters without defaults were never given a value.
    #[error("parameters without a value definition: {}", .names.join(", "))]
    UnresolvedParameters { names: Vec<String> },
}

impl CompileError {
    /// Machine-stable reason code for the Failed condition.
    pub fn reason(&self) -> &'static str {
        match self {
            CompileError::EnvironmentConflict { .. } => "EnvironmentConflict",
            CompileError::ReservedParameters { .. } => "RestrictedParametersInUse",
            CompileError::UnresolvedParameters { .. } => "MissingParameterValues",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_list_all_offenders() {
        let err = CompileError::ReservedParameters {
            names: vec!["shp-output-image".into(), "DOCKERFILE".into()],
        };
        assert_eq!(
            err.to_string(),
            "restricted parameters in use: shp-output-image, DOCKERFILE"
        );

        let err = CompileError::UnresolvedParameters {
            names: vec!["registry".into(), "tag".into()],
        };
        assert_eq!(
            err.to_string(),
            "parameters without a value definition: registry, tag"
        );
    }

    #[test]
    fn test_reason_codes_are_stable() {
        assert_eq!(
            CompileError::ReservedParameters { names: vec![] }.reason(),
            "RestrictedParametersInUse"
        );
        assert_eq!(
            CompileError::UnresolvedParameters { names: vec![] }.reason(),
            "MissingParameterValues"
        );
    }
}
