use thiserror::Error;

use crate::time::Grain;

#[derive(Error, Debug)]
pub enum PartakeError {
    #[error("Config error: {0}")]
    Config(String),
    #[error("Template error in '{template}': {message}")]
    Template { template: String, message: String },
    #[error("No rule matches '{0}'")]
    NoRuleMatch(String),
    #[error("Ambiguous rule match for '{identifier}': {}", candidates.join(", "))]
    AmbiguousRuleMatch {
        identifier: String,
        candidates: Vec<String>,
    },
    #[error("'{identifier}' does not bind to template '{template}'")]
    UnboundInput { identifier: String, template: String },
    #[error("Max depth {depth} exceeded while resolving rule '{rule}'")]
    MaxDepthExceeded { rule: String, depth: usize },
    #[error("Could not acquire lock '{name}': {reason}")]
    LockAcquisition { name: String, reason: String },
    #[error("Unknown {role} rule: {name}")]
    UnknownRule { name: String, role: String },
    #[error("No command registered for rule '{0}'")]
    MissingCommand(String),
    #[error("Template '{template}' has no segment at {grain} grain")]
    NoGrainSegment { template: String, grain: Grain },
    #[error("Filesystem error: {0}")]
    Filesystem(String),
    #[error("Catalog error: {0}")]
    Catalog(String),
    #[error("Command for rule '{rule}' failed: {message}")]
    Command { rule: String, message: String },
    #[error("Execution error: {0}")]
    Execution(String),
}

pub type Result<T> = std::result::Result<T, PartakeError>;

impl PartakeError {
    /// Errors caused by what the caller asked for rather than by the
    /// environment the engine runs in.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Self::Config(_)
                | Self::Template { .. }
                | Self::NoRuleMatch(_)
                | Self::UnboundInput { .. }
                | Self::UnknownRule { .. }
                | Self::NoGrainSegment { .. }
        )
    }
}

// Helper conversions
impl From<rusqlite::Error> for PartakeError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Catalog(e.to_string())
    }
}
impl From<config::ConfigError> for PartakeError {
    fn from(e: config::ConfigError) -> Self {
        Self::Config(e.to_string())
    }
}
impl From<glob::PatternError> for PartakeError {
    fn from(e: glob::PatternError) -> Self {
        Self::Filesystem(e.to_string())
    }
}
impl From<std::io::Error> for PartakeError {
    fn from(e: std::io::Error) -> Self {
        Self::Filesystem(e.to_string())
    }
}
