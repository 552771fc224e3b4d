//! Error types for role reconciliation

use thiserror::Error;

/// Role reconciliation errors
#[derive(Debug, Error)]
pub enum RoleSyncError {
    /// Two sources set the same role attribute to different values
    #[error("Two values defined for option {option} of role {role}")]
    ConflictingOptions {
        /// Role being merged (empty when merging bare option bags)
        role: String,
        /// Keyword of the conflicting attribute
        option: String,
    },

    /// Option keyword outside the known attribute set
    #[error("Unknown role option: {0}")]
    UnknownOption(String),

    /// A role declares a parent that is not part of the desired state
    #[error("Unknown parent role {0}")]
    UnknownParentRole(String),

    /// The session pool already holds its maximum number of connections
    #[error("Database limit exceeded. pg-rolesync doesn't support cluster with more than {max} databases.")]
    PoolExhausted {
        /// Configured connection cap
        max: usize,
    },

    /// An all-databases statement reached the pool without expansion
    #[error("Statement must be expanded per database before execution: {0}")]
    UnexpandedStatement(String),

    /// Invalid connection string
    #[error("Invalid connection string: {0}")]
    ConnectionString(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Catalog row could not be decoded
    #[error("Unexpected catalog row: {0}")]
    Catalog(String),

    /// Statement execution failed outside of sqlx (test doubles, other drivers)
    #[error("Execution failed: {0}")]
    Execution(String),

    /// Database driver error, passed through unmodified
    #[cfg(feature = "postgres")]
    #[error(transparent)]
    Database(#[from] sqlx::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for role reconciliation
pub type Result<T> = std::result::Result<T, RoleSyncError>;
