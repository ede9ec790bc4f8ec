use crate::config::ConfigError;
use crate::db::DbError;
use crate::transfer::TransferError;
use std::io;
use std::path::PathBuf;

/// Unified error type for a shrink run.
///
/// Every variant is fatal to the current invocation. The run state on disk is
/// left exactly as of the last checkpoint, so the operator can investigate and
/// re-run the same stage.
#[derive(Debug, thiserror::Error)]
pub enum ShrinkError {
    /// Malformed or missing profile settings, detected before any database contact
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The database server could not be reached
    #[error("Connection error: {0}")]
    Connection(String),

    /// A table or server setting cannot be handled by transportable tablespaces
    #[error("Unsupported limitation: {0}")]
    Unsupported(String),

    /// The live schema no longer matches the persisted run state
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Copy, link or verification of a tablespace file failed
    #[error(transparent)]
    Transfer(#[from] TransferError),

    /// The server rejected or failed an administrative statement
    #[error("Statement failed: {statement}: {message}")]
    Statement { statement: String, message: String },

    /// The run state file is unreadable or structurally invalid
    #[error("Corrupt run state {path}: {reason}")]
    CorruptState { path: PathBuf, reason: String },

    /// Stage 2 was requested but no completed stage 1 exists
    #[error("Missing run state: {0}")]
    MissingState(String),

    /// Another process holds the working directory lock
    #[error("Working directory {0} is locked by another run")]
    Locked(PathBuf),

    /// The operator interrupted the run between two tables
    #[error("Run cancelled by operator")]
    Cancelled,

    /// A state machine transition that should never happen was requested
    #[error("Invalid state transition: {0}")]
    InvalidTransition(String),

    /// A single table's protocol step failed
    #[error("Table {table} failed during {step}: {source}")]
    TableFailed {
        table: String,
        step: String,
        #[source]
        source: Box<ShrinkError>,
    },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl From<DbError> for ShrinkError {
    fn from(error: DbError) -> Self {
        match error {
            DbError::Connection { endpoint, message } => {
                ShrinkError::Connection(format!("{}: {}", endpoint, message))
            }
            DbError::Statement { statement, message } => {
                ShrinkError::Statement { statement, message }
            }
            DbError::UnexpectedResult { statement, detail } => ShrinkError::Statement {
                statement,
                message: detail,
            },
        }
    }
}

impl ShrinkError {
    /// Create a conflict error with context
    pub fn conflict<S: Into<String>>(msg: S) -> Self {
        Self::Conflict(msg.into())
    }

    /// Create an unsupported limitation error with context
    pub fn unsupported<S: Into<String>>(msg: S) -> Self {
        Self::Unsupported(msg.into())
    }

    /// Create a corrupt state error for the given file
    pub fn corrupt_state<P: Into<PathBuf>, S: Into<String>>(path: P, reason: S) -> Self {
        Self::CorruptState {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Wrap an error with the table and protocol step it happened in
    pub fn in_table<T: ToString, S: Into<String>>(self, table: &T, step: S) -> Self {
        Self::TableFailed {
            table: table.to_string(),
            step: step.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, looking through table context
    pub fn root(&self) -> &ShrinkError {
        match self {
            ShrinkError::TableFailed { source, .. } => source.root(),
            other => other,
        }
    }

    /// Process exit status for this error class.
    ///
    /// Codes are distinct per major class so wrapper scripts can react
    /// without parsing messages.
    pub fn exit_code(&self) -> i32 {
        match self.root() {
            ShrinkError::Io(_) => 1,
            ShrinkError::Config(_) => 2,
            ShrinkError::Connection(_) => 3,
            ShrinkError::Unsupported(_) => 4,
            ShrinkError::Conflict(_) => 5,
            ShrinkError::CorruptState { .. } => 6,
            ShrinkError::MissingState(_) => 7,
            ShrinkError::Transfer(TransferError::CrossDevice { .. }) => 9,
            ShrinkError::Transfer(_) => 8,
            ShrinkError::Statement { .. } => 10,
            ShrinkError::Locked(_) => 11,
            ShrinkError::InvalidTransition(_) => 1,
            ShrinkError::Cancelled => 130,
            ShrinkError::TableFailed { .. } => 1,
        }
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            ShrinkError::TableFailed {
                table,
                step,
                source,
            } => format!(
                "table {} failed while {}: {}",
                table,
                step,
                source.user_message()
            ),
            ShrinkError::Config(e) => e.user_message(),
            ShrinkError::Conflict(msg) => format!("{}; refusing to continue", msg),
            ShrinkError::MissingState(msg) => {
                format!("{}; ensure stage 1 has been executed first", msg)
            }
            ShrinkError::Locked(path) => format!(
                "another run holds the lock on {}, wait for it to finish",
                path.display()
            ),
            other => other.to_string(),
        }
    }
}

// Type aliases for convenience
pub type ShrinkResult<T> = Result<T, ShrinkError>;
