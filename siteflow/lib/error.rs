use std::{
    error::Error,
    fmt::{self, Display},
};

use thiserror::Error;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The result of a siteflow-related operation.
pub type SiteflowResult<T> = Result<T, SiteflowError>;

/// An error that occurred during a siteflow operation.
///
/// Variants map onto the error kinds surfaced to clients: validation,
/// not-found, conflict, transport, timeout, remote command failure,
/// external-state divergence and provisioning invariant violations.
#[derive(pretty_error_debug::Debug, Error)]
pub enum SiteflowError {
    /// Malformed input (bad name, missing field, bad payload).
    #[error("validation error: {0}")]
    Validation(String),

    /// Unknown site, container, route, monitor or record.
    #[error("not found: {0}")]
    NotFound(String),

    /// The requested resource already exists or is already bound.
    #[error("conflict: {0}")]
    Conflict(String),

    /// SSH, HTTP or socket failure reaching a dependency. Retriable.
    #[error("transport error: {0}")]
    Transport(String),

    /// A remote command exceeded its deadline and was cancelled.
    #[error("timed out after {0}s: {1}")]
    Timeout(u64, String),

    /// A remote command returned a non-zero exit code.
    #[error("command failed ({exit_code}): {command}\n{stderr}")]
    CommandFailure {
        /// The shaped command that failed.
        command: String,
        /// The exit code the remote shell reported.
        exit_code: i32,
        /// Captured standard error output.
        stderr: String,
    },

    /// External state diverged from the request (e.g. a DNS record that was
    /// expected to exist is already gone). Logged at warn and treated as
    /// success on idempotent paths.
    #[error("integrity: {0}")]
    Integrity(String),

    /// An invariant was violated mid-provision; rollback has been performed.
    #[error("fatal: {reason} (rolled back: {compensations:?})")]
    Fatal {
        /// Human-readable failure reason.
        reason: String,
        /// Labels of the compensations that were replayed.
        compensations: Vec<String>,
    },

    /// An error that occurred during an IO operation.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// An error that occurred in the embedded database.
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),

    /// An error that occurred running database migrations.
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// An error that occurred serializing or deserializing JSON.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// An error that occurred parsing YAML.
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Custom error.
    #[error("custom error: {0}")]
    Custom(#[from] AnyError),
}

/// An error that can represent any error.
#[derive(Debug)]
pub struct AnyError {
    error: anyhow::Error,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl SiteflowError {
    /// Creates a new `Custom` error from any error type.
    pub fn custom(error: impl Into<anyhow::Error>) -> SiteflowError {
        SiteflowError::Custom(AnyError {
            error: error.into(),
        })
    }

    /// Whether this error should be treated as success on idempotent paths.
    pub fn is_integrity(&self) -> bool {
        matches!(self, SiteflowError::Integrity(_))
    }

    /// Whether a single local retry of an idempotent read is worthwhile.
    pub fn is_transient(&self) -> bool {
        matches!(self, SiteflowError::Transport(_))
    }
}

impl AnyError {
    /// Downcasts the error to a `T`.
    pub fn downcast<T>(&self) -> Option<&T>
    where
        T: Display + fmt::Debug + Send + Sync + 'static,
    {
        self.error.downcast_ref::<T>()
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Creates an `Ok` `SiteflowResult`.
#[allow(non_snake_case)]
pub fn Ok<T>(value: T) -> SiteflowResult<T> {
    Result::Ok(value)
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Display for AnyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl Error for AnyError {}
