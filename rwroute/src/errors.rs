use thiserror::Error as ThisError;

/// Errors raised while setting up the routing layer.
///
/// Runtime data access never produces one of these: a failed checkout surfaces the
/// pool's own error type unchanged (see [`crate::source::ConnectionSource`]).
#[derive(ThisError, Debug)]
pub enum Error {
    /// Invalid or incomplete startup configuration
    #[error("Invalid routing configuration: {message}")]
    Configuration { message: String },

    /// Database error raised while preparing pools
    #[error(transparent)]
    Database(#[from] sqlx::Error),

    /// Unexpected error with full context chain
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn configuration(message: impl Into<String>) -> Self {
        Error::Configuration { message: message.into() }
    }

    /// Whether this error should abort process startup.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Error::Configuration { .. })
    }
}

/// Type alias for routing setup results
pub type Result<T> = std::result::Result<T, Error>;
