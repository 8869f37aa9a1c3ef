//! Standard error type for `taskmesh`.

use std;

pub type Result<T> = std::result::Result<T, Error>;

/// An enum covering every way a public `taskmesh` operation can fail.
///
/// Implements the usual error traits via `thiserror`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("operation not permitted: task is already launched")]
    AlreadyLaunched,

    #[error("task was canceled")]
    TaskCanceled,

    #[error("task body panicked: {0}")]
    UserException(String),

    #[error("non-recoverable runtime failure: {0}")]
    RuntimeFatal(String),

    #[error("runtime is not initialized; call runtime_init() first")]
    RuntimeNotInitialized,

    #[error("buffer acquisition error: {0}")]
    Acquire(String),

    #[error("group error: {0}")]
    Group(String),
}

impl Error {
    /// Convenience constructor for `InvalidArgument` from anything `Display`-able.
    pub fn invalid_argument<S: Into<String>>(desc: S) -> Error {
        Error::InvalidArgument(desc.into())
    }
}

impl From<String> for Error {
    fn from(desc: String) -> Error {
        Error::InvalidArgument(desc)
    }
}

impl<'a> From<&'a str> for Error {
    fn from(desc: &'a str) -> Error {
        Error::InvalidArgument(desc.into())
    }
}
