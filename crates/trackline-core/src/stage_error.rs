//! Stage execution errors
//!
//! A stage failure carries whether retrying could help. The default retry
//! policy ignores the flag and fails the track; bounded policies only retry
//! recoverable failures.

use std::fmt;

#[derive(Debug)]
pub struct StageError {
    inner: anyhow::Error,
    recoverable: bool,
}

impl StageError {
    /// A failure that will not change on retry: corrupt input, missing source
    /// object, encoder rejection.
    pub fn unrecoverable(err: impl Into<anyhow::Error>) -> Self {
        Self {
            inner: err.into(),
            recoverable: false,
        }
    }

    /// A failure caused by the environment: storage hiccup, timeout.
    pub fn recoverable(err: impl Into<anyhow::Error>) -> Self {
        Self {
            inner: err.into(),
            recoverable: true,
        }
    }

    pub fn is_recoverable(&self) -> bool {
        self.recoverable
    }

    pub fn inner(&self) -> &anyhow::Error {
        &self.inner
    }

    pub fn into_inner(self) -> anyhow::Error {
        self.inner
    }

    /// Message including the context chain, suitable for logs and user events.
    pub fn message(&self) -> String {
        format!("{:#}", self.inner)
    }
}

impl fmt::Display for StageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner)
    }
}

impl std::error::Error for StageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.inner.source()
    }
}

impl From<anyhow::Error> for StageError {
    /// Unclassified errors count as recoverable.
    fn from(err: anyhow::Error) -> Self {
        Self::recoverable(err)
    }
}

pub trait StageResultExt<T> {
    /// Mark this result as unrecoverable on error.
    fn unrecoverable(self) -> Result<T, StageError>;

    /// Mark this result as recoverable on error.
    fn recoverable(self) -> Result<T, StageError>;
}

impl<T, E: Into<anyhow::Error>> StageResultExt<T> for Result<T, E> {
    fn unrecoverable(self) -> Result<T, StageError> {
        self.map_err(|e| StageError::unrecoverable(e.into()))
    }

    fn recoverable(self) -> Result<T, StageError> {
        self.map_err(|e| StageError::recoverable(e.into()))
    }
}
