//! Error types shared across the crate.

use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The key-value store could not serve a request.
///
/// Conditional-check failures are not errors, they are reported through
/// [`PutOutcome`][crate::store::PutOutcome] and
/// [`DeleteOutcome`][crate::store::DeleteOutcome].
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached or failed to answer.
    ///
    /// Retrying the whole enclosing operation is safe, retrying only a
    /// conditional sub-step is not.
    #[error("store unavailable: {0}")]
    Unavailable(#[source] BoxError),

    #[error("no such table: {0}")]
    NoSuchTable(String),
}

impl StoreError {
    pub fn unavailable(source: impl Into<BoxError>) -> Self {
        Self::Unavailable(source.into())
    }
}

/// A scanned row lacks an attribute required to form an instance record.
#[derive(Debug, Error)]
#[error("row `{key}` is malformed: {problem}")]
pub struct MalformedRecord {
    pub key: String,
    pub problem: MalformedProblem,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MalformedProblem {
    #[error("attribute `{0}` is missing")]
    MissingAttribute(&'static str),

    #[error("attribute `{0}` is not an integer")]
    NotAnInteger(&'static str),
}

/// An attempt to acquire a lock ended in the `Failed` state.
///
/// All variants but `StoreUnavailable` are ordinary outcomes of concurrent
/// claims. Every variant may be retried, preferably after a randomized pause.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum LockError {
    /// More than one contender was choosing at the same time.
    #[error("{contenders} contenders for lock `{key}`")]
    Contention { key: String, contenders: usize },

    /// The lock is already held by another contender.
    #[error("lock `{key}` is held by `{holder}`")]
    HeldByOther { key: String, holder: String },

    /// Another contender claimed the lock between the checks and the claim.
    #[error("lost the race for lock `{key}`")]
    RaceLost { key: String },

    #[error("store unavailable during lock acquisition")]
    StoreUnavailable(#[from] StoreError),
}

impl LockError {
    pub fn is_retryable(&self) -> bool {
        true
    }
}

/// An identity registry operation failed.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The guarding lock could not be acquired, nothing was written.
    #[error("lock could not be acquired")]
    LockFailed(#[source] LockError),

    #[error("store unavailable")]
    StoreUnavailable(#[source] StoreError),
}

impl RegistryError {
    pub fn is_retryable(&self) -> bool {
        match self {
            RegistryError::LockFailed(e) => e.is_retryable(),
            RegistryError::StoreUnavailable(_) => true,
        }
    }
}

impl From<LockError> for RegistryError {
    fn from(e: LockError) -> Self {
        match e {
            LockError::StoreUnavailable(e) => RegistryError::StoreUnavailable(e),
            e => RegistryError::LockFailed(e),
        }
    }
}

impl From<StoreError> for RegistryError {
    fn from(e: StoreError) -> Self {
        RegistryError::StoreUnavailable(e)
    }
}
