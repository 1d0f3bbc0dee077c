//! Shared error taxonomy (§7). Every crate-level error type in this
//! workspace is built from an [`ErrorKind`] so that retry policy can be
//! decided uniformly by [`is_retryable`] instead of by matching on
//! concrete error enums.

use std::fmt;

/// The conflict sub-kind carried by [`ErrorKind::Conflict`]. Only
/// `ResourceVersion` conflicts are retried per §7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictType {
    /// Optimistic-concurrency resource-version mismatch.
    ResourceVersion,
    /// Any other conflict class (e.g. a uniqueness constraint).
    Other,
}

/// A handful of named, always-fatal conditions referenced by §7's
/// `IsRetryable` by name rather than by kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sentinel {
    /// The sync engine façade has been stopped and rejects new work.
    SyncEngineStopped,
    /// A `SyncOperation` named a direction outside `{upstream, downstream}`.
    InvalidDirection,
    /// A `SyncOperation` named an empty/malformed resource.
    InvalidResource,
    /// A rollback was requested for a deployment with one already active.
    RollbackAlreadyInProgress,
}

impl fmt::Display for Sentinel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Sentinel::SyncEngineStopped => "sync engine stopped",
            Sentinel::InvalidDirection => "invalid sync direction",
            Sentinel::InvalidResource => "invalid resource",
            Sentinel::RollbackAlreadyInProgress => "rollback already in progress",
        };
        f.write_str(s)
    }
}

/// The error-kind taxonomy of §7.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad request, bad key, bad config: fatal to the specific call.
    InvalidInput,
    /// Target resource absent.
    NotFound,
    /// Optimistic-concurrency failure.
    Conflict(ConflictType),
    /// Deadline elapsed.
    Timeout,
    /// Context/cancellation token fired.
    Cancelled,
    /// Any other transport error, retryable under the component's policy.
    Transient,
    /// Invariant violation; the enclosing operation fails and is surfaced.
    Fatal,
    /// One of the always-fatal named sentinels.
    Sentinel(Sentinel),
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::InvalidInput => f.write_str("invalid input"),
            ErrorKind::NotFound => f.write_str("not found"),
            ErrorKind::Conflict(ConflictType::ResourceVersion) => f.write_str("resource-version conflict"),
            ErrorKind::Conflict(ConflictType::Other) => f.write_str("conflict"),
            ErrorKind::Timeout => f.write_str("timeout"),
            ErrorKind::Cancelled => f.write_str("cancelled"),
            ErrorKind::Transient => f.write_str("transient"),
            ErrorKind::Fatal => f.write_str("fatal"),
            ErrorKind::Sentinel(s) => write!(f, "{s}"),
        }
    }
}

/// The workspace-wide error type. Lower-level code annotates with the
/// originating GVR/name/direction by pre-pending to `message` via
/// [`Error::context`] rather than by nesting error types, keeping a
/// single concrete type usable across crate boundaries while still
/// chaining the original cause through `#[source]`.
#[derive(thiserror::Error, Debug)]
#[error("{kind}: {message}")]
pub struct Error {
    kind: ErrorKind,
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl Error {
    /// Builds a new error of the given kind with a message.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Error { kind, message: message.into(), source: None }
    }

    /// Attaches a source error.
    pub fn with_source(
        kind: ErrorKind,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Error { kind, message: message.into(), source: Some(Box::new(source)) }
    }

    /// One of the always-fatal named sentinels.
    pub fn sentinel(sentinel: Sentinel) -> Self {
        let message = sentinel.to_string();
        Error { kind: ErrorKind::Sentinel(sentinel), message, source: None }
    }

    /// The taxonomy kind of this error.
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    /// Prefixes `message` with `ctx` (`"{ctx}: {message}"`), for
    /// annotating an error with the originating GVR/name/direction as it
    /// propagates up through reconcilers and syncers.
    pub fn context(mut self, ctx: impl fmt::Display) -> Self {
        self.message = format!("{ctx}: {}", self.message);
        self
    }

    /// Shorthand for [`Error::new`] with [`ErrorKind::NotFound`].
    pub fn not_found(message: impl Into<String>) -> Self {
        Error::new(ErrorKind::NotFound, message)
    }

    /// Shorthand for [`Error::new`] with [`ErrorKind::InvalidInput`].
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Error::new(ErrorKind::InvalidInput, message)
    }

    /// Shorthand for a resource-version conflict.
    pub fn rv_conflict(message: impl Into<String>) -> Self {
        Error::new(ErrorKind::Conflict(ConflictType::ResourceVersion), message)
    }

    /// Shorthand for [`Error::new`] with [`ErrorKind::Fatal`].
    pub fn fatal(message: impl Into<String>) -> Self {
        Error::new(ErrorKind::Fatal, message)
    }

    /// True if `self` is [`ErrorKind::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self.kind, ErrorKind::NotFound)
    }
}

/// Implements §7's `IsRetryable`: false for `InvalidInput`, `Cancelled`,
/// and the named sentinels; for `Conflict` true only when the conflict
/// type is `ResourceVersion`; true for `Transient`; false for `Timeout`
/// (non-retryable within the same deadline) and `Fatal`.
pub fn is_retryable(err: &Error) -> bool {
    match err.kind() {
        ErrorKind::InvalidInput => false,
        ErrorKind::Cancelled => false,
        ErrorKind::Sentinel(_) => false,
        ErrorKind::Conflict(ConflictType::ResourceVersion) => true,
        ErrorKind::Conflict(ConflictType::Other) => false,
        ErrorKind::Transient => true,
        ErrorKind::Timeout => false,
        ErrorKind::Fatal => false,
        ErrorKind::NotFound => false,
    }
}
