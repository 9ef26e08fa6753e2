//! Orthogonal error taxonomy shared by every worker-facing crate.

use std::error::Error as StdError;
use std::fmt;

/// Result alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// The kind of failure, orthogonal to transport.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Kind {
    /// Precondition unmet; fatal, no retry, user-visible.
    InvalidArg,
    /// Object or bucket absent; some flows treat this as success.
    NotFound,
    /// Destination key already present; surfaced to Move/Copy.
    AlreadyExists,
    /// The overseer already recorded a successful outcome for this item.
    AlreadyDone,
    /// The job was cancelled; drain in-flight work and exit.
    Cancelled,
    /// Network failure, 5xx, or timeout; retry with capped backoff.
    Transient,
    /// Token expired (401/419); refresh and retry once.
    AuthExpired,
    /// 4xx (other than the above), hash mismatch, or out-of-space; fail
    /// the item but continue the job.
    Permanent,
    /// DB open failure or lock failure; abort the whole job.
    Fatal,
}

impl Kind {
    /// Whether a worker encountering this kind should be retried by the
    /// caller without operator intervention.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::Transient | Self::AuthExpired)
    }

    /// Whether this kind should abort the whole job rather than just the
    /// one work item.
    #[must_use]
    pub const fn is_fatal(self) -> bool {
        matches!(self, Self::Fatal)
    }

    /// Process exit code contribution for this kind.
    #[must_use]
    pub const fn exit_code(self) -> i32 {
        match self {
            Self::InvalidArg => 1,
            Self::Fatal => 3,
            Self::Cancelled => 2,
            _ => 2,
        }
    }
}

/// A unified error carrying a machine-readable [`Kind`], a machine-readable
/// `code`, a human `descriptor`, and an optional cause chain.
#[derive(Debug)]
pub struct Error {
    kind: Kind,
    code: Option<i32>,
    descriptor: String,
    cause: Option<Box<dyn StdError + Send + Sync>>,
}

impl Error {
    /// Builds a new error of the given kind with a human-readable
    /// descriptor.
    pub fn new(kind: Kind, descriptor: impl Into<String>) -> Self {
        Self {
            kind,
            code: None,
            descriptor: descriptor.into(),
            cause: None,
        }
    }

    /// Attaches a machine-readable provider error code (HTTP status or
    /// provider-specific code such as 612/614/631).
    #[must_use]
    pub fn with_code(mut self, code: i32) -> Self {
        self.code = Some(code);
        self
    }

    /// Attaches a cause, preserving the chain for `source()`.
    #[must_use]
    pub fn with_cause(mut self, cause: impl StdError + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// The orthogonal kind of this error.
    #[must_use]
    pub const fn kind(&self) -> Kind {
        self.kind
    }

    /// The provider error code, if one was attached.
    #[must_use]
    pub const fn code(&self) -> Option<i32> {
        self.code
    }

    /// The human-readable descriptor.
    #[must_use]
    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }

    /// Renders the failure exporter suffix `\t<code>:<descriptor>` appended
    /// to a failed line in `jobstore::exporter`'s failure stream.
    #[must_use]
    pub fn exporter_suffix(&self) -> String {
        let code = self
            .code
            .map_or_else(|| format!("{:?}", self.kind), |c| c.to_string());
        format!("\t{code}:{}", self.descriptor)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{:?} ({code}): {}", self.kind, self.descriptor),
            None => write!(f, "{:?}: {}", self.kind, self.descriptor),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause
            .as_ref()
            .map(|c| c.as_ref() as &(dyn StdError + 'static))
    }
}

/// Maps a provider sub-operation error code onto a [`Kind`], per the batch
/// RPC error table (612/631 not found, 614 already exists, 401/419 auth
/// expired, 5xx transient).
#[must_use]
pub fn kind_from_status(code: i32) -> Kind {
    match code {
        200..=299 => Kind::Permanent, // caller should not reach here on success
        612 | 631 => Kind::NotFound,
        614 => Kind::AlreadyExists,
        401 | 419 => Kind::AuthExpired,
        500..=599 => Kind::Transient,
        _ => Kind::Permanent,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_policy_matches_error_table() {
        assert!(Kind::Transient.is_retryable());
        assert!(Kind::AuthExpired.is_retryable());
        assert!(!Kind::Permanent.is_retryable());
        assert!(!Kind::NotFound.is_retryable());
    }

    #[test]
    fn fatal_aborts_job() {
        assert!(Kind::Fatal.is_fatal());
        assert!(!Kind::Permanent.is_fatal());
    }

    #[test]
    fn status_code_mapping() {
        assert_eq!(kind_from_status(612), Kind::NotFound);
        assert_eq!(kind_from_status(631), Kind::NotFound);
        assert_eq!(kind_from_status(614), Kind::AlreadyExists);
        assert_eq!(kind_from_status(401), Kind::AuthExpired);
        assert_eq!(kind_from_status(503), Kind::Transient);
        assert_eq!(kind_from_status(403), Kind::Permanent);
    }

    #[test]
    fn exporter_suffix_uses_code_when_present() {
        let err = Error::new(Kind::Permanent, "hash mismatch").with_code(614);
        assert_eq!(err.exporter_suffix(), "\t614:hash mismatch");
    }

    #[test]
    fn exporter_suffix_falls_back_to_kind() {
        let err = Error::new(Kind::Cancelled, "job cancelled");
        assert_eq!(err.exporter_suffix(), "\tCancelled:job cancelled");
    }

    #[test]
    fn display_includes_descriptor() {
        let err = Error::new(Kind::NotFound, "no such key");
        assert!(err.to_string().contains("no such key"));
    }
}
