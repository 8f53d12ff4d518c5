//! # Stagehand Adapter Errors
//!
//! Every external system call reports failures as an [`AdapterError`]
//! carrying an [`ErrorClass`]. Adapters classify at the point closest to the
//! external system; the poller and scheduler only ever look at the class.
use thiserror::Error;

/// Classification of an external system failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum ErrorClass {
    /// Retryable without operator intervention
    #[error("transient")]
    Transient,
    /// The resource already exists; normalized to `AlreadyPresent` by steps
    #[error("conflict")]
    Conflict,
    /// Requires operator intervention
    #[error("fatal")]
    Fatal,
}

#[derive(Debug, Clone, Error)]
#[error("{system}: {message} ({class})")]
pub struct AdapterError {
    pub class: ErrorClass,
    /// Name of the external system, e.g. "kubectl" or "git-host"
    pub system: String,
    pub message: String,
}

pub type AdapterResult<T> = std::result::Result<T, AdapterError>;

impl AdapterError {
    pub fn new(class: ErrorClass, system: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            class,
            system: system.into(),
            message: message.into(),
        }
    }

    pub fn transient(system: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Transient, system, message)
    }

    pub fn conflict(system: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Conflict, system, message)
    }

    pub fn fatal(system: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Fatal, system, message)
    }

    pub fn is_transient(&self) -> bool {
        self.class == ErrorClass::Transient
    }

    pub fn is_conflict(&self) -> bool {
        self.class == ErrorClass::Conflict
    }

    pub fn is_fatal(&self) -> bool {
        self.class == ErrorClass::Fatal
    }
}

/// Map an HTTP status code to an error class.
///
/// Callers handle 2xx before reaching this. 422 is a validation failure and
/// therefore fatal; endpoints that also report duplicates with 422 use
/// [`classify_http_status_with`].
pub fn classify_http_status(status: u16) -> ErrorClass {
    classify_http_status_with(status, &[])
}

/// Like [`classify_http_status`], with extra statuses the endpoint uses to
/// report an existing resource.
pub fn classify_http_status_with(status: u16, conflicts: &[u16]) -> ErrorClass {
    if conflicts.contains(&status) {
        return ErrorClass::Conflict;
    }
    match status {
        409 => ErrorClass::Conflict,
        408 | 425 | 429 => ErrorClass::Transient,
        // Reverse proxies in front of a freshly started pod answer 502/503/504
        500..=599 => ErrorClass::Transient,
        _ => ErrorClass::Fatal,
    }
}

/// Markers in CLI diagnostics that indicate the target is not reachable yet.
const TRANSIENT_MARKERS: &[&str] = &[
    "connection refused",
    "connection reset",
    "unable to connect",
    "i/o timeout",
    "timed out",
    "tls handshake timeout",
    "no route to host",
    "temporarily unavailable",
    "the server is currently unable",
    "server could not find the requested resource",
    "no endpoints available",
    "notfound",
    "not found",
    "could not resolve host",
    "container not found",
    "is not running",
    "waiting for",
    "no matching resources",
    "etcdserver: leader changed",
];

const CONFLICT_MARKERS: &[&str] = &["already exist", "alreadyexists"];

const FATAL_MARKERS: &[&str] = &[
    "forbidden",
    "unauthorized",
    "permission denied",
    "authentication failed",
    "error validating",
    "error parsing",
    "invalid",
    "unknown flag",
];

/// Classify the diagnostic output of a failed CLI invocation.
///
/// Fatal markers win over transient ones so that e.g. "permission denied
/// (publickey)" is never retried. Unrecognized output is transient: the
/// bootstrap targets are freshly created and mostly fail by not being ready.
pub fn classify_cli_output(output: &str) -> ErrorClass {
    let lowered = output.to_lowercase();
    if CONFLICT_MARKERS.iter().any(|m| lowered.contains(m)) {
        return ErrorClass::Conflict;
    }
    if FATAL_MARKERS.iter().any(|m| lowered.contains(m)) {
        return ErrorClass::Fatal;
    }
    if TRANSIENT_MARKERS.iter().any(|m| lowered.contains(m)) {
        return ErrorClass::Transient;
    }
    ErrorClass::Transient
}
