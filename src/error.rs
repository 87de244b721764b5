//! Closed error taxonomy for the harvest driver, so callers can branch on
//! kind instead of catching a generic exception type.

use thiserror::Error;

/// Failure surfaced by a [`crate::oai::Communicator`]. Kept distinct from a
/// parsed protocol-level `<error>` element — that distinction is load-bearing
/// for the driver's recovery policy.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("malformed OAI-PMH response from {url}: {reason}")]
    MalformedXml { url: String, reason: String },
}

/// Failure surfaced by a [`crate::state::StateManager`].
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} has {found} field(s), expected exactly 4")]
    Corrupt { path: String, found: usize },
}

/// Failure surfaced by a [`crate::writer::RecordWriter`].
#[derive(Debug, Error)]
pub enum WriterError {
    #[error("record writer failed: {0}")]
    Persistence(#[source] anyhow::Error),
}

/// Every non-success outcome of [`crate::harvester::Harvester::launch`] is
/// one of these, each with a checkpoint-state guarantee attached.
#[derive(Debug, Error)]
pub enum HarvestError {
    /// HTTP failure or malformed XML. Retryable; checkpoint preserved.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// `<error>` with a code other than `badResumptionToken`. User-decided;
    /// checkpoint preserved.
    #[error("OAI-PMH error {code}: {text}")]
    OaiProtocol { code: String, text: String },

    /// `<error code="badResumptionToken">` while a checkpoint existed.
    /// Checkpoint cleared; user must restart from the beginning.
    #[error(
        "resumption token rejected by server; checkpoint {artifact} was cleared, restart the harvest"
    )]
    TokenExpired { artifact: String },

    /// Checkpoint has arity != 4. Checkpoint cleared; user must restart.
    #[error("checkpoint {artifact} is corrupt and was cleared, restart the harvest")]
    CorruptState { artifact: String },

    /// [`WriterError`] propagated verbatim. Checkpoint preserved.
    #[error(transparent)]
    Writer(#[from] WriterError),

    /// [`StateError`] unrelated to corruption (e.g. disk full writing a
    /// checkpoint). Checkpoint state is whatever the failed operation left
    /// behind.
    #[error(transparent)]
    State(#[from] StateError),
}
