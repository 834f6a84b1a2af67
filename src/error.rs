//! Error types for the chat core.

/// Errors that can occur in the cliquechat crate.
///
/// Construction-time errors (`UsernameConflict`, `DirectoryUnavailable`,
/// `PortBindFailure`, `InvalidHandle`) surface to the caller. Per-datagram
/// errors (`MalformedMessage`, `IntegrityFailure`, `UnknownRoute`) are
/// absorbed inside the router and only ever reach a log line.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    /// The handle contains whitespace or is empty.
    #[error("Invalid handle: {0}")]
    InvalidHandle(String),

    /// The handle is already registered with the directory.
    #[error("Handle already taken: {0}")]
    UsernameConflict(String),

    /// The rendezvous directory is unreachable.
    #[error("Directory unavailable: {0}")]
    DirectoryUnavailable(String),

    /// A payload could not be decoded as a Message.
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    /// Decryption or MAC verification failed.
    #[error("Integrity check failed")]
    IntegrityFailure,

    /// An address tag or clique name was not recognized.
    #[error("Unknown route: {0}")]
    UnknownRoute(String),

    /// A clique with this name already exists; names are never reused.
    #[error("Clique already exists: {0}")]
    CliqueExists(String),

    /// No free port could be found within the configured range.
    #[error("Port bind failed after {attempts} attempts")]
    PortBindFailure { attempts: u32 },

    /// The client is not running.
    #[error("Client not running")]
    NotRunning,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
