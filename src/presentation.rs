//! Presentation capability — how the core signals the UI layer.
//!
//! The CLI or GUI implements this trait and hands a reference to the client;
//! the core never knows which variant it is talking to.

use tracing::debug;

/// Callbacks into the presentation layer. Implementations must be cheap and
/// non-blocking; they are invoked from transport workers and the heartbeat
/// task.
pub trait Presentation: Send + Sync {
    /// Clique content changed (new clique, new message, membership update).
    fn content_changed(&self);

    /// Directory connectivity changed.
    fn online_state(&self, online: bool);
}

/// A presentation that only logs. Useful for headless runs and as a default.
#[derive(Debug, Default)]
pub struct LogPresentation;

impl Presentation for LogPresentation {
    fn content_changed(&self) {
        debug!("Content changed");
    }

    fn online_state(&self, online: bool) {
        debug!("Online state: {online}");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
