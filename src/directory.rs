//! Directory collaborator — rendezvous between handles and endpoints.
//!
//! The directory service itself lives outside this crate; the core only
//! consumes its check-in/lookup contract through the [`Directory`] trait,
//! injected into the client so tests and demos can substitute
//! [`MemoryDirectory`] without any process-wide state.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{RwLock, broadcast};
use tracing::{debug, warn};

use crate::error::ChatError;
use crate::identity::Handle;
use crate::presentation::Presentation;

/// Check-in/lookup contract of the rendezvous service.
#[async_trait]
pub trait Directory: Send + Sync {
    /// Establish contact with the directory.
    async fn init(&self) -> Result<(), ChatError>;

    /// Whether a handle is currently registered.
    async fn contains(&self, handle: &str) -> Result<bool, ChatError>;

    /// Register or refresh our handle-to-endpoint binding.
    async fn checkin(&self, handle: &str, port: u16) -> Result<(), ChatError>;

    /// Resolve a handle to its last checked-in endpoint.
    async fn resolve(&self, handle: &str) -> Result<SocketAddr, ChatError>;
}

/// In-memory directory shared between clients in one process. Stands in for
/// the real rendezvous service in tests and demos; `set_available(false)`
/// simulates an outage.
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    entries: RwLock<HashMap<String, SocketAddr>>,
    unavailable: AtomicBool,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggle simulated reachability.
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    fn check_reachable(&self) -> Result<(), ChatError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ChatError::DirectoryUnavailable(
                "simulated outage".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl Directory for MemoryDirectory {
    async fn init(&self) -> Result<(), ChatError> {
        self.check_reachable()
    }

    async fn contains(&self, handle: &str) -> Result<bool, ChatError> {
        self.check_reachable()?;
        Ok(self.entries.read().await.contains_key(handle))
    }

    async fn checkin(&self, handle: &str, port: u16) -> Result<(), ChatError> {
        self.check_reachable()?;
        let addr: SocketAddr = format!("127.0.0.1:{port}")
            .parse()
            .expect("valid loopback address from port number");
        self.entries.write().await.insert(handle.to_string(), addr);
        Ok(())
    }

    async fn resolve(&self, handle: &str) -> Result<SocketAddr, ChatError> {
        self.check_reachable()?;
        self.entries
            .read()
            .await
            .get(handle)
            .copied()
            .ok_or_else(|| ChatError::UnknownRoute(format!("peer '{handle}' not registered")))
    }
}

/// Periodic directory check-in.
///
/// Checks in every `checkin_interval` while healthy and backs off to
/// `offline_retry` when the directory is unreachable, retrying forever. The
/// presentation layer hears about every online/offline transition. Exits
/// only on the shutdown signal.
pub async fn run_heartbeat(
    directory: Arc<dyn Directory>,
    handle: Handle,
    port: u16,
    checkin_interval: Duration,
    offline_retry: Duration,
    presentation: Arc<dyn Presentation>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut initialized = false;
    loop {
        let result = async {
            if !initialized {
                directory.init().await?;
            }
            directory.checkin(handle.as_str(), port).await
        }
        .await;

        let delay = match result {
            Ok(()) => {
                initialized = true;
                presentation.online_state(true);
                checkin_interval
            }
            Err(e) => {
                warn!("Directory check-in failed: {e}");
                initialized = false;
                presentation.online_state(false);
                offline_retry
            }
        };

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.recv() => {
                debug!("Heartbeat shutting down");
                break;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
