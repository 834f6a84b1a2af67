//! ChatClient — top-level coordinator for one peer.
//!
//! [`ChatClient`] is the primary public API of the crate. It validates the
//! handle preconditions, binds the datagram transport, and runs the
//! background tasks: the transport receive loop feeding the router and the
//! directory heartbeat. The presentation layer and the directory are
//! injected, so both CLI and GUI frontends (and tests) drive the same core.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info};

use crate::clique::TextRecord;
use crate::config::ClientConfig;
use crate::directory::{Directory, run_heartbeat};
use crate::error::ChatError;
use crate::identity::Handle;
use crate::presentation::Presentation;
use crate::router::Router;
use crate::transport::Transport;

/// One running chat peer.
pub struct ChatClient {
    handle: Handle,
    config: ClientConfig,
    transport: Arc<Transport>,
    router: Arc<Router>,
    directory: Arc<dyn Directory>,
    presentation: Arc<dyn Presentation>,
    shutdown_tx: Option<broadcast::Sender<()>>,
    running: bool,
}

impl std::fmt::Debug for ChatClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatClient")
            .field("handle", &self.handle)
            .field("running", &self.running)
            .finish_non_exhaustive()
    }
}

impl ChatClient {
    /// Construct a client for a validated handle.
    ///
    /// Fails with [`ChatError::DirectoryUnavailable`] when the directory is
    /// unreachable, [`ChatError::UsernameConflict`] when the handle is
    /// already registered, and [`ChatError::PortBindFailure`] when no port
    /// in the configured range can be bound.
    pub async fn new(
        handle: Handle,
        config: ClientConfig,
        directory: Arc<dyn Directory>,
        presentation: Arc<dyn Presentation>,
    ) -> Result<Self, ChatError> {
        directory.init().await?;
        if directory.contains(handle.as_str()).await? {
            return Err(ChatError::UsernameConflict(handle.as_str().to_string()));
        }

        let transport = Arc::new(Transport::bind(&config).await?);
        let router = Arc::new(Router::new(
            handle.clone(),
            Arc::clone(&transport),
            Arc::clone(&directory),
            Arc::clone(&presentation),
        ));

        Ok(Self {
            handle,
            config,
            transport,
            router,
            directory,
            presentation,
            shutdown_tx: None,
            running: false,
        })
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// The UDP port this client receives datagrams on.
    pub fn local_port(&self) -> u16 {
        self.transport.local_port()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// The router, for presentation-layer reads.
    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    /// Start the background tasks: transport receive loop and directory
    /// heartbeat. Idempotent.
    pub fn start(&mut self) {
        if self.running {
            return;
        }

        let (shutdown_tx, _) = broadcast::channel(8);
        self.shutdown_tx = Some(shutdown_tx.clone());

        // Transport delivery workers feed the router.
        let (datagram_tx, mut datagram_rx) = mpsc::channel::<String>(256);
        self.transport.start(datagram_tx, shutdown_tx.subscribe());

        let router = Arc::clone(&self.router);
        let mut recv_shutdown = shutdown_tx.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(datagram) = datagram_rx.recv() => {
                        router.receive(&datagram).await;
                    }
                    _ = recv_shutdown.recv() => {
                        debug!("Receive loop shutting down");
                        break;
                    }
                }
            }
        });

        // Directory heartbeat: check in forever, report online state.
        tokio::spawn(run_heartbeat(
            Arc::clone(&self.directory),
            self.handle.clone(),
            self.transport.local_port(),
            self.config.checkin_interval,
            self.config.offline_retry,
            Arc::clone(&self.presentation),
            shutdown_tx.subscribe(),
        ));

        self.running = true;
        info!(
            "Client '{}' started on port {}",
            self.handle,
            self.transport.local_port()
        );
    }

    /// Stop all background tasks.
    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.running = false;
        self.presentation.online_state(false);
        info!("Client '{}' stopped", self.handle);
    }

    // -----------------------------------------------------------------------
    // Clique operations (delegated to the router)
    // -----------------------------------------------------------------------

    /// Create a new clique containing only ourselves.
    pub async fn create_clique(&self, name: &str) -> Result<(), ChatError> {
        if !self.running {
            return Err(ChatError::NotRunning);
        }
        self.router.create_clique(name).await
    }

    /// Invite another peer into one of our cliques.
    pub async fn invite(&self, clique: &str, peer: &str) -> Result<(), ChatError> {
        if !self.running {
            return Err(ChatError::NotRunning);
        }
        self.router.invite(clique, peer).await
    }

    /// Send a text to a clique.
    pub async fn send_text(&self, clique: &str, body: &str) -> Result<(), ChatError> {
        if !self.running {
            return Err(ChatError::NotRunning);
        }
        self.router.send_text(clique, body).await
    }

    /// Names of all known cliques, sorted.
    pub async fn clique_names(&self) -> Vec<String> {
        self.router.clique_names().await
    }

    /// Message history snapshot of one clique.
    pub async fn history(&self, clique: &str) -> Option<Vec<TextRecord>> {
        self.router.history(clique).await
    }
}

impl Drop for ChatClient {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
