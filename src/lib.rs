//! Cliquechat — decentralized multi-party encrypted chat core.
//!
//! Each running [`ChatClient`] registers a handle with a rendezvous
//! directory, discovers other peers' endpoints through it, and exchanges
//! messages inside named groups ("cliques"). Steady-state traffic is
//! AES-256-GCM encrypted and routed by a rotating, MAC-derived address tag
//! instead of a static group identifier, so frames on the wire are
//! unlinkable across rotations.
//!
//! # Architecture
//!
//! - **Transport**: UDP datagrams; each frame is an ASCII string.
//! - **Bootstrap**: a new member is reachable before any shared secret
//!   exists via an unencrypted, marker-prefixed Invite frame.
//! - **Routing**: a per-peer [`Router`] demultiplexes inbound datagrams
//!   through a tag table; per-datagram failures are absorbed and logged.
//! - **Collaborators**: the rendezvous [`Directory`] and the
//!   [`Presentation`] layer are injected traits, so frontends and tests
//!   substitute their own.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use cliquechat::{ChatClient, ClientConfig, Handle, LogPresentation, MemoryDirectory};
//!
//! # async fn example() -> Result<(), cliquechat::ChatError> {
//! let directory = Arc::new(MemoryDirectory::new());
//! let mut client = ChatClient::new(
//!     Handle::new("alice")?,
//!     ClientConfig::default(),
//!     directory,
//!     Arc::new(LogPresentation),
//! )
//! .await?;
//!
//! client.start();
//! client.create_clique("book-club").await?;
//! client.invite("book-club", "bob").await?;
//! client.send_text("book-club", "hello").await?;
//! client.stop();
//! # Ok(())
//! # }
//! ```
//!
//! # Security notes
//!
//! Invites are accepted automatically: nothing authenticates an Invite to a
//! trusted sender, matching the protocol this crate implements. Treat the
//! bootstrap channel as trusted-network-only until a consent or signature
//! step exists above this layer.

pub mod clique;
pub mod client;
pub mod config;
pub mod crypto;
pub mod directory;
pub mod error;
pub mod identity;
pub mod message;
pub mod presentation;
pub mod router;
pub mod tags;
pub mod transport;

// ── Re-exports for convenience ──────────────────────────────────────────

pub use clique::{Clique, CliqueState, TextRecord};
pub use client::ChatClient;
pub use config::ClientConfig;
pub use crypto::{Cryptographer, TAG_HEX_LEN};
pub use directory::{Directory, MemoryDirectory};
pub use error::ChatError;
pub use identity::Handle;
pub use message::{BOOTSTRAP_MARKER, Message};
pub use presentation::{LogPresentation, Presentation};
pub use router::Router;
pub use tags::TagTable;
pub use transport::Transport;
