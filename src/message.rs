//! Wire message protocol — tagged union over a JSON encoding.
//!
//! Two frame shapes exist on the wire:
//!
//! - Bootstrap frame: [`BOOTSTRAP_MARKER`] immediately followed by the
//!   Message JSON. Unencrypted; used only for Invites, before the recipient
//!   holds any shared secret.
//! - Data frame: a fixed-length address tag followed by the hex ciphertext
//!   of the Message JSON.

use serde::{Deserialize, Serialize};

use crate::error::ChatError;

/// Literal prefix marking an unencrypted bootstrap frame.
pub const BOOTSTRAP_MARKER: &str = "NoNaMe";

/// A protocol message. Every variant names its clique so the recipient can
/// demultiplex after decryption.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Message {
    /// Bootstrap: introduces a new member to a clique, carrying the shared
    /// key. Sent unencrypted, as the recipient has no secret yet.
    Invite {
        clique: String,
        members: Vec<String>,
        /// Hex-encoded shared key material.
        key: String,
        /// Tag-rotation counter at the time of the invite.
        epoch: u64,
    },

    /// Control plane: membership/epoch update or join acknowledgement.
    /// Sent encrypted inside a data frame.
    InviteResponse {
        clique: String,
        members: Vec<String>,
        epoch: u64,
    },

    /// Application payload. Sent encrypted inside a data frame.
    Text {
        clique: String,
        /// Unique message identifier (UUID v4).
        id: String,
        sender: String,
        body: String,
    },
}

impl Message {
    /// Build a Text message with a fresh id.
    pub fn text(clique: impl Into<String>, sender: impl Into<String>, body: impl Into<String>) -> Self {
        Self::Text {
            clique: clique.into(),
            id: uuid::Uuid::new_v4().to_string(),
            sender: sender.into(),
            body: body.into(),
        }
    }

    /// The clique this message belongs to.
    pub fn clique(&self) -> &str {
        match self {
            Self::Invite { clique, .. }
            | Self::InviteResponse { clique, .. }
            | Self::Text { clique, .. } => clique,
        }
    }

    /// Serialize to the JSON wire form.
    pub fn to_json(&self) -> Result<String, ChatError> {
        serde_json::to_string(self).map_err(|e| ChatError::MalformedMessage(e.to_string()))
    }

    /// Deserialize from the JSON wire form.
    ///
    /// Missing fields, wrong types, and bad syntax all collapse into the one
    /// [`ChatError::MalformedMessage`] kind so callers can uniformly
    /// drop-and-log.
    pub fn from_json(json: &str) -> Result<Self, ChatError> {
        serde_json::from_str(json).map_err(|e| ChatError::MalformedMessage(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
