//! Clique — per-group protocol state.
//!
//! A clique owns the shared key, the membership set, the rotation epoch, and
//! the live address tag derived from all three. Tag derivation is
//! deterministic, so every member that has applied the same membership
//! updates listens on the same tag without ever putting a group identifier
//! on the wire.
//!
//! Rotation protocol: a membership change bumps the epoch and re-derives the
//! tag. The member making the change announces the new membership and epoch
//! to the others (encrypted, under the *old* tag) before applying it
//! locally, so receivers rotate in lockstep. A freshly invited member gets
//! the post-change membership and epoch inside the Invite itself and starts
//! directly on the live tag.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::crypto::Cryptographer;
use crate::error::ChatError;
use crate::identity::Handle;
use crate::message::Message;
use crate::tags::TagTable;

/// Lifecycle state of a clique.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CliqueState {
    /// Created (locally or from an Invite); key material present, tag not
    /// yet registered for routing.
    Bootstrapped,
    /// Tag registered; ready to send and receive.
    Active,
    /// Torn down; tag deregistered, no further traffic accepted.
    Closed,
}

/// One delivered text, kept in memory for the presentation layer.
#[derive(Debug, Clone, Serialize)]
pub struct TextRecord {
    pub id: String,
    pub sender: String,
    pub body: String,
    pub received_at: DateTime<Utc>,
}

/// A named group with a shared symmetric key and rotating address tag.
pub struct Clique {
    name: String,
    members: BTreeSet<String>,
    epoch: u64,
    crypto: Cryptographer,
    current_tag: String,
    state: CliqueState,
    history: Vec<TextRecord>,
}

impl Clique {
    /// Create a brand-new clique with a fresh random key, containing only
    /// its creator.
    pub fn create(name: impl Into<String>, creator: &Handle) -> Self {
        let name = name.into();
        let mut members = BTreeSet::new();
        members.insert(creator.as_str().to_string());
        let crypto = Cryptographer::generate();
        let current_tag = crypto.derive_tag(&tag_context(&name, 0, &members));
        Self {
            name,
            members,
            epoch: 0,
            crypto,
            current_tag,
            state: CliqueState::Bootstrapped,
            history: Vec::new(),
        }
    }

    /// Reconstruct a clique from a received Invite.
    pub fn from_invite(
        name: impl Into<String>,
        members: &[String],
        key_hex: &str,
        epoch: u64,
    ) -> Result<Self, ChatError> {
        let name = name.into();
        let members: BTreeSet<String> = members.iter().cloned().collect();
        if members.is_empty() {
            return Err(ChatError::MalformedMessage(
                "invite carries no members".to_string(),
            ));
        }
        let crypto = Cryptographer::from_key_hex(key_hex)?;
        let current_tag = crypto.derive_tag(&tag_context(&name, epoch, &members));
        Ok(Self {
            name,
            members,
            epoch,
            crypto,
            current_tag,
            state: CliqueState::Bootstrapped,
            history: Vec::new(),
        })
    }

    /// Register the current tag and become ready for traffic.
    pub async fn activate(&mut self, tags: &TagTable) -> Result<(), ChatError> {
        tags.register(&self.current_tag, &self.name).await?;
        self.state = CliqueState::Active;
        Ok(())
    }

    /// Tear down: retire the live tag and refuse further traffic.
    pub async fn close(&mut self, tags: &TagTable) {
        tags.deregister(&self.current_tag).await;
        self.state = CliqueState::Closed;
    }

    /// Bump the epoch and move to the tag it derives. The new tag is
    /// registered before the old one is retired.
    pub async fn rotate(&mut self, tags: &TagTable) -> Result<(), ChatError> {
        self.epoch += 1;
        let new_tag = self
            .crypto
            .derive_tag(&tag_context(&self.name, self.epoch, &self.members));
        tags.swap(&new_tag, &self.current_tag, &self.name).await?;
        self.current_tag = new_tag;
        Ok(())
    }

    /// Apply a membership/epoch update from the control plane.
    ///
    /// Last-writer-wins by epoch: updates at or below the local epoch are
    /// stale acknowledgements and are ignored. Returns whether the update
    /// was adopted (and the tag rotated).
    pub async fn apply_control(
        &mut self,
        members: &[String],
        epoch: u64,
        tags: &TagTable,
    ) -> Result<bool, ChatError> {
        if epoch <= self.epoch {
            debug!(
                "Clique '{}': stale control update (epoch {epoch} <= {})",
                self.name, self.epoch
            );
            return Ok(false);
        }
        self.members = members.iter().cloned().collect();
        self.epoch = epoch;
        let new_tag = self
            .crypto
            .derive_tag(&tag_context(&self.name, self.epoch, &self.members));
        tags.swap(&new_tag, &self.current_tag, &self.name).await?;
        self.current_tag = new_tag;
        Ok(true)
    }

    /// Serialize and encrypt a message into a complete data frame:
    /// current tag followed by the ciphertext.
    pub fn seal(&self, msg: &Message) -> Result<String, ChatError> {
        let json = msg.to_json()?;
        let ciphertext = self.crypto.encrypt(&json)?;
        Ok(format!("{}{}", self.current_tag, ciphertext))
    }

    /// Decrypt and deserialize the ciphertext part of a data frame.
    ///
    /// An authentication failure surfaces as [`ChatError::IntegrityFailure`]
    /// and leaves all state untouched; a payload that decrypts but does not
    /// parse is [`ChatError::MalformedMessage`].
    pub fn open(&self, ciphertext: &str) -> Result<Message, ChatError> {
        let json = self.crypto.decrypt(ciphertext)?;
        Message::from_json(&json)
    }

    /// Append a delivered text to the in-memory history.
    pub fn record_text(&mut self, id: String, sender: String, body: String) {
        self.history.push(TextRecord {
            id,
            sender,
            body,
            received_at: Utc::now(),
        });
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sorted membership snapshot.
    pub fn members(&self) -> Vec<String> {
        self.members.iter().cloned().collect()
    }

    pub fn contains_member(&self, handle: &str) -> bool {
        self.members.contains(handle)
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn state(&self) -> CliqueState {
        self.state
    }

    pub fn current_tag(&self) -> &str {
        &self.current_tag
    }

    pub fn history(&self) -> &[TextRecord] {
        &self.history
    }

    /// Hex key material, for embedding in an outgoing Invite.
    pub fn key_hex(&self) -> String {
        self.crypto.key_hex()
    }
}

/// Context string fed to tag derivation. Members are sorted, so every peer
/// that agrees on (name, epoch, membership) derives the same tag.
fn tag_context(name: &str, epoch: u64, members: &BTreeSet<String>) -> String {
    let mut ctx = format!("{name}\n{epoch}\n");
    for member in members {
        ctx.push_str(member);
        ctx.push(',');
    }
    ctx
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
