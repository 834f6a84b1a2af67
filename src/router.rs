//! Router — demultiplexes inbound datagrams to the correct clique.
//!
//! The router owns every clique of one peer, plus the tag table mapping live
//! address tags to clique names. Inbound datagrams arrive on transport
//! workers; bootstrap frames (plaintext marker) create or refresh cliques,
//! data frames are resolved through the tag table and handed to the owning
//! clique for decryption. All per-datagram failures are absorbed here: they
//! reach a log line, never the caller and never the presentation layer.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::clique::{Clique, TextRecord};
use crate::crypto::TAG_HEX_LEN;
use crate::directory::Directory;
use crate::error::ChatError;
use crate::identity::Handle;
use crate::message::{BOOTSTRAP_MARKER, Message};
use crate::presentation::Presentation;
use crate::tags::TagTable;
use crate::transport::Transport;

/// Per-peer dispatcher: owns the clique set and the tag table.
pub struct Router {
    handle: Handle,
    cliques: RwLock<HashMap<String, Clique>>,
    tags: TagTable,
    transport: Arc<Transport>,
    directory: Arc<dyn Directory>,
    presentation: Arc<dyn Presentation>,
}

impl Router {
    pub fn new(
        handle: Handle,
        transport: Arc<Transport>,
        directory: Arc<dyn Directory>,
        presentation: Arc<dyn Presentation>,
    ) -> Self {
        Self {
            handle,
            cliques: RwLock::new(HashMap::new()),
            tags: TagTable::new(),
            transport,
            directory,
            presentation,
        }
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Demultiplex one inbound datagram.
    ///
    /// Never fails: malformed, unroutable, and unauthentic datagrams are
    /// dropped with a diagnostic and leave all state unchanged.
    pub async fn receive(&self, datagram: &str) {
        if let Some(rest) = datagram.strip_prefix(BOOTSTRAP_MARKER) {
            self.receive_bootstrap(rest).await;
        } else {
            self.receive_data(datagram).await;
        }
    }

    /// Bootstrap branch: plaintext Message after the marker.
    async fn receive_bootstrap(&self, payload: &str) {
        let msg = match Message::from_json(payload) {
            Ok(msg) => msg,
            Err(e) => {
                warn!("Dropping undecodable bootstrap frame: {e}");
                return;
            }
        };

        match msg {
            Message::Invite {
                clique,
                members,
                key,
                epoch,
            } => self.accept_invite(clique, members, key, epoch).await,
            Message::InviteResponse {
                clique,
                members,
                epoch,
            } => {
                // Off the normal path (the control plane is encrypted once a
                // clique exists), but a plaintext update for a known clique
                // is forwarded to its control handler; the epoch guard
                // bounds what it can do.
                warn!("Plaintext control frame for clique '{clique}'");
                self.apply_control_update(&clique, &members, epoch).await;
            }
            Message::Text { clique, .. } => {
                warn!("Dropping plaintext text frame for clique '{clique}'");
            }
        }
    }

    /// Handle an Invite: create the clique if the name is new, otherwise
    /// treat it as a duplicate/refresh for the existing clique. The write
    /// lock spans check and insert so concurrent duplicate invites cannot
    /// both create the clique.
    async fn accept_invite(&self, clique: String, members: Vec<String>, key: String, epoch: u64) {
        let mut cliques = self.cliques.write().await;
        if let Some(existing) = cliques.get_mut(&clique) {
            debug!("Duplicate invite for known clique '{clique}'");
            match existing.apply_control(&members, epoch, &self.tags).await {
                Ok(true) => {
                    drop(cliques);
                    self.presentation.content_changed();
                }
                Ok(false) => {}
                Err(e) => warn!("Control update failed for clique '{clique}': {e}"),
            }
            return;
        }

        let mut new_clique = match Clique::from_invite(&clique, &members, &key, epoch) {
            Ok(c) => c,
            Err(e) => {
                warn!("Dropping invalid invite for clique '{clique}': {e}");
                return;
            }
        };
        if let Err(e) = new_clique.activate(&self.tags).await {
            warn!("Cannot activate clique '{clique}': {e}");
            return;
        }

        // Acknowledge the join to every other member. Receivers see an
        // already-known epoch and ignore it beyond a log line.
        let ack = Message::InviteResponse {
            clique: clique.clone(),
            members: new_clique.members(),
            epoch: new_clique.epoch(),
        };
        let peers: Vec<String> = new_clique
            .members()
            .into_iter()
            .filter(|m| m != self.handle.as_str())
            .collect();
        let ack_frame = new_clique.seal(&ack);

        info!(
            "Joined clique '{clique}' with {} member(s)",
            new_clique.members().len()
        );
        cliques.insert(clique, new_clique);
        drop(cliques);
        self.presentation.content_changed();

        if let Ok(frame) = ack_frame {
            for peer in peers {
                self.send_frame_to_peer(&peer, &frame).await;
            }
        }
    }

    /// Data branch: fixed-length tag prefix, then opaque ciphertext.
    async fn receive_data(&self, datagram: &str) {
        let Some(tag) = datagram.get(..TAG_HEX_LEN) else {
            debug!("Dropping short data frame ({} bytes)", datagram.len());
            return;
        };
        let ciphertext = &datagram[TAG_HEX_LEN..];

        let Some(name) = self.tags.resolve(tag).await else {
            // No such route known; not an error worth more than a line.
            debug!("Dropping datagram with unknown tag {tag}");
            return;
        };

        let mut cliques = self.cliques.write().await;
        let Some(clique) = cliques.get_mut(&name) else {
            // Tag table points at a clique the set no longer holds.
            warn!("Tag table stale: tag {tag} maps to missing clique '{name}'");
            return;
        };

        let msg = match clique.open(ciphertext) {
            Ok(msg) => msg,
            Err(ChatError::IntegrityFailure) => {
                warn!("Integrity failure on datagram for clique '{name}', dropping");
                return;
            }
            Err(e) => {
                warn!("Dropping undecodable payload for clique '{name}': {e}");
                return;
            }
        };

        match msg {
            Message::Text {
                id, sender, body, ..
            } => {
                clique.record_text(id, sender, body);
                drop(cliques);
                self.presentation.content_changed();
            }
            Message::InviteResponse { members, epoch, .. } => {
                match clique.apply_control(&members, epoch, &self.tags).await {
                    Ok(true) => {
                        drop(cliques);
                        self.presentation.content_changed();
                    }
                    Ok(false) => {}
                    Err(e) => warn!("Control update failed for clique '{name}': {e}"),
                }
            }
            Message::Invite { .. } => {
                warn!("Dropping encrypted invite for clique '{name}' (off-protocol)");
            }
        }
    }

    /// Forward a membership update to an existing clique's control handler.
    async fn apply_control_update(&self, clique: &str, members: &[String], epoch: u64) {
        let mut cliques = self.cliques.write().await;
        let Some(c) = cliques.get_mut(clique) else {
            warn!("Control update for unknown clique '{clique}', dropping");
            return;
        };
        match c.apply_control(members, epoch, &self.tags).await {
            Ok(true) => {
                drop(cliques);
                self.presentation.content_changed();
            }
            Ok(false) => {}
            Err(e) => warn!("Control update failed for clique '{clique}': {e}"),
        }
    }

    // -----------------------------------------------------------------------
    // Outbound operations
    // -----------------------------------------------------------------------

    /// Create a new clique containing only ourselves.
    pub async fn create_clique(&self, name: &str) -> Result<(), ChatError> {
        let mut cliques = self.cliques.write().await;
        if cliques.contains_key(name) {
            return Err(ChatError::CliqueExists(name.to_string()));
        }
        let mut clique = Clique::create(name, &self.handle);
        clique.activate(&self.tags).await?;
        cliques.insert(name.to_string(), clique);
        drop(cliques);

        info!("Created clique '{name}'");
        self.presentation.content_changed();
        Ok(())
    }

    /// Invite a peer into a clique.
    ///
    /// Existing members get the new membership and epoch over the encrypted
    /// control plane, framed with the *current* tag, before we rotate; the
    /// invitee gets the post-rotation state in a plaintext bootstrap frame.
    pub async fn invite(&self, clique_name: &str, peer: &str) -> Result<(), ChatError> {
        // Resolve first: an unreachable invitee must leave state untouched.
        let peer_addr = self.directory.resolve(peer).await?;

        let mut cliques = self.cliques.write().await;
        let clique = cliques
            .get_mut(clique_name)
            .ok_or_else(|| ChatError::UnknownRoute(clique_name.to_string()))?;

        if clique.contains_member(peer) {
            // Re-invite: resend the current state without mutating anything.
            let invite = Message::Invite {
                clique: clique_name.to_string(),
                members: clique.members(),
                key: clique.key_hex(),
                epoch: clique.epoch(),
            };
            let frame = bootstrap_frame(&invite)?;
            drop(cliques);
            debug!("Re-inviting existing member '{peer}' to '{clique_name}'");
            self.transport.send_to(peer_addr, &frame).await?;
            return Ok(());
        }

        let mut new_members = clique.members();
        new_members.push(peer.to_string());
        new_members.sort();
        let new_epoch = clique.epoch() + 1;

        // Membership update for current members, sealed under the old tag.
        let update = Message::InviteResponse {
            clique: clique_name.to_string(),
            members: new_members.clone(),
            epoch: new_epoch,
        };
        let update_frame = clique.seal(&update)?;
        let recipients: Vec<String> = clique
            .members()
            .into_iter()
            .filter(|m| m != self.handle.as_str())
            .collect();

        // Adopt the change locally: rotates to the new tag.
        clique
            .apply_control(&new_members, new_epoch, &self.tags)
            .await?;

        let invite = Message::Invite {
            clique: clique_name.to_string(),
            members: clique.members(),
            key: clique.key_hex(),
            epoch: clique.epoch(),
        };
        let invite_frame = bootstrap_frame(&invite)?;
        drop(cliques);

        for member in recipients {
            self.send_frame_to_peer(&member, &update_frame).await;
        }
        self.transport.send_to(peer_addr, &invite_frame).await?;

        info!("Invited '{peer}' to clique '{clique_name}'");
        self.presentation.content_changed();
        Ok(())
    }

    /// Send a text to every other member of a clique.
    pub async fn send_text(&self, clique_name: &str, body: &str) -> Result<(), ChatError> {
        let (frame, recipients) = {
            let mut cliques = self.cliques.write().await;
            let clique = cliques
                .get_mut(clique_name)
                .ok_or_else(|| ChatError::UnknownRoute(clique_name.to_string()))?;

            let msg = Message::text(clique_name, self.handle.as_str(), body);
            let frame = clique.seal(&msg)?;

            // Our own message shows up in our history too.
            if let Message::Text { id, sender, body, .. } = msg {
                clique.record_text(id, sender, body);
            }

            let recipients: Vec<String> = clique
                .members()
                .into_iter()
                .filter(|m| m != self.handle.as_str())
                .collect();
            (frame, recipients)
        };

        for member in &recipients {
            self.send_frame_to_peer(member, &frame).await;
        }
        self.presentation.content_changed();
        Ok(())
    }

    /// Resolve a member's endpoint and send one frame. Delivery failures to
    /// individual members are logged, never propagated: the datagram
    /// transport is best-effort anyway.
    async fn send_frame_to_peer(&self, peer: &str, frame: &str) {
        match self.directory.resolve(peer).await {
            Ok(addr) => {
                if let Err(e) = self.transport.send_to(addr, frame).await {
                    warn!("Send to '{peer}' at {addr} failed: {e}");
                }
            }
            Err(e) => {
                debug!("Cannot resolve '{peer}': {e}");
            }
        }
    }

    // -----------------------------------------------------------------------
    // Presentation-layer reads
    // -----------------------------------------------------------------------

    /// Names of all known cliques, sorted.
    pub async fn clique_names(&self) -> Vec<String> {
        let cliques = self.cliques.read().await;
        let mut names: Vec<String> = cliques.keys().cloned().collect();
        names.sort();
        names
    }

    /// Membership snapshot of one clique.
    pub async fn members(&self, clique_name: &str) -> Option<Vec<String>> {
        let cliques = self.cliques.read().await;
        cliques.get(clique_name).map(|c| c.members())
    }

    /// Message history snapshot of one clique.
    pub async fn history(&self, clique_name: &str) -> Option<Vec<TextRecord>> {
        let cliques = self.cliques.read().await;
        cliques.get(clique_name).map(|c| c.history().to_vec())
    }
}

/// Build a plaintext bootstrap frame: marker followed by the Message JSON.
fn bootstrap_frame(msg: &Message) -> Result<String, ChatError> {
    Ok(format!("{BOOTSTRAP_MARKER}{}", msg.to_json()?))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clique::CliqueState;
    use crate::config::ClientConfig;
    use crate::crypto::Cryptographer;
    use crate::directory::MemoryDirectory;
    use crate::presentation::testing::RecordingPresentation;

    struct Fixture {
        router: Router,
        presentation: Arc<RecordingPresentation>,
        directory: Arc<MemoryDirectory>,
    }

    async fn fixture(handle: &str) -> Fixture {
        let transport = Arc::new(Transport::bind(&ClientConfig::default()).await.unwrap());
        let directory = Arc::new(MemoryDirectory::new());
        let presentation = Arc::new(RecordingPresentation::default());
        let router = Router::new(
            Handle::new(handle).unwrap(),
            transport,
            Arc::clone(&directory) as Arc<dyn Directory>,
            Arc::clone(&presentation) as Arc<dyn Presentation>,
        );
        Fixture {
            router,
            presentation,
            directory,
        }
    }

    fn invite_frame(clique: &str, members: &[&str], key: &str, epoch: u64) -> String {
        let invite = Message::Invite {
            clique: clique.to_string(),
            members: members.iter().map(|m| m.to_string()).collect(),
            key: key.to_string(),
            epoch,
        };
        bootstrap_frame(&invite).unwrap()
    }

    #[tokio::test]
    async fn test_invite_creates_active_clique_and_notifies_once() {
        let fx = fixture("bob").await;
        let key = Cryptographer::generate().key_hex();

        fx.router
            .receive(&invite_frame("book-club", &["alice", "bob"], &key, 1))
            .await;

        assert_eq!(fx.router.clique_names().await, vec!["book-club".to_string()]);
        assert_eq!(fx.presentation.content_changes(), 1);

        let cliques = fx.router.cliques.read().await;
        let clique = cliques.get("book-club").unwrap();
        assert_eq!(clique.state(), CliqueState::Active);
        assert_eq!(clique.members(), vec!["alice".to_string(), "bob".to_string()]);
        assert_eq!(
            fx.router.tags.resolve(clique.current_tag()).await.as_deref(),
            Some("book-club")
        );
    }

    #[tokio::test]
    async fn test_duplicate_invite_does_not_replace_clique() {
        let fx = fixture("bob").await;
        let key = Cryptographer::generate().key_hex();

        fx.router
            .receive(&invite_frame("book-club", &["alice", "bob"], &key, 1))
            .await;
        let original_tag = {
            let cliques = fx.router.cliques.read().await;
            cliques.get("book-club").unwrap().current_tag().to_string()
        };

        // Same invite again: stale epoch, forwarded to the control handler,
        // nothing changes.
        fx.router
            .receive(&invite_frame("book-club", &["alice", "bob"], &key, 1))
            .await;

        assert_eq!(fx.router.clique_names().await.len(), 1);
        let cliques = fx.router.cliques.read().await;
        assert_eq!(cliques.get("book-club").unwrap().current_tag(), original_tag);
    }

    #[tokio::test]
    async fn test_malformed_bootstrap_frame_dropped() {
        let fx = fixture("bob").await;
        fx.router.receive("NoNaMe{not json").await;
        fx.router.receive("NoNaMe{\"kind\":\"text\"}").await;

        assert!(fx.router.clique_names().await.is_empty());
        assert_eq!(fx.presentation.content_changes(), 0);
        assert_eq!(fx.router.tags.live_count().await, 0);
    }

    #[tokio::test]
    async fn test_unknown_tag_is_silent_noop() {
        let fx = fixture("bob").await;
        let frame = format!("{}{}", "ab".repeat(16), "deadbeef");
        fx.router.receive(&frame).await;

        assert!(fx.router.clique_names().await.is_empty());
        assert_eq!(fx.presentation.content_changes(), 0);
    }

    #[tokio::test]
    async fn test_short_data_frame_dropped() {
        let fx = fixture("bob").await;
        fx.router.receive("tooshort").await;
        assert_eq!(fx.presentation.content_changes(), 0);
    }

    #[tokio::test]
    async fn test_stale_tag_table_entry_dropped() {
        let fx = fixture("bob").await;
        // A tag routed to a clique that is not in the clique set.
        let tag = "cd".repeat(16);
        fx.router.tags.register(&tag, "ghost").await.unwrap();

        fx.router.receive(&format!("{tag}00112233")).await;
        assert_eq!(fx.presentation.content_changes(), 0);
        // The consistency violation is logged but must not panic or mutate.
        assert!(fx.router.clique_names().await.is_empty());
    }

    #[tokio::test]
    async fn test_corrupted_mac_leaves_state_unchanged() {
        let fx = fixture("bob").await;
        let key = Cryptographer::generate().key_hex();
        fx.router
            .receive(&invite_frame("book-club", &["alice", "bob"], &key, 1))
            .await;
        let notifications_before = fx.presentation.content_changes();

        let (tag, members_before, epoch_before) = {
            let cliques = fx.router.cliques.read().await;
            let c = cliques.get("book-club").unwrap();
            (c.current_tag().to_string(), c.members(), c.epoch())
        };

        // Valid live tag, garbage ciphertext.
        fx.router.receive(&format!("{tag}{}", "00".repeat(40))).await;

        let cliques = fx.router.cliques.read().await;
        let c = cliques.get("book-club").unwrap();
        assert_eq!(c.members(), members_before);
        assert_eq!(c.epoch(), epoch_before);
        assert_eq!(fx.presentation.content_changes(), notifications_before);
    }

    #[tokio::test]
    async fn test_text_delivery_and_single_notification() {
        let fx = fixture("bob").await;

        // Sender-side clique sharing key/members/epoch with bob's router.
        let mut alice_side = Clique::create("book-club", &Handle::new("alice").unwrap());
        let alice_tags = TagTable::new();
        alice_side.activate(&alice_tags).await.unwrap();
        let members = vec!["alice".to_string(), "bob".to_string()];
        alice_side
            .apply_control(&members, 1, &alice_tags)
            .await
            .unwrap();

        fx.router
            .receive(&invite_frame(
                "book-club",
                &["alice", "bob"],
                &alice_side.key_hex(),
                1,
            ))
            .await;
        let before = fx.presentation.content_changes();

        let frame = alice_side
            .seal(&Message::text("book-club", "alice", "hello"))
            .unwrap();
        fx.router.receive(&frame).await;

        let history = fx.router.history("book-club").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].sender, "alice");
        assert_eq!(history[0].body, "hello");
        assert_eq!(fx.presentation.content_changes(), before + 1);
    }

    #[tokio::test]
    async fn test_rotation_retires_old_route() {
        let fx = fixture("bob").await;
        let key = Cryptographer::generate().key_hex();
        fx.router
            .receive(&invite_frame("book-club", &["alice", "bob"], &key, 1))
            .await;

        let old_tag = {
            let cliques = fx.router.cliques.read().await;
            cliques.get("book-club").unwrap().current_tag().to_string()
        };

        // A membership update with a higher epoch rotates the tag.
        {
            let mut cliques = fx.router.cliques.write().await;
            let c = cliques.get_mut("book-club").unwrap();
            let members = vec![
                "alice".to_string(),
                "bob".to_string(),
                "carol".to_string(),
            ];
            c.apply_control(&members, 2, &fx.router.tags).await.unwrap();
        }

        assert_eq!(fx.router.tags.resolve(&old_tag).await, None);

        // Datagrams under the retired tag are now unknown-route no-ops.
        let before = fx.presentation.content_changes();
        fx.router.receive(&format!("{old_tag}00112233")).await;
        assert_eq!(fx.presentation.content_changes(), before);
    }

    #[tokio::test]
    async fn test_create_clique_and_duplicate_name_rejected() {
        let fx = fixture("alice").await;
        fx.router.create_clique("book-club").await.unwrap();
        assert_eq!(fx.presentation.content_changes(), 1);
        assert_eq!(fx.router.members("book-club").await.unwrap(), vec!["alice"]);

        match fx.router.create_clique("book-club").await {
            Err(ChatError::CliqueExists(_)) => {}
            other => panic!("Expected CliqueExists, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_invite_unresolvable_peer_leaves_state_untouched() {
        let fx = fixture("alice").await;
        fx.router.create_clique("book-club").await.unwrap();
        let epoch_before = {
            let cliques = fx.router.cliques.read().await;
            cliques.get("book-club").unwrap().epoch()
        };

        assert!(fx.router.invite("book-club", "bob").await.is_err());

        let cliques = fx.router.cliques.read().await;
        let c = cliques.get("book-club").unwrap();
        assert_eq!(c.epoch(), epoch_before);
        assert_eq!(c.members(), vec!["alice".to_string()]);
    }

    #[tokio::test]
    async fn test_invite_rotates_and_records_member() {
        let fx = fixture("alice").await;
        fx.directory.checkin("bob", 50999).await.unwrap();
        fx.router.create_clique("book-club").await.unwrap();

        let old_tag = {
            let cliques = fx.router.cliques.read().await;
            cliques.get("book-club").unwrap().current_tag().to_string()
        };

        fx.router.invite("book-club", "bob").await.unwrap();

        let cliques = fx.router.cliques.read().await;
        let c = cliques.get("book-club").unwrap();
        assert_eq!(c.members(), vec!["alice".to_string(), "bob".to_string()]);
        assert_eq!(c.epoch(), 1);
        assert_ne!(c.current_tag(), old_tag);
        assert_eq!(fx.router.tags.resolve(&old_tag).await, None);
    }

    #[tokio::test]
    async fn test_send_text_records_own_message() {
        let fx = fixture("alice").await;
        fx.router.create_clique("book-club").await.unwrap();
        fx.router.send_text("book-club", "talking to myself").await.unwrap();

        let history = fx.router.history("book-club").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].sender, "alice");
        assert_eq!(history[0].body, "talking to myself");
    }

    #[tokio::test]
    async fn test_send_text_unknown_clique() {
        let fx = fixture("alice").await;
        match fx.router.send_text("nope", "hi").await {
            Err(ChatError::UnknownRoute(_)) => {}
            other => panic!("Expected UnknownRoute, got {other:?}"),
        }
    }
}
