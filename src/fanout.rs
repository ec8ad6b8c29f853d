//! The pub/sub fan-out layer. Four broadcast channels per session
//! (`state`, `controller`, `bigscreen`, `participants`) plus a registry of
//! unicast mailboxes, one per connected participant, for `participant:<id>`.

use crate::protocol::ServerMessage;
use crate::types::{ParticipantId, Role};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, RwLock};

/// Channel capacity for each broadcast class. A slow consumer that falls this
/// far behind drops old messages rather than back-pressuring the producer —
/// acceptable here since every event is either idempotent-on-latest (ticks,
/// leaderboards) or re-derivable via recovery (§4.H).
const CHANNEL_CAPACITY: usize = 256;

/// One session's fan-out surface. Dropped (and all its channels with it) when
/// the session is torn down (§5 "End-of-session tears down").
pub struct SessionChannels {
    state_tx: broadcast::Sender<ServerMessage>,
    controller_tx: broadcast::Sender<ServerMessage>,
    bigscreen_tx: broadcast::Sender<ServerMessage>,
    participants_tx: broadcast::Sender<ServerMessage>,
    unicast: RwLock<HashMap<ParticipantId, mpsc::UnboundedSender<ServerMessage>>>,
}

impl Default for SessionChannels {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionChannels {
    pub fn new() -> Self {
        Self {
            state_tx: broadcast::channel(CHANNEL_CAPACITY).0,
            controller_tx: broadcast::channel(CHANNEL_CAPACITY).0,
            bigscreen_tx: broadcast::channel(CHANNEL_CAPACITY).0,
            participants_tx: broadcast::channel(CHANNEL_CAPACITY).0,
            unicast: RwLock::new(HashMap::new()),
        }
    }

    pub fn subscribe_state(&self) -> broadcast::Receiver<ServerMessage> {
        self.state_tx.subscribe()
    }

    pub fn subscribe_controller(&self) -> broadcast::Receiver<ServerMessage> {
        self.controller_tx.subscribe()
    }

    pub fn subscribe_bigscreen(&self) -> broadcast::Receiver<ServerMessage> {
        self.bigscreen_tx.subscribe()
    }

    pub fn subscribe_participants(&self) -> broadcast::Receiver<ServerMessage> {
        self.participants_tx.subscribe()
    }

    pub async fn register_participant(
        &self,
        participant_id: ParticipantId,
    ) -> mpsc::UnboundedReceiver<ServerMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.unicast.write().await.insert(participant_id, tx);
        rx
    }

    /// Mirror of `register_participant`; best-effort, failures are not
    /// observable to the caller (§4.C "failures logged but swallowed").
    pub async fn unregister_participant(&self, participant_id: &ParticipantId) {
        self.unicast.write().await.remove(participant_id);
    }

    pub fn publish_to_state(&self, msg: ServerMessage) {
        let _ = self.state_tx.send(msg);
    }

    pub fn publish_to_controller(&self, msg: ServerMessage) {
        let _ = self.controller_tx.send(msg);
    }

    pub fn publish_to_bigscreen(&self, msg: ServerMessage) {
        let _ = self.bigscreen_tx.send(msg);
    }

    pub fn publish_to_participants(&self, msg: ServerMessage) {
        let _ = self.participants_tx.send(msg);
    }

    pub async fn publish_to_participant(&self, participant_id: &ParticipantId, msg: ServerMessage) {
        let unicast = self.unicast.read().await;
        if let Some(tx) = unicast.get(participant_id) {
            if tx.send(msg).is_err() {
                tracing::warn!(participant_id, "unicast send failed: receiver gone");
            }
        }
    }

    /// Publish identically to state, controller, bigscreen, participants
    /// (four deliveries; intentional, to permit selective subscription).
    pub fn broadcast_to_session(&self, msg: ServerMessage) {
        self.publish_to_state(msg.clone());
        self.publish_to_controller(msg.clone());
        self.publish_to_bigscreen(msg.clone());
        self.publish_to_participants(msg);
    }

    /// Subscribe a freshly-authenticated connection to the channel set its
    /// role requires.
    pub fn channels_for_role(&self, role: Role) -> Vec<broadcast::Receiver<ServerMessage>> {
        match role {
            Role::Participant => vec![self.subscribe_participants()],
            Role::Controller => vec![self.subscribe_state(), self.subscribe_controller()],
            Role::BigScreen => vec![self.subscribe_bigscreen()],
        }
    }
}
