//! Connection gateway.
//!
//! Transport-agnostic event router. Each live connection registers an
//! outbound channel; inbound events are decoded, authenticated and dispatched
//! to the [`Engine`], and the results are routed back to the connections
//! involved. All state sits behind one mutex, so events are processed one at
//! a time with respect to the shared registries.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use fuente_shared::constants::REPORT_THANKS;
use fuente_shared::protocol::{ClientEvent, PeerProfile, PeerSummary, ServerEvent};
use fuente_shared::{ConversationId, UserId};

use crate::directory::ConfirmedMatch;
use crate::engine::Engine;
use crate::error::EngineError;

/// Opaque handle for one transport connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub(crate) u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

struct Connection {
    tx: mpsc::UnboundedSender<ServerEvent>,
    user_id: Option<UserId>,
    conversation_id: Option<ConversationId>,
}

struct Hub {
    engine: Engine,
    connections: HashMap<ConnectionId, Connection>,
    /// Latest connection per authenticated user, for routing to peers.
    sessions: HashMap<UserId, ConnectionId>,
}

/// Live counts for `/info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatewayStats {
    pub connections: usize,
    pub identities: usize,
    pub available: usize,
    pub conversations: usize,
}

#[derive(Clone)]
pub struct Gateway {
    hub: Arc<Mutex<Hub>>,
    next_id: Arc<AtomicU64>,
}

impl Gateway {
    pub fn new(engine: Engine) -> Self {
        Self {
            hub: Arc::new(Mutex::new(Hub {
                engine,
                connections: HashMap::new(),
                sessions: HashMap::new(),
            })),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Register a new connection whose outbound events go to `tx`.
    pub async fn connect(&self, tx: mpsc::UnboundedSender<ServerEvent>) -> ConnectionId {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut hub = self.hub.lock().await;
        hub.connections.insert(
            id,
            Connection {
                tx,
                user_id: None,
                conversation_id: None,
            },
        );
        debug!(connection = %id, live = hub.connections.len(), "Connection opened");
        id
    }

    /// Transport closed: withdraw the user and end their conversation.
    /// Nothing is sent to anyone.
    pub async fn disconnect(&self, id: ConnectionId) {
        let mut hub = self.hub.lock().await;
        let Some(conn) = hub.connections.remove(&id) else {
            return;
        };
        if let Some(user_id) = conn.user_id {
            hub.release_user(id, user_id);
        }
        debug!(connection = %id, live = hub.connections.len(), "Connection closed");
    }

    /// Decode and handle one text frame. Malformed frames are answered with
    /// an `error` event.
    pub async fn handle_text(&self, id: ConnectionId, text: &str) {
        match ClientEvent::from_json(text) {
            Ok(event) => self.handle(id, event).await,
            Err(e) => {
                debug!(connection = %id, error = %e, "Malformed inbound event");
                let hub = self.hub.lock().await;
                hub.send(id, EngineError::from(e).to_event());
            }
        }
    }

    /// Answer a frame the transport cannot carry (e.g. binary).
    pub async fn reject(&self, id: ConnectionId, reason: &str) {
        let hub = self.hub.lock().await;
        hub.send(id, EngineError::InvalidRequest(reason.to_string()).to_event());
    }

    pub async fn handle(&self, id: ConnectionId, event: ClientEvent) {
        let mut hub = self.hub.lock().await;
        let name = event.name();
        if let Err(e) = hub.dispatch(id, event) {
            debug!(connection = %id, event = name, error = %e, "Event failed");
            hub.send(id, e.to_event());
        }
    }

    /// Run `f` against the engine under the gateway lock (used by the HTTP API).
    pub async fn with_engine<R>(&self, f: impl FnOnce(&mut Engine) -> R) -> R {
        let mut hub = self.hub.lock().await;
        f(&mut hub.engine)
    }

    pub async fn stats(&self) -> GatewayStats {
        let hub = self.hub.lock().await;
        GatewayStats {
            connections: hub.connections.len(),
            identities: hub.engine.identities().len(),
            available: hub.engine.directory().len(),
            conversations: hub.engine.conversations().len(),
        }
    }
}

impl Hub {
    fn dispatch(&mut self, id: ConnectionId, event: ClientEvent) -> Result<(), EngineError> {
        if let ClientEvent::Authenticate(auth) = event {
            return self.authenticate(id, &auth.user_id);
        }

        let user_id = self.user_of(id)?;

        match event {
            ClientEvent::Authenticate(_) => Ok(()),

            ClientEvent::BrowsePeers(filters) => {
                let peers = self.engine.browse(&user_id, &filters);
                self.send(id, ServerEvent::PeersList(peers));
                Ok(())
            }

            ClientEvent::SetAvailable(profile) => {
                self.engine.set_available(user_id, profile, id)?;
                self.send(id, ServerEvent::StatusUpdate { available: true });
                Ok(())
            }

            ClientEvent::SetUnavailable => {
                self.engine.withdraw(&user_id);
                self.send(id, ServerEvent::StatusUpdate { available: false });
                Ok(())
            }

            ClientEvent::RequestChat(req) => {
                let confirmed = self.engine.request_chat(user_id, req.peer_id)?;
                self.start_chat(id, confirmed);
                Ok(())
            }

            ClientEvent::RequestMatch(filters) => {
                let confirmed = self.engine.request_match(user_id, &filters)?;
                self.start_chat(id, confirmed);
                Ok(())
            }

            ClientEvent::SendMessage(msg) => {
                let posted = self
                    .engine
                    .send_message(user_id, &msg.conversation_id, &msg.message)?;

                self.send(id, ServerEvent::MessageReceived(posted.message.clone()));
                if let Some(warning) = posted.warning {
                    self.send(id, ServerEvent::ModerationWarning { message: warning });
                }
                self.send_to_user(
                    &posted.recipient,
                    ServerEvent::MessageReceived(posted.message.for_recipient()),
                );
                Ok(())
            }

            ClientEvent::ReportPeer(report) => {
                let outcome = self
                    .engine
                    .report(user_id, report.peer_id, &report.reason)?;

                for (conversation_id, participants) in outcome.frozen {
                    for participant in participants {
                        self.send_to_user(
                            &participant,
                            ServerEvent::ConversationFrozen { conversation_id },
                        );
                    }
                }
                self.send(
                    id,
                    ServerEvent::ReportSubmitted {
                        message: REPORT_THANKS.to_string(),
                    },
                );
                Ok(())
            }

            ClientEvent::EndConversation(end) => {
                let conversation_id = end
                    .conversation_id
                    .or_else(|| self.connections.get(&id).and_then(|c| c.conversation_id))
                    .or_else(|| self.engine.conversations().active_for(&user_id))
                    .ok_or(EngineError::ConversationUnavailable)?;

                let ended = self.engine.end_conversation(&user_id, &conversation_id)?;
                let event = ServerEvent::ConversationEnded { conversation_id };
                match ended {
                    Some(conversation) => {
                        for participant in [conversation.participant_a, conversation.participant_b] {
                            self.clear_conversation(&participant, &conversation_id);
                            self.send_to_user(&participant, event.clone());
                        }
                    }
                    None => {
                        self.clear_conversation(&user_id, &conversation_id);
                        self.send(id, event);
                    }
                }
                Ok(())
            }
        }
    }

    fn authenticate(&mut self, id: ConnectionId, raw_user_id: &str) -> Result<(), EngineError> {
        let user_id = self.engine.authenticate(raw_user_id)?;

        let previous = self
            .connections
            .get(&id)
            .ok_or(EngineError::Authentication)?
            .user_id;
        if let Some(previous) = previous.filter(|p| *p != user_id) {
            self.release_user(id, previous);
        }

        let conversation_id = self.engine.conversations().active_for(&user_id);
        if let Some(conn) = self.connections.get_mut(&id) {
            conn.user_id = Some(user_id);
            conn.conversation_id = conversation_id;
        }
        self.sessions.insert(user_id, id);

        info!(connection = %id, user = %user_id.short(), "Connection authenticated");
        self.send(id, ServerEvent::Authenticated { user_id });
        Ok(())
    }

    /// Drop the session of `user_id` held by connection `id` and clean up
    /// their availability and conversation.
    fn release_user(&mut self, id: ConnectionId, user_id: UserId) {
        if self.sessions.get(&user_id) != Some(&id) {
            // A newer connection owns this user now.
            return;
        }
        self.sessions.remove(&user_id);

        if let Some(conversation) = self.engine.disconnect(&user_id) {
            if let Some(peer) = conversation.peer_of(&user_id) {
                self.clear_conversation(&peer, &conversation.id);
            }
        }
    }

    fn start_chat(&mut self, requester_conn: ConnectionId, confirmed: ConfirmedMatch) {
        let ConfirmedMatch {
            conversation_id,
            requester,
            requester_entry,
            peer,
        } = confirmed;

        self.bind_conversation(&requester, conversation_id);
        self.bind_conversation(&peer.user_id, conversation_id);

        self.send(
            requester_conn,
            ServerEvent::ChatStarted {
                conversation_id,
                peer: peer.summary(),
            },
        );

        let requester_summary = requester_entry
            .map(|e| e.summary())
            .unwrap_or_else(|| PeerSummary {
                id: requester,
                profile: PeerProfile::anonymous(),
            });
        let event = ServerEvent::ChatStarted {
            conversation_id,
            peer: requester_summary,
        };
        if !self.send_to_user(&peer.user_id, event.clone()) {
            // Fall back to the connection recorded with the availability entry.
            self.send(peer.connection, event);
        }
    }

    fn user_of(&self, id: ConnectionId) -> Result<UserId, EngineError> {
        self.connections
            .get(&id)
            .and_then(|c| c.user_id)
            .ok_or(EngineError::Authentication)
    }

    fn bind_conversation(&mut self, user_id: &UserId, conversation_id: ConversationId) {
        if let Some(conn) = self
            .sessions
            .get(user_id)
            .and_then(|cid| self.connections.get_mut(cid))
        {
            conn.conversation_id = Some(conversation_id);
        }
    }

    fn clear_conversation(&mut self, user_id: &UserId, conversation_id: &ConversationId) {
        if let Some(conn) = self
            .sessions
            .get(user_id)
            .and_then(|cid| self.connections.get_mut(cid))
        {
            if conn.conversation_id.as_ref() == Some(conversation_id) {
                conn.conversation_id = None;
            }
        }
    }

    fn send(&self, id: ConnectionId, event: ServerEvent) -> bool {
        match self.connections.get(&id) {
            Some(conn) => conn.tx.send(event).is_ok(),
            None => false,
        }
    }

    /// Returns `false` if the user has no live connection.
    fn send_to_user(&self, user_id: &UserId, event: ServerEvent) -> bool {
        match self.sessions.get(user_id) {
            Some(id) => self.send(*id, event),
            None => {
                warn!(user = %user_id.short(), "No live connection for user");
                false
            }
        }
    }
}
