//! Real-time synchronization core.
//!
//! This module provides the client-side state machinery for a Tambola game:
//!
//! - `connection` - Connection lifecycle and reconnect backoff
//! - `protocol` - Typed event catalog, handler registry, pending-ack guard
//! - `game` - Local mirror of server-authoritative game state
//! - `lobby` - Pre-game waiting room (roster-only)
//! - `session` - Durable session snapshot for reload resume
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          SyncSession                             │
//! │                                                                  │
//! │  transport events ──▶ ConnectionManager ──▶ ConnectionSignal     │
//! │                              │                    │              │
//! │                              │     reconnect ──▶ re-join emit    │
//! │                              ▼                                   │
//! │  inbound events ──▶ ServerEvent ──▶ GameSession / WaitingRoom    │
//! │                          │                 │                     │
//! │                          ▼                 ▼                     │
//! │                     EventRouter      SessionStore (durable)      │
//! │                                                                  │
//! │  commands ──▶ connection gate ─▶ PendingCalls ─▶ Effect::Send    │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The crate performs no I/O. The host event loop feeds transport and
//! protocol events in, executes the returned [`Effect`]s, and calls
//! [`SyncSession::poll`] on a timer so reconnect attempts and ack timeouts
//! fire.

pub mod connection;
pub mod game;
pub mod lobby;
pub mod protocol;
pub mod session;

use std::time::Instant;

use tracing::{debug, warn};

// Re-export commonly used types
pub use connection::{
    ConnectionManager, ConnectionSignal, ConnectionState, MAX_RECONNECT_ATTEMPTS,
    RECONNECT_INITIAL_DELAY, RECONNECT_MAX_DELAY,
};
pub use game::{
    GameError, GameSession, RosterEntry, SessionPhase, Ticket, WinCategory, Winner,
    EARLY_FIVE_COUNT, MAX_NUMBER, MIN_NUMBER, TICKET_COLS, TICKET_NUMBERS, TICKET_ROWS,
};
pub use lobby::WaitingRoom;
pub use protocol::{
    is_session_invalidating, CallAck, ClientCommand, EventHandler, EventKind, EventRouter,
    PendingCalls, ProtocolError, ServerEvent, ACK_TIMEOUT, ERR_FORBIDDEN,
    ERR_GAME_ALREADY_STARTED, ERR_GAME_NOT_ACTIVE, ERR_GAME_NOT_FOUND,
};
pub use session::{
    FileSessionStore, MemorySessionStore, SessionSnapshot, SessionStore, StoreError,
    SESSION_FILE_NAME,
};

/// Work the host must perform on behalf of the core.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Open the transport with this identity attached as the auth credential.
    OpenTransport { identity: String },

    /// Close the transport.
    CloseTransport,

    /// Emit an outbound message. `wants_ack` asks the transport to route the
    /// server's acknowledgment back through
    /// [`SyncSession::handle_call_ack`].
    Send {
        name: &'static str,
        payload: serde_json::Value,
        wants_ack: bool,
    },

    /// Surface a connection-state transition to subscribers.
    Notify(ConnectionSignal),

    /// Acknowledge a server message back over the transport, when the
    /// transport requested one. Guarantees reliable win-claim delivery.
    AckServer { name: &'static str },

    /// A pending `game:callNumber` settled with the server's reply.
    CallResolved { number: u8, ack: CallAck },

    /// A pending `game:callNumber` saw no acknowledgment within
    /// [`ACK_TIMEOUT`]; the number must not be assumed called.
    CallTimedOut { number: u8 },

    /// A mark was applied locally but could not be announced (no live
    /// connection); it reconciles through the next state-sync.
    MarkDeferred { number: u8 },
}

/// Session-scoped synchronization coordinator.
///
/// Owns the connection, the pending-ack guard, the game mirror, the waiting
/// room, and the durable store. One instance per logical session; all
/// mutation happens on the single event-loop thread that drives it.
pub struct SyncSession {
    pub connection: ConnectionManager,
    pub game: GameSession,
    pub waiting_room: WaitingRoom,

    router: EventRouter,
    pending_calls: PendingCalls,
    store: Box<dyn SessionStore>,

    /// Display name announced on joins, replayed on reconnect
    username: Option<String>,

    /// Session id restored from disk, pending reconciliation against the
    /// next join. A mismatch purges before new data is applied.
    restored_session_id: Option<String>,
}

impl SyncSession {
    pub fn new(store: Box<dyn SessionStore>) -> Self {
        Self {
            connection: ConnectionManager::new(),
            game: GameSession::new(),
            waiting_room: WaitingRoom::new(),
            router: EventRouter::new(),
            pending_calls: PendingCalls::new(),
            store,
            username: None,
            restored_session_id: None,
        }
    }

    /// Rehydrate the durable session record, if one exists.
    ///
    /// Advisory: the restored fields stand only until the next join and
    /// state-sync reconcile them. Returns whether a record was restored.
    pub fn rehydrate(&mut self) -> Result<bool, StoreError> {
        let Some(snapshot) = self.store.load()? else {
            return Ok(false);
        };
        if self.game.restore(&snapshot).is_err() {
            warn!("discarding unusable session record");
            self.store.clear()?;
            return Ok(false);
        }
        debug!(session_id = %snapshot.session_id, "session rehydrated");
        self.restored_session_id = Some(snapshot.session_id);
        Ok(true)
    }

    /// Request a connection for `identity`. See
    /// [`ConnectionManager::connect`].
    ///
    /// One identity, at most one live connection: a different identity runs
    /// the full teardown first - the old transport is closed, registered
    /// handlers and outstanding calls are dropped - before the new
    /// transport opens.
    pub fn connect(&mut self, identity: impl Into<String>) -> Vec<Effect> {
        let identity = identity.into();
        let mut effects = Vec::new();

        let switching = self
            .connection
            .identity()
            .is_some_and(|current| current != identity);
        if switching {
            debug!(%identity, "new identity, tearing down existing connection");
            effects.extend(self.disconnect());
        }

        if let Some(identity) = self.connection.connect(identity) {
            effects.push(Effect::OpenTransport { identity });
        }
        effects
    }

    /// Tear down the connection, dropping registered handlers and pending
    /// calls. Idempotent. Game state survives for a later reconnect.
    pub fn disconnect(&mut self) -> Vec<Effect> {
        self.connection.disconnect();
        self.router.clear();
        self.pending_calls.clear();
        vec![Effect::CloseTransport]
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    /// Register a presentation-layer handler. Last registration wins.
    pub fn on(&mut self, kind: EventKind, handler: EventHandler) {
        self.router.on(kind, handler);
    }

    /// Remove a presentation-layer handler.
    pub fn off(&mut self, kind: EventKind) {
        self.router.off(kind);
    }

    /// Read access to the durable store.
    pub fn store(&self) -> &dyn SessionStore {
        self.store.as_ref()
    }

    /// Transport reports a successful open.
    ///
    /// The server forgets room membership across a transport-level
    /// reconnect, so an established session re-announces its join here -
    /// this is the coordinator's declared responsibility, not a convention
    /// for every consumer to remember.
    pub fn handle_transport_opened(&mut self) -> Vec<Effect> {
        let signal = self.connection.transport_opened();
        let mut effects = vec![Effect::Notify(signal)];

        if let Some(game_id) = self.game.game_id().map(str::to_string) {
            if !self.game.phase().is_terminal() {
                debug!(game_id = %game_id, "re-announcing game membership");
                effects.push(self.send(ClientCommand::GameJoin {
                    game_id,
                    username: self.username.clone(),
                }));
            }
        } else if let (Some(game_id), Some(username)) = (
            self.waiting_room.game_id().map(str::to_string),
            self.username.clone(),
        ) {
            debug!(game_id = %game_id, "re-announcing lobby membership");
            effects.push(self.send(ClientCommand::LobbyJoin { game_id, username }));
        }

        effects
    }

    /// Transport reports the connection closed.
    pub fn handle_transport_closed(&mut self, reason: &str, now: Instant) -> Vec<Effect> {
        self.connection
            .transport_closed(reason, now)
            .map(Effect::Notify)
            .into_iter()
            .collect()
    }

    /// Transport reports a connect attempt failed.
    pub fn handle_transport_error(&mut self, now: Instant) -> Vec<Effect> {
        self.connection
            .transport_error(now)
            .map(Effect::Notify)
            .into_iter()
            .collect()
    }

    /// Fire due timers: reconnect attempts and ack timeouts.
    pub fn poll(&mut self, now: Instant) -> Vec<Effect> {
        let mut effects = Vec::new();

        if let Some(identity) = self.connection.poll(now) {
            effects.push(Effect::OpenTransport { identity });
        }

        for number in self.pending_calls.expire(now) {
            warn!(number, "call acknowledgment timed out");
            effects.push(Effect::CallTimedOut { number });
        }

        effects
    }

    /// Emit an outbound command.
    ///
    /// Fails fast with [`ProtocolError::NotConnected`] when emission is not
    /// permitted - never a silent drop; the caller decides whether to retry
    /// after reconnecting. `game:callNumber` additionally reserves its
    /// pending-ack key and rejects a duplicate for the same number.
    pub fn command(&mut self, cmd: ClientCommand, now: Instant) -> Result<Vec<Effect>, ProtocolError> {
        if !self.connection.is_connected() {
            return Err(ProtocolError::NotConnected);
        }

        match &cmd {
            ClientCommand::GameCallNumber { number, .. } => {
                self.pending_calls.begin(*number, now)?;
            }
            ClientCommand::GameJoin { game_id, username } => {
                self.username = username.clone().or_else(|| self.username.take());
                self.game.begin_join(game_id.clone());
            }
            ClientCommand::LobbyJoin { username, .. } => {
                self.username = Some(username.clone());
            }
            ClientCommand::GameLeave { .. } => {
                // Explicit leave destroys the session, durable mirror included
                self.purge();
            }
            ClientCommand::LobbyLeave { .. } => {
                self.waiting_room.clear();
            }
            _ => {}
        }

        Ok(vec![self.send(cmd)])
    }

    /// Mark a number on the player's own ticket.
    ///
    /// The local mirror is authoritative for the player's marks; when
    /// connected, the mark is also announced so the server can track it
    /// across devices. An offline mark yields [`Effect::MarkDeferred`]
    /// and reconciles through the next state-sync instead.
    pub fn mark_number(&mut self, number: u8) -> Result<Vec<Effect>, GameError> {
        self.game.mark_number(number)?;
        self.persist();

        let mut effects = Vec::new();
        if self.connection.is_connected() {
            if let (Some(game_id), Some(player_id)) = (
                self.game.game_id().map(str::to_string),
                self.game.player_id().map(str::to_string),
            ) {
                effects.push(self.send(ClientCommand::GameMarkNumber {
                    game_id,
                    player_id,
                    number,
                }));
            }
        }
        if effects.is_empty() {
            effects.push(Effect::MarkDeferred { number });
        }
        Ok(effects)
    }

    /// Route the server's acknowledgment of a `game:callNumber` command.
    ///
    /// Errors with [`ProtocolError::NoPendingCall`] when the call already
    /// settled by timeout; a late ack must not settle it twice.
    pub fn handle_call_ack(&mut self, number: u8, ack: CallAck) -> Result<Vec<Effect>, ProtocolError> {
        self.pending_calls.settle(number)?;
        Ok(vec![Effect::CallResolved { number, ack }])
    }

    /// Parse and apply a raw inbound event.
    pub fn handle_event(&mut self, name: &str, payload: &serde_json::Value) -> Result<Vec<Effect>, ProtocolError> {
        let event = ServerEvent::parse(name, payload)?;
        Ok(self.apply_event(event))
    }

    /// Apply a typed inbound event to the local mirrors, then dispatch it to
    /// the registered handler.
    ///
    /// Events for a terminal or absent session are ignored, not applied;
    /// idempotent re-delivery is absorbed by the engine's gates.
    pub fn apply_event(&mut self, event: ServerEvent) -> Vec<Effect> {
        let mut effects = Vec::new();

        match &event {
            ServerEvent::Connected | ServerEvent::Disconnected { .. } => {
                // Connection state is driven by the transport callbacks
            }

            ServerEvent::GameJoined {
                game_id,
                player_id,
                ticket,
            } => {
                if let Some(restored) = self.restored_session_id.take() {
                    if restored != SessionSnapshot::session_id_for(game_id, player_id) {
                        debug!(%restored, "rehydrated session does not match joined game, purging");
                        self.purge();
                    }
                }
                self.game
                    .establish(game_id.clone(), player_id.clone(), ticket.clone());
                self.waiting_room.clear();
                self.persist();
            }

            ServerEvent::GameStateSync {
                called_numbers,
                current_number,
                players,
                winners,
                marked_numbers,
            } => {
                if self.game.phase().is_active() {
                    self.game.sync_state(
                        called_numbers,
                        *current_number,
                        players.clone(),
                        winners.clone(),
                        marked_numbers.clone(),
                    );
                    self.persist();
                } else {
                    debug!(phase = self.game.phase().as_str(), "state sync ignored");
                    return effects;
                }
            }

            ServerEvent::PlayerJoined { player_id, username } => {
                if self.game.phase().is_active() {
                    self.game.add_player(player_id.clone(), username.clone());
                } else {
                    return effects;
                }
            }

            ServerEvent::NumberCalled { number } => {
                if self.game.phase().is_active() {
                    if let Err(e) = self.game.add_called_number(*number) {
                        warn!(number, error = %e, "rejected called number");
                        return effects;
                    }
                    self.persist();
                } else {
                    return effects;
                }
            }

            ServerEvent::Winner {
                player_id,
                category,
                username,
            } => {
                if self.game.phase().is_active() {
                    self.game.add_winner(Winner {
                        player_id: player_id.clone(),
                        category: *category,
                        username: username.clone(),
                    });
                    self.persist();
                } else {
                    return effects;
                }
            }

            ServerEvent::WinClaimed {
                category, success, ..
            } => {
                if !self.game.phase().is_active() {
                    return effects;
                }
                if *success {
                    let _ = self.game.record_claim(*category);
                    self.persist();
                }
                // Receipt back to the server when the transport asked for one
                effects.push(Effect::AckServer {
                    name: EventKind::WinClaimed.as_str(),
                });
            }

            ServerEvent::GameCompleted { .. } => {
                if self.game.phase().is_active() {
                    self.game.complete();
                } else {
                    return effects;
                }
            }

            ServerEvent::GameDeleted { game_id, .. } => {
                debug!(%game_id, "session invalidated by deletion");
                self.invalidate_session();
            }

            ServerEvent::GameStarting { .. } => {
                self.waiting_room.mark_starting();
            }

            ServerEvent::LobbyJoined { game_id, players } => {
                self.waiting_room.joined(game_id.clone(), players.clone());
            }

            ServerEvent::LobbyPlayerJoined { player_id, username } => {
                self.waiting_room.player_joined(RosterEntry {
                    player_id: player_id.clone(),
                    username: username.clone(),
                });
            }

            ServerEvent::LobbyPlayerLeft { player_id } => {
                self.waiting_room.player_left(player_id);
            }

            ServerEvent::ServerError { code, .. } => {
                // Unrecognized codes are informational and pass through;
                // invalidating ones purge the session like a deletion
                if is_session_invalidating(code) {
                    debug!(%code, "session invalidated by server error");
                    self.invalidate_session();
                }
            }
        }

        self.router.dispatch(&event);
        effects
    }

    /// Reset every per-game field and purge the durable mirror.
    ///
    /// After this call no field retains previous-game values, so a later
    /// rejoin of a different game cannot inherit stale state.
    pub fn clear_game(&mut self) {
        self.purge();
    }

    /// Discard all session state after a server-side invalidation.
    ///
    /// Every per-game field is destroyed and the durable record purged; the
    /// terminal `Deleted` phase stays observable until the next join.
    fn invalidate_session(&mut self) {
        self.game.clear();
        self.game.invalidate();
        self.waiting_room.clear();
        self.restored_session_id = None;
        self.purge_storage();
    }

    fn purge(&mut self) {
        self.game.clear();
        self.waiting_room.clear();
        self.restored_session_id = None;
        self.purge_storage();
    }

    fn purge_storage(&mut self) {
        if let Err(e) = self.store.clear() {
            warn!(error = %e, "failed to purge session record");
        }
    }

    fn persist(&mut self) {
        if let Some(snapshot) = self.game.snapshot() {
            if let Err(e) = self.store.save(&snapshot) {
                warn!(error = %e, "failed to persist session record");
            }
        }
    }

    fn send(&self, cmd: ClientCommand) -> Effect {
        Effect::Send {
            name: cmd.event_name(),
            payload: cmd.payload(),
            wants_ack: cmd.wants_ack(),
        }
    }
}

impl std::fmt::Debug for SyncSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncSession")
            .field("connection", &self.connection)
            .field("game", &self.game)
            .field("waiting_room", &self.waiting_room)
            .field("pending_calls", &self.pending_calls)
            .finish()
    }
}
