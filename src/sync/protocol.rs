//! Event protocol layer.
//!
//! Closed catalog of inbound and outbound messages, a handler registry for
//! the presentation layer, and the pending-acknowledgment guard for the one
//! command that must be confirmed by the server (`game:callNumber`).
//!
//! Inbound payloads parse into [`ServerEvent`], a tagged union keyed by the
//! wire event name, so consumers dispatch exhaustively instead of shape-
//! guessing at runtime.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::debug;

use super::game::{RosterEntry, Ticket, WinCategory, Winner};

/// How long an acknowledged command waits before rejecting.
pub const ACK_TIMEOUT: Duration = Duration::from_secs(5);

/// Server error codes that invalidate the current session.
pub const ERR_GAME_NOT_FOUND: &str = "GAME_NOT_FOUND";
pub const ERR_GAME_ALREADY_STARTED: &str = "GAME_ALREADY_STARTED";

/// Other recognized server error codes. Recoverable; forwarded unmodified.
pub const ERR_FORBIDDEN: &str = "FORBIDDEN";
pub const ERR_GAME_NOT_ACTIVE: &str = "GAME_NOT_ACTIVE";

/// Check whether a server error code must purge the session.
pub fn is_session_invalidating(code: &str) -> bool {
    matches!(code, ERR_GAME_NOT_FOUND | ERR_GAME_ALREADY_STARTED)
}

/// Inbound event names, used as registry keys and for wire routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connected,
    Disconnected,
    GameJoined,
    GameStateSync,
    PlayerJoined,
    NumberCalled,
    Winner,
    WinClaimed,
    GameCompleted,
    GameDeleted,
    GameStarting,
    LobbyJoined,
    LobbyPlayerJoined,
    LobbyPlayerLeft,
    Error,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::GameJoined => "game:joined",
            Self::GameStateSync => "game:stateSync",
            Self::PlayerJoined => "game:playerJoined",
            Self::NumberCalled => "game:numberCalled",
            Self::Winner => "game:winner",
            Self::WinClaimed => "game:winClaimed",
            Self::GameCompleted => "game:completed",
            Self::GameDeleted => "game:deleted",
            Self::GameStarting => "game:starting",
            Self::LobbyJoined => "lobby:joined",
            Self::LobbyPlayerJoined => "lobby:playerJoined",
            Self::LobbyPlayerLeft => "lobby:playerLeft",
            Self::Error => "error",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "connected" => Some(Self::Connected),
            "disconnected" => Some(Self::Disconnected),
            "game:joined" => Some(Self::GameJoined),
            "game:stateSync" => Some(Self::GameStateSync),
            "game:playerJoined" => Some(Self::PlayerJoined),
            "game:numberCalled" => Some(Self::NumberCalled),
            "game:winner" => Some(Self::Winner),
            "game:winClaimed" => Some(Self::WinClaimed),
            "game:completed" => Some(Self::GameCompleted),
            "game:deleted" => Some(Self::GameDeleted),
            "game:starting" => Some(Self::GameStarting),
            "lobby:joined" => Some(Self::LobbyJoined),
            "lobby:playerJoined" => Some(Self::LobbyPlayerJoined),
            "lobby:playerLeft" => Some(Self::LobbyPlayerLeft),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

/// Inbound server events with typed payloads.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    Connected,
    Disconnected {
        reason: String,
    },
    GameJoined {
        game_id: String,
        player_id: String,
        ticket: Ticket,
    },
    GameStateSync {
        called_numbers: Vec<u8>,
        current_number: Option<u8>,
        players: Vec<RosterEntry>,
        winners: Vec<Winner>,
        marked_numbers: Option<Vec<u8>>,
    },
    PlayerJoined {
        player_id: String,
        username: String,
    },
    NumberCalled {
        number: u8,
    },
    Winner {
        player_id: String,
        category: WinCategory,
        username: Option<String>,
    },
    WinClaimed {
        category: WinCategory,
        success: bool,
        message: String,
    },
    GameCompleted {
        game_id: String,
    },
    GameDeleted {
        game_id: String,
        message: String,
    },
    GameStarting {
        game_id: String,
    },
    LobbyJoined {
        game_id: String,
        players: Vec<RosterEntry>,
    },
    LobbyPlayerJoined {
        player_id: String,
        username: String,
    },
    LobbyPlayerLeft {
        player_id: String,
    },
    ServerError {
        code: String,
        message: String,
    },
}

impl ServerEvent {
    /// Parse an inbound event from its wire name and JSON payload.
    pub fn parse(name: &str, payload: &Value) -> Result<Self, ProtocolError> {
        let kind = EventKind::from_name(name).ok_or_else(|| ProtocolError::UnknownEvent {
            name: name.to_string(),
        })?;

        match kind {
            EventKind::Connected => Ok(Self::Connected),
            EventKind::Disconnected => Ok(Self::Disconnected {
                reason: opt_str(payload, "reason").unwrap_or_default(),
            }),
            EventKind::GameJoined => {
                let rows: Vec<Vec<u8>> = field(kind, payload, "ticket")
                    .and_then(|v| {
                        serde_json::from_value(v.clone()).map_err(|_| invalid(kind, "ticket"))
                    })?;
                let ticket = Ticket::from_wire(&rows).map_err(|_| invalid(kind, "ticket"))?;
                Ok(Self::GameJoined {
                    game_id: str_field(kind, payload, "gameId")?,
                    player_id: str_field(kind, payload, "playerId")?,
                    ticket,
                })
            }
            EventKind::GameStateSync => Ok(Self::GameStateSync {
                called_numbers: numbers_field(kind, payload, "calledNumbers")?,
                current_number: opt_u8(payload, "currentNumber"),
                players: roster_field(kind, payload, "players")?,
                winners: winners_field(kind, payload, "winners")?,
                marked_numbers: match payload.get("markedNumbers") {
                    Some(Value::Null) | None => None,
                    Some(_) => Some(numbers_field(kind, payload, "markedNumbers")?),
                },
            }),
            EventKind::PlayerJoined => Ok(Self::PlayerJoined {
                player_id: str_field(kind, payload, "playerId")?,
                username: str_field(kind, payload, "userName")?,
            }),
            EventKind::NumberCalled => Ok(Self::NumberCalled {
                number: u8_field(kind, payload, "number")?,
            }),
            EventKind::Winner => Ok(Self::Winner {
                player_id: str_field(kind, payload, "playerId")?,
                category: category_field(kind, payload)?,
                username: opt_str(payload, "userName"),
            }),
            EventKind::WinClaimed => Ok(Self::WinClaimed {
                category: category_field(kind, payload)?,
                success: payload
                    .get("success")
                    .and_then(Value::as_bool)
                    .ok_or_else(|| missing(kind, "success"))?,
                message: opt_str(payload, "message").unwrap_or_default(),
            }),
            EventKind::GameCompleted => Ok(Self::GameCompleted {
                game_id: str_field(kind, payload, "gameId")?,
            }),
            EventKind::GameDeleted => Ok(Self::GameDeleted {
                game_id: str_field(kind, payload, "gameId")?,
                message: opt_str(payload, "message").unwrap_or_default(),
            }),
            EventKind::GameStarting => Ok(Self::GameStarting {
                game_id: str_field(kind, payload, "gameId")?,
            }),
            EventKind::LobbyJoined => Ok(Self::LobbyJoined {
                game_id: str_field(kind, payload, "gameId")?,
                players: roster_field(kind, payload, "players")?,
            }),
            EventKind::LobbyPlayerJoined => Ok(Self::LobbyPlayerJoined {
                player_id: str_field(kind, payload, "playerId")?,
                username: str_field(kind, payload, "userName")?,
            }),
            EventKind::LobbyPlayerLeft => Ok(Self::LobbyPlayerLeft {
                player_id: str_field(kind, payload, "playerId")?,
            }),
            EventKind::Error => Ok(Self::ServerError {
                code: str_field(kind, payload, "code")?,
                message: opt_str(payload, "message").unwrap_or_default(),
            }),
        }
    }

    /// The registry key for this event.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Connected => EventKind::Connected,
            Self::Disconnected { .. } => EventKind::Disconnected,
            Self::GameJoined { .. } => EventKind::GameJoined,
            Self::GameStateSync { .. } => EventKind::GameStateSync,
            Self::PlayerJoined { .. } => EventKind::PlayerJoined,
            Self::NumberCalled { .. } => EventKind::NumberCalled,
            Self::Winner { .. } => EventKind::Winner,
            Self::WinClaimed { .. } => EventKind::WinClaimed,
            Self::GameCompleted { .. } => EventKind::GameCompleted,
            Self::GameDeleted { .. } => EventKind::GameDeleted,
            Self::GameStarting { .. } => EventKind::GameStarting,
            Self::LobbyJoined { .. } => EventKind::LobbyJoined,
            Self::LobbyPlayerJoined { .. } => EventKind::LobbyPlayerJoined,
            Self::LobbyPlayerLeft { .. } => EventKind::LobbyPlayerLeft,
            Self::ServerError { .. } => EventKind::Error,
        }
    }
}

// Payload extraction helpers. The wire uses camelCase field names.

fn missing(kind: EventKind, name: &'static str) -> ProtocolError {
    ProtocolError::MissingField {
        event: kind.as_str(),
        field: name,
    }
}

fn invalid(kind: EventKind, name: &'static str) -> ProtocolError {
    ProtocolError::InvalidField {
        event: kind.as_str(),
        field: name,
    }
}

fn field<'a>(kind: EventKind, payload: &'a Value, name: &'static str) -> Result<&'a Value, ProtocolError> {
    payload.get(name).ok_or_else(|| missing(kind, name))
}

fn str_field(kind: EventKind, payload: &Value, name: &'static str) -> Result<String, ProtocolError> {
    field(kind, payload, name)?
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| invalid(kind, name))
}

fn opt_str(payload: &Value, name: &str) -> Option<String> {
    payload.get(name).and_then(Value::as_str).map(str::to_string)
}

fn u8_field(kind: EventKind, payload: &Value, name: &'static str) -> Result<u8, ProtocolError> {
    field(kind, payload, name)?
        .as_u64()
        .and_then(|n| u8::try_from(n).ok())
        .ok_or_else(|| invalid(kind, name))
}

fn opt_u8(payload: &Value, name: &str) -> Option<u8> {
    payload
        .get(name)
        .and_then(Value::as_u64)
        .and_then(|n| u8::try_from(n).ok())
}

fn numbers_field(kind: EventKind, payload: &Value, name: &'static str) -> Result<Vec<u8>, ProtocolError> {
    field(kind, payload, name)?
        .as_array()
        .ok_or_else(|| invalid(kind, name))?
        .iter()
        .map(|v| {
            v.as_u64()
                .and_then(|n| u8::try_from(n).ok())
                .ok_or_else(|| invalid(kind, name))
        })
        .collect()
}

fn roster_field(kind: EventKind, payload: &Value, name: &'static str) -> Result<Vec<RosterEntry>, ProtocolError> {
    field(kind, payload, name)?
        .as_array()
        .ok_or_else(|| invalid(kind, name))?
        .iter()
        .map(|p| {
            Ok(RosterEntry {
                player_id: str_field(kind, p, "playerId")?,
                username: opt_str(p, "userName").unwrap_or_default(),
            })
        })
        .collect()
}

fn winners_field(kind: EventKind, payload: &Value, name: &'static str) -> Result<Vec<Winner>, ProtocolError> {
    field(kind, payload, name)?
        .as_array()
        .ok_or_else(|| invalid(kind, name))?
        .iter()
        .map(|w| {
            Ok(Winner {
                player_id: str_field(kind, w, "playerId")?,
                category: category_field(kind, w)?,
                username: opt_str(w, "userName"),
            })
        })
        .collect()
}

fn category_field(kind: EventKind, payload: &Value) -> Result<WinCategory, ProtocolError> {
    let s = str_field(kind, payload, "category")?;
    WinCategory::parse(&s).ok_or_else(|| invalid(kind, "category"))
}

/// Outbound commands (client -> server).
///
/// All are fire-and-forget except [`ClientCommand::GameCallNumber`], which is
/// acknowledged by the server and guarded by [`PendingCalls`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    GameJoin {
        game_id: String,
        username: Option<String>,
    },
    GameLeave {
        game_id: String,
    },
    GameStart {
        game_id: String,
    },
    GameCallNumber {
        game_id: String,
        number: u8,
    },
    GameMarkNumber {
        game_id: String,
        player_id: String,
        number: u8,
    },
    GameClaimWin {
        game_id: String,
        category: WinCategory,
    },
    LobbyJoin {
        game_id: String,
        username: String,
    },
    LobbyLeave {
        game_id: String,
    },
}

impl ClientCommand {
    /// Wire message name.
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::GameJoin { .. } => "game:join",
            Self::GameLeave { .. } => "game:leave",
            Self::GameStart { .. } => "game:start",
            Self::GameCallNumber { .. } => "game:callNumber",
            Self::GameMarkNumber { .. } => "game:markNumber",
            Self::GameClaimWin { .. } => "game:claimWin",
            Self::LobbyJoin { .. } => "lobby:join",
            Self::LobbyLeave { .. } => "lobby:leave",
        }
    }

    /// Whether the server confirms this command with an acknowledgment.
    pub fn wants_ack(&self) -> bool {
        matches!(self, Self::GameCallNumber { .. })
    }

    /// Wire payload.
    pub fn payload(&self) -> Value {
        match self {
            Self::GameJoin { game_id, username } => serde_json::json!({
                "gameId": game_id,
                "userName": username,
            }),
            Self::GameLeave { game_id } | Self::GameStart { game_id } | Self::LobbyLeave { game_id } => {
                serde_json::json!({ "gameId": game_id })
            }
            Self::GameCallNumber { game_id, number } => serde_json::json!({
                "gameId": game_id,
                "number": number,
            }),
            Self::GameMarkNumber {
                game_id,
                player_id,
                number,
            } => serde_json::json!({
                "gameId": game_id,
                "playerId": player_id,
                "number": number,
            }),
            Self::GameClaimWin { game_id, category } => serde_json::json!({
                "gameId": game_id,
                "category": category.as_str(),
            }),
            Self::LobbyJoin { game_id, username } => serde_json::json!({
                "gameId": game_id,
                "userName": username,
            }),
        }
    }
}

/// Server acknowledgment of a `game:callNumber` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallAck {
    pub success: bool,
    pub message: Option<String>,
}

impl CallAck {
    pub fn parse(payload: &Value) -> Result<Self, ProtocolError> {
        Ok(Self {
            success: payload
                .get("success")
                .and_then(Value::as_bool)
                .ok_or(ProtocolError::MissingField {
                    event: "ack",
                    field: "success",
                })?,
            message: opt_str(payload, "message"),
        })
    }
}

/// Protocol errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Inbound event name not in the catalog
    UnknownEvent { name: String },
    /// Required payload field absent
    MissingField { event: &'static str, field: &'static str },
    /// Payload field has the wrong shape
    InvalidField { event: &'static str, field: &'static str },
    /// Emission attempted without a live connection
    NotConnected,
    /// An acknowledged command for this number is already outstanding
    CallAlreadyPending { number: u8 },
    /// Acknowledgment/timeout arrived for a number with no pending call
    NoPendingCall { number: u8 },
    /// No acknowledgment within [`ACK_TIMEOUT`]
    AckTimeout { number: u8 },
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownEvent { name } => write!(f, "Unknown event '{}'", name),
            Self::MissingField { event, field } => {
                write!(f, "Event '{}' payload missing field '{}'", event, field)
            }
            Self::InvalidField { event, field } => {
                write!(f, "Event '{}' payload field '{}' is invalid", event, field)
            }
            Self::NotConnected => write!(f, "Not connected to the server"),
            Self::CallAlreadyPending { number } => {
                write!(f, "A call for number {} is already awaiting acknowledgment", number)
            }
            Self::NoPendingCall { number } => {
                write!(f, "No pending call for number {}", number)
            }
            Self::AckTimeout { number } => {
                write!(f, "Call for number {} was not acknowledged in time", number)
            }
        }
    }
}

impl std::error::Error for ProtocolError {}

/// Handler invoked when an inbound event is dispatched.
pub type EventHandler = Box<dyn FnMut(&ServerEvent)>;

/// Registry of inbound event handlers.
///
/// One active handler per event kind; registering again replaces the
/// previous handler wholesale (handlers are swapped per screen, never
/// accumulated).
#[derive(Default)]
pub struct EventRouter {
    handlers: HashMap<EventKind, EventHandler>,
}

impl EventRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for an event kind. Last registration wins.
    pub fn on(&mut self, kind: EventKind, handler: EventHandler) {
        if self.handlers.insert(kind, handler).is_some() {
            debug!(event = kind.as_str(), "handler replaced");
        }
    }

    /// Remove the handler for an event kind.
    pub fn off(&mut self, kind: EventKind) {
        self.handlers.remove(&kind);
    }

    /// Invoke the registered handler, if any. Returns whether one ran.
    pub fn dispatch(&mut self, event: &ServerEvent) -> bool {
        match self.handlers.get_mut(&event.kind()) {
            Some(handler) => {
                handler(event);
                true
            }
            None => false,
        }
    }

    /// Drop every registered handler.
    pub fn clear(&mut self) {
        self.handlers.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for EventRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRouter")
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

/// Guard for outstanding acknowledged calls.
///
/// At most one call may be pending per number; a duplicate is rejected
/// locally before transmission. A call settles exactly once: by the
/// server's acknowledgment or by timeout, whichever comes first.
#[derive(Debug, Default)]
pub struct PendingCalls {
    pending: HashMap<u8, Instant>,
}

impl PendingCalls {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the key before transmission.
    pub fn begin(&mut self, number: u8, now: Instant) -> Result<(), ProtocolError> {
        if self.pending.contains_key(&number) {
            return Err(ProtocolError::CallAlreadyPending { number });
        }
        self.pending.insert(number, now);
        Ok(())
    }

    /// Settle a call with the server's acknowledgment.
    pub fn settle(&mut self, number: u8) -> Result<(), ProtocolError> {
        self.pending
            .remove(&number)
            .map(|_| ())
            .ok_or(ProtocolError::NoPendingCall { number })
    }

    /// Reject calls whose ack deadline has passed, releasing their keys so
    /// an immediate retry is possible. Returns the timed-out numbers.
    pub fn expire(&mut self, now: Instant) -> Vec<u8> {
        let timed_out: Vec<u8> = self
            .pending
            .iter()
            .filter(|(_, &sent_at)| now.duration_since(sent_at) >= ACK_TIMEOUT)
            .map(|(&n, _)| n)
            .collect();
        for n in &timed_out {
            self.pending.remove(n);
        }
        timed_out
    }

    pub fn is_pending(&self, number: u8) -> bool {
        self.pending.contains_key(&number)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Drop all pending calls without settling them.
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn test_event_name_round_trip() {
        for kind in [
            EventKind::Connected,
            EventKind::Disconnected,
            EventKind::GameJoined,
            EventKind::GameStateSync,
            EventKind::PlayerJoined,
            EventKind::NumberCalled,
            EventKind::Winner,
            EventKind::WinClaimed,
            EventKind::GameCompleted,
            EventKind::GameDeleted,
            EventKind::GameStarting,
            EventKind::LobbyJoined,
            EventKind::LobbyPlayerJoined,
            EventKind::LobbyPlayerLeft,
            EventKind::Error,
        ] {
            assert_eq!(EventKind::from_name(kind.as_str()), Some(kind));
        }
        assert_eq!(EventKind::from_name("game:unknown"), None);
    }

    #[test]
    fn test_parse_number_called() {
        let event =
            ServerEvent::parse("game:numberCalled", &serde_json::json!({"number": 42})).unwrap();
        assert_eq!(event, ServerEvent::NumberCalled { number: 42 });

        let err = ServerEvent::parse("game:numberCalled", &serde_json::json!({})).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::MissingField {
                event: "game:numberCalled",
                field: "number"
            }
        );
    }

    #[test]
    fn test_parse_game_joined() {
        let payload = serde_json::json!({
            "gameId": "game-1",
            "playerId": "p1",
            "ticket": [
                [5, 0, 22, 0, 41, 0, 63, 0, 80],
                [0, 12, 0, 34, 48, 0, 67, 0, 86],
                [2, 0, 27, 38, 0, 55, 0, 74, 0]
            ]
        });
        let event = ServerEvent::parse("game:joined", &payload).unwrap();
        match event {
            ServerEvent::GameJoined {
                game_id,
                player_id,
                ticket,
            } => {
                assert_eq!(game_id, "game-1");
                assert_eq!(player_id, "p1");
                assert!(ticket.contains(5));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_parse_state_sync_optional_marks() {
        let payload = serde_json::json!({
            "calledNumbers": [5, 12],
            "currentNumber": 12,
            "players": [{"playerId": "p1", "userName": "Ada"}],
            "winners": []
        });
        let event = ServerEvent::parse("game:stateSync", &payload).unwrap();
        match event {
            ServerEvent::GameStateSync {
                called_numbers,
                current_number,
                players,
                winners,
                marked_numbers,
            } => {
                assert_eq!(called_numbers, vec![5, 12]);
                assert_eq!(current_number, Some(12));
                assert_eq!(players.len(), 1);
                assert!(winners.is_empty());
                assert_eq!(marked_numbers, None);
            }
            other => panic!("unexpected event: {:?}", other),
        }

        let payload = serde_json::json!({
            "calledNumbers": [],
            "players": [],
            "winners": [{"playerId": "p2", "category": "TOP_LINE"}],
            "markedNumbers": [5]
        });
        let event = ServerEvent::parse("game:stateSync", &payload).unwrap();
        match event {
            ServerEvent::GameStateSync {
                current_number,
                winners,
                marked_numbers,
                ..
            } => {
                assert_eq!(current_number, None);
                assert_eq!(winners[0].category, WinCategory::TopLine);
                assert_eq!(marked_numbers, Some(vec![5]));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_parse_rejects_bad_category() {
        let payload = serde_json::json!({"playerId": "p1", "category": "SIDEWAYS"});
        let err = ServerEvent::parse("game:winner", &payload).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::InvalidField {
                event: "game:winner",
                field: "category"
            }
        );
    }

    #[test]
    fn test_parse_unknown_event() {
        let err = ServerEvent::parse("game:teleport", &serde_json::json!({})).unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownEvent { .. }));
    }

    #[test]
    fn test_command_wire_shape() {
        let cmd = ClientCommand::GameCallNumber {
            game_id: "game-1".to_string(),
            number: 42,
        };
        assert_eq!(cmd.event_name(), "game:callNumber");
        assert!(cmd.wants_ack());
        assert_eq!(
            cmd.payload(),
            serde_json::json!({"gameId": "game-1", "number": 42})
        );

        let cmd = ClientCommand::GameClaimWin {
            game_id: "game-1".to_string(),
            category: WinCategory::FullHouse,
        };
        assert!(!cmd.wants_ack());
        assert_eq!(
            cmd.payload(),
            serde_json::json!({"gameId": "game-1", "category": "FULL_HOUSE"})
        );
    }

    #[test]
    fn test_router_last_registration_wins() {
        let mut router = EventRouter::new();
        let hits: Rc<RefCell<Vec<&'static str>>> = Rc::new(RefCell::new(Vec::new()));

        let first = hits.clone();
        router.on(
            EventKind::NumberCalled,
            Box::new(move |_| first.borrow_mut().push("first")),
        );
        let second = hits.clone();
        router.on(
            EventKind::NumberCalled,
            Box::new(move |_| second.borrow_mut().push("second")),
        );

        assert!(router.dispatch(&ServerEvent::NumberCalled { number: 7 }));
        assert_eq!(*hits.borrow(), vec!["second"]);
    }

    #[test]
    fn test_router_dispatch_without_handler() {
        let mut router = EventRouter::new();
        assert!(!router.dispatch(&ServerEvent::Connected));

        router.on(EventKind::Connected, Box::new(|_| {}));
        router.clear();
        assert!(!router.dispatch(&ServerEvent::Connected));
        assert!(router.is_empty());
    }

    #[test]
    fn test_pending_calls_duplicate_rejected() {
        let mut pending = PendingCalls::new();
        let now = Instant::now();

        pending.begin(42, now).unwrap();
        assert_eq!(
            pending.begin(42, now),
            Err(ProtocolError::CallAlreadyPending { number: 42 })
        );

        // A different number may go out concurrently
        pending.begin(43, now).unwrap();
        assert_eq!(pending.len(), 2);
    }

    #[test]
    fn test_pending_calls_settle_exactly_once() {
        let mut pending = PendingCalls::new();
        let now = Instant::now();

        pending.begin(42, now).unwrap();
        pending.settle(42).unwrap();
        assert_eq!(
            pending.settle(42),
            Err(ProtocolError::NoPendingCall { number: 42 })
        );
    }

    #[test]
    fn test_pending_calls_timeout_releases_key() {
        let mut pending = PendingCalls::new();
        let now = Instant::now();

        pending.begin(42, now).unwrap();
        assert!(pending.expire(now + ACK_TIMEOUT - Duration::from_millis(1)).is_empty());

        let timed_out = pending.expire(now + ACK_TIMEOUT);
        assert_eq!(timed_out, vec![42]);

        // Retry is possible immediately
        pending.begin(42, now + ACK_TIMEOUT).unwrap();
        // And the ack no longer settles the old call twice
        assert_eq!(pending.len(), 1);
    }

    #[test]
    fn test_session_invalidating_codes() {
        assert!(is_session_invalidating(ERR_GAME_NOT_FOUND));
        assert!(is_session_invalidating(ERR_GAME_ALREADY_STARTED));
        assert!(!is_session_invalidating(ERR_FORBIDDEN));
        assert!(!is_session_invalidating(ERR_GAME_NOT_ACTIVE));
        assert!(!is_session_invalidating("SOMETHING_ELSE"));
    }

    #[test]
    fn test_call_ack_parse() {
        let ack = CallAck::parse(&serde_json::json!({"success": true})).unwrap();
        assert_eq!(
            ack,
            CallAck {
                success: true,
                message: None
            }
        );
        assert!(CallAck::parse(&serde_json::json!({})).is_err());
    }
}
