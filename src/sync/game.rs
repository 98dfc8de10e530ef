//! Game state engine.
//!
//! Local mirror of server-authoritative game state: ticket, called numbers,
//! marked numbers, roster, winners. Every inbound event mutates this mirror
//! through one idempotence gate per field, so duplicate delivery (the
//! transport is at-least-once) can never double-append or double-insert.
//!
//! The server remains the authority; `sync_state` is the wholesale-replace
//! checkpoint that reconciles this mirror after any gap in delivery.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::session::SessionSnapshot;

/// Ticket dimensions.
pub const TICKET_ROWS: usize = 3;
pub const TICKET_COLS: usize = 9;

/// Non-blank cells per ticket and per row.
pub const TICKET_NUMBERS: usize = 15;
pub const NUMBERS_PER_ROW: usize = 5;

/// Valid callable range.
pub const MIN_NUMBER: u8 = 1;
pub const MAX_NUMBER: u8 = 90;

/// Marked-number count that makes an early-five claim available.
pub const EARLY_FIVE_COUNT: usize = 5;

/// A player's fixed 3x9 number grid for one game. Zero denotes a blank cell.
///
/// Assigned once by the server on join and never regenerated locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    rows: [[u8; TICKET_COLS]; TICKET_ROWS],
}

impl Ticket {
    /// Build a ticket from its rows, validating the Tambola shape:
    /// exactly 15 non-zero cells, 5 per row, all within [1,90].
    pub fn from_rows(rows: [[u8; TICKET_COLS]; TICKET_ROWS]) -> Result<Self, GameError> {
        for row in &rows {
            let filled = row.iter().filter(|&&n| n != 0).count();
            if filled != NUMBERS_PER_ROW {
                return Err(GameError::InvalidTicket);
            }
            if row.iter().any(|&n| n != 0 && !(MIN_NUMBER..=MAX_NUMBER).contains(&n)) {
                return Err(GameError::InvalidTicket);
            }
        }
        Ok(Self { rows })
    }

    /// Build a ticket from the wire representation (a 3x9 nested array).
    pub fn from_wire(rows: &[Vec<u8>]) -> Result<Self, GameError> {
        if rows.len() != TICKET_ROWS || rows.iter().any(|r| r.len() != TICKET_COLS) {
            return Err(GameError::InvalidTicket);
        }
        let mut grid = [[0u8; TICKET_COLS]; TICKET_ROWS];
        for (r, row) in rows.iter().enumerate() {
            for (c, &n) in row.iter().enumerate() {
                grid[r][c] = n;
            }
        }
        Self::from_rows(grid)
    }

    /// Check if a number appears on the ticket.
    pub fn contains(&self, number: u8) -> bool {
        self.rows.iter().any(|row| row.contains(&number))
    }

    /// Get a row by line index (0 = top, 1 = middle, 2 = bottom).
    pub fn row(&self, line: usize) -> Option<&[u8; TICKET_COLS]> {
        self.rows.get(line)
    }

    /// Non-zero numbers of one row.
    pub fn row_numbers(&self, line: usize) -> impl Iterator<Item = u8> + '_ {
        self.rows
            .get(line)
            .into_iter()
            .flatten()
            .copied()
            .filter(|&n| n != 0)
    }

    /// All 15 non-zero numbers.
    pub fn numbers(&self) -> impl Iterator<Item = u8> + '_ {
        self.rows.iter().flatten().copied().filter(|&n| n != 0)
    }

    /// Convert to the wire representation.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!(self.rows)
    }
}

/// Recognized prize patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WinCategory {
    #[serde(rename = "EARLY_5")]
    EarlyFive,
    #[serde(rename = "TOP_LINE")]
    TopLine,
    #[serde(rename = "MIDDLE_LINE")]
    MiddleLine,
    #[serde(rename = "BOTTOM_LINE")]
    BottomLine,
    #[serde(rename = "FULL_HOUSE")]
    FullHouse,
}

impl WinCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EarlyFive => "EARLY_5",
            Self::TopLine => "TOP_LINE",
            Self::MiddleLine => "MIDDLE_LINE",
            Self::BottomLine => "BOTTOM_LINE",
            Self::FullHouse => "FULL_HOUSE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "EARLY_5" => Some(Self::EarlyFive),
            "TOP_LINE" => Some(Self::TopLine),
            "MIDDLE_LINE" => Some(Self::MiddleLine),
            "BOTTOM_LINE" => Some(Self::BottomLine),
            "FULL_HOUSE" => Some(Self::FullHouse),
            _ => None,
        }
    }
}

impl std::fmt::Display for WinCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered win. Identity is the `(player_id, category)` pair; the
/// display name is informational only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Winner {
    pub player_id: String,
    pub category: WinCategory,
    pub username: Option<String>,
}

/// A roster entry for the current game.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub player_id: String,
    pub username: String,
}

/// Per-game session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionPhase {
    /// No game joined
    #[default]
    NoSession,

    /// Join command sent, waiting for the server's joined response
    Joining,

    /// In a game, receiving incremental and sync events
    Active,

    /// Game finished normally. Terminal.
    Completed,

    /// Session invalidated (game deleted server-side, fatal error). Terminal.
    Deleted,
}

impl SessionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoSession => "no_session",
            Self::Joining => "joining",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Deleted => "deleted",
        }
    }

    /// Check if the session accepts game events.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }

    /// Check if the session is terminal (no further mutation expected).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Deleted)
    }
}

/// Game state errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GameError {
    /// Number has not been called by the server yet
    NumberNotCalled,
    /// Number does not appear on the player's ticket
    NumberNotOnTicket,
    /// Number outside [1,90]
    NumberOutOfRange,
    /// No ticket assigned yet
    NoTicket,
    /// No active game session
    GameNotActive,
    /// Ticket failed shape validation
    InvalidTicket,
}

impl std::fmt::Display for GameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NumberNotCalled => write!(f, "Number has not been called yet"),
            Self::NumberNotOnTicket => write!(f, "Number is not on your ticket"),
            Self::NumberOutOfRange => write!(f, "Number is outside the valid range"),
            Self::NoTicket => write!(f, "No ticket assigned"),
            Self::GameNotActive => write!(f, "No active game session"),
            Self::InvalidTicket => write!(f, "Ticket failed validation"),
        }
    }
}

impl std::error::Error for GameError {}

/// The local mirror of one game session.
#[derive(Debug, Default)]
pub struct GameSession {
    phase: SessionPhase,
    game_id: Option<String>,
    player_id: Option<String>,
    ticket: Option<Ticket>,

    /// Called numbers in first-seen order
    called: Vec<u8>,
    /// Membership index over `called`
    called_set: HashSet<u8>,

    /// Latest called number
    current: Option<u8>,

    /// Player's own marks, strictly a subset of ticket and called numbers
    marked: HashSet<u8>,

    roster: Vec<RosterEntry>,
    winners: Vec<Winner>,
}

impl GameSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that a join command went out for `game_id`.
    pub fn begin_join(&mut self, game_id: impl Into<String>) {
        let game_id = game_id.into();
        if self.game_id.as_deref() != Some(game_id.as_str()) {
            // Switching games: no previous-game value may survive
            self.clear();
        }
        self.game_id = Some(game_id);
        if !self.phase.is_active() {
            self.phase = SessionPhase::Joining;
        }
    }

    /// Establish the session from the server's joined response.
    ///
    /// First-join only: a redelivered response for the same game is a no-op
    /// and never replaces the ticket. A response for a different game clears
    /// everything first.
    pub fn establish(
        &mut self,
        game_id: impl Into<String>,
        player_id: impl Into<String>,
        ticket: Ticket,
    ) {
        let game_id = game_id.into();
        if self.game_id.as_deref() != Some(game_id.as_str()) {
            self.clear();
        }
        if self.ticket.is_none() {
            self.ticket = Some(ticket);
        }
        self.game_id = Some(game_id);
        self.player_id = Some(player_id.into());
        self.phase = SessionPhase::Active;
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn game_id(&self) -> Option<&str> {
        self.game_id.as_deref()
    }

    pub fn player_id(&self) -> Option<&str> {
        self.player_id.as_deref()
    }

    pub fn ticket(&self) -> Option<&Ticket> {
        self.ticket.as_ref()
    }

    /// Append a called number.
    ///
    /// Duplicate delivery is a no-op (`Ok(false)`); first-seen order is
    /// preserved. The current number updates on a genuine append.
    pub fn add_called_number(&mut self, number: u8) -> Result<bool, GameError> {
        if !(MIN_NUMBER..=MAX_NUMBER).contains(&number) {
            return Err(GameError::NumberOutOfRange);
        }
        if !self.called_set.insert(number) {
            debug!(number, "duplicate called number suppressed");
            return Ok(false);
        }
        self.called.push(number);
        self.current = Some(number);
        Ok(true)
    }

    /// Mark a number on the player's own ticket.
    ///
    /// The number must already have been called and must appear on the
    /// ticket. Marking an already-marked number is a no-op success
    /// (`Ok(false)`). Called numbers are never auto-marked.
    pub fn mark_number(&mut self, number: u8) -> Result<bool, GameError> {
        let ticket = self.ticket.as_ref().ok_or(GameError::NoTicket)?;
        if !self.called_set.contains(&number) {
            return Err(GameError::NumberNotCalled);
        }
        if !ticket.contains(number) {
            return Err(GameError::NumberNotOnTicket);
        }
        Ok(self.marked.insert(number))
    }

    /// Append a roster entry unless the player id is already present.
    pub fn add_player(&mut self, player_id: impl Into<String>, username: impl Into<String>) -> bool {
        let player_id = player_id.into();
        if self.roster.iter().any(|p| p.player_id == player_id) {
            return false;
        }
        self.roster.push(RosterEntry {
            player_id,
            username: username.into(),
        });
        true
    }

    /// Insert a winner unless the same `(player_id, category)` pair is
    /// already registered. Redundant notifications are suppressed by
    /// identity comparison, never by count.
    pub fn add_winner(&mut self, winner: Winner) -> bool {
        let duplicate = self
            .winners
            .iter()
            .any(|w| w.player_id == winner.player_id && w.category == winner.category);
        if duplicate {
            debug!(player_id = %winner.player_id, category = %winner.category,
                "duplicate winner suppressed");
            return false;
        }
        self.winners.push(winner);
        true
    }

    /// Register the player's own confirmed win claim.
    pub fn record_claim(&mut self, category: WinCategory) -> Result<bool, GameError> {
        let player_id = self.player_id.clone().ok_or(GameError::GameNotActive)?;
        Ok(self.add_winner(Winner {
            player_id,
            category,
            username: None,
        }))
    }

    /// Wholesale reconciliation from a server state-sync checkpoint.
    ///
    /// Replaces called numbers, roster, and winners. Never resets the
    /// ticket. Marked numbers are merged in only when the payload carries
    /// them; local marks always stand, so a mark made while offline
    /// survives the checkpoint.
    pub fn sync_state(
        &mut self,
        called: &[u8],
        current: Option<u8>,
        players: Vec<RosterEntry>,
        winners: Vec<Winner>,
        marked: Option<Vec<u8>>,
    ) {
        self.called.clear();
        self.called_set.clear();
        for &n in called {
            if (MIN_NUMBER..=MAX_NUMBER).contains(&n) && self.called_set.insert(n) {
                self.called.push(n);
            }
        }
        self.current = current.or_else(|| self.called.last().copied());

        self.roster.clear();
        for p in players {
            self.add_player(p.player_id, p.username);
        }

        self.winners.clear();
        for w in winners {
            self.add_winner(w);
        }

        if let Some(marked) = marked {
            for n in marked {
                // Server marks still pass the local subset gates
                let _ = self.mark_number(n);
            }
        }
    }

    /// Check if every non-zero cell of a ticket row is marked.
    /// Line 0/1/2 = top/middle/bottom.
    pub fn check_line_complete(&self, line: usize) -> bool {
        match &self.ticket {
            Some(ticket) if line < TICKET_ROWS => ticket
                .row_numbers(line)
                .all(|n| self.marked.contains(&n)),
            _ => false,
        }
    }

    /// Check if all 15 ticket numbers are marked.
    pub fn check_full_house(&self) -> bool {
        match &self.ticket {
            Some(ticket) => ticket.numbers().all(|n| self.marked.contains(&n)),
            None => false,
        }
    }

    /// Check if enough numbers are marked for an early-five claim.
    ///
    /// A literal count threshold: the server re-validates any claim, this
    /// only gates the claim affordance locally.
    pub fn early_five_reached(&self) -> bool {
        self.marked.len() >= EARLY_FIVE_COUNT
    }

    pub fn is_number_called(&self, number: u8) -> bool {
        self.called_set.contains(&number)
    }

    pub fn is_number_marked(&self, number: u8) -> bool {
        self.marked.contains(&number)
    }

    pub fn marked_count(&self) -> usize {
        self.marked.len()
    }

    pub fn current_number(&self) -> Option<u8> {
        self.current
    }

    /// Called numbers in first-seen order.
    pub fn called_numbers(&self) -> &[u8] {
        &self.called
    }

    pub fn roster(&self) -> &[RosterEntry] {
        &self.roster
    }

    pub fn winners(&self) -> &[Winner] {
        &self.winners
    }

    /// Check if a `(player_id, category)` win is registered.
    pub fn has_winner(&self, player_id: &str, category: WinCategory) -> bool {
        self.winners
            .iter()
            .any(|w| w.player_id == player_id && w.category == category)
    }

    /// Mark the game finished. Terminal.
    pub fn complete(&mut self) {
        self.phase = SessionPhase::Completed;
    }

    /// Mark the session invalid (deleted server-side). Terminal.
    pub fn invalidate(&mut self) {
        self.phase = SessionPhase::Deleted;
    }

    /// Reset every per-game field.
    ///
    /// The durable mirror is purged by the coordinator alongside this call,
    /// so a later rejoin of a different game can never inherit stale state.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Durable snapshot of the persisted field subset, when a session is
    /// established.
    pub fn snapshot(&self) -> Option<SessionSnapshot> {
        let game_id = self.game_id.as_deref()?;
        let player_id = self.player_id.as_deref()?;
        let ticket = self.ticket.clone()?;

        let mut marked: Vec<u8> = self.marked.iter().copied().collect();
        marked.sort_unstable();

        Some(SessionSnapshot {
            session_id: SessionSnapshot::session_id_for(game_id, player_id),
            ticket,
            marked_numbers: marked,
            called_numbers: self.called.clone(),
            current_number: self.current,
            winners: self.winners.clone(),
            saved_at: chrono::Utc::now(),
        })
    }

    /// Rehydrate from a durable snapshot.
    ///
    /// Advisory only: the first state-sync after rehydration overrides
    /// called numbers, current number, and winners; only marks are trusted
    /// client-side across a reload.
    pub fn restore(&mut self, snapshot: &SessionSnapshot) -> Result<(), GameError> {
        let (game_id, player_id) = snapshot
            .split_session_id()
            .ok_or(GameError::GameNotActive)?;

        self.clear();
        self.game_id = Some(game_id.to_string());
        self.player_id = Some(player_id.to_string());
        self.ticket = Some(snapshot.ticket.clone());
        self.phase = SessionPhase::Active;

        for &n in &snapshot.called_numbers {
            let _ = self.add_called_number(n);
        }
        self.current = snapshot.current_number.or(self.current);
        for &n in &snapshot.marked_numbers {
            let _ = self.mark_number(n);
        }
        for w in &snapshot.winners {
            self.add_winner(w.clone());
        }
        Ok(())
    }
}
