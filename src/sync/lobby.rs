//! Pre-game waiting room.
//!
//! The lobby variant of the reconciliation pattern: roster only, no ticket
//! and no called numbers yet. `lobby:joined` replaces the roster wholesale;
//! incremental join/leave events go through the same dedupe-by-id gate as
//! the in-game roster.

use super::game::RosterEntry;

/// Waiting-room state for one game, before it starts.
#[derive(Debug, Default)]
pub struct WaitingRoom {
    game_id: Option<String>,
    players: Vec<RosterEntry>,
    starting: bool,
}

impl WaitingRoom {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wholesale roster replacement from the server's joined response.
    pub fn joined(&mut self, game_id: impl Into<String>, players: Vec<RosterEntry>) {
        self.game_id = Some(game_id.into());
        self.players.clear();
        self.starting = false;
        for p in players {
            self.player_joined(p);
        }
    }

    /// Append a player unless already present by id.
    pub fn player_joined(&mut self, entry: RosterEntry) -> bool {
        if self.players.iter().any(|p| p.player_id == entry.player_id) {
            return false;
        }
        self.players.push(entry);
        true
    }

    /// Remove a player by id.
    pub fn player_left(&mut self, player_id: &str) -> Option<RosterEntry> {
        let index = self.players.iter().position(|p| p.player_id == player_id)?;
        Some(self.players.remove(index))
    }

    /// The game is about to start; no further roster churn expected.
    pub fn mark_starting(&mut self) {
        self.starting = true;
    }

    pub fn is_starting(&self) -> bool {
        self.starting
    }

    pub fn game_id(&self) -> Option<&str> {
        self.game_id.as_deref()
    }

    pub fn players(&self) -> &[RosterEntry] {
        &self.players
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    /// Reset to an empty room.
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn entry(id: &str, name: &str) -> RosterEntry {
        RosterEntry {
            player_id: id.to_string(),
            username: name.to_string(),
        }
    }

    #[test]
    fn test_joined_replaces_wholesale() {
        let mut room = WaitingRoom::new();
        room.player_joined(entry("p9", "Stale"));

        room.joined("game-1", vec![entry("p1", "Ada"), entry("p2", "Bea")]);

        assert_eq!(room.game_id(), Some("game-1"));
        assert_eq!(room.player_count(), 2);
        assert!(room.players().iter().all(|p| p.player_id != "p9"));
    }

    #[test]
    fn test_player_joined_dedupes() {
        let mut room = WaitingRoom::new();
        room.joined("game-1", vec![]);

        assert!(room.player_joined(entry("p1", "Ada")));
        assert!(!room.player_joined(entry("p1", "Ada")));
        assert_eq!(room.player_count(), 1);
    }

    #[test]
    fn test_player_left() {
        let mut room = WaitingRoom::new();
        room.joined("game-1", vec![entry("p1", "Ada"), entry("p2", "Bea")]);

        let gone = room.player_left("p1").unwrap();
        assert_eq!(gone.username, "Ada");
        assert_eq!(room.player_count(), 1);
        assert_eq!(room.player_left("p1"), None);
    }

    #[test]
    fn test_starting_and_clear() {
        let mut room = WaitingRoom::new();
        room.joined("game-1", vec![entry("p1", "Ada")]);
        room.mark_starting();
        assert!(room.is_starting());

        room.clear();
        assert_eq!(room.game_id(), None);
        assert_eq!(room.player_count(), 0);
        assert!(!room.is_starting());
    }
}
