//! Session persistence.
//!
//! Mirrors the durable subset of game state to local storage so a reload can
//! resume an in-progress game without a full resync. Rehydration is advisory
//! only: the first authoritative state-sync after a reload wins for called
//! numbers, current number, and winners; only the player's own marks are
//! trusted client-side across a reload.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::game::{Ticket, Winner};

/// Fixed name of the single durable record.
pub const SESSION_FILE_NAME: &str = "tambola_session.json";

/// The serializable subset of game state.
///
/// Marked numbers serialize as an explicit list rather than a native set,
/// for storage portability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    /// `"<gameId>:<playerId>"` scope of every other field
    pub session_id: String,
    pub ticket: Ticket,
    pub marked_numbers: Vec<u8>,
    pub called_numbers: Vec<u8>,
    pub current_number: Option<u8>,
    pub winners: Vec<Winner>,
    pub saved_at: chrono::DateTime<chrono::Utc>,
}

impl SessionSnapshot {
    /// Build the session id scoping a snapshot.
    pub fn session_id_for(game_id: &str, player_id: &str) -> String {
        format!("{}:{}", game_id, player_id)
    }

    /// Split the session id back into `(game_id, player_id)`.
    pub fn split_session_id(&self) -> Option<(&str, &str)> {
        self.session_id.split_once(':')
    }

    /// Check if this snapshot belongs to the given session.
    pub fn matches(&self, game_id: &str, player_id: &str) -> bool {
        self.session_id == Self::session_id_for(game_id, player_id)
    }
}

/// Persistence errors.
#[derive(Debug)]
pub enum StoreError {
    Io(io::Error),
    Serialize(serde_json::Error),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "Session store I/O error: {}", e),
            Self::Serialize(e) => write!(f, "Session store serialization error: {}", e),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Serialize(e) => Some(e),
        }
    }
}

impl From<io::Error> for StoreError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialize(e)
    }
}

/// Durable storage for the single session record.
pub trait SessionStore {
    /// Load the record, `None` when absent or unreadable.
    fn load(&self) -> Result<Option<SessionSnapshot>, StoreError>;

    /// Write the record, replacing any previous one.
    fn save(&mut self, snapshot: &SessionSnapshot) -> Result<(), StoreError>;

    /// Remove the record. Idempotent.
    fn clear(&mut self) -> Result<(), StoreError>;
}

/// File-backed store: one JSON record under a caller-supplied directory.
///
/// A corrupt record is treated as absent, never as a fatal error; the next
/// save overwrites it.
#[derive(Debug)]
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(SESSION_FILE_NAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SessionStore for FileSessionStore {
    fn load(&self) -> Result<Option<SessionSnapshot>, StoreError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_str(&raw) {
            Ok(snapshot) => Ok(Some(snapshot)),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "discarding corrupt session record");
                Ok(None)
            }
        }
    }

    fn save(&mut self, snapshot: &SessionSnapshot) -> Result<(), StoreError> {
        let raw = serde_json::to_string(snapshot)?;
        fs::write(&self.path, raw)?;
        Ok(())
    }

    fn clear(&mut self) -> Result<(), StoreError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory store for tests and embedding.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    record: Option<SessionSnapshot>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self) -> Result<Option<SessionSnapshot>, StoreError> {
        Ok(self.record.clone())
    }

    fn save(&mut self, snapshot: &SessionSnapshot) -> Result<(), StoreError> {
        self.record = Some(snapshot.clone());
        Ok(())
    }

    fn clear(&mut self) -> Result<(), StoreError> {
        self.record = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::game::WinCategory;
    use pretty_assertions::assert_eq;

    fn make_snapshot() -> SessionSnapshot {
        SessionSnapshot {
            session_id: SessionSnapshot::session_id_for("game-1", "p1"),
            ticket: Ticket::from_rows([
                [5, 0, 22, 0, 41, 0, 63, 0, 80],
                [0, 12, 0, 34, 48, 0, 67, 0, 86],
                [2, 0, 27, 38, 0, 55, 0, 74, 0],
            ])
            .unwrap(),
            marked_numbers: vec![5, 12],
            called_numbers: vec![5, 12, 41],
            current_number: Some(41),
            winners: vec![Winner {
                player_id: "p2".to_string(),
                category: WinCategory::EarlyFive,
                username: Some("Bea".to_string()),
            }],
            saved_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_session_id_scope() {
        let snapshot = make_snapshot();
        assert_eq!(snapshot.split_session_id(), Some(("game-1", "p1")));
        assert!(snapshot.matches("game-1", "p1"));
        assert!(!snapshot.matches("game-2", "p1"));
        assert!(!snapshot.matches("game-1", "p2"));
    }

    #[test]
    fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileSessionStore::new(dir.path());

        assert_eq!(store.load().unwrap(), None);

        let snapshot = make_snapshot();
        store.save(&snapshot).unwrap();
        assert_eq!(store.load().unwrap(), Some(snapshot.clone()));

        // Save replaces
        let mut updated = snapshot;
        updated.called_numbers.push(63);
        store.save(&updated).unwrap();
        assert_eq!(store.load().unwrap().unwrap().called_numbers, vec![5, 12, 41, 63]);
    }

    #[test]
    fn test_file_store_clear_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileSessionStore::new(dir.path());

        store.save(&make_snapshot()).unwrap();
        store.clear().unwrap();
        assert_eq!(store.load().unwrap(), None);

        store.clear().unwrap();
    }

    #[test]
    fn test_file_store_corrupt_record_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path());
        std::fs::write(store.path(), "{not json").unwrap();

        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn test_marked_numbers_serialize_as_list() {
        let raw = serde_json::to_value(make_snapshot()).unwrap();
        assert!(raw["marked_numbers"].is_array());
        assert_eq!(raw["marked_numbers"], serde_json::json!([5, 12]));
        assert_eq!(raw["winners"][0]["category"], "EARLY_5");
    }

    #[test]
    fn test_memory_store() {
        let mut store = MemorySessionStore::new();
        assert_eq!(store.load().unwrap(), None);

        let snapshot = make_snapshot();
        store.save(&snapshot).unwrap();
        assert_eq!(store.load().unwrap(), Some(snapshot));

        store.clear().unwrap();
        assert_eq!(store.load().unwrap(), None);
    }
}
