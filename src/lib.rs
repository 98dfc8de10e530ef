//! Tambola Sync Library
//!
//! This crate provides the real-time synchronization core for a Tambola
//! (number-calling) game client.
//!
//! # Overview
//!
//! The sync module provides:
//!
//! - **Connection Management** - One logical connection per authenticated
//!   identity, with automatic reconnection under bounded exponential backoff.
//!
//! - **Event Protocol** - A closed catalog of typed inbound/outbound
//!   messages, a replaceable handler registry, and an acknowledged-command
//!   guard with timeout for number calls.
//!
//! - **Game State Engine** - The local mirror of server-authoritative state
//!   (ticket, called numbers, marks, roster, winners) with idempotent event
//!   application and win-pattern queries.
//!
//! - **Session Persistence** - A durable snapshot of the in-progress game so
//!   a reload resumes without a full resync, always reconciled against the
//!   next authoritative state-sync.
//!
//! # Design Principles
//!
//! 1. **No I/O** - This crate is pure state. The host feeds transport and
//!    protocol events in and executes the [`Effect`]s handed back.
//!
//! 2. **Idempotent application** - Delivery is at-least-once; every mutation
//!    passes one dedupe gate, so redelivery can never double-apply.
//!
//! 3. **Server authority** - The state-sync checkpoint replaces local
//!    mirrors wholesale; only the player's own marks are trusted locally.
//!
//! 4. **Single-threaded** - One mutable session per event loop; correctness
//!    rests on idempotence, not locking.
//!
//! # Example
//!
//! ```rust
//! use tambola_sync::{ClientCommand, Effect, MemorySessionStore, SyncSession};
//!
//! let mut sync = SyncSession::new(Box::new(MemorySessionStore::new()));
//!
//! // Connect with the player's identity; the host opens the transport
//! let effects = sync.connect("player-1");
//! assert!(matches!(effects[0], Effect::OpenTransport { .. }));
//! sync.handle_transport_opened();
//!
//! // Join a game
//! let effects = sync.command(
//!     ClientCommand::GameJoin {
//!         game_id: "game-1".to_string(),
//!         username: Some("Ada".to_string()),
//!     },
//!     std::time::Instant::now(),
//! ).unwrap();
//! assert!(matches!(effects[0], Effect::Send { name: "game:join", .. }));
//!
//! // Apply what the server sends back
//! sync.handle_event("game:numberCalled", &serde_json::json!({"number": 41})).ok();
//! ```

pub mod sync;

// Re-export everything from the sync module at crate root
pub use sync::*;
