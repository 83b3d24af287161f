//! # Counterfact Server
//!
//! Transport-agnostic server core for the Counterfact social deduction
//! trivia game: a room of connected players progresses through timed phases
//! (expert assignment, truthful-summary writing, decoy writing,
//! presentation, voting, scoring, leaderboard) for a fixed number of
//! rounds.
//!
//! The crate owns the hard state: a session registry tracking rooms,
//! identities, and reconnection, and a deterministic phase orchestrator
//! owning each room's round data. Sockets, UI, content fetching, and
//! persistence all live behind seams.
//!
//! ## Features
//!
//! - **Transport-agnostic** — connection handles are plain channels; bring
//!   any socket layer and drain [`protocol::ServerFrame`]s onto it
//! - **Single-writer rooms** — one event loop per room applies events in
//!   receipt order; rooms never share mutable state beyond the registry
//! - **Pure projections** — [`view::project`] derives each recipient's
//!   view from an immutable snapshot, so visibility rules are unit-testable
//! - **Pluggable content** — implement [`ContentSource`] to supply
//!   candidate trivia items
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Instant;
//! use counterfact_server::{
//!     ContentError, ContentItem, ContentSource, RoomConfig, RoomRuntime, SessionRegistry,
//! };
//! # struct Demo;
//! # #[async_trait::async_trait]
//! # impl ContentSource for Demo {
//! #     async fn fetch_candidates(&self, _count: usize) -> Result<Vec<ContentItem>, ContentError> {
//! #         Ok(Vec::new())
//! #     }
//! # }
//!
//! # async fn demo() {
//! let registry = SessionRegistry::new().into_shared();
//! let (code, host_token) = registry
//!     .write()
//!     .unwrap()
//!     .create_room(Instant::now());
//! let runtime = RoomRuntime::spawn(
//!     code,
//!     RoomConfig::default(),
//!     Arc::clone(&registry),
//!     Arc::new(Demo),
//! );
//! // Hand `host_token` to the caller; feed gateway events via
//! // `runtime.submit(..)`.
//! # }
//! ```

pub mod config;
pub mod content;
pub mod error;
pub mod error_codes;
pub mod game;
pub mod ids;
pub mod protocol;
pub mod registry;
pub mod round;
pub mod runtime;
pub mod view;

// Re-export primary types for ergonomic imports.
pub use config::{RoomConfig, ScoreRules};
pub use content::{ContentError, ContentSource};
pub use error::GameError;
pub use error_codes::RejectCode;
pub use game::{GameEvent, GameSession, Phase, Sender};
pub use protocol::{ClientFrame, ContentItem, PlayerId, ServerFrame};
pub use registry::{Endpoint, SessionRegistry, SharedRegistry};
pub use runtime::RoomRuntime;
pub use view::{project, Recipient, View};
