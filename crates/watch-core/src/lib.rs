//! # watch-core
//!
//! Session management and playback reconciliation for watch-together
//! clients.
//!
//! This crate provides the client-side building blocks:
//!
//! - **Session** - Owns the relay link, correlates room requests with the
//!   relay's replies and routes remote states to the focused consumer
//! - **Engine** - Decides for every local or remote event whether to
//!   broadcast, apply, suppress or override it
//! - **Probe** - The seam to the local player, with a headless simulation
//! - **Client** - The event loop tying session, engine and room store together
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │   Player    │────▶│   Engine    │────▶│   Session   │────▶│    Relay    │
//! │   Probe     │◀────│             │◀────│             │◀────│    Link     │
//! └─────────────┘     └─────────────┘     └─────────────┘     └─────────────┘
//!                            ▲
//!                            │
//!                     ┌─────────────┐
//!                     │  Room Store │
//!                     └─────────────┘
//! ```

pub mod client;
pub mod config;
pub mod engine;
pub mod notice;
pub mod probe;
pub mod session;
pub mod store;
pub mod timers;

pub use client::{Client, ClientCommand, ClientHandle};
pub use config::{ClientConfig, ConfigError};
pub use engine::{Engine, EngineAction, EngineConfig};
pub use notice::Notice;
pub use probe::{
    PlaybackAction, PlaybackError, PlaybackEvent, PlayerCommand, PlayerProbe, SimulatedPlayer,
    SimulatedVideo, VideoElement,
};
pub use session::{
    ConsumerId, RemoteUpdate, RoomRequest, RoomRequestKind, RoomResult, Session, SessionError,
    SessionEvent,
};
pub use store::RoomStore;
