//! # watch-relay
//!
//! Room relay for watch-together clients.
//!
//! Every connection opens with a room request. `CREATE_ROOM` starts a new
//! room, `JOIN_ROOM` enters an existing one. From then on each
//! `VIDEO_STATE_CHANGE` a member sends is relayed to the other members of
//! its room.
//!
//! - **Rooms** - Room registry with bounded per-member queues
//! - **Handlers** - WebSocket lifecycle, heartbeat and health endpoint
//! - **Config** - TOML and environment configuration
//! - **Metrics** - Prometheus instrumentation

pub mod config;
pub mod handlers;
pub mod metrics;
pub mod rooms;

pub use config::Config;
pub use handlers::{run_server, serve, AppState};
pub use rooms::{MemberId, Membership, RoomError, Rooms};
