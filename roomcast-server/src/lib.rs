//! Session coordinator for multi-party WebRTC rooms.
//!
//! Tracks rooms, peers and their transports, producers and consumers, and
//! drives the signaling protocol that creates and tears them down against an
//! external [`MediaEngine`].

pub mod config;
pub mod engine;
pub mod error;
pub mod session;
pub mod signaling;

pub use config::*;
pub use engine::*;
pub use error::*;
pub use session::*;
pub use signaling::*;
