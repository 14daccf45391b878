//! SSU transport plumbing.
//!
//! - **Packet codec**: [`SessionPacket`], [`PacketHeader`] and the flag layout
//! - **Endpoint encoding**: [`write_endpoint`] and the [`BodyReader`] cursor
//! - **Timers**: [`SessionTimer`], generation-checked and `Weak`-owned
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │   Handshake / Relay / Peer test         │
//! ├─────────────────────────────────────────┤
//! │         Key schedule                    │
//! ├─────────────────────────────────────────┤
//! │   Packet codec, endpoints, timers       │  ← This module
//! ├─────────────────────────────────────────┤
//! │              UDP                        │
//! └─────────────────────────────────────────┘
//! ```

mod address;
mod packet;
mod timer;

pub use address::*;
pub use packet::*;
pub use timer::*;
