//! # vitalink-protocol
//!
//! Wire protocol definitions for the Vitalink realtime consultation hub.
//!
//! This crate defines the JSON frame protocol spoken between clients and the
//! hub, including frame types, the text codec, and versioning.
//!
//! ## Frame Types
//!
//! - `auth` - In-band credential presentation
//! - `message` - Chat payload routed to the other parties of a room
//! - `typing` - Transient typing indicator, never persisted
//! - `heartbeat` / `heartbeat_response` - Client keepalive and server answer
//! - `system` - Join and status notifications
//! - `connected` / `error` - Handshake acknowledgment and error surface
//!
//! ## Example
//!
//! ```rust
//! use vitalink_protocol::{codec, Frame};
//!
//! let frame = Frame::text_message("How are you feeling today?");
//!
//! let encoded = codec::encode(&frame).unwrap();
//! let decoded = codec::decode(&encoded).unwrap();
//! ```

pub mod codec;
pub mod frames;
pub mod version;

pub use codec::{decode, encode, ProtocolError};
pub use frames::{codes, Frame, FrameKind, MessageKind};
pub use version::{Version, PROTOCOL_VERSION};
