//! # vitalink-core
//!
//! Identity, presence, routing, and the hub event loop for the Vitalink
//! realtime consultation hub.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **Identity** - Authenticated caller identity and the token-verifier seam
//! - **RoutingKey** - Pairwise and topic registry keys
//! - **Connection** - Outbound mailbox with drop-the-slow-reader semantics
//! - **Presence** - Online/offline tracking with a background sweep
//! - **MessageStore** - Persistence seam invoked before fan-out
//! - **Hub** - The serialized event loop owning the connection registry
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Pump pair  │────▶│     Hub     │────▶│  Mailboxes  │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!        │                   │
//!        ▼                   ▼
//! ┌─────────────┐     ┌─────────────┐
//! │  Presence   │     │ MessageStore│
//! └─────────────┘     └─────────────┘
//! ```
//!
//! Every registry mutation and fan-out decision happens on the single hub
//! task; the presence tracker is the only state shared across tasks.

pub mod connection;
pub mod envelope;
pub mod hub;
pub mod identity;
pub mod presence;
pub mod routing;
pub mod store;

pub use connection::{Connection, ConnectionHandle, ConnectionId, MailboxReceiver};
pub use envelope::{unix_millis, MessageEnvelope};
pub use hub::{Hub, HubConfig, HubEvent, HubHandle, HubStats};
pub use identity::{AuthError, Identity, IdentityId, Role, TokenVerifier};
pub use presence::{PresenceConfig, PresenceConfigError, PresenceTracker};
pub use routing::{validate_party, RouteShape, RoutingKey};
pub use store::{HistoryPage, MemoryStore, MessageId, MessageStore, StoreError, StoredMessage};
