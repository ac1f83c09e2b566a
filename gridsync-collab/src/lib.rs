//! # gridsync-collab — Collaborative spreadsheet synchronization
//!
//! Lets multiple editing sessions of the same shared spreadsheet exchange
//! ordered revision messages through a central relay, with delivery to
//! local listeners and optimistic acceptance/rejection by the relay.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────┐   dispatch_message    ┌─────────────┐
//! │ CollaborativeChannel │ ────────────────────► │ LocalRelay  │
//! │ (per session)        │ ◄──────────────────── │ (authority) │
//! └──────┬───────────────┘    accepted? bool     └──────┬──────┘
//!        │                                              │ accepted
//!        │ listeners (document model)                   ▼
//!        ▼                                       ┌─────────────┐
//! ┌──────────────────────┐      notifications    │ MessageBus  │
//! │ apply revision       │ ◄──────────────────── │ (fan-out)   │
//! └──────────────────────┘                       └─────────────┘
//! ```
//!
//! A revision can reach a session on two paths: the relay acknowledging
//! that session's own dispatch, and the bus broadcasting the committed
//! revision to everyone. The channel keeps per-revision bookkeeping so
//! each listener observes each revision at most once, whichever path
//! fires first.
//!
//! ## Modules
//!
//! - [`protocol`] — document identity, revision envelope, bus notification
//!   types, relay errors
//! - [`bus`] — in-process publish/subscribe substrate with per-kind
//!   subscriptions
//! - [`relay`] — relay seam ([`RelayService`]) and the in-process
//!   [`LocalRelay`]
//! - [`channel`] — the per-session [`CollaborativeChannel`]

pub mod bus;
pub mod channel;
pub mod protocol;
pub mod relay;

// Re-exports for convenience
pub use bus::{BusConfig, BusStats, BusSubscription, MessageBus};
pub use channel::{CollabEnv, CollaborativeChannel, ListenerCallback};
pub use protocol::{
    DocumentIdentity, Notification, NotificationKind, RelayError, Revision,
};
pub use relay::{LocalRelay, RelayConfig, RelayService, RelayStats};
