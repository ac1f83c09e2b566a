//! Protocol types for collaborative spreadsheet synchronization.
//!
//! A mutation travels as a [`Revision`]: an opaque JSON payload inside an
//! envelope whose id the relay and the bus preserve verbatim. Bus traffic
//! is typed as [`Notification`] and pre-filtered by [`NotificationKind`]
//! at the substrate; document-identity filtering is each subscriber's job.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Composite key identifying one shared document.
///
/// A document lives in a logical collection (e.g. `"spreadsheet.document"`)
/// and has a numeric id within it. Immutable after construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentIdentity {
    pub collection: String,
    pub document_id: u64,
}

impl DocumentIdentity {
    pub fn new(collection: impl Into<String>, document_id: u64) -> Self {
        Self {
            collection: collection.into(),
            document_id,
        }
    }
}

impl std::fmt::Display for DocumentIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.collection, self.document_id)
    }
}

/// An opaque unit of mutation for a shared document.
///
/// The channel routes revisions without interpreting `payload`; its schema
/// belongs to the document layer. `revision_id` is assigned once at send
/// time and travels unchanged through the relay and the bus, which is what
/// makes duplicate-path suppression possible on the receiving side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Revision {
    pub revision_id: Uuid,
    pub payload: Value,
}

impl Revision {
    /// Wrap a payload in a fresh envelope.
    pub fn new(payload: Value) -> Self {
        Self {
            revision_id: Uuid::new_v4(),
            payload,
        }
    }

    /// Rebuild an envelope around a known id.
    pub fn with_id(revision_id: Uuid, payload: Value) -> Self {
        Self {
            revision_id,
            payload,
        }
    }
}

/// Kinds of traffic carried by the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationKind {
    /// Revision traffic for shared spreadsheets.
    SpreadsheetMessage,
    /// Cursor/selection presence traffic.
    Presence,
}

/// A typed bus notification.
///
/// Every variant carries the identity of the document it concerns so that
/// subscribers can discard traffic for documents they do not serve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Notification {
    SpreadsheetMessage {
        document: DocumentIdentity,
        revision: Revision,
    },
    Presence {
        document: DocumentIdentity,
        payload: Value,
    },
}

impl Notification {
    pub fn kind(&self) -> NotificationKind {
        match self {
            Self::SpreadsheetMessage { .. } => NotificationKind::SpreadsheetMessage,
            Self::Presence { .. } => NotificationKind::Presence,
        }
    }

    pub fn document(&self) -> &DocumentIdentity {
        match self {
            Self::SpreadsheetMessage { document, .. } => document,
            Self::Presence { document, .. } => document,
        }
    }
}

/// Errors from the relay dispatch call.
///
/// Rejection is not an error: `dispatch_message` resolves `Ok(false)` and
/// the broadcast substrate remains the source of truth for what was
/// actually committed.
#[derive(Debug, Clone)]
pub enum RelayError {
    /// Structural RPC failure (network/transport).
    Transport(String),
    /// The relay has shut down.
    Closed,
}

impl std::fmt::Display for RelayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "Relay transport error: {e}"),
            Self::Closed => write!(f, "Relay closed"),
        }
    }
}

impl std::error::Error for RelayError {}
