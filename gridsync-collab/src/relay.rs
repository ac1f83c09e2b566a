//! Relay seam and the in-process relay.
//!
//! The relay is the central authority for a shared document: it accepts or
//! rejects each proposed revision and pushes accepted ones onto the bus
//! for every session to observe. Sessions talk to it through the
//! [`RelayService`] trait so tests and transports can swap it out.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::future::BoxFuture;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::bus::MessageBus;
use crate::protocol::{DocumentIdentity, Notification, RelayError, Revision};

/// Remote procedure seam to the relay.
///
/// `Ok(true)` means accepted-and-will-be-broadcast, `Ok(false)` means
/// rejected. A rejected revision is normal protocol state, not an error;
/// transport failures are `Err` and surface to the dispatching caller.
pub trait RelayService: Send + Sync {
    fn dispatch_message<'a>(
        &'a self,
        document: &'a DocumentIdentity,
        revision: Revision,
    ) -> BoxFuture<'a, Result<bool, RelayError>>;
}

/// Relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Accepted revision ids retained per document for duplicate
    /// rejection; oldest ids are pruned first.
    pub log_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self { log_capacity: 10_000 }
    }
}

/// Relay statistics.
#[derive(Debug, Clone, Default)]
pub struct RelayStats {
    pub revisions_accepted: u64,
    pub revisions_rejected: u64,
}

struct AtomicRelayStats {
    accepted: AtomicU64,
    rejected: AtomicU64,
}

/// Per-document acceptance log.
///
/// Tracks which revision ids the relay has already committed so a
/// duplicate dispatch is rejected instead of re-broadcast.
struct DocumentLog {
    accepted: HashSet<Uuid>,
    order: VecDeque<Uuid>,
    head: Option<Uuid>,
}

impl DocumentLog {
    fn new() -> Self {
        Self {
            accepted: HashSet::new(),
            order: VecDeque::new(),
            head: None,
        }
    }

    fn contains(&self, revision_id: &Uuid) -> bool {
        self.accepted.contains(revision_id)
    }

    fn record(&mut self, revision_id: Uuid, capacity: usize) {
        while self.order.len() >= capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.accepted.remove(&oldest);
                }
                None => break,
            }
        }
        self.accepted.insert(revision_id);
        self.order.push_back(revision_id);
        self.head = Some(revision_id);
    }
}

/// In-process relay: per-document acceptance state plus bus fan-out.
///
/// Accepted revisions are pushed onto the bus before the dispatch call
/// resolves, so the broadcast echo can reach the sender ahead of its own
/// acknowledgement.
pub struct LocalRelay {
    bus: Arc<MessageBus>,
    config: RelayConfig,
    documents: RwLock<HashMap<DocumentIdentity, DocumentLog>>,
    stats: AtomicRelayStats,
}

impl LocalRelay {
    pub fn new(bus: Arc<MessageBus>, config: RelayConfig) -> Self {
        Self {
            bus,
            config,
            documents: RwLock::new(HashMap::new()),
            stats: AtomicRelayStats {
                accepted: AtomicU64::new(0),
                rejected: AtomicU64::new(0),
            },
        }
    }

    /// Create with default configuration.
    pub fn with_defaults(bus: Arc<MessageBus>) -> Self {
        Self::new(bus, RelayConfig::default())
    }

    /// Most recently accepted revision for a document, if any.
    pub async fn head(&self, document: &DocumentIdentity) -> Option<Uuid> {
        self.documents.read().await.get(document).and_then(|l| l.head)
    }

    /// Number of documents the relay has seen revisions for.
    pub async fn document_count(&self) -> usize {
        self.documents.read().await.len()
    }

    pub fn stats(&self) -> RelayStats {
        RelayStats {
            revisions_accepted: self.stats.accepted.load(Ordering::Relaxed),
            revisions_rejected: self.stats.rejected.load(Ordering::Relaxed),
        }
    }
}

impl RelayService for LocalRelay {
    fn dispatch_message<'a>(
        &'a self,
        document: &'a DocumentIdentity,
        revision: Revision,
    ) -> BoxFuture<'a, Result<bool, RelayError>> {
        Box::pin(async move {
            {
                let mut documents = self.documents.write().await;
                let doc_log = documents
                    .entry(document.clone())
                    .or_insert_with(DocumentLog::new);

                if doc_log.contains(&revision.revision_id) {
                    self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                    log::info!(
                        "rejected duplicate revision {} for {document}",
                        revision.revision_id
                    );
                    return Ok(false);
                }
                doc_log.record(revision.revision_id, self.config.log_capacity);
            }

            self.stats.accepted.fetch_add(1, Ordering::Relaxed);
            log::debug!("accepted revision {} for {document}", revision.revision_id);
            self.bus.notify(Notification::SpreadsheetMessage {
                document: document.clone(),
                revision,
            });
            Ok(true)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::NotificationKind;
    use serde_json::json;

    fn relay_with_bus() -> (Arc<MessageBus>, LocalRelay) {
        let bus = Arc::new(MessageBus::with_defaults());
        let relay = LocalRelay::with_defaults(bus.clone());
        (bus, relay)
    }

    #[tokio::test]
    async fn test_accepts_fresh_revision() {
        let (_bus, relay) = relay_with_bus();
        let doc = DocumentIdentity::new("my.model", 5);

        let accepted = relay
            .dispatch_message(&doc, Revision::new(json!({"greeting": "hello"})))
            .await
            .unwrap();
        assert!(accepted);
        assert_eq!(relay.stats().revisions_accepted, 1);
        assert_eq!(relay.document_count().await, 1);
    }

    #[tokio::test]
    async fn test_rejects_duplicate_revision_id() {
        let (_bus, relay) = relay_with_bus();
        let doc = DocumentIdentity::new("my.model", 5);
        let revision = Revision::new(json!({"greeting": "hello"}));

        assert!(relay.dispatch_message(&doc, revision.clone()).await.unwrap());
        assert!(!relay.dispatch_message(&doc, revision).await.unwrap());
        assert_eq!(relay.stats().revisions_rejected, 1);
    }

    #[tokio::test]
    async fn test_same_id_distinct_documents() {
        let (_bus, relay) = relay_with_bus();
        let doc_a = DocumentIdentity::new("my.model", 5);
        let doc_b = DocumentIdentity::new("my.model", 6);
        let revision = Revision::new(json!({}));

        assert!(relay.dispatch_message(&doc_a, revision.clone()).await.unwrap());
        assert!(relay.dispatch_message(&doc_b, revision).await.unwrap());
        assert_eq!(relay.document_count().await, 2);
    }

    #[tokio::test]
    async fn test_accepted_revision_reaches_bus() {
        let (bus, relay) = relay_with_bus();
        let doc = DocumentIdentity::new("my.model", 5);
        let mut sub = bus.subscribe(NotificationKind::SpreadsheetMessage);

        let revision = Revision::new(json!({"greeting": "hello"}));
        relay.dispatch_message(&doc, revision.clone()).await.unwrap();

        let Some(Notification::SpreadsheetMessage {
            document,
            revision: echoed,
        }) = sub.recv().await
        else {
            panic!("expected a revision notification");
        };
        assert_eq!(document, doc);
        assert_eq!(echoed, revision);
    }

    #[tokio::test]
    async fn test_head_tracks_latest() {
        let (_bus, relay) = relay_with_bus();
        let doc = DocumentIdentity::new("my.model", 5);

        assert_eq!(relay.head(&doc).await, None);

        let r1 = Revision::new(json!({"n": 1}));
        let r2 = Revision::new(json!({"n": 2}));
        relay.dispatch_message(&doc, r1).await.unwrap();
        relay.dispatch_message(&doc, r2.clone()).await.unwrap();

        assert_eq!(relay.head(&doc).await, Some(r2.revision_id));
    }

    #[tokio::test]
    async fn test_log_capacity_prunes_oldest() {
        let bus = Arc::new(MessageBus::with_defaults());
        let relay = LocalRelay::new(bus, RelayConfig { log_capacity: 2 });
        let doc = DocumentIdentity::new("my.model", 5);

        let r1 = Revision::new(json!({"n": 1}));
        relay.dispatch_message(&doc, r1.clone()).await.unwrap();
        relay.dispatch_message(&doc, Revision::new(json!({"n": 2}))).await.unwrap();
        relay.dispatch_message(&doc, Revision::new(json!({"n": 3}))).await.unwrap();

        // r1 has been pruned from the log, so its id is acceptable again.
        assert!(relay.dispatch_message(&doc, r1).await.unwrap());
    }
}
