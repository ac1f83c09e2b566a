//! The client-side synchronization channel.
//!
//! One [`CollaborativeChannel`] per document-editing session. It mediates
//! between local producers of revisions and local listeners via the relay:
//!
//! ```text
//! send_message(payload)
//!       │
//!       ▼
//! RelayService::dispatch_message ──► Ok(true)  ──► fan out to listeners
//!       │                            Ok(false) ──► nothing locally; the
//!       │                                          bus is the source of
//!       ▼                                          truth
//! MessageBus (reader task) ──► identity filter ──► deliver, unless the
//!                                                  confirmation path
//!                                                  already did
//! ```
//!
//! A revision can reach the instance on two paths: the relay's
//! acknowledgement and the bus echo. Whichever path observes it first
//! delivers and marks the id; the other path suppresses and prunes the
//! mark, so each listener sees each revision at most once.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::bus::{BusSubscription, MessageBus};
use crate::protocol::{DocumentIdentity, Notification, NotificationKind, RelayError, Revision};
use crate::relay::RelayService;

/// Callback invoked for every delivered revision.
pub type ListenerCallback = Arc<dyn Fn(&Revision) + Send + Sync>;

/// Service environment a channel is constructed from: the process-wide
/// bus plus a handle to the relay.
#[derive(Clone)]
pub struct CollabEnv {
    pub bus: Arc<MessageBus>,
    pub relay: Arc<dyn RelayService>,
}

impl CollabEnv {
    pub fn new(bus: Arc<MessageBus>, relay: Arc<dyn RelayService>) -> Self {
        Self { bus, relay }
    }
}

/// Mutable state of one channel instance.
///
/// Guarded by a std mutex and never held across an await point; callbacks
/// are invoked after cloning the registered handles out of the lock.
struct ChannelState {
    /// Registered listeners, in registration order. Re-registering an id
    /// replaces the handler in place.
    listeners: Vec<(String, ListenerCallback)>,
    /// Revisions that became deliverable while no listener was registered;
    /// drained into the first listener that registers.
    backlog: Vec<Revision>,
    /// Ids dispatched by this instance whose outcome is still unknown.
    in_flight: HashSet<Uuid>,
    /// Ids already fanned out on one path; the other path prunes the
    /// entry when it observes the same revision. An id whose echo never
    /// arrives stays here, which costs one uuid per such revision.
    delivered: HashSet<Uuid>,
}

impl ChannelState {
    fn new() -> Self {
        Self {
            listeners: Vec::new(),
            backlog: Vec::new(),
            in_flight: HashSet::new(),
            delivered: HashSet::new(),
        }
    }
}

/// Synchronization channel for one shared spreadsheet.
///
/// Owned by exactly one editing session; not designed for concurrent
/// mutation from multiple threads.
pub struct CollaborativeChannel {
    document: DocumentIdentity,
    session_id: Uuid,
    relay: Arc<dyn RelayService>,
    state: Arc<Mutex<ChannelState>>,
    reader: JoinHandle<()>,
}

impl CollaborativeChannel {
    /// Bind a channel to `(collection, document_id)`.
    ///
    /// Subscribes to spreadsheet traffic on the bus and spawns the reader
    /// task; notifications for other documents are discarded there. Must
    /// be called from within a tokio runtime.
    pub fn new(env: &CollabEnv, collection: impl Into<String>, document_id: u64) -> Self {
        let document = DocumentIdentity::new(collection, document_id);
        let session_id = Uuid::new_v4();
        let state = Arc::new(Mutex::new(ChannelState::new()));

        let subscription = env.bus.subscribe(NotificationKind::SpreadsheetMessage);
        let reader = tokio::spawn(Self::read_notifications(
            subscription,
            document.clone(),
            state.clone(),
            session_id,
        ));

        log::debug!("session {session_id} joined {document}");
        Self {
            document,
            session_id,
            relay: env.relay.clone(),
            state,
            reader,
        }
    }

    /// Propose a revision to the relay.
    ///
    /// Suspends until the relay resolves. On acceptance the revision is
    /// fanned out to every currently registered listener exactly once; on
    /// rejection nothing happens locally and the bus remains responsible
    /// for eventual delivery. Transport failures propagate to the caller;
    /// the channel never retries.
    pub async fn send_message(&self, payload: Value) -> Result<(), RelayError> {
        let revision = Revision::new(payload);
        let revision_id = revision.revision_id;

        self.lock().in_flight.insert(revision_id);

        let accepted = match self.relay.dispatch_message(&self.document, revision.clone()).await {
            Ok(accepted) => accepted,
            Err(err) => {
                self.lock().in_flight.remove(&revision_id);
                log::warn!(
                    "dispatch of revision {revision_id} to {} failed: {err}",
                    self.document
                );
                return Err(err);
            }
        };

        if !accepted {
            self.lock().in_flight.remove(&revision_id);
            log::info!("revision {revision_id} rejected by relay for {}", self.document);
            return Ok(());
        }

        let deliver = {
            let mut state = self.lock();
            state.in_flight.remove(&revision_id);
            if state.delivered.remove(&revision_id) {
                // The bus echo beat the acknowledgement.
                false
            } else {
                state.delivered.insert(revision_id);
                true
            }
        };
        if deliver {
            log::debug!("revision {revision_id} confirmed for {}", self.document);
            Self::dispatch_to_listeners(&self.state, &revision);
        }
        Ok(())
    }

    /// Register or replace the listener under `listener_id`.
    ///
    /// Revisions that became deliverable before any listener existed are
    /// replayed into the new callback immediately and synchronously, each
    /// exactly once; the backlog is pruned afterwards.
    pub fn on_new_message(
        &self,
        listener_id: impl Into<String>,
        callback: impl Fn(&Revision) + Send + Sync + 'static,
    ) {
        let listener_id = listener_id.into();
        let callback: ListenerCallback = Arc::new(callback);

        let replay = {
            let mut state = self.lock();
            match state.listeners.iter_mut().find(|(id, _)| *id == listener_id) {
                Some(entry) => entry.1 = callback.clone(),
                None => state.listeners.push((listener_id, callback.clone())),
            }
            std::mem::take(&mut state.backlog)
        };
        for revision in &replay {
            callback(revision);
        }
    }

    /// Detach from the bus. No further broadcast deliveries occur; a
    /// dispatch already in flight still resolves.
    pub fn leave(&self) {
        log::debug!("session {} left {}", self.session_id, self.document);
        self.reader.abort();
    }

    pub fn document(&self) -> &DocumentIdentity {
        &self.document
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn listener_count(&self) -> usize {
        self.lock().listeners.len()
    }

    pub fn backlog_len(&self) -> usize {
        self.lock().backlog.len()
    }

    fn lock(&self) -> MutexGuard<'_, ChannelState> {
        // A panic in a listener callback cannot poison this lock because
        // callbacks run outside of it; recover anyway rather than unwind.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Fan a revision out to the registered listeners, in registration
    /// order, or park it in the backlog when none is registered yet.
    fn dispatch_to_listeners(state: &Arc<Mutex<ChannelState>>, revision: &Revision) {
        let callbacks: Vec<ListenerCallback> = {
            let mut state = state.lock().unwrap_or_else(|e| e.into_inner());
            if state.listeners.is_empty() {
                state.backlog.push(revision.clone());
                return;
            }
            state.listeners.iter().map(|(_, cb)| cb.clone()).collect()
        };
        for callback in &callbacks {
            callback(revision);
        }
    }

    /// Reader task: processes bus notifications one at a time to
    /// completion, filtering by document identity and suppressing echoes
    /// of revisions the confirmation path already delivered.
    async fn read_notifications(
        mut subscription: BusSubscription,
        document: DocumentIdentity,
        state: Arc<Mutex<ChannelState>>,
        session_id: Uuid,
    ) {
        while let Some(notification) = subscription.recv().await {
            let Notification::SpreadsheetMessage {
                document: target,
                revision,
            } = notification
            else {
                continue;
            };
            if target != document {
                continue;
            }

            let deliver = {
                let mut st = state.lock().unwrap_or_else(|e| e.into_inner());
                if st.delivered.remove(&revision.revision_id) {
                    st.in_flight.remove(&revision.revision_id);
                    false
                } else if st.in_flight.remove(&revision.revision_id) {
                    // Echo arrived before our own acknowledgement; deliver
                    // now, the confirmation path will suppress.
                    st.delivered.insert(revision.revision_id);
                    true
                } else {
                    // Another session's revision, or one of ours the relay
                    // rejected locally and committed later.
                    true
                }
            };
            if deliver {
                log::debug!(
                    "session {session_id} received revision {} for {document}",
                    revision.revision_id
                );
                Self::dispatch_to_listeners(&state, &revision);
            }
        }
    }
}

impl Drop for CollaborativeChannel {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
