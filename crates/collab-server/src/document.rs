//! Per-document owner actor.
//!
//! Each open document is driven by exactly one task that owns its replica,
//! session set, write queue and timers, so mutation application, persistence
//! scheduling and debounce handling for one document never race with
//! themselves. Different documents run fully independent actors.
//!
//! Lifecycle: Unloaded -> Loading (fetch; failure or absent record = start
//! from a seeded empty tree) -> Active -> Idle (no sessions, eviction timer
//! armed) -> Evicted (in-flight stores drained first). A connect during Idle
//! cancels the eviction.

use crate::gate::MutationGate;
use crate::metadata_cache::MetadataCache;
use crate::store::{self, SnapshotStore};
use collab_core::codec;
use collab_core::events::{CollabEvent, EventBus};
use collab_core::metadata::FormMetadata;
use collab_core::protocol::SyncMessage;
use collab_core::replica::FormReplica;
use collab_core::session::Session;
use loro::VersionVector;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::time::{self, Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Tunables for one document actor.
#[derive(Debug, Clone)]
pub struct DocumentConfig {
    /// Quiet window before metadata extraction runs.
    pub debounce: Duration,
    /// How long a document lingers with zero sessions before eviction.
    pub idle_timeout: Duration,
    /// Base URL for deriving background image URLs in metadata.
    pub asset_base_url: Option<String>,
    /// Malformed frames tolerated per session before disconnecting it.
    pub malformed_limit: u32,
}

impl Default for DocumentConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(2000),
            idle_timeout: Duration::from_secs(60),
            asset_base_url: None,
            malformed_limit: 5,
        }
    }
}

/// Shared dependencies handed to every document actor.
#[derive(Clone)]
pub struct DocDeps {
    pub store: Arc<dyn SnapshotStore>,
    pub cache: Arc<Mutex<MetadataCache>>,
    pub gate: Arc<MutationGate>,
    pub events: Arc<EventBus>,
}

/// Commands routed to a document actor.
#[derive(Debug)]
pub enum DocCommand {
    /// A freshly authenticated session joins the document.
    Attach {
        session: Session,
        outbox: mpsc::UnboundedSender<Vec<u8>>,
    },
    /// A session disconnected.
    Detach { session_id: Uuid },
    /// A binary protocol frame from a session, in send order.
    Frame { session_id: Uuid, data: Vec<u8> },
}

/// Result of one background store attempt.
struct StoreOutcome {
    bytes: usize,
    result: store::Result<()>,
}

struct SessionSlot {
    session: Session,
    outbox: mpsc::UnboundedSender<Vec<u8>>,
    malformed: u32,
}

pub struct DocumentActor {
    form_id: String,
    replica: FormReplica,
    sessions: HashMap<Uuid, SessionSlot>,
    deps: DocDeps,
    config: DocumentConfig,
    cmd_rx: mpsc::UnboundedReceiver<DocCommand>,
    store_tx: mpsc::UnboundedSender<StoreOutcome>,
    store_rx: mpsc::UnboundedReceiver<StoreOutcome>,
    /// True while a background store task is running.
    store_in_flight: bool,
    /// Latest snapshot superseding whatever is in flight (single slot).
    pending_snapshot: Option<Vec<u8>>,
    /// A store failed and no retry is queued yet; retried on the next
    /// scheduled write and at eviction drain.
    dirty: bool,
    metadata_deadline: Option<Instant>,
    idle_deadline: Option<Instant>,
    evicted_tx: mpsc::UnboundedSender<String>,
}

impl DocumentActor {
    /// Spawn the actor task for a document and return its command channel.
    pub fn spawn(
        form_id: String,
        deps: DocDeps,
        config: DocumentConfig,
        evicted_tx: mpsc::UnboundedSender<String>,
    ) -> mpsc::UnboundedSender<DocCommand> {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (store_tx, store_rx) = mpsc::unbounded_channel();

        let idle_timeout = config.idle_timeout;
        let actor = Self {
            form_id,
            replica: FormReplica::new(),
            sessions: HashMap::new(),
            deps,
            config,
            cmd_rx,
            store_tx,
            store_rx,
            store_in_flight: false,
            pending_snapshot: None,
            dirty: false,
            metadata_deadline: None,
            // Armed from the start so an actor that never sees an attach
            // still gets cleaned up
            idle_deadline: Some(Instant::now() + idle_timeout),
            evicted_tx,
        };

        tokio::spawn(actor.run());
        cmd_tx
    }

    async fn run(mut self) {
        self.load().await;

        let far_future = || Instant::now() + Duration::from_secs(86400);
        loop {
            let metadata_at = self.metadata_deadline.unwrap_or_else(far_future);
            let idle_at = self.idle_deadline.unwrap_or_else(far_future);

            tokio::select! {
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd),
                    None => break,
                },
                Some(outcome) = self.store_rx.recv() => self.on_store_done(outcome),
                _ = time::sleep_until(metadata_at), if self.metadata_deadline.is_some() => {
                    self.refresh_metadata().await;
                }
                _ = time::sleep_until(idle_at), if self.idle_deadline.is_some() => {
                    if self.try_evict() {
                        break;
                    }
                }
            }
        }

        if self.metadata_deadline.is_some() {
            self.refresh_metadata().await;
        }
        self.drain_stores().await;
        let _ = self.evicted_tx.send(self.form_id.clone());
        info!("Document {} evicted", self.form_id);
    }

    /// Fetch persisted state. Fetch failure or an absent record is treated
    /// as "start empty", never as a connection error.
    async fn load(&mut self) {
        self.replica = match self.deps.store.fetch(&self.form_id).await {
            Ok(Some(stored)) => match FormReplica::from_snapshot(&stored.data) {
                Ok(replica) => {
                    debug!(
                        "Loaded {} ({} bytes, updated {})",
                        self.form_id,
                        stored.data.len(),
                        stored.updated_at_ms
                    );
                    replica
                }
                Err(e) => {
                    error!(
                        "Snapshot for {} is unreadable, starting empty: {}",
                        self.form_id, e
                    );
                    Self::seeded()
                }
            },
            Ok(None) => {
                debug!("No prior state for {}, seeding empty document", self.form_id);
                Self::seeded()
            }
            Err(e) => {
                warn!(
                    "Fetch for {} failed, treating as no prior state: {}",
                    self.form_id, e
                );
                Self::seeded()
            }
        };
    }

    fn seeded() -> FormReplica {
        match codec::seed_empty() {
            Ok(replica) => replica,
            Err(e) => {
                error!("Failed to seed empty document: {}", e);
                FormReplica::new()
            }
        }
    }

    fn handle_command(&mut self, cmd: DocCommand) {
        match cmd {
            DocCommand::Attach { session, outbox } => self.on_attach(session, outbox),
            DocCommand::Detach { session_id } => self.on_detach(session_id),
            DocCommand::Frame { session_id, data } => self.on_frame(session_id, data),
        }
    }

    fn on_attach(&mut self, session: Session, outbox: mpsc::UnboundedSender<Vec<u8>>) {
        // A connect during Idle cancels the eviction timer
        self.idle_deadline = None;

        info!(
            "Session {} (user {}, {:?}) attached to {}",
            session.id, session.user_id, session.permission, self.form_id
        );
        self.deps.events.emit(CollabEvent::SessionAttached {
            form_id: self.form_id.clone(),
            session_id: session.id.to_string(),
        });
        self.sessions.insert(
            session.id,
            SessionSlot {
                session,
                outbox,
                malformed: 0,
            },
        );
    }

    fn on_detach(&mut self, session_id: Uuid) {
        if self.sessions.remove(&session_id).is_some() {
            info!("Session {} detached from {}", session_id, self.form_id);
            self.deps.events.emit(CollabEvent::SessionDetached {
                form_id: self.form_id.clone(),
                session_id: session_id.to_string(),
            });
        }
        // A disconnect does not cancel an in-flight store
        if self.sessions.is_empty() {
            self.idle_deadline = Some(Instant::now() + self.config.idle_timeout);
        }
    }

    fn on_frame(&mut self, session_id: Uuid, data: Vec<u8>) {
        if !self.sessions.contains_key(&session_id) {
            return;
        }

        match SyncMessage::from_bytes(&data) {
            Ok(SyncMessage::SyncRequest { version }) => self.on_sync_request(session_id, &version),
            Ok(SyncMessage::Update { update }) => self.on_update(session_id, update),
            Ok(SyncMessage::SyncResponse { .. }) => {
                self.note_malformed(session_id, "unexpected SyncResponse frame".into());
            }
            Err(e) => self.note_malformed(session_id, e.to_string()),
        }
    }

    /// Answer with a snapshot, or a minimal diff when the session already
    /// holds a decodable version vector.
    fn on_sync_request(&mut self, session_id: Uuid, version: &[u8]) {
        let update = if version.is_empty() {
            self.replica.snapshot()
        } else {
            match VersionVector::decode(version) {
                Ok(vv) => self.replica.diff(&vv),
                Err(_) => self.replica.snapshot(),
            }
        };

        if let Some(slot) = self.sessions.get(&session_id) {
            let frame = SyncMessage::SyncResponse { update }.to_bytes();
            let _ = slot.outbox.send(frame);
        }
    }

    fn on_update(&mut self, session_id: Uuid, update: Vec<u8>) {
        let Some(slot) = self.sessions.get(&session_id) else {
            return;
        };
        let session = slot.session.clone();

        // Permission is re-evaluated per change, never cached per connection.
        // A denied change is dropped whole: not applied, not persisted, not
        // relayed.
        if self.deps.gate.admit(&session).is_err() {
            return;
        }

        let changes = match self.replica.apply(&update) {
            Ok(changes) => changes,
            Err(e) => {
                self.note_malformed(session_id, e.to_string());
                return;
            }
        };

        if changes.is_empty() {
            debug!(
                "Update from session {} on {} carried no visible change",
                session_id, self.form_id
            );
            return;
        }

        debug!(
            "Applied update from session {} on {}: +{} -{} ~{}",
            session_id,
            self.form_id,
            changes.added.len(),
            changes.removed.len(),
            changes.modified.len()
        );
        self.deps.events.emit(CollabEvent::UpdateApplied {
            form_id: self.form_id.clone(),
            session_id: session_id.to_string(),
            changes: changes.added.len() + changes.removed.len() + changes.modified.len(),
        });

        // Relay the same update bytes to every other session
        let frame = SyncMessage::Update { update }.to_bytes();
        for (id, other) in &self.sessions {
            if *id != session_id {
                let _ = other.outbox.send(frame.clone());
            }
        }

        self.schedule_store();

        // Restart the quiet window: reset, not accumulate
        self.metadata_deadline = Some(Instant::now() + self.config.debounce);
    }

    fn note_malformed(&mut self, session_id: Uuid, reason: String) {
        let Some(slot) = self.sessions.get_mut(&session_id) else {
            return;
        };
        slot.malformed += 1;
        let strikes = slot.malformed;

        warn!(
            "Malformed frame from session {} on {} ({} strikes): {}",
            session_id, self.form_id, strikes, reason
        );
        self.deps.events.emit(CollabEvent::UpdateRejected {
            form_id: self.form_id.clone(),
            session_id: session_id.to_string(),
            reason,
        });

        if strikes >= self.config.malformed_limit {
            warn!(
                "Disconnecting session {} from {} after repeated malformed frames",
                session_id, self.form_id
            );
            self.on_detach(session_id);
        }
    }

    /// Queue the current state for persistence.
    ///
    /// Single-slot write queue: if a store is already in flight, the newest
    /// snapshot supersedes any pending one (latest-state-wins coalescing).
    fn schedule_store(&mut self) {
        let snapshot = self.replica.snapshot();
        if self.store_in_flight {
            self.pending_snapshot = Some(snapshot);
        } else {
            self.spawn_store(snapshot);
        }
    }

    fn spawn_store(&mut self, snapshot: Vec<u8>) {
        self.store_in_flight = true;
        self.dirty = false;

        let store = Arc::clone(&self.deps.store);
        let form_id = self.form_id.clone();
        let tx = self.store_tx.clone();
        tokio::spawn(async move {
            let bytes = snapshot.len();
            let result = store.store(&form_id, &snapshot).await;
            let _ = tx.send(StoreOutcome { bytes, result });
        });
    }

    fn on_store_done(&mut self, outcome: StoreOutcome) {
        self.store_in_flight = false;

        match outcome.result {
            Ok(()) => {
                debug!("Stored {} ({} bytes)", self.form_id, outcome.bytes);
                self.deps.events.emit(CollabEvent::SnapshotStored {
                    form_id: self.form_id.clone(),
                    bytes: outcome.bytes,
                });
            }
            Err(e) => {
                // Not surfaced to sessions: the in-memory replica remains the
                // source of truth until the next successful store
                warn!("Store for {} failed, will retry: {}", self.form_id, e);
                self.dirty = true;
                self.deps.events.emit(CollabEvent::SnapshotStoreFailed {
                    form_id: self.form_id.clone(),
                    error: e.to_string(),
                });
            }
        }

        if let Some(next) = self.pending_snapshot.take() {
            self.spawn_store(next);
        }
    }

    /// Extract metadata from the live replica and upsert the cache entry.
    ///
    /// Runs inline in the actor loop, so an extraction can never overlap
    /// itself for the same document.
    async fn refresh_metadata(&mut self) {
        self.metadata_deadline = None;

        let schema = codec::to_schema(&self.replica);
        let metadata = FormMetadata::extract(
            &self.form_id,
            &schema,
            self.config.asset_base_url.as_deref(),
            store::now_ms(),
        );

        debug!(
            "Metadata for {}: {} page(s), {} field(s)",
            self.form_id, metadata.page_count, metadata.field_count
        );
        self.deps.events.emit(CollabEvent::MetadataRefreshed {
            form_id: self.form_id.clone(),
            page_count: metadata.page_count,
            field_count: metadata.field_count,
        });

        let mut cache = self.deps.cache.lock().await;
        if let Err(e) = cache.upsert(metadata) {
            warn!("Metadata upsert for {} failed: {}", self.form_id, e);
        }
    }

    /// Decide whether the idle timer really means eviction.
    ///
    /// Commands that raced the timer are drained first; any of them may have
    /// attached a new session.
    fn try_evict(&mut self) -> bool {
        while let Ok(cmd) = self.cmd_rx.try_recv() {
            self.handle_command(cmd);
        }
        if !self.sessions.is_empty() {
            return false;
        }
        info!("Idle timeout for {}, evicting", self.form_id);
        true
    }

    /// Graceful drain: eviction waits for in-flight stores and flushes any
    /// unpersisted state before the replica is released.
    async fn drain_stores(&mut self) {
        while self.store_in_flight {
            match self.store_rx.recv().await {
                Some(outcome) => self.on_store_done(outcome),
                None => break,
            }
        }
        if self.dirty {
            let snapshot = self.replica.snapshot();
            if let Err(e) = self.deps.store.store(&self.form_id, &snapshot).await {
                error!("Final store for {} failed: {}", self.form_id, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use collab_core::schema::{Field, FillableField};
    use collab_core::session::PermissionLevel;
    use tokio::time::timeout;

    fn deps(store: Arc<InMemoryStore>) -> DocDeps {
        let events = Arc::new(EventBus::new());
        DocDeps {
            store,
            cache: Arc::new(Mutex::new(MetadataCache::in_memory())),
            gate: Arc::new(MutationGate::new(Arc::clone(&events))),
            events,
        }
    }

    fn test_config() -> DocumentConfig {
        DocumentConfig {
            debounce: Duration::from_millis(50),
            idle_timeout: Duration::from_millis(200),
            asset_base_url: None,
            malformed_limit: 3,
        }
    }

    async fn recv_frame(rx: &mut mpsc::UnboundedReceiver<Vec<u8>>) -> SyncMessage {
        let data = timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("Timed out waiting for frame")
            .expect("Outbox closed");
        SyncMessage::from_bytes(&data).expect("Frame should parse")
    }

    fn attach(
        tx: &mpsc::UnboundedSender<DocCommand>,
        permission: PermissionLevel,
    ) -> (Session, mpsc::UnboundedReceiver<Vec<u8>>) {
        let session = Session::new("u1", "form-1", permission);
        let (outbox_tx, outbox_rx) = mpsc::unbounded_channel();
        tx.send(DocCommand::Attach {
            session: session.clone(),
            outbox: outbox_tx,
        })
        .unwrap();
        (session, outbox_rx)
    }

    /// Bootstrap a client replica from the actor's snapshot.
    async fn bootstrap(
        tx: &mpsc::UnboundedSender<DocCommand>,
        session: &Session,
        rx: &mut mpsc::UnboundedReceiver<Vec<u8>>,
    ) -> FormReplica {
        tx.send(DocCommand::Frame {
            session_id: session.id,
            data: SyncMessage::SyncRequest { version: vec![] }.to_bytes(),
        })
        .unwrap();
        match recv_frame(rx).await {
            SyncMessage::SyncResponse { update } => FormReplica::from_snapshot(&update).unwrap(),
            other => panic!("Expected SyncResponse, got {:?}", other),
        }
    }

    fn sample_field(id: &str) -> Field {
        Field::Fillable(FillableField {
            id: id.into(),
            kind: "SHORT_TEXT".into(),
            label: "Sample".into(),
            ..FillableField::default()
        })
    }

    #[tokio::test]
    async fn test_fresh_document_bootstraps_with_seeded_page() {
        let store = Arc::new(InMemoryStore::new());
        let (evicted_tx, _evicted_rx) = mpsc::unbounded_channel();
        let tx = DocumentActor::spawn("form-1".into(), deps(Arc::clone(&store)), test_config(), evicted_tx);

        let (session, mut rx) = attach(&tx, PermissionLevel::Editor);
        let replica = bootstrap(&tx, &session, &mut rx).await;

        let schema = codec::to_schema(&replica);
        assert_eq!(schema.pages.len(), 1);
        assert_eq!(schema.pages[0].title, "Page 1");
        assert!(schema.pages[0].fields.is_empty());
    }

    #[tokio::test]
    async fn test_editor_update_is_relayed_and_persisted() {
        let store = Arc::new(InMemoryStore::new());
        let (evicted_tx, _evicted_rx) = mpsc::unbounded_channel();
        let tx = DocumentActor::spawn("form-1".into(), deps(Arc::clone(&store)), test_config(), evicted_tx);

        let (editor, mut editor_rx) = attach(&tx, PermissionLevel::Editor);
        let (owner, mut owner_rx) = attach(&tx, PermissionLevel::Owner);

        let editor_replica = bootstrap(&tx, &editor, &mut editor_rx).await;
        let _ = bootstrap(&tx, &owner, &mut owner_rx).await;

        // Editor appends a field and pushes the diff
        let base_version = editor_replica.version();
        let page_id = codec::to_schema(&editor_replica).pages[0].id.clone();
        codec::append_field(&editor_replica, &page_id, &sample_field("f1")).unwrap();
        let update = editor_replica.diff(&base_version);
        tx.send(DocCommand::Frame {
            session_id: editor.id,
            data: SyncMessage::Update { update }.to_bytes(),
        })
        .unwrap();

        // Owner session receives the relay
        match recv_frame(&mut owner_rx).await {
            SyncMessage::Update { update } => {
                let mut owner_replica = bootstrap(&tx, &owner, &mut owner_rx).await;
                // The relayed update applies cleanly on top of the snapshot
                let _ = owner_replica.apply(&update);
                let ids: Vec<String> = codec::to_schema(&owner_replica).pages[0]
                    .fields
                    .iter()
                    .map(|f| f.id().to_string())
                    .collect();
                assert!(ids.contains(&"f1".to_string()));
            }
            other => panic!("Expected relayed Update, got {:?}", other),
        }

        // And the change is persisted asynchronously
        timeout(Duration::from_secs(2), async {
            while store.store_count() == 0 {
                time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("Store should happen");

        let persisted = FormReplica::from_snapshot(&store.get("form-1").unwrap().data).unwrap();
        assert_eq!(codec::to_schema(&persisted).pages[0].fields.len(), 1);
    }

    #[tokio::test]
    async fn test_viewer_update_is_dropped() {
        let store = Arc::new(InMemoryStore::new());
        let (evicted_tx, _evicted_rx) = mpsc::unbounded_channel();
        let tx = DocumentActor::spawn("form-1".into(), deps(Arc::clone(&store)), test_config(), evicted_tx);

        let (viewer, mut viewer_rx) = attach(&tx, PermissionLevel::Viewer);
        let (owner, mut owner_rx) = attach(&tx, PermissionLevel::Owner);

        let viewer_replica = bootstrap(&tx, &viewer, &mut viewer_rx).await;
        let owner_before = bootstrap(&tx, &owner, &mut owner_rx).await;

        // Viewer tries to relabel a field
        let base_version = viewer_replica.version();
        let page_id = codec::to_schema(&viewer_replica).pages[0].id.clone();
        codec::append_field(&viewer_replica, &page_id, &sample_field("sneaky")).unwrap();
        let update = viewer_replica.diff(&base_version);
        tx.send(DocCommand::Frame {
            session_id: viewer.id,
            data: SyncMessage::Update { update }.to_bytes(),
        })
        .unwrap();

        // Give the actor time to (not) process it
        time::sleep(Duration::from_millis(100)).await;

        // Owner's view is unchanged
        let owner_after = bootstrap(&tx, &owner, &mut owner_rx).await;
        assert_eq!(
            codec::to_schema(&owner_after),
            codec::to_schema(&owner_before)
        );

        // Nothing was persisted
        assert_eq!(store.store_count(), 0);
    }

    #[tokio::test]
    async fn test_malformed_frames_disconnect_after_limit() {
        let store = Arc::new(InMemoryStore::new());
        let (evicted_tx, _evicted_rx) = mpsc::unbounded_channel();
        let tx = DocumentActor::spawn("form-1".into(), deps(Arc::clone(&store)), test_config(), evicted_tx);

        let (session, mut rx) = attach(&tx, PermissionLevel::Editor);
        let _ = bootstrap(&tx, &session, &mut rx).await;

        for _ in 0..3 {
            tx.send(DocCommand::Frame {
                session_id: session.id,
                data: b"garbage".to_vec(),
            })
            .unwrap();
        }

        // The actor drops the session's outbox, which closes the channel
        let closed = timeout(Duration::from_secs(2), async {
            while rx.recv().await.is_some() {}
        })
        .await;
        assert!(closed.is_ok(), "Outbox should close after repeated garbage");
    }

    #[tokio::test]
    async fn test_idle_document_evicts_and_notifies() {
        let store = Arc::new(InMemoryStore::new());
        let (evicted_tx, mut evicted_rx) = mpsc::unbounded_channel();
        let tx = DocumentActor::spawn("form-1".into(), deps(Arc::clone(&store)), test_config(), evicted_tx);

        let (session, mut rx) = attach(&tx, PermissionLevel::Editor);
        let _ = bootstrap(&tx, &session, &mut rx).await;
        tx.send(DocCommand::Detach {
            session_id: session.id,
        })
        .unwrap();

        let form_id = timeout(Duration::from_secs(2), evicted_rx.recv())
            .await
            .expect("Eviction should fire")
            .expect("Eviction channel open");
        assert_eq!(form_id, "form-1");
    }
}
