//! Routing of sessions to per-document actors.
//!
//! The manager owns the form-id -> actor handle map, lazily spawns actors on
//! first connect, and removes handles when actors report eviction. Actors
//! are the single owner of their document; the manager never touches a
//! replica directly.

use crate::document::{DocCommand, DocDeps, DocumentActor, DocumentConfig};
use collab_core::session::Session;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;
use uuid::Uuid;

pub struct DocumentManager {
    docs: Mutex<HashMap<String, mpsc::UnboundedSender<DocCommand>>>,
    deps: DocDeps,
    config: DocumentConfig,
    evicted_tx: mpsc::UnboundedSender<String>,
}

impl DocumentManager {
    /// Create the manager and start its eviction bookkeeping task.
    pub fn new(deps: DocDeps, config: DocumentConfig) -> Arc<Self> {
        let (evicted_tx, mut evicted_rx) = mpsc::unbounded_channel::<String>();

        let manager = Arc::new(Self {
            docs: Mutex::new(HashMap::new()),
            deps,
            config,
            evicted_tx,
        });

        let weak = Arc::downgrade(&manager);
        tokio::spawn(async move {
            while let Some(form_id) = evicted_rx.recv().await {
                let Some(manager) = weak.upgrade() else {
                    break;
                };
                manager.docs.lock().await.remove(&form_id);
                debug!("Released handle for evicted document {}", form_id);
            }
        });

        manager
    }

    /// Attach an authenticated session to its document, spawning the
    /// document's actor if it is not loaded.
    ///
    /// Returns the actor's command channel for routing the session's frames
    /// and eventual detach.
    pub async fn attach(
        &self,
        session: Session,
        outbox: mpsc::UnboundedSender<Vec<u8>>,
    ) -> mpsc::UnboundedSender<DocCommand> {
        let form_id = session.form_id.clone();
        let mut docs = self.docs.lock().await;

        let handle = docs
            .entry(form_id.clone())
            .or_insert_with(|| self.spawn_actor(&form_id));

        let attach = DocCommand::Attach {
            session: session.clone(),
            outbox: outbox.clone(),
        };
        if handle.send(attach).is_err() {
            // The actor evicted itself between our map lookup and the send;
            // spawn a fresh one and re-route
            debug!("Actor for {} already gone, respawning", form_id);
            let fresh = self.spawn_actor(&form_id);
            let _ = fresh.send(DocCommand::Attach { session, outbox });
            *handle = fresh;
        }

        handle.clone()
    }

    fn spawn_actor(&self, form_id: &str) -> mpsc::UnboundedSender<DocCommand> {
        debug!("Loading document {}", form_id);
        DocumentActor::spawn(
            form_id.to_string(),
            self.deps.clone(),
            self.config.clone(),
            self.evicted_tx.clone(),
        )
    }

    /// Number of currently loaded documents.
    pub async fn open_documents(&self) -> usize {
        self.docs.lock().await.len()
    }

    /// Route a detach for a session that never reached attach (auth raced a
    /// disconnect). Harmless if the document is already gone.
    pub async fn detach(&self, form_id: &str, session_id: Uuid) {
        let docs = self.docs.lock().await;
        if let Some(handle) = docs.get(form_id) {
            let _ = handle.send(DocCommand::Detach { session_id });
        }
    }
}
