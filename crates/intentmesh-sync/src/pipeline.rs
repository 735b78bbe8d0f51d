//! Cache-first writes and cache-fallback reads against the live session.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use intentmesh_core::{
    generate_id, AcceptAll, Intention, IntentionPatch, MeshError, MeshResult, NewIntention,
    UpdateVerifier,
};
use intentmesh_memory::EmbeddingProvider;
use intentmesh_security::{AuditLog, AuditOutcome, SanitizeResult, Sanitizer};
use intentmesh_session::LocalCache;
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::deadline::{flatten, race, with_deadline, Raced};
use crate::store::{StoreEvent, StoreSession};
use crate::verification::{VerificationLedger, VerificationStatus};

/// Deadlines for store writes and reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineTimeouts {
    /// Deadline for each replicated write or delete.
    pub write: Duration,
    /// Deadline for store reads.
    pub read: Duration,
}

impl Default for PipelineTimeouts {
    fn default() -> Self {
        Self {
            write: Duration::from_secs(15),
            read: Duration::from_secs(30),
        }
    }
}

impl PipelineTimeouts {
    /// Shorter read deadline used when talking to a store adapter directly.
    pub fn direct_adapter() -> Self {
        Self {
            read: Duration::from_secs(10),
            ..Self::default()
        }
    }
}

/// Local writes that return as soon as the cache holds them. Replication
/// runs afterwards on a background task, in the order writes were made.
pub struct WritePipeline {
    session: Arc<dyn StoreSession>,
    cache: Arc<dyn LocalCache>,
    embedder: Arc<dyn EmbeddingProvider>,
    sanitizer: Sanitizer,
    audit: Arc<AuditLog>,
    timeouts: PipelineTimeouts,
    verifier: Arc<dyn UpdateVerifier>,
    ledger: Arc<VerificationLedger>,
    pending: Arc<Mutex<Pending>>,
    /// Started on first use so builders can still swap audit and timeouts.
    replicator: Mutex<Option<mpsc::UnboundedSender<Replication>>>,
    subscriber: Mutex<Option<JoinHandle<()>>>,
}

impl WritePipeline {
    pub fn new(
        session: Arc<dyn StoreSession>,
        cache: Arc<dyn LocalCache>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        Self {
            session,
            cache,
            embedder,
            sanitizer: Sanitizer::default(),
            audit: Arc::new(AuditLog::disabled()),
            timeouts: PipelineTimeouts::default(),
            verifier: Arc::new(AcceptAll),
            ledger: Arc::new(VerificationLedger::new()),
            pending: Arc::new(Mutex::new(Pending::default())),
            replicator: Mutex::new(None),
            subscriber: Mutex::new(None),
        }
    }

    pub fn with_audit(mut self, audit: Arc<AuditLog>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_timeouts(mut self, timeouts: PipelineTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_verifier(mut self, verifier: Arc<dyn UpdateVerifier>) -> Self {
        self.verifier = verifier;
        self
    }

    pub fn ledger(&self) -> &Arc<VerificationLedger> {
        &self.ledger
    }

    pub fn session(&self) -> &Arc<dyn StoreSession> {
        &self.session
    }

    /// Number of local writes and deletes not yet acknowledged by the store.
    pub fn pending_replication(&self) -> usize {
        self.pending.lock().len()
    }

    /// Wait until every write queued so far has been attempted against the
    /// store, successfully or not.
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.enqueue(Replication::Flush(done)) {
            let _ = wait.await;
        }
    }

    /// Create an intention.
    ///
    /// Returns once the record is in the local cache; replication is queued
    /// and its failures are logged and audited, never returned.
    pub async fn create(&self, mut input: NewIntention) -> MeshResult<Intention> {
        input.title = clean(self.sanitizer.sanitize_line(&input.title), "title")?;
        input.description = clean(self.sanitizer.sanitize(&input.description), "description")?;

        let mut intention = input.into_intention(generate_id(), Utc::now())?;
        let embedding = self
            .embedder
            .embed_intention(&intention.title, &intention.description)
            .await?;
        intention.set_embedding(embedding, Utc::now())?;

        self.cache.append(intention.clone()).await?;
        debug!(id = %intention.id, "intention cached");

        self.replicate("create", intention.clone());
        Ok(intention)
    }

    /// Merge `patch` into the store's current copy of `id`.
    ///
    /// The record is read from the store, not the cache, though a newer local
    /// write the store has not acknowledged yet takes its place. The
    /// embedding is regenerated only when title or description changed.
    pub async fn update(&self, id: &str, mut patch: IntentionPatch) -> MeshResult<Intention> {
        if let Some(title) = patch.title.take() {
            let title = clean(self.sanitizer.sanitize_line(&title), "title")?;
            patch.title = Some(title.trim().to_string());
        }
        if let Some(description) = patch.description.take() {
            patch.description = Some(clean(
                self.sanitizer.sanitize(&description),
                "description",
            )?);
        }

        let session = Arc::clone(&self.session);
        let key = id.to_string();
        let mut intention = with_deadline("read record", self.timeouts.read, async move {
            session.get(&key).await
        })
        .await?
        .ok_or_else(|| MeshError::NotFound(format!("intention {id}")))?;

        {
            let pending = self.pending.lock();
            if pending.deletes.contains(id) {
                return Err(MeshError::NotFound(format!("intention {id}")));
            }
            if let Some(local) = pending.newer_write(&intention) {
                intention = local;
            }
        }

        let text_changed = intention.apply_patch(patch, Utc::now());
        intention.validate()?;
        if text_changed {
            let embedding = self
                .embedder
                .embed_intention(&intention.title, &intention.description)
                .await?;
            intention.set_embedding(embedding, Utc::now())?;
        }

        self.cache.append(intention.clone()).await?;
        self.replicate("update", intention.clone());
        Ok(intention)
    }

    /// Remove `id` locally and queue its removal from the store.
    /// Returns whether the cache held it.
    pub async fn delete(&self, id: &str) -> MeshResult<bool> {
        let existed = self.cache.remove(id).await?;
        self.pending.lock().stage_delete(id);
        if !self.enqueue(Replication::Delete { id: id.to_string() }) {
            warn!(%id, "replication worker gone, delete kept locally");
        }
        Ok(existed)
    }

    /// Every intention in the store, falling back to the cache when the
    /// store cannot answer in time.
    ///
    /// A new session returns nothing without querying. A successful read
    /// replaces the cache, keeping local writes the store has not seen yet.
    /// If the read times out, the cache snapshot is returned and the read
    /// keeps running in the background; should it succeed later, it
    /// refreshes the cache.
    pub async fn load_all(&self, is_new_session: bool) -> MeshResult<Vec<Intention>> {
        if is_new_session {
            debug!("new store, skipping initial read");
            return Ok(Vec::new());
        }

        let session = Arc::clone(&self.session);
        match race(self.timeouts.read, async move { session.all().await }).await {
            Raced::Settled(Ok(items)) => {
                let items = self.pending.lock().merge(items);
                if let Err(e) = self.cache.replace_all(items.clone()).await {
                    warn!(error = %e, "could not refresh cache from store read");
                }
                info!(count = items.len(), "loaded intentions from store");
                Ok(items)
            }
            Raced::Settled(Err(e)) => {
                self.read_degraded(&e.to_string());
                self.cache.load_all().await
            }
            Raced::Abandoned(handle) => {
                self.read_degraded("read deadline exceeded");
                let cache = Arc::clone(&self.cache);
                let pending = Arc::clone(&self.pending);
                tokio::spawn(async move {
                    match flatten(handle.await) {
                        Ok(items) => {
                            let items = pending.lock().merge(items);
                            let count = items.len();
                            match cache.replace_all(items).await {
                                Ok(()) => info!(count, "late store read refreshed cache"),
                                Err(e) => warn!(error = %e, "late cache refresh failed"),
                            }
                        }
                        Err(e) => debug!(error = %e, "abandoned store read failed"),
                    }
                });
                self.cache.load_all().await
            }
        }
    }

    /// Follow store updates: record each one's verification in the ledger
    /// and mirror verified ones into the cache. Replaces any previous subscriber.
    pub fn start_subscriber(&self) {
        let mut rx = self.session.subscribe();
        let verifier = Arc::clone(&self.verifier);
        let ledger = Arc::clone(&self.ledger);
        let cache = Arc::clone(&self.cache);

        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(StoreEvent::Update { entry }) => {
                        let status = if verifier.verify(&entry).await {
                            VerificationStatus::Verified
                        } else {
                            warn!(id = %entry.id, "update failed verification");
                            VerificationStatus::Rejected
                        };
                        ledger.record(&entry.id, status);
                        if status == VerificationStatus::Verified {
                            if let Err(e) = cache.append(entry).await {
                                warn!(error = %e, "could not mirror update into cache");
                            }
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "update subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        if let Some(old) = self.subscriber.lock().replace(task) {
            old.abort();
        }
    }

    /// Mark `record` pending and queue it for the store.
    fn replicate(&self, operation: &'static str, record: Intention) {
        self.pending.lock().stage_write(record.clone());
        let id = record.id.clone();
        if !self.enqueue(Replication::Put { operation, record }) {
            warn!(%id, operation, "replication worker gone, write kept locally");
        }
    }

    /// Hand `job` to the replication worker, starting it if needed.
    fn enqueue(&self, job: Replication) -> bool {
        let mut slot = self.replicator.lock();
        let tx = slot.get_or_insert_with(|| {
            Replicator {
                session: Arc::clone(&self.session),
                pending: Arc::clone(&self.pending),
                audit: Arc::clone(&self.audit),
                write_timeout: self.timeouts.write,
            }
            .spawn()
        });
        tx.send(job).is_ok()
    }

    fn read_degraded(&self, reason: &str) {
        warn!(reason, "store read failed, serving cached snapshot");
        self.audit.log_action(
            "load_all",
            None,
            json!({ "error": reason }),
            AuditOutcome::Degraded,
        );
    }
}

impl Drop for WritePipeline {
    fn drop(&mut self) {
        if let Some(task) = self.subscriber.lock().take() {
            task.abort();
        }
    }
}

enum Replication {
    Put {
        operation: &'static str,
        record: Intention,
    },
    Delete {
        id: String,
    },
    Flush(oneshot::Sender<()>),
}

/// Local writes and deletes the store has not acknowledged yet.
#[derive(Default)]
struct Pending {
    writes: Vec<Intention>,
    deletes: HashSet<String>,
}

impl Pending {
    fn len(&self) -> usize {
        self.writes.len() + self.deletes.len()
    }

    fn stage_write(&mut self, record: Intention) {
        self.deletes.remove(&record.id);
        match self.writes.iter_mut().find(|w| w.id == record.id) {
            Some(slot) => *slot = record,
            None => self.writes.push(record),
        }
    }

    fn stage_delete(&mut self, id: &str) {
        self.writes.retain(|w| w.id != id);
        self.deletes.insert(id.to_string());
    }

    /// The store now holds `record`; a later local edit stays pending.
    fn ack_write(&mut self, record: &Intention) {
        self.writes
            .retain(|w| w.id != record.id || w.updated_at > record.updated_at);
    }

    fn ack_delete(&mut self, id: &str) {
        self.deletes.remove(id);
    }

    /// A pending write of the same record that is newer than `stored`.
    fn newer_write(&self, stored: &Intention) -> Option<Intention> {
        self.writes
            .iter()
            .find(|w| w.id == stored.id && w.updated_at > stored.updated_at)
            .cloned()
    }

    /// Overlay pending writes and deletes on a store snapshot.
    ///
    /// A pending write leaves the set once the store's copy is at least as
    /// recent; until then it replaces the store's copy. A pending delete
    /// leaves the set once the store no longer holds the record; until then
    /// the record is hidden.
    fn merge(&mut self, mut items: Vec<Intention>) -> Vec<Intention> {
        self.deletes.retain(|id| items.iter().any(|i| &i.id == id));
        items.retain(|i| !self.deletes.contains(&i.id));

        let mut still_pending = Vec::with_capacity(self.writes.len());
        for write in self.writes.drain(..) {
            match items.iter_mut().find(|i| i.id == write.id) {
                Some(stored) if stored.updated_at >= write.updated_at => {}
                Some(stored) => {
                    *stored = write.clone();
                    still_pending.push(write);
                }
                None => {
                    items.push(write.clone());
                    still_pending.push(write);
                }
            }
        }
        self.writes = still_pending;
        items
    }
}

/// Background writer that applies queued local writes to the store one at
/// a time, each under the write deadline.
struct Replicator {
    session: Arc<dyn StoreSession>,
    pending: Arc<Mutex<Pending>>,
    audit: Arc<AuditLog>,
    write_timeout: Duration,
}

impl Replicator {
    /// Must be called within a tokio runtime. The task ends once the
    /// sender is dropped and the queue is drained.
    fn spawn(self) -> mpsc::UnboundedSender<Replication> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Replication>();
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                match job {
                    Replication::Put { operation, record } => self.put(operation, record).await,
                    Replication::Delete { id } => self.delete(id).await,
                    Replication::Flush(done) => {
                        let _ = done.send(());
                    }
                }
            }
        });
        tx
    }

    async fn put(&self, operation: &'static str, record: Intention) {
        let session = Arc::clone(&self.session);
        let payload = record.clone();
        match with_deadline("replicate", self.write_timeout, async move {
            session.put(payload).await
        })
        .await
        {
            Ok(()) => {
                self.pending.lock().ack_write(&record);
                debug!(id = %record.id, operation, "replicated");
            }
            Err(e) => self.failed(operation, &record.id, &e),
        }
    }

    async fn delete(&self, id: String) {
        let session = Arc::clone(&self.session);
        let key = id.clone();
        match with_deadline("delete record", self.write_timeout, async move {
            session.del(&key).await
        })
        .await
        {
            Ok(()) => {
                self.pending.lock().ack_delete(&id);
                debug!(%id, "delete replicated");
            }
            Err(e) => self.failed("delete", &id, &e),
        }
    }

    fn failed(&self, operation: &str, id: &str, error: &MeshError) {
        warn!(%id, operation, error = %error, "replication failed, kept locally");
        self.audit.log_action(
            format!("replicate_{operation}"),
            Some(id.to_string()),
            json!({ "error": error.to_string() }),
            AuditOutcome::Degraded,
        );
    }
}

fn clean(result: SanitizeResult, field: &str) -> MeshResult<String> {
    match result {
        SanitizeResult::Clean(s) | SanitizeResult::Cleaned(s) => Ok(s),
        SanitizeResult::Rejected(reason) => {
            Err(MeshError::Validation(format!("{field}: {reason}")))
        }
    }
}
