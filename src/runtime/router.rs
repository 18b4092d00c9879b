use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::bridge::{EventContext, SignalBridge};
use crate::config::RuntimeConfig;
use crate::error::{PldError, Result};
use crate::event::{EventSource, PLDEvent, SessionId, wire};
use crate::policy::PolicyEngine;
use crate::sink::{EventSink, RejectionRecord};
use crate::taxonomy::TaxonomyRegistry;
use crate::validator::{ValidationMode, Validator};

enum WorkerMsg {
    Event(Box<PLDEvent>),
    Cancel,
}

/// Dispatches events to one worker task per session. Sessions share nothing
/// mutable: each worker owns its policy engine, reorder buffer, and
/// validator, so a failing session never blocks the others.
pub struct SessionRouter {
    inner: Arc<RouterInner>,
}

struct RouterInner {
    registry: Arc<TaxonomyRegistry>,
    config: RuntimeConfig,
    sink: Arc<dyn EventSink>,
    sessions: Arc<DashMap<SessionId, mpsc::Sender<WorkerMsg>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    shutdown_tx: watch::Sender<bool>,
}

impl SessionRouter {
    pub fn new(
        registry: Arc<TaxonomyRegistry>,
        config: RuntimeConfig,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(RouterInner {
                registry,
                config,
                sink,
                sessions: Arc::new(DashMap::new()),
                handles: Mutex::new(Vec::new()),
                shutdown_tx,
            }),
        }
    }

    /// Parse and route a raw wire payload. Structural failures go straight
    /// to the dead-letter sink.
    pub async fn ingest_json(&self, raw: &str) -> Result<()> {
        match wire::parse_event(raw) {
            Ok(event) => self.ingest(event).await,
            Err(rejection) => self.inner.sink.reject(*rejection).await,
        }
    }

    /// Route an event to its session worker, spawning one if needed.
    pub async fn ingest(&self, event: PLDEvent) -> Result<()> {
        let session_id = event.session_id.clone();
        let sender = self.sender_for(&session_id);
        sender
            .send(WorkerMsg::Event(Box::new(event)))
            .await
            .map_err(|_| PldError::RouterChannel(session_id.to_string()))
    }

    pub fn active_sessions(&self) -> usize {
        self.inner.sessions.len()
    }

    /// Cancel a single session, discarding its buffered events and state.
    /// Other sessions are unaffected.
    pub fn cancel_session(&self, session_id: &SessionId) {
        if let Some((_, sender)) = self.inner.sessions.remove(session_id) {
            let _ = sender.try_send(WorkerMsg::Cancel);
            debug!(session_id = %session_id, "session cancelled");
        }
    }

    /// Flush every worker's reorder buffer and wait for them to stop.
    pub async fn shutdown(&self) {
        let _ = self.inner.shutdown_tx.send(true);
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.inner.handles.lock());
        for handle in handles {
            let _ = handle.await;
        }
        self.inner.sessions.clear();
    }

    fn sender_for(&self, session_id: &SessionId) -> mpsc::Sender<WorkerMsg> {
        use dashmap::mapref::entry::Entry;

        match self.inner.sessions.entry(session_id.clone()) {
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(entry) => {
                let (tx, rx) = mpsc::channel(self.inner.config.router.channel_capacity);
                entry.insert(tx.clone());

                let worker = SessionWorker::new(
                    session_id.clone(),
                    Arc::clone(&self.inner.registry),
                    &self.inner.config,
                    Arc::clone(&self.inner.sink),
                    Arc::clone(&self.inner.sessions),
                );
                let shutdown_rx = self.inner.shutdown_tx.subscribe();
                let handle = tokio::spawn(worker.run(rx, shutdown_rx));
                self.inner.handles.lock().push(handle);
                debug!(session_id = %session_id, "session worker spawned");
                tx
            }
        }
    }
}

/// Owns all mutable state for one session.
struct SessionWorker {
    session_id: SessionId,
    engine: PolicyEngine,
    validator: Validator,
    bridge: SignalBridge,
    mode: ValidationMode,
    buffer: BTreeMap<u32, PLDEvent>,
    window: usize,
    last_applied: Option<u32>,
    sink: Arc<dyn EventSink>,
    sessions: Arc<DashMap<SessionId, mpsc::Sender<WorkerMsg>>>,
}

impl SessionWorker {
    fn new(
        session_id: SessionId,
        registry: Arc<TaxonomyRegistry>,
        config: &RuntimeConfig,
        sink: Arc<dyn EventSink>,
        sessions: Arc<DashMap<SessionId, mpsc::Sender<WorkerMsg>>>,
    ) -> Self {
        Self {
            session_id,
            engine: PolicyEngine::new(config.policy.clone()),
            validator: Validator::with_schema_major(
                Arc::clone(&registry),
                config.validation.schema_major.clone(),
            ),
            bridge: SignalBridge::new(registry, config.validation.mode),
            mode: config.validation.mode,
            buffer: BTreeMap::new(),
            window: config.router.reorder_window,
            last_applied: None,
            sink,
            sessions,
        }
    }

    async fn run(
        mut self,
        mut rx: mpsc::Receiver<WorkerMsg>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                msg = rx.recv() => match msg {
                    Some(WorkerMsg::Event(event)) => self.enqueue(*event).await,
                    Some(WorkerMsg::Cancel) => {
                        // Discard outstanding state mid-transition.
                        debug!(session_id = %self.session_id, "worker cancelled, state discarded");
                        return;
                    }
                    None => {
                        self.flush().await;
                        break;
                    }
                },
                _ = shutdown.changed() => {
                    // Drain messages already queued before the signal, then
                    // flush the reorder buffer.
                    while let Ok(msg) = rx.try_recv() {
                        match msg {
                            WorkerMsg::Event(event) => self.enqueue(*event).await,
                            WorkerMsg::Cancel => return,
                        }
                    }
                    self.flush().await;
                    break;
                }
            }
        }
        self.sessions.remove(&self.session_id);
        debug!(session_id = %self.session_id, "session worker stopped");
    }

    /// Buffer the event and drain in turn order once the bounded window is
    /// exceeded. Stale and duplicate turns are dead-lettered immediately.
    async fn enqueue(&mut self, event: PLDEvent) {
        if let Some(last) = self.last_applied
            && event.turn_sequence <= last
        {
            self.reject(&event, "out_of_order", format!(
                "turn_sequence {} <= last applied {}",
                event.turn_sequence, last
            ))
            .await;
            return;
        }
        if self.buffer.contains_key(&event.turn_sequence) {
            self.reject(&event, "duplicate_turn", format!(
                "turn_sequence {} already buffered",
                event.turn_sequence
            ))
            .await;
            return;
        }

        self.buffer.insert(event.turn_sequence, event);
        while self.buffer.len() > self.window {
            if let Some((_, next)) = self.buffer.pop_first() {
                self.process(next).await;
            }
        }
    }

    async fn flush(&mut self) {
        while let Some((_, event)) = self.buffer.pop_first() {
            self.process(event).await;
        }
    }

    async fn process(&mut self, event: PLDEvent) {
        let result = self.validator.validate(&event, self.mode);
        if !result.is_valid {
            let message = result
                .violations
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            self.reject(&event, "semantic_violation", message).await;
            return;
        }
        let event = result.normalized.unwrap_or(event);

        let decision = self.engine.apply(&event);
        if decision.applied {
            self.last_applied = Some(event.turn_sequence);
        }

        if let Err(err) = self.sink.accept(&event).await {
            warn!(session_id = %self.session_id, error = %err, "sink accept failed");
        }

        // Control events the policy engine asked for (e.g. failover) are
        // emitted through the bridge so they pass the same gate as any
        // other event.
        if let Some(signal) = decision.emit {
            let context = EventContext::new(
                event.session_id.clone(),
                event.turn_sequence,
                EventSource::Controller,
            );
            match self.bridge.build_event(&signal, &context) {
                Ok(built) => {
                    if let Err(err) = self.sink.accept(&built.event).await {
                        warn!(session_id = %self.session_id, error = %err, "sink accept failed");
                    }
                }
                Err(err) => {
                    warn!(session_id = %self.session_id, error = %err, "control emission failed");
                }
            }
        }
    }

    async fn reject(&self, event: &PLDEvent, code: &str, message: String) {
        if let Err(err) = self
            .sink
            .reject(RejectionRecord::from_event(event, code, message))
            .await
        {
            warn!(session_id = %self.session_id, error = %err, "sink reject failed");
        }
    }
}
