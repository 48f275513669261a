//! Session workers: one task, one connection, one session.
//!
//! A [`SessionWorker`] is the affinity unit of the bridge. Its spawned task
//! owns the agent connection for the connection's entire life; nothing else
//! ever touches it. Requests cross into the task over a bounded inbound
//! queue and events come back on a per-request reply channel, so callers on
//! any task get strict FIFO service without sharing the connection.
//!
//! The task runs a small state machine ([`relay_core::WorkerState`]):
//! connect (`Starting`), then alternate `Ready`/`Busy` per request, ending in
//! `Stopped` on orderly shutdown or `Broken` on a connection-level fault. A
//! terminal worker drains its queue, failing each pending request with an
//! error plus the guaranteed `done`, and `Broken` workers announce
//! themselves for eviction.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use parking_lot::Mutex;
use relay_core::{RelayError, RelayEvent, TokenUsage, WorkerState};
use relay_settings::RelaySettings;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::connection::{AgentConnection, AgentConnector, ConnectOptions, MessageStream};

// ─────────────────────────────────────────────────────────────────────────────
// Options and request types
// ─────────────────────────────────────────────────────────────────────────────

/// Tuning knobs for one session worker.
#[derive(Clone, Debug)]
pub struct WorkerOptions {
    /// Per-request inactivity window; no message within it times the
    /// request out.
    pub request_timeout: Duration,
    /// Grace window for the agent to acknowledge an interrupt after a
    /// timeout before the worker is declared broken.
    pub cancel_grace: Duration,
    /// Bound on orderly shutdown before the task is cancelled outright.
    pub shutdown_timeout: Duration,
    /// Capacity of each request's reply channel.
    pub reply_capacity: usize,
    /// Capacity of the inbound request queue.
    pub inbound_capacity: usize,
    /// Parameters applied when opening the connection.
    pub connect: ConnectOptions,
}

impl WorkerOptions {
    /// Build worker options from loaded settings.
    #[must_use]
    pub fn from_settings(settings: &RelaySettings) -> Self {
        Self {
            request_timeout: Duration::from_millis(settings.worker.request_timeout_ms),
            cancel_grace: Duration::from_millis(settings.worker.cancel_grace_ms),
            shutdown_timeout: Duration::from_millis(settings.worker.shutdown_timeout_ms),
            reply_capacity: settings.worker.reply_capacity,
            inbound_capacity: settings.worker.inbound_capacity,
            connect: ConnectOptions::from_settings(settings),
        }
    }
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self::from_settings(&RelaySettings::default())
    }
}

/// One queued request: a prompt and the channel its events flow back on.
#[derive(Debug)]
pub struct WorkerRequest {
    /// The user prompt.
    pub prompt: String,
    /// Reply channel; closed when the request's event sequence is complete.
    pub reply: mpsc::Sender<RelayEvent>,
}

#[derive(Debug)]
enum Command {
    Request(WorkerRequest),
    Shutdown,
}

// ─────────────────────────────────────────────────────────────────────────────
// SessionWorker — the handle
// ─────────────────────────────────────────────────────────────────────────────

/// Handle to one session's worker task.
///
/// Cheap to clone behind an [`Arc`]; the task itself is owned by the tokio
/// runtime and observed through the state channel.
pub struct SessionWorker {
    session_id: String,
    inbound: mpsc::Sender<Command>,
    state: watch::Receiver<WorkerState>,
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
    last_active: Arc<Mutex<Instant>>,
    options: WorkerOptions,
}

impl SessionWorker {
    /// Spawn a worker for `session_id` and wait until its connection is up.
    ///
    /// Returns once the worker is `Ready`, or with the connect error if the
    /// transport could not be established (no worker survives that).
    pub async fn spawn(
        session_id: String,
        connector: Arc<dyn AgentConnector>,
        options: WorkerOptions,
        broken_tx: mpsc::UnboundedSender<String>,
    ) -> Result<Arc<Self>, RelayError> {
        let (inbound_tx, inbound_rx) = mpsc::channel(options.inbound_capacity);
        let (state_tx, state_rx) = watch::channel(WorkerState::Starting);
        let (ready_tx, ready_rx) = oneshot::channel();
        let cancel = CancellationToken::new();
        let last_active = Arc::new(Mutex::new(Instant::now()));

        let task = WorkerTask {
            session_id: session_id.clone(),
            connector,
            options: options.clone(),
            inbound: inbound_rx,
            state: state_tx,
            cancel: cancel.clone(),
            last_active: Arc::clone(&last_active),
            broken_tx,
        };
        let handle = tokio::spawn(task.run(ready_tx));

        match ready_rx.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => return Err(err),
            Err(_) => {
                return Err(RelayError::Connection(
                    "worker exited before becoming ready".into(),
                ));
            }
        }

        Ok(Arc::new(Self {
            session_id,
            inbound: inbound_tx,
            state: state_rx,
            cancel,
            handle: Mutex::new(Some(handle)),
            last_active,
            options,
        }))
    }

    /// The session this worker serves.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> WorkerState {
        *self.state.borrow()
    }

    /// A watch handle for observing state transitions.
    #[must_use]
    pub fn state_stream(&self) -> watch::Receiver<WorkerState> {
        self.state.clone()
    }

    /// Time since the last submitted or completed request.
    #[must_use]
    pub fn idle_for(&self) -> Duration {
        self.last_active.lock().elapsed()
    }

    /// Queue a prompt; events for it arrive on the returned channel.
    ///
    /// Fails when the worker has shut down; the caller is expected to evict
    /// this handle and spawn a replacement.
    pub async fn submit(&self, prompt: &str) -> Result<mpsc::Receiver<RelayEvent>, RelayError> {
        let (reply_tx, reply_rx) = mpsc::channel(self.options.reply_capacity);
        let request = WorkerRequest {
            prompt: prompt.to_owned(),
            reply: reply_tx,
        };
        self.inbound
            .send(Command::Request(request))
            .await
            .map_err(|_| {
                RelayError::Request(format!(
                    "worker for session {} is no longer accepting requests",
                    self.session_id
                ))
            })?;
        *self.last_active.lock() = Instant::now();
        Ok(reply_rx)
    }

    /// Stop the worker, bounding the wait at the shutdown timeout.
    ///
    /// The orderly path lets an in-flight request finish. If the task does
    /// not exit in time it is cancelled, and aborted as the last resort.
    pub async fn stop(&self) {
        if self.inbound.try_send(Command::Shutdown).is_err() {
            // Queue full or already closed; skip straight to cancellation.
            self.cancel.cancel();
        }
        let handle = self.handle.lock().take();
        if let Some(mut handle) = handle {
            if tokio::time::timeout(self.options.shutdown_timeout, &mut handle)
                .await
                .is_err()
            {
                tracing::warn!(session = %self.session_id, "orderly shutdown timed out, cancelling");
                self.cancel.cancel();
                if tokio::time::timeout(self.options.shutdown_timeout, &mut handle)
                    .await
                    .is_err()
                {
                    handle.abort();
                }
            }
        }
    }
}

impl std::fmt::Debug for SessionWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionWorker")
            .field("session_id", &self.session_id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// WorkerTask — the owning task
// ─────────────────────────────────────────────────────────────────────────────

enum ServeOutcome {
    Recovered,
    Broken,
}

struct WorkerTask {
    session_id: String,
    connector: Arc<dyn AgentConnector>,
    options: WorkerOptions,
    inbound: mpsc::Receiver<Command>,
    state: watch::Sender<WorkerState>,
    cancel: CancellationToken,
    last_active: Arc<Mutex<Instant>>,
    broken_tx: mpsc::UnboundedSender<String>,
}

impl WorkerTask {
    async fn run(mut self, ready: oneshot::Sender<Result<(), RelayError>>) {
        let mut conn = match self
            .connector
            .connect(&self.session_id, &self.options.connect)
            .await
        {
            Ok(conn) => conn,
            Err(err) => {
                tracing::warn!(session = %self.session_id, error = %err, "connect failed");
                self.set_state(WorkerState::Broken);
                let _ = ready.send(Err(err));
                return;
            }
        };
        self.set_state(WorkerState::Ready);
        let _ = ready.send(Ok(()));
        tracing::info!(session = %self.session_id, "session worker ready");

        let mut final_state = WorkerState::Stopped;
        loop {
            tokio::select! {
                () = self.cancel.cancelled() => break,
                command = self.inbound.recv() => match command {
                    Some(Command::Request(request)) => {
                        self.set_state(WorkerState::Busy);
                        let outcome = self.serve(conn.as_mut(), request).await;
                        *self.last_active.lock() = Instant::now();
                        match outcome {
                            ServeOutcome::Recovered => self.set_state(WorkerState::Ready),
                            ServeOutcome::Broken => {
                                final_state = WorkerState::Broken;
                                break;
                            }
                        }
                    }
                    Some(Command::Shutdown) | None => break,
                }
            }
        }

        // Fail anything still queued; every request gets its terminal event.
        self.inbound.close();
        while let Ok(command) = self.inbound.try_recv() {
            if let Command::Request(request) = command {
                Self::fail_unserved(&request).await;
            }
        }

        self.set_state(final_state);
        if final_state == WorkerState::Broken {
            metrics::counter!("relay_workers_broken_total").increment(1);
            let _ = self.broken_tx.send(self.session_id.clone());
        }
        if let Err(err) = conn.disconnect().await {
            tracing::warn!(session = %self.session_id, error = %err, "disconnect failed");
        }
        tracing::info!(session = %self.session_id, state = ?final_state, "session worker exited");
    }

    #[tracing::instrument(
        skip_all,
        fields(session = %self.session_id, request_id = %uuid::Uuid::now_v7())
    )]
    async fn serve(&self, conn: &mut dyn AgentConnection, request: WorkerRequest) -> ServeOutcome {
        metrics::counter!("relay_requests_total").increment(1);
        let WorkerRequest { prompt, reply } = request;
        let mut classifier = crate::classifier::Classifier::new();
        let mut reply = ReplyWriter::new(reply);

        let outcome = match conn.send(&prompt).await {
            Ok(stream) => self.drive_stream(conn, stream, &mut classifier, &mut reply).await,
            Err(err) => {
                tracing::warn!(error = %err, "request submission failed");
                reply.deliver(err.to_event()).await;
                if err.is_fatal() {
                    ServeOutcome::Broken
                } else {
                    ServeOutcome::Recovered
                }
            }
        };

        if let Some(done) = classifier.finish() {
            reply.deliver(done).await;
        }
        reply.flush().await;
        outcome
    }

    async fn drive_stream(
        &self,
        conn: &mut dyn AgentConnection,
        mut stream: MessageStream,
        classifier: &mut crate::classifier::Classifier,
        reply: &mut ReplyWriter,
    ) -> ServeOutcome {
        loop {
            match tokio::time::timeout(self.options.request_timeout, stream.next()).await {
                Err(_) => {
                    let timeout_ms = self.options.request_timeout.as_millis() as u64;
                    tracing::warn!(timeout_ms, "request timed out");
                    metrics::counter!("relay_request_timeouts_total").increment(1);
                    reply
                        .deliver(RelayError::Timeout { timeout_ms }.to_event())
                        .await;
                    // The caller gets its terminal event now; the interrupt
                    // handshake below only decides the worker's fate.
                    if let Some(done) = classifier.finish() {
                        reply.deliver(done).await;
                    }
                    reply.flush().await;
                    drop(stream);
                    return match tokio::time::timeout(self.options.cancel_grace, conn.interrupt())
                        .await
                    {
                        Ok(Ok(())) => ServeOutcome::Recovered,
                        Ok(Err(err)) => {
                            tracing::warn!(error = %err, "interrupt failed");
                            ServeOutcome::Broken
                        }
                        Err(_) => {
                            tracing::warn!("interrupt not acknowledged within grace window");
                            ServeOutcome::Broken
                        }
                    };
                }
                Ok(None) => return ServeOutcome::Recovered,
                Ok(Some(Err(err @ RelayError::Serialization(_)))) => {
                    // Malformed frames are logged and skipped, never fatal.
                    tracing::warn!(error = %err, "skipping malformed agent message");
                    metrics::counter!("relay_malformed_messages_total").increment(1);
                }
                Ok(Some(Err(err))) => {
                    tracing::warn!(error = %err, "agent stream error");
                    reply.deliver(err.to_event()).await;
                    return if err.is_fatal() {
                        ServeOutcome::Broken
                    } else {
                        ServeOutcome::Recovered
                    };
                }
                Ok(Some(Ok(message))) => {
                    if let Some(event) = classifier.classify(message) {
                        let terminal = event.is_terminal();
                        reply.deliver(event).await;
                        if terminal {
                            return ServeOutcome::Recovered;
                        }
                    }
                }
            }
        }
    }

    async fn fail_unserved(request: &WorkerRequest) {
        let err =
            RelayError::Request("session worker shut down before serving this request".into());
        let _ = request.reply.send(err.to_event()).await;
        let _ = request
            .reply
            .send(RelayEvent::Done {
                tokens_used: TokenUsage::default(),
                agents_used: vec![],
            })
            .await;
    }

    fn set_state(&self, next: WorkerState) {
        let current = *self.state.borrow();
        if current != next && current.can_transition_to(next) {
            let _ = self.state.send_replace(next);
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ReplyWriter — delivery with backpressure coalescing
// ─────────────────────────────────────────────────────────────────────────────

/// Writes events to a reply channel, coalescing consecutive same-channel
/// deltas while the receiver lags.
///
/// Non-delta events are always delivered individually, with an awaited send;
/// nothing is ever dropped. A delta is first attempted opportunistically
/// (`try_send`); when the channel is full it is parked and later deltas of
/// the same kind merge into it, so a slow reader sees fewer, larger
/// fragments with identical concatenation.
struct ReplyWriter {
    tx: mpsc::Sender<RelayEvent>,
    pending: Option<RelayEvent>,
}

impl ReplyWriter {
    fn new(tx: mpsc::Sender<RelayEvent>) -> Self {
        Self { tx, pending: None }
    }

    async fn deliver(&mut self, event: RelayEvent) {
        if event.is_delta() {
            if let Some(parked) = self.pending.as_mut() {
                if parked.coalesce(&event) {
                    metrics::counter!("relay_deltas_coalesced_total").increment(1);
                    self.try_flush();
                    return;
                }
            }
            self.flush().await;
            self.pending = Some(event);
            self.try_flush();
        } else {
            self.flush().await;
            let _ = self.tx.send(event).await;
        }
    }

    fn try_flush(&mut self) {
        if let Some(event) = self.pending.take() {
            match self.tx.try_send(event) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(event)) => self.pending = Some(event),
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
    }

    async fn flush(&mut self) {
        if let Some(event) = self.pending.take() {
            let _ = self.tx.send(event).await;
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
