//! The session registry: session id → live worker.
//!
//! The registry is the only way callers reach a worker, which is what makes
//! the affinity invariant hold globally: at most one live worker per session
//! id. Creation is double-checked under a per-id async lock so concurrent
//! first requests for the same session produce exactly one worker, while
//! unrelated sessions never contend. Workers in a terminal state are evicted
//! lazily on lookup and eagerly by the lifecycle manager.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use relay_core::{RelayError, RelayEvent, Session, WorkerState};
use relay_settings::RelaySettings;
use tokio::sync::mpsc;

use crate::connection::AgentConnector;
use crate::worker::{SessionWorker, WorkerOptions};

/// Registry of live session workers.
pub struct SessionRegistry {
    connector: Arc<dyn AgentConnector>,
    options: WorkerOptions,
    max_sessions: usize,
    idle_timeout: Duration,
    workers: DashMap<String, Arc<SessionWorker>>,
    creation_locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    sessions: DashMap<String, Session>,
    broken_tx: mpsc::UnboundedSender<String>,
}

impl SessionRegistry {
    /// Create a registry and the channel broken workers announce on.
    ///
    /// The receiver is meant for a [`LifecycleManager`](crate::lifecycle::LifecycleManager);
    /// dropping it instead simply disables eager eviction.
    pub fn new(
        connector: Arc<dyn AgentConnector>,
        settings: &RelaySettings,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<String>) {
        let (broken_tx, broken_rx) = mpsc::unbounded_channel();
        let registry = Arc::new(Self {
            connector,
            options: WorkerOptions::from_settings(settings),
            max_sessions: settings.worker.max_sessions,
            idle_timeout: Duration::from_millis(settings.worker.idle_timeout_ms),
            workers: DashMap::new(),
            creation_locks: DashMap::new(),
            sessions: DashMap::new(),
            broken_tx,
        });
        (registry, broken_rx)
    }

    /// Return the live worker for `session_id`, creating one if needed.
    pub async fn get_or_create(&self, session_id: &str) -> Result<Arc<SessionWorker>, RelayError> {
        if let Some(worker) = self.live_worker(session_id) {
            return Ok(worker);
        }
        let lock = self.creation_lock(session_id);
        let _guard = lock.lock().await;
        // Double-check: another caller may have finished creating while we
        // waited on the lock.
        if let Some(worker) = self.live_worker(session_id) {
            return Ok(worker);
        }
        if self.workers.len() >= self.max_sessions {
            self.evict_terminal_workers();
            if self.workers.len() >= self.max_sessions {
                return Err(RelayError::Request(format!(
                    "session limit of {} reached",
                    self.max_sessions
                )));
            }
        }
        let worker = SessionWorker::spawn(
            session_id.to_owned(),
            Arc::clone(&self.connector),
            self.options.clone(),
            self.broken_tx.clone(),
        )
        .await?;
        let _ = self.workers.insert(session_id.to_owned(), Arc::clone(&worker));
        let _ = self
            .sessions
            .entry(session_id.to_owned())
            .or_insert_with(|| Session::new(session_id));
        metrics::gauge!("relay_sessions_active").set(self.workers.len() as f64);
        tracing::info!(session = %session_id, "session worker registered");
        Ok(worker)
    }

    /// Dispatch one prompt to a session, returning its event channel.
    ///
    /// A worker that shut down between lookup and submission is evicted and
    /// replaced once; the request is never silently lost.
    pub async fn dispatch(
        &self,
        session_id: &str,
        prompt: &str,
    ) -> Result<mpsc::Receiver<RelayEvent>, RelayError> {
        let worker = self.get_or_create(session_id).await?;
        self.touch(session_id);
        match worker.submit(prompt).await {
            Ok(rx) => Ok(rx),
            Err(_) => {
                self.evict(session_id, &worker);
                let worker = self.get_or_create(session_id).await?;
                worker.submit(prompt).await
            }
        }
    }

    /// Remove a session and stop its worker. Idempotent.
    ///
    /// Returns whether anything was removed.
    pub async fn remove(&self, session_id: &str) -> bool {
        let lock = self.creation_lock(session_id);
        let _guard = lock.lock().await;
        let removed_session = self.sessions.remove(session_id).is_some();
        let worker = self.workers.remove(session_id).map(|(_, worker)| worker);
        let _ = self.creation_locks.remove(session_id);
        metrics::gauge!("relay_sessions_active").set(self.workers.len() as f64);
        match worker {
            Some(worker) => {
                worker.stop().await;
                tracing::info!(session = %session_id, "session removed");
                true
            }
            None => removed_session,
        }
    }

    /// Evict a worker that reported itself broken.
    ///
    /// The session record survives so the next request gets a fresh worker
    /// under the same id.
    pub async fn evict_broken(&self, session_id: &str) {
        let worker = self
            .workers
            .get(session_id)
            .map(|entry| Arc::clone(entry.value()));
        if let Some(worker) = worker {
            if worker.state() == WorkerState::Broken {
                self.evict(session_id, &worker);
                worker.stop().await;
                tracing::warn!(session = %session_id, "broken session worker evicted");
            }
        }
    }

    /// Session ids whose workers are ready and idle past the given window.
    #[must_use]
    pub fn idle_sessions(&self) -> Vec<String> {
        self.workers
            .iter()
            .filter(|entry| {
                entry.value().state() == WorkerState::Ready
                    && entry.value().idle_for() >= self.idle_timeout
            })
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Stop every worker and clear the registry.
    pub async fn shutdown_all(&self) {
        let ids: Vec<String> = self.workers.iter().map(|entry| entry.key().clone()).collect();
        let _ = futures::future::join_all(ids.iter().map(|id| self.remove(id))).await;
    }

    /// Snapshot of one session's record.
    #[must_use]
    pub fn session(&self, session_id: &str) -> Option<Session> {
        self.sessions.get(session_id).map(|entry| entry.value().clone())
    }

    /// Snapshot of all session records.
    #[must_use]
    pub fn sessions(&self) -> Vec<Session> {
        self.sessions.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Number of registered workers, terminal ones included until evicted.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.workers.len()
    }

    fn creation_lock(&self, session_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.creation_locks
            .entry(session_id.to_owned())
            .or_default()
            .clone()
    }

    fn live_worker(&self, session_id: &str) -> Option<Arc<SessionWorker>> {
        let worker = self
            .workers
            .get(session_id)
            .map(|entry| Arc::clone(entry.value()))?;
        if worker.state().is_terminal() {
            self.evict(session_id, &worker);
            None
        } else {
            Some(worker)
        }
    }

    fn evict(&self, session_id: &str, worker: &Arc<SessionWorker>) {
        // Guard against racing a replacement worker registered under the
        // same id.
        let _ = self
            .workers
            .remove_if(session_id, |_, current| Arc::ptr_eq(current, worker));
        metrics::gauge!("relay_sessions_active").set(self.workers.len() as f64);
    }

    fn evict_terminal_workers(&self) {
        self.workers
            .retain(|_, worker| !worker.state().is_terminal());
        metrics::gauge!("relay_sessions_active").set(self.workers.len() as f64);
    }

    fn touch(&self, session_id: &str) {
        if let Some(mut session) = self.sessions.get_mut(session_id) {
            session.touch();
        }
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("active", &self.workers.len())
            .field("max_sessions", &self.max_sessions)
            .finish_non_exhaustive()
    }
}
