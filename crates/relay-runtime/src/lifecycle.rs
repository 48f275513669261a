//! Background lifecycle management: broken-worker eviction and idle sweep.
//!
//! One task per registry. It reacts immediately to broken-worker
//! announcements and periodically evicts sessions that sat idle past the
//! configured window, so abandoned conversations release their connections.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::registry::SessionRegistry;

/// How often the idle sweep runs.
const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Owner of the background lifecycle task.
pub struct LifecycleManager {
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl LifecycleManager {
    /// Spawn the lifecycle task for `registry`.
    ///
    /// `broken_rx` is the receiver half returned by
    /// [`SessionRegistry::new`].
    #[must_use]
    pub fn spawn(
        registry: Arc<SessionRegistry>,
        mut broken_rx: mpsc::UnboundedReceiver<String>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            let mut sweep = tokio::time::interval(SWEEP_INTERVAL);
            sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    broken = broken_rx.recv() => match broken {
                        Some(session_id) => registry.evict_broken(&session_id).await,
                        None => break,
                    },
                    _ = sweep.tick() => {
                        for session_id in registry.idle_sessions() {
                            tracing::info!(session = %session_id, "evicting idle session");
                            metrics::counter!("relay_idle_evictions_total").increment(1);
                            let _ = registry.remove(&session_id).await;
                        }
                    }
                }
            }
        });
        Self {
            cancel,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Stop the lifecycle task and shut every session down.
    pub async fn shutdown(&self, registry: &SessionRegistry) {
        self.cancel.cancel();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        registry.shutdown_all().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Script, ScriptedConnector, collect_events, terminal, text_block};
    use relay_core::RelayError;
    use relay_settings::RelaySettings;

    fn test_settings() -> RelaySettings {
        let mut settings = RelaySettings::default();
        settings.worker.shutdown_timeout_ms = 200;
        settings
    }

    #[tokio::test]
    async fn broken_workers_evicted_eagerly() {
        let connector = ScriptedConnector::new(vec![Script::Messages(vec![Err(
            RelayError::Connection("transport died".into()),
        )])]);
        let (registry, broken_rx) = SessionRegistry::new(Arc::new(connector), &test_settings());
        let manager = LifecycleManager::spawn(Arc::clone(&registry), broken_rx);

        let worker = registry.get_or_create("sess-1").await.unwrap();
        let _ = collect_events(registry.dispatch("sess-1", "boom").await.unwrap()).await;
        let _ = worker
            .state_stream()
            .wait_for(|s| s.is_terminal())
            .await
            .unwrap();

        // The manager reacts to the broken announcement without any caller
        // touching the session again.
        while registry.active_count() > 0 {
            tokio::task::yield_now().await;
        }
        assert!(registry.session("sess-1").is_some(), "session record survives");

        manager.shutdown(&registry).await;
    }

    #[tokio::test(start_paused = true)]
    async fn idle_sessions_swept() {
        let mut settings = test_settings();
        settings.worker.idle_timeout_ms = 1_000;
        let connector = ScriptedConnector::new(vec![Script::Messages(vec![
            Ok(text_block("hi")),
            Ok(terminal(1, 1)),
        ])]);
        let (registry, broken_rx) = SessionRegistry::new(Arc::new(connector), &settings);
        let manager = LifecycleManager::spawn(Arc::clone(&registry), broken_rx);

        let _ = collect_events(registry.dispatch("sess-1", "hi").await.unwrap()).await;
        assert_eq!(registry.active_count(), 1);

        // Past the idle window plus a sweep interval the session is gone.
        tokio::time::advance(SWEEP_INTERVAL + Duration::from_secs(2)).await;
        while registry.active_count() > 0 {
            tokio::task::yield_now().await;
        }
        assert!(registry.session("sess-1").is_none());

        manager.shutdown(&registry).await;
    }

    #[tokio::test]
    async fn shutdown_stops_registry_sessions() {
        let (registry, broken_rx) =
            SessionRegistry::new(Arc::new(ScriptedConnector::new(vec![])), &test_settings());
        let manager = LifecycleManager::spawn(Arc::clone(&registry), broken_rx);

        let _ = registry.get_or_create("sess-1").await.unwrap();
        manager.shutdown(&registry).await;
        assert_eq!(registry.active_count(), 0);
    }
}
