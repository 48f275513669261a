//! End-to-end flows through the public runtime surface: registry in,
//! JSON-line frames out.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use relay_core::{
    AgentMessage, BlockContent, DeltaChannel, RelayError, SubTaskPhase, TokenUsage,
};
use relay_runtime::{
    AgentConnection, AgentConnector, ConnectOptions, EventSink, LifecycleManager, MessageStream,
    SessionRegistry, forward_events,
};
use relay_settings::RelaySettings;

// ─────────────────────────────────────────────────────────────────────────────
// Replay connector
// ─────────────────────────────────────────────────────────────────────────────

type ScriptItems = Vec<Result<AgentMessage, RelayError>>;

struct ReplayConnector {
    scripts: Arc<Mutex<VecDeque<ScriptItems>>>,
    connects: Arc<AtomicUsize>,
    /// Delay between replayed messages; zero replays them back-to-back.
    pacing: Duration,
}

impl ReplayConnector {
    fn new(scripts: Vec<ScriptItems>) -> Self {
        Self {
            scripts: Arc::new(Mutex::new(scripts.into())),
            connects: Arc::new(AtomicUsize::new(0)),
            pacing: Duration::ZERO,
        }
    }

    fn paced(mut self, pacing: Duration) -> Self {
        self.pacing = pacing;
        self
    }

    fn connect_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.connects)
    }
}

#[async_trait]
impl AgentConnector for ReplayConnector {
    async fn connect(
        &self,
        _session_id: &str,
        _options: &ConnectOptions,
    ) -> Result<Box<dyn AgentConnection>, RelayError> {
        let _ = self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ReplayConnection {
            scripts: Arc::clone(&self.scripts),
            pacing: self.pacing,
        }))
    }
}

struct ReplayConnection {
    scripts: Arc<Mutex<VecDeque<ScriptItems>>>,
    pacing: Duration,
}

#[async_trait]
impl AgentConnection for ReplayConnection {
    async fn send(&mut self, _prompt: &str) -> Result<MessageStream, RelayError> {
        let items = self.scripts.lock().pop_front().unwrap_or_default();
        let pacing = self.pacing;
        Ok(Box::pin(async_stream::stream! {
            for item in items {
                if pacing > Duration::ZERO {
                    tokio::time::sleep(pacing).await;
                }
                yield item;
            }
        }))
    }

    async fn interrupt(&mut self) -> Result<(), RelayError> {
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), RelayError> {
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn delta(text: &str) -> Result<AgentMessage, RelayError> {
    Ok(AgentMessage::PartialDelta {
        channel: DeltaChannel::Text,
        text: text.into(),
        parent_task: None,
    })
}

fn text_block(text: &str) -> Result<AgentMessage, RelayError> {
    Ok(AgentMessage::CompletedBlock {
        block: BlockContent::Text { text: text.into() },
        parent_task: None,
    })
}

fn terminal(input: u64, output: u64) -> Result<AgentMessage, RelayError> {
    Ok(AgentMessage::Terminal {
        usage: TokenUsage { input, output },
    })
}

fn test_settings() -> RelaySettings {
    let mut settings = RelaySettings::default();
    settings.worker.request_timeout_ms = 2_000;
    settings.worker.shutdown_timeout_ms = 500;
    settings
}

async fn frames_for(
    registry: &SessionRegistry,
    session_id: &str,
    prompt: &str,
) -> Vec<serde_json::Value> {
    let events = registry.dispatch(session_id, prompt).await.unwrap();
    let mut sink = EventSink::new(Vec::new());
    let _ = forward_events(events, &mut sink).await.unwrap();
    String::from_utf8(sink.into_inner())
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Flows
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn prompt_to_framed_reply() {
    let connector = ReplayConnector::new(vec![vec![
        delta("Item A, "),
        delta("Item B"),
        text_block("Item A, Item B"),
        terminal(10, 5),
    ]]);
    let (registry, _broken) = SessionRegistry::new(Arc::new(connector), &test_settings());

    let frames = frames_for(&registry, "sess-1", "List open items").await;

    // Deltas streamed, the covering block was suppressed, done closed it out.
    let text: String = frames
        .iter()
        .filter(|f| f["type"] == "text")
        .map(|f| f["text"].as_str().unwrap().to_owned())
        .collect();
    assert_eq!(text, "Item A, Item B");

    let done = frames.last().unwrap();
    assert_eq!(done["type"], "done");
    assert_eq!(done["tokens_used"]["input"], 10);
    assert_eq!(done["tokens_used"]["output"], 5);
    assert_eq!(done["agents_used"], serde_json::json!([]));

    registry.shutdown_all().await;
}

#[tokio::test]
async fn delegation_surfaces_as_agent_activity() {
    let mut params = serde_json::Map::new();
    let _ = params.insert("subagent_type".into(), "research".into());
    let _ = params.insert("description".into(), "find feedback".into());
    let connector = ReplayConnector::new(vec![vec![
        Ok(AgentMessage::CompletedBlock {
            block: BlockContent::ToolInvocation {
                name: "Task".into(),
                params,
            },
            parent_task: None,
        }),
        // Output produced inside the sub-task stays internal.
        Ok(AgentMessage::PartialDelta {
            channel: DeltaChannel::Text,
            text: "internal notes".into(),
            parent_task: Some("task-1".into()),
        }),
        Ok(AgentMessage::SubTask {
            phase: SubTaskPhase::Stopped,
            agent: "research".into(),
            task: "find feedback".into(),
            task_id: "task-1".into(),
        }),
        text_block("Feedback summarized."),
        terminal(20, 8),
    ]]);
    let (registry, _broken) = SessionRegistry::new(Arc::new(connector), &test_settings());

    let frames = frames_for(&registry, "sess-1", "Summarize feedback").await;

    let kinds: Vec<&str> = frames.iter().map(|f| f["type"].as_str().unwrap()).collect();
    assert_eq!(kinds, ["agent_activity", "agent_activity", "text", "done"]);
    assert_eq!(frames[0]["status"], "running");
    assert_eq!(frames[1]["status"], "completed");
    assert!(frames.iter().all(|f| f["type"] != "text" || f["text"] != "internal notes"));
    assert_eq!(frames[3]["agents_used"], serde_json::json!(["research"]));

    registry.shutdown_all().await;
}

#[tokio::test]
async fn session_affinity_across_paced_requests() {
    let connector = ReplayConnector::new(vec![
        vec![text_block("first"), terminal(1, 1)],
        vec![text_block("second"), terminal(1, 1)],
    ])
    .paced(Duration::from_millis(5));
    let connects = connector.connect_counter();
    let (registry, _broken) = SessionRegistry::new(Arc::new(connector), &test_settings());

    let frames = frames_for(&registry, "sess-1", "one").await;
    assert_eq!(frames[0]["text"], "first");
    let frames = frames_for(&registry, "sess-1", "two").await;
    assert_eq!(frames[0]["text"], "second");

    // Both requests rode the same connection.
    assert_eq!(connects.load(Ordering::SeqCst), 1);
    registry.shutdown_all().await;
}

#[tokio::test]
async fn queued_requests_complete_in_submission_order() {
    let connector = ReplayConnector::new(vec![
        vec![text_block("first"), terminal(1, 1)],
        vec![text_block("second"), terminal(1, 1)],
    ]);
    let (registry, _broken) = SessionRegistry::new(Arc::new(connector), &test_settings());

    // Submit both before reading either; the worker serves them FIFO.
    let rx_a = registry.dispatch("sess-1", "one").await.unwrap();
    let rx_b = registry.dispatch("sess-1", "two").await.unwrap();

    let mut sink_a = EventSink::new(Vec::new());
    let mut sink_b = EventSink::new(Vec::new());
    let _ = forward_events(rx_a, &mut sink_a).await.unwrap();
    let _ = forward_events(rx_b, &mut sink_b).await.unwrap();

    assert!(String::from_utf8(sink_a.into_inner()).unwrap().contains("first"));
    assert!(String::from_utf8(sink_b.into_inner()).unwrap().contains("second"));
    registry.shutdown_all().await;
}

#[tokio::test]
async fn broken_session_recovers_with_fresh_worker() {
    let connector = ReplayConnector::new(vec![
        vec![Err(RelayError::Connection("transport died".into()))],
        vec![text_block("recovered"), terminal(1, 1)],
    ]);
    let connects = connector.connect_counter();
    let (registry, broken_rx) = SessionRegistry::new(Arc::new(connector), &test_settings());
    let manager = LifecycleManager::spawn(Arc::clone(&registry), broken_rx);

    let worker = registry.get_or_create("sess-1").await.unwrap();
    let frames = frames_for(&registry, "sess-1", "boom").await;
    assert_eq!(frames[0]["type"], "error");
    assert_eq!(frames[0]["recoverable"], false);
    assert_eq!(frames.last().unwrap()["type"], "done");
    let _ = worker
        .state_stream()
        .wait_for(|s| s.is_terminal())
        .await
        .unwrap();

    // The next request on the same session id transparently gets a new
    // worker and connection.
    let frames = frames_for(&registry, "sess-1", "again").await;
    assert_eq!(frames[0]["text"], "recovered");
    assert_eq!(connects.load(Ordering::SeqCst), 2);

    manager.shutdown(&registry).await;
}
