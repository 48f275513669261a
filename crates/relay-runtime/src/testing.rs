//! Scripted connector shared by the runtime's unit tests.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use relay_core::{
    AgentMessage, BlockContent, DeltaChannel, RelayError, RelayEvent, TokenUsage,
};
use tokio::sync::mpsc;

use crate::connection::{AgentConnection, AgentConnector, ConnectOptions, MessageStream};

/// What one `send` call on a scripted connection produces.
pub enum Script {
    /// A finite stream of messages.
    Messages(Vec<Result<AgentMessage, RelayError>>),
    /// A stream that never yields.
    Hang,
    /// `send` itself fails.
    SendError(RelayError),
}

/// Connector whose connections replay scripts in order, one per `send`.
pub struct ScriptedConnector {
    scripts: Arc<Mutex<VecDeque<Script>>>,
    connects: Arc<AtomicUsize>,
    fail_connect: bool,
    hang_interrupt: bool,
    log: Arc<Mutex<Vec<String>>>,
}

impl ScriptedConnector {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Arc::new(Mutex::new(scripts.into())),
            connects: Arc::new(AtomicUsize::new(0)),
            fail_connect: false,
            hang_interrupt: false,
            log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Every connect attempt fails with a connection error.
    pub fn failing_connect(mut self) -> Self {
        self.fail_connect = true;
        self
    }

    /// `interrupt` never acknowledges.
    pub fn hanging_interrupt(mut self) -> Self {
        self.hang_interrupt = true;
        self
    }

    /// Shared call log; hold a clone before handing the connector off.
    pub fn log(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.log)
    }

    /// Shared connect counter; hold a clone before handing the connector off.
    pub fn connect_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.connects)
    }
}

#[async_trait]
impl AgentConnector for ScriptedConnector {
    async fn connect(
        &self,
        session_id: &str,
        _options: &ConnectOptions,
    ) -> Result<Box<dyn AgentConnection>, RelayError> {
        let _ = self.connects.fetch_add(1, Ordering::SeqCst);
        if self.fail_connect {
            return Err(RelayError::Connection(format!(
                "refused connection for {session_id}"
            )));
        }
        self.log.lock().push(format!("connect:{session_id}"));
        Ok(Box::new(ScriptedConnection {
            scripts: Arc::clone(&self.scripts),
            hang_interrupt: self.hang_interrupt,
            log: Arc::clone(&self.log),
        }))
    }
}

struct ScriptedConnection {
    scripts: Arc<Mutex<VecDeque<Script>>>,
    hang_interrupt: bool,
    log: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl AgentConnection for ScriptedConnection {
    async fn send(&mut self, prompt: &str) -> Result<MessageStream, RelayError> {
        self.log.lock().push(format!("send:{prompt}"));
        let script = self
            .scripts
            .lock()
            .pop_front()
            .unwrap_or(Script::Messages(vec![]));
        match script {
            Script::SendError(err) => Err(err),
            Script::Messages(items) => Ok(Box::pin(futures::stream::iter(items))),
            Script::Hang => Ok(Box::pin(futures::stream::pending::<
                Result<AgentMessage, RelayError>,
            >())),
        }
    }

    async fn interrupt(&mut self) -> Result<(), RelayError> {
        self.log.lock().push("interrupt".into());
        if self.hang_interrupt {
            futures::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), RelayError> {
        self.log.lock().push("disconnect".into());
        Ok(())
    }
}

/// Drain a reply channel up to and including the terminal event.
pub async fn collect_events(mut rx: mpsc::Receiver<RelayEvent>) -> Vec<RelayEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        let terminal = event.is_terminal();
        events.push(event);
        if terminal {
            break;
        }
    }
    events
}

pub fn delta(channel: DeltaChannel, text: &str) -> AgentMessage {
    AgentMessage::PartialDelta {
        channel,
        text: text.into(),
        parent_task: None,
    }
}

pub fn text_block(text: &str) -> AgentMessage {
    AgentMessage::CompletedBlock {
        block: BlockContent::Text { text: text.into() },
        parent_task: None,
    }
}

pub fn terminal(input: u64, output: u64) -> AgentMessage {
    AgentMessage::Terminal {
        usage: TokenUsage { input, output },
    }
}
