//! Outward event delivery as newline-delimited JSON frames.
//!
//! The sink is deliberately dumb: one event in, one frame out, in order.
//! All classification and deduplication happened upstream, so any transport
//! that can carry framed text (a socket, a pipe, an HTTP response body) can
//! sit behind it.

use std::io;

use relay_core::RelayEvent;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

/// Writes events to an async byte sink, one JSON object per line.
pub struct EventSink<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> EventSink<W> {
    /// Wrap a writer.
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Emit one event as a framed line and flush it.
    pub async fn emit(&mut self, event: &RelayEvent) -> io::Result<()> {
        let mut line = serde_json::to_vec(event)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        line.push(b'\n');
        self.writer.write_all(&line).await?;
        self.writer.flush().await
    }

    /// Unwrap the inner writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

/// Forward one request's events into a sink.
///
/// Stops after the terminal event, or when the channel closes early, and
/// returns the number of frames written.
pub async fn forward_events<W: AsyncWrite + Unpin>(
    mut events: mpsc::Receiver<RelayEvent>,
    sink: &mut EventSink<W>,
) -> io::Result<usize> {
    let mut written = 0;
    while let Some(event) = events.recv().await {
        let terminal = event.is_terminal();
        sink.emit(&event).await?;
        written += 1;
        if terminal {
            break;
        }
    }
    Ok(written)
}
