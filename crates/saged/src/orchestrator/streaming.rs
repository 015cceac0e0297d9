//! Stream event multiplexing.
//!
//! One sink per chat run. The sink maps orchestrator signals 1:1 onto
//! [`StreamEvent`]s, preserving emission order on a single channel, and
//! enforces two invariants the rest of the system relies on:
//!
//! - empty text deltas are suppressed (never forwarded to the client)
//! - exactly one terminal event per stream: after `done` or `error` has
//!   been emitted, every further event is silently dropped
//!
//! The receiving half is framed as Server-Sent Events by [`sse_response`].
//! When the client disconnects the receiver is dropped, sends start
//! failing, and the orchestrator observes [`SinkClosed`] and stops.

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use sage_common::StreamEvent;
use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;

/// The stream's receiving half is gone; the client disconnected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("stream receiver dropped")]
pub struct SinkClosed;

/// Ordered, single-terminal event sink for one chat run.
pub trait StreamSink: Send + Sync {
    /// Emit one event. Returns [`SinkClosed`] once the client is gone so
    /// callers can stop producing promptly.
    fn emit(&self, event: StreamEvent) -> Result<(), SinkClosed>;

    /// Whether the receiving half is gone. Lets the orchestrator stop
    /// between rounds instead of discovering the disconnect on the next
    /// delta.
    fn is_closed(&self) -> bool;

    fn delta(&self, content: &str) -> Result<(), SinkClosed> {
        self.emit(StreamEvent::delta(content))
    }

    fn done(&self) -> Result<(), SinkClosed> {
        self.emit(StreamEvent::Done)
    }

    fn error(&self, message: &str) -> Result<(), SinkClosed> {
        self.emit(StreamEvent::error(message))
    }
}

/// Sink backed by an unbounded tokio channel.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<StreamEvent>,
    terminal_sent: AtomicBool,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<StreamEvent>) -> Self {
        Self {
            tx,
            terminal_sent: AtomicBool::new(false),
        }
    }

    /// Create a sink together with its receiving half.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<StreamEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    /// Whether a terminal event has been emitted on this sink.
    pub fn terminated(&self) -> bool {
        self.terminal_sent.load(Ordering::SeqCst)
    }
}

impl StreamSink for ChannelSink {
    fn emit(&self, event: StreamEvent) -> Result<(), SinkClosed> {
        if let StreamEvent::Delta { content } = &event {
            if content.is_empty() {
                return Ok(());
            }
        }
        // Latch on the first terminal event; everything after is dropped.
        if self.terminal_sent.load(Ordering::SeqCst) {
            return Ok(());
        }
        let terminal = event.is_terminal();
        self.tx.send(event).map_err(|_| SinkClosed)?;
        if terminal {
            self.terminal_sent.store(true, Ordering::SeqCst);
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Test sink that records every event it accepts. Mirrors ChannelSink's
/// suppression and latching so engine tests observe exactly what a client
/// would.
#[derive(Default)]
pub struct CollectSink {
    events: std::sync::Mutex<Vec<StreamEvent>>,
    terminal_sent: AtomicBool,
    closed: AtomicBool,
}

impl CollectSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a client disconnect: subsequent emits fail.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<StreamEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Concatenated delta text, as a client would reassemble it.
    pub fn answer_text(&self) -> String {
        self.events()
            .iter()
            .filter_map(|ev| match ev {
                StreamEvent::Delta { content } => Some(content.as_str()),
                _ => None,
            })
            .collect()
    }
}

impl StreamSink for CollectSink {
    fn emit(&self, event: StreamEvent) -> Result<(), SinkClosed> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SinkClosed);
        }
        if let StreamEvent::Delta { content } = &event {
            if content.is_empty() {
                return Ok(());
            }
        }
        if self.terminal_sent.load(Ordering::SeqCst) {
            return Ok(());
        }
        let terminal = event.is_terminal();
        self.events.lock().unwrap().push(event);
        if terminal {
            self.terminal_sent.store(true, Ordering::SeqCst);
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

const SERIALIZE_FAILURE_FRAME: &str = r#"{"type":"error","content":"Something went wrong. Please try again."}"#;

/// Frame a stream of events as an SSE response.
pub fn sse_response(
    rx: mpsc::UnboundedReceiver<StreamEvent>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = UnboundedReceiverStream::new(rx).map(|event| {
        let payload = serde_json::to_string(&event)
            .unwrap_or_else(|_| SERIALIZE_FAILURE_FRAME.to_string());
        Ok(Event::default().data(payload))
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}
