//! Server-Sent Events for streamed replies

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::{self, Stream, StreamExt};
use serde_json::json;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;

/// Events of a streamed reply
#[derive(Debug, Clone, PartialEq)]
pub enum ReplyEvent {
    Chunk(String),
    /// The full reply, sent once after the last chunk
    Done(String),
    Error(String),
}

/// Stream reply fragments, then the turn's outcome
///
/// `chunks` closes when the turn drops its sink; `outcome` resolves after
/// that with the full text or the error message.
pub fn reply_stream(
    chunks: mpsc::Receiver<String>,
    outcome: oneshot::Receiver<Result<String, String>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let events = reply_events(chunks, outcome).map(|event| Ok(reply_event_to_axum(event)));

    Sse::new(events).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}

fn reply_events(
    chunks: mpsc::Receiver<String>,
    outcome: oneshot::Receiver<Result<String, String>>,
) -> impl Stream<Item = ReplyEvent> {
    let fragments = ReceiverStream::new(chunks).map(ReplyEvent::Chunk);
    let last = stream::once(async move {
        match outcome.await {
            Ok(Ok(text)) => ReplyEvent::Done(text),
            Ok(Err(message)) => ReplyEvent::Error(message),
            Err(_) => ReplyEvent::Error("Turn ended without a result".to_string()),
        }
    });
    fragments.chain(last)
}

fn reply_event_to_axum(event: ReplyEvent) -> Event {
    let (event_type, data) = match event {
        ReplyEvent::Chunk(text) => ("chunk", json!({"type": "chunk", "text": text})),
        ReplyEvent::Done(text) => ("done", json!({"type": "done", "text": text})),
        ReplyEvent::Error(message) => ("error", json!({"type": "error", "message": message})),
    };

    Event::default().event(event_type).data(data.to_string())
}
