//! Server-Sent Events support

use crate::bot::{RelayEvent, RelayEventKind};
use crate::session::SessionKey;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use serde_json::json;
use std::convert::Infallible;
use std::time::Duration;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

/// Stream the events of one conversation; `broadcast_rx` is that
/// conversation's own channel
pub fn sse_stream(
    key: SessionKey,
    broadcast_rx: tokio::sync::broadcast::Receiver<RelayEvent>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let init_event = Event::default().event("init").data(
        json!({
            "type": "init",
            "user": key.user,
            "conversation": key.conversation,
        })
        .to_string(),
    );
    let init = futures::stream::once(async move { Ok(init_event) });

    let events = BroadcastStream::new(broadcast_rx).filter_map(|result| match result {
        Ok(event) => Some(Ok(relay_event_to_axum(event.kind))),
        Err(_) => None, // Skip lagged messages
    });

    Sse::new(init.chain(events)).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}

fn relay_event_to_axum(kind: RelayEventKind) -> Event {
    let (event_type, data) = match kind {
        RelayEventKind::Processing { workflow } => (
            "processing",
            json!({
                "type": "processing",
                "workflow": workflow
            }),
        ),
        RelayEventKind::Reply(reply) => (
            "reply",
            json!({
                "type": "reply",
                "reply": reply
            }),
        ),
    };

    Event::default().event(event_type).data(data.to_string())
}
