use std::convert::Infallible;
use std::time::Duration;

use axum::extract::State;
use axum::response::Sse;
use axum::response::sse::{Event, KeepAlive};
use bytes::Bytes;
use futures::stream::Stream;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::warn;

use crate::config::SSE_KEEPALIVE_SECS;
use crate::state::AppState;

/// Current timeline on connect, then one `update` per applied time change.
pub async fn timeline_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = async_stream::stream! {
        // Subscribe before reading the snapshot so nothing applied in between is lost.
        let rx = state.event_tx.subscribe();
        let mut stream = BroadcastStream::new(rx);

        let mut last_seq = 0;
        if let Some((seq, json)) = state.snapshot_json().await {
            last_seq = seq;
            yield Ok(snapshot_event(seq, json));
        }

        while let Some(result) = stream.next().await {
            match result {
                Ok(update) => {
                    // already covered by the snapshot
                    if update.seq <= last_seq {
                        continue;
                    }
                    let Some(payload) = event_payload(update.json.as_ref()) else {
                        warn!(
                            seq = update.seq,
                            "update payload is not valid utf-8; dropping SSE event"
                        );
                        continue;
                    };
                    last_seq = update.seq;
                    yield Ok(
                        Event::default()
                            .id(update.seq.to_string())
                            .event("update")
                            .data(payload),
                    );
                }
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    warn!(
                        skipped_events = skipped,
                        "SSE client lagged behind broadcast buffer; replaying snapshot"
                    );
                    if let Some((seq, json)) = state.snapshot_json().await {
                        last_seq = seq;
                        yield Ok(snapshot_event(seq, json));
                    }
                }
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(SSE_KEEPALIVE_SECS))
            .text("keep-alive"),
    )
}

fn snapshot_event(seq: u64, json: String) -> Event {
    Event::default()
        .id(seq.to_string())
        .event("snapshot")
        .data(json)
}

fn event_payload(bytes: &Bytes) -> Option<&str> {
    std::str::from_utf8(bytes.as_ref()).ok()
}
