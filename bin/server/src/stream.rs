//! Server-Sent Events endpoints for real-time monitoring.
//!
//! Two independent streams, both best-effort per the monitor's contract:
//!
//! - `GET /api/stream?interval_ms=…` pushes periodic full snapshots
//!   (active executions plus aggregate stats)
//! - `GET /api/events/stream` pushes execution lifecycle events
//!
//! Dropping the connection unsubscribes the snapshot push.

use crate::state::AppState;
use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use flowline_core::SubscriberId;
use flowline_engine::ExecutionMonitor;
use futures::stream::Stream;
use serde::Deserialize;
use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio_stream::wrappers::{BroadcastStream, ReceiverStream};
use tokio_stream::StreamExt;

/// Lower bound on the snapshot interval.
const MIN_INTERVAL_MS: u64 = 100;

/// Default snapshot interval.
const DEFAULT_INTERVAL_MS: u64 = 1_000;

/// Query parameters of the snapshot stream.
#[derive(Debug, Deserialize)]
pub struct StreamParams {
    /// Milliseconds between snapshots.
    pub interval_ms: Option<u64>,
}

/// `GET /api/stream` — periodic monitor snapshots.
pub async fn snapshot_stream(
    State(state): State<AppState>,
    Query(params): Query<StreamParams>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let interval = Duration::from_millis(
        params
            .interval_ms
            .unwrap_or(DEFAULT_INTERVAL_MS)
            .max(MIN_INTERVAL_MS),
    );
    let monitor = Arc::clone(state.engine.monitor());
    let (subscriber_id, rx) = monitor.subscribe_snapshots(interval);
    tracing::debug!(%subscriber_id, ?interval, "snapshot stream opened");

    let events = ReceiverStream::new(rx).map(|snapshot| {
        let data = serde_json::to_string(&snapshot).unwrap_or_default();
        Ok::<_, Infallible>(Event::default().event("snapshot").data(data))
    });

    let stream = UnsubscribeOnDrop {
        inner: Box::pin(events),
        monitor,
        subscriber_id,
    };
    Sse::new(stream).keep_alive(KeepAlive::new())
}

/// `GET /api/events/stream` — execution lifecycle events.
pub async fn event_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = state.engine.monitor().subscribe_events();

    // A lagging client drops the oldest events rather than stalling the
    // engine; lag errors are skipped and the stream continues.
    let events = BroadcastStream::new(receiver).filter_map(|event| {
        event.ok().map(|event| {
            let data = serde_json::to_string(&event).unwrap_or_default();
            Ok::<_, Infallible>(Event::default().event("lifecycle").data(data))
        })
    });

    Sse::new(events).keep_alive(KeepAlive::new())
}

/// Stream wrapper that stops the snapshot push when the client goes away.
struct UnsubscribeOnDrop<S> {
    inner: Pin<Box<S>>,
    monitor: Arc<ExecutionMonitor>,
    subscriber_id: SubscriberId,
}

impl<S: Stream<Item = Result<Event, Infallible>> + Send> Stream for UnsubscribeOnDrop<S> {
    type Item = Result<Event, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl<S> Drop for UnsubscribeOnDrop<S> {
    fn drop(&mut self) {
        self.monitor.unsubscribe(self.subscriber_id);
        tracing::debug!(subscriber_id = %self.subscriber_id, "snapshot stream closed");
    }
}
