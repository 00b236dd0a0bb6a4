/**
 * Stream Route
 * Server-sent events carrying the latest profile document
 */
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    http::{header, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use serde_json::Value;
use uuid::Uuid;

use crate::routes::ErrorResponse;
use crate::store::{DocumentStore, Subscription};
use crate::AppState;

/// Payload sent when there is no document.
pub const NO_DOCUMENT: &str = "null";

fn encode(document: Option<&Value>) -> String {
    document
        .map(Value::to_string)
        .unwrap_or_else(|| NO_DOCUMENT.to_string())
}

/// Per-connection state. Dropping it (client gone) drops the subscription
/// and with it the underlying watch.
struct StreamSession {
    id: Uuid,
    key: String,
    store: Arc<dyn DocumentStore>,
    subscription: Subscription,
    last: Option<String>,
    emitted: u64,
}

impl StreamSession {
    /// Next payload to send, or `None` when the change feed has ended.
    ///
    /// The first call always yields something (the document or `null`).
    /// After that a failed read keeps the last good value and waits for the
    /// next change, and a payload equal to the previous one is not resent.
    async fn next_payload(&mut self) -> Option<String> {
        if self.last.is_none() {
            let payload = match self.store.read(&self.key).await {
                Ok(doc) => encode(doc.as_ref()),
                Err(e) => {
                    tracing::warn!(
                        stream_id = %self.id,
                        key = %self.key,
                        error = %e,
                        "initial read failed, sending null"
                    );
                    NO_DOCUMENT.to_string()
                }
            };
            return Some(self.emit(payload));
        }

        loop {
            if !self.subscription.changed().await {
                return None;
            }
            match self.store.read(&self.key).await {
                Ok(doc) => {
                    let payload = encode(doc.as_ref());
                    if self.last.as_deref() == Some(payload.as_str()) {
                        continue;
                    }
                    return Some(self.emit(payload));
                }
                Err(e) => {
                    tracing::warn!(
                        stream_id = %self.id,
                        key = %self.key,
                        error = %e,
                        "skipping unreadable document"
                    );
                }
            }
        }
    }

    fn emit(&mut self, payload: String) -> String {
        self.emitted += 1;
        self.last = Some(payload.clone());
        payload
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        tracing::debug!(
            stream_id = %self.id,
            key = %self.key,
            emitted = self.emitted,
            "stream closed"
        );
    }
}

/// GET /api/stream
/// Sends the current document immediately, then again after every change,
/// until the client goes away.
pub async fn stream_profile(State(state): State<AppState>) -> Response {
    let key = state.config.profile_key.clone();

    // Subscribe before the first read so a write landing in between is not lost.
    let subscription = match state.store.subscribe(&key).await {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(key = %key, error = %e, "failed to watch profile");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new("Failed to open stream")),
            )
                .into_response();
        }
    };

    let session = StreamSession {
        id: Uuid::new_v4(),
        key,
        store: state.store.clone(),
        subscription,
        last: None,
        emitted: 0,
    };
    tracing::debug!(stream_id = %session.id, key = %session.key, "stream opened");

    let events = futures::stream::unfold(session, |mut session| async move {
        let payload = session.next_payload().await?;
        Some((Ok::<_, Infallible>(Event::default().data(payload)), session))
    });

    let interval = Duration::from_secs(state.config.keep_alive_secs.max(1));
    let keep_alive = KeepAlive::new().interval(interval);
    let mut response = Sse::new(events).keep_alive(keep_alive).into_response();

    let headers = response.headers_mut();
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-transform"),
    );
    headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
    response
}
