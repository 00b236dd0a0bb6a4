//! Client side of the live sync.
//!
//! [`ProfileSync`] follows the server's event stream and keeps a local copy
//! of the profile. Edits land in the local copy at once and are written back
//! as a whole document after a quiet period, so a burst of keystrokes costs
//! one request. Every event from the server, including the echo of our own
//! write, replaces the local copy.
//!
//! Known gap: dropping a `ProfileSync` with a write still waiting for its
//! quiet period discards that write.

pub mod debounce;
pub mod sse;
pub mod writer;

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::model::{ModelError, NewPost, Profile, ProfilePatch, Theme};

pub use debounce::Debouncer;
pub use sse::SseDecoder;
pub use writer::{DocumentWriter, HttpWriter};

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server responded with {0}")]
    Status(reqwest::StatusCode),

    #[error("invalid document: {0}")]
    Decode(#[from] serde_json::Error),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("no profile loaded")]
    NotLoaded,
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub base_url: String,
    pub debounce: Duration,
    pub reconnect_delay: Duration,
}

impl SyncConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            debounce: DEFAULT_DEBOUNCE,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }
}

/// What the client currently knows about the profile.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncState {
    /// Nothing received from the server yet.
    Loading,
    /// The server reported that no profile exists.
    Missing,
    Ready(Profile),
}

impl SyncState {
    pub fn profile(&self) -> Option<&Profile> {
        match self {
            SyncState::Ready(profile) => Some(profile),
            _ => None,
        }
    }
}

pub struct ProfileSync {
    state: Arc<watch::Sender<SyncState>>,
    debouncer: Debouncer,
    stream_task: Option<JoinHandle<()>>,
}

impl ProfileSync {
    /// Opens the event stream at `config.base_url` and starts following it.
    ///
    /// Fails if the first connection cannot be made. Later disconnects are
    /// retried every `reconnect_delay` for as long as the handle lives.
    pub async fn connect(config: SyncConfig) -> Result<Self, SyncError> {
        let client = reqwest::Client::new();
        let writer = Arc::new(HttpWriter::new(client.clone(), &config.base_url));
        let mut sync = Self::detached(writer, config.debounce);

        let url = format!("{}/api/stream", config.base_url);
        let response = open_stream(&client, &url).await?;
        tracing::debug!(url = %url, "profile stream connected");

        sync.stream_task = Some(tokio::spawn(follow_stream(
            client,
            url,
            response,
            sync.state.clone(),
            config.reconnect_delay,
        )));
        Ok(sync)
    }

    /// A handle with no stream attached. Server payloads are fed in with
    /// [`ProfileSync::receive`].
    pub fn detached(writer: Arc<dyn DocumentWriter>, debounce: Duration) -> Self {
        let (tx, _) = watch::channel(SyncState::Loading);
        let state = Arc::new(tx);
        let debouncer = spawn_writer(state.clone(), writer, debounce);
        Self {
            state,
            debouncer,
            stream_task: None,
        }
    }

    /// Applies one raw stream payload (a document or `null`).
    pub fn receive(&self, payload: &str) {
        apply_remote(&self.state, payload);
    }

    pub fn state(&self) -> SyncState {
        self.state.borrow().clone()
    }

    pub fn profile(&self) -> Option<Profile> {
        self.state.borrow().profile().cloned()
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.state.subscribe()
    }

    /// Waits until `done` holds for the current state and returns that state.
    pub async fn wait_for(&self, mut done: impl FnMut(&SyncState) -> bool) -> SyncState {
        let mut rx = self.state.subscribe();
        let result = rx.wait_for(|state| done(state)).await.map(|s| s.clone());
        match result {
            Ok(state) => state,
            Err(_) => self.state(),
        }
    }

    /// Waits for the first server event.
    pub async fn loaded(&self) -> SyncState {
        self.wait_for(|state| !matches!(state, SyncState::Loading))
            .await
    }

    pub fn has_pending_write(&self) -> bool {
        self.debouncer.is_pending()
    }

    /// Merges `patch` into the local profile and schedules a write.
    pub fn update(&self, patch: ProfilePatch) -> Result<(), SyncError> {
        self.edit(|profile| {
            profile.apply(patch);
            Ok(())
        })
    }

    pub fn add_post(&self, post: NewPost) -> Result<String, SyncError> {
        self.edit(|profile| profile.add_post(post))
    }

    pub fn toggle_pin(&self, post_id: &str) -> Result<bool, SyncError> {
        self.edit(|profile| profile.toggle_pin(post_id))
    }

    pub fn reorder_pinned(&self, from: usize, to: usize) -> Result<(), SyncError> {
        self.edit(|profile| profile.reorder_pinned(from, to))
    }

    pub fn set_theme(&self, theme: Theme) -> Result<(), SyncError> {
        self.update(ProfilePatch::theme(theme))
    }

    /// Hides the getting-started checklist for good.
    pub fn complete_onboarding(&self) -> Result<(), SyncError> {
        self.update(ProfilePatch {
            onboarding_completed: Some(true),
            ..ProfilePatch::default()
        })
    }

    fn edit<T>(
        &self,
        change: impl FnOnce(&mut Profile) -> Result<T, ModelError>,
    ) -> Result<T, SyncError> {
        let mut outcome = None;
        self.state.send_if_modified(|state| match state {
            SyncState::Ready(profile) => {
                let result = change(profile);
                let changed = result.is_ok();
                outcome = Some(result);
                changed
            }
            _ => false,
        });

        match outcome {
            Some(Ok(value)) => {
                self.debouncer.trigger();
                Ok(value)
            }
            Some(Err(e)) => Err(e.into()),
            None => {
                tracing::debug!("edit ignored, no profile loaded");
                Err(SyncError::NotLoaded)
            }
        }
    }
}

impl Drop for ProfileSync {
    fn drop(&mut self) {
        if let Some(task) = self.stream_task.take() {
            task.abort();
        }
        if self.debouncer.is_pending() {
            tracing::warn!("profile sync dropped with an unsent edit");
        }
    }
}

fn spawn_writer(
    state: Arc<watch::Sender<SyncState>>,
    writer: Arc<dyn DocumentWriter>,
    delay: Duration,
) -> Debouncer {
    Debouncer::spawn(delay, move || {
        let state = state.clone();
        let writer = writer.clone();
        async move {
            let snapshot = state.borrow().profile().cloned();
            let Some(profile) = snapshot else {
                return;
            };
            let document = match serde_json::to_value(&profile) {
                Ok(v) => v,
                Err(e) => {
                    tracing::error!(error = %e, "failed to serialize profile");
                    return;
                }
            };
            // Write failures are not surfaced to the editor; the next edit
            // sends the whole document again.
            match writer.write(&document).await {
                Ok(()) => tracing::debug!("profile written"),
                Err(e) => tracing::warn!(error = %e, "profile write failed"),
            }
        }
    })
}

fn apply_remote(state: &watch::Sender<SyncState>, payload: &str) {
    let next = match serde_json::from_str::<Option<Profile>>(payload) {
        Ok(Some(profile)) => SyncState::Ready(profile),
        Ok(None) => SyncState::Missing,
        Err(e) => {
            tracing::warn!(error = %e, "ignoring malformed profile event");
            return;
        }
    };
    // Our own echo usually matches what we already have; don't wake
    // watchers for it.
    state.send_if_modified(|current| {
        if *current == next {
            false
        } else {
            *current = next;
            true
        }
    });
}

async fn open_stream(client: &reqwest::Client, url: &str) -> Result<reqwest::Response, SyncError> {
    let response = client
        .get(url)
        .header(reqwest::header::ACCEPT, "text/event-stream")
        .send()
        .await?;
    let status = response.status();
    if !status.is_success() {
        return Err(SyncError::Status(status));
    }
    Ok(response)
}

async fn follow_stream(
    client: reqwest::Client,
    url: String,
    first: reqwest::Response,
    state: Arc<watch::Sender<SyncState>>,
    reconnect_delay: Duration,
) {
    let mut next = Some(first);
    loop {
        let response = match next.take() {
            Some(response) => response,
            None => match open_stream(&client, &url).await {
                Ok(response) => {
                    tracing::info!(url = %url, "profile stream reconnected");
                    response
                }
                Err(e) => {
                    tracing::warn!(url = %url, error = %e, "profile stream reconnect failed");
                    tokio::time::sleep(reconnect_delay).await;
                    continue;
                }
            },
        };

        match pump(response, &state).await {
            Ok(()) => tracing::debug!(url = %url, "profile stream ended"),
            Err(e) => tracing::warn!(url = %url, error = %e, "profile stream interrupted"),
        }
        tokio::time::sleep(reconnect_delay).await;
    }
}

async fn pump(response: reqwest::Response, state: &watch::Sender<SyncState>) -> Result<(), SyncError> {
    let mut body = response.bytes_stream();
    let mut decoder = SseDecoder::new();
    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        for payload in decoder.push(&chunk) {
            apply_remote(state, &payload);
        }
    }
    Ok(())
}
