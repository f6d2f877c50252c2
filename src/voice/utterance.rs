//! Utterance events and the sources that produce them.
//!
//! [`UtteranceFeed`] is the in-process fan-out point: whatever detects speech
//! (a real speech-to-text front end, or [`MockUtteranceSource`] in demos)
//! calls [`UtteranceFeed::emit`], and every registered listener is invoked
//! once per utterance, in arrival order. No backpressure is applied.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// One unit of speech attributed to a speaker. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Utterance {
    /// Monotonic sequence number assigned at arrival.
    pub id: u64,
    #[serde(rename = "speakerId")]
    pub speaker_id: String,
    #[serde(rename = "speakerName")]
    pub speaker_name: String,
    pub text: String,
    #[serde(rename = "arrivedAt")]
    pub arrived_at: DateTime<Utc>,
}

/// Callback invoked for each utterance.
pub type UtteranceListener = Arc<dyn Fn(&Utterance) + Send + Sync>;

type ListenerMap = Mutex<BTreeMap<u64, UtteranceListener>>;

/// Anything that can deliver utterances to listeners.
pub trait UtteranceSource: Send + Sync {
    /// Register `listener`. Dropping the returned [`Subscription`] stops
    /// further callbacks.
    fn on_utterance(&self, listener: UtteranceListener) -> Subscription;
}

/// Registration handle returned by [`UtteranceSource::on_utterance`].
#[must_use = "dropping a Subscription unregisters the listener"]
pub struct Subscription {
    id: u64,
    listeners: Weak<ListenerMap>,
}

impl Subscription {
    /// Explicit form of dropping the handle.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners.lock().remove(&self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

/// Serialized utterance stream with id assignment and listener fan-out.
pub struct UtteranceFeed {
    next_utterance_id: AtomicU64,
    next_listener_id: AtomicU64,
    listeners: Arc<ListenerMap>,
    // Held across id assignment and dispatch so listeners observe ids in order.
    emit_lock: Mutex<()>,
}

impl UtteranceFeed {
    pub fn new() -> Self {
        Self {
            next_utterance_id: AtomicU64::new(1),
            next_listener_id: AtomicU64::new(0),
            listeners: Arc::new(Mutex::new(BTreeMap::new())),
            emit_lock: Mutex::new(()),
        }
    }

    /// Record a new utterance and dispatch it to every listener.
    ///
    /// Listeners run synchronously on the caller's task and must not call
    /// `emit` themselves.
    pub fn emit(
        &self,
        speaker_id: impl Into<String>,
        speaker_name: impl Into<String>,
        text: impl Into<String>,
    ) -> Utterance {
        let _ordered = self.emit_lock.lock();
        let utterance = Utterance {
            id: self.next_utterance_id.fetch_add(1, Ordering::SeqCst),
            speaker_id: speaker_id.into(),
            speaker_name: speaker_name.into(),
            text: text.into(),
            arrived_at: Utc::now(),
        };

        // Snapshot so a listener may unsubscribe while being dispatched.
        let listeners: Vec<UtteranceListener> = self.listeners.lock().values().cloned().collect();
        tracing::debug!(
            utterance_id = utterance.id,
            speaker = %utterance.speaker_name,
            listeners = listeners.len(),
            "utterance emitted"
        );
        for listener in listeners {
            listener(&utterance);
        }
        utterance
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }
}

impl Default for UtteranceFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl UtteranceSource for UtteranceFeed {
    fn on_utterance(&self, listener: UtteranceListener) -> Subscription {
        let id = self.next_listener_id.fetch_add(1, Ordering::SeqCst);
        self.listeners.lock().insert(id, listener);
        Subscription {
            id,
            listeners: Arc::downgrade(&self.listeners),
        }
    }
}

// ── Mock source ────────────────────────────────────────────────────

/// A room participant the mock source can attribute speech to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: String,
    pub name: String,
}

impl Participant {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

const CANNED_PHRASES: &[&str] = &[
    "Welcome everyone, thanks for joining the room tonight.",
    "I think the new release is a big step forward.",
    "Can everyone hear me clearly?",
    "Let's take a few questions from the audience.",
    "That's a great point, I hadn't considered it.",
    "We will schedule the next session for Friday.",
];

/// Timer-driven stand-in for speech detection.
///
/// Every `interval` it emits one canned phrase attributed to the next
/// participant in rotation.
#[derive(Debug, Clone)]
pub struct MockUtteranceSource {
    participants: Vec<Participant>,
    phrases: Vec<String>,
    interval: Duration,
}

impl MockUtteranceSource {
    pub fn new(participants: Vec<Participant>, interval: Duration) -> Self {
        Self {
            participants,
            phrases: CANNED_PHRASES.iter().map(|p| (*p).to_string()).collect(),
            interval,
        }
    }

    pub fn with_phrases(mut self, phrases: Vec<String>) -> Self {
        if !phrases.is_empty() {
            self.phrases = phrases;
        }
        self
    }

    /// The `tick`-th emission's speaker and phrase.
    pub fn pick(&self, tick: usize) -> Option<(&Participant, &str)> {
        if self.participants.is_empty() || self.phrases.is_empty() {
            return None;
        }
        let speaker = &self.participants[tick % self.participants.len()];
        // Different stride so the same speaker doesn't repeat the same line.
        let phrase = &self.phrases[(tick * 5 + 1) % self.phrases.len()];
        Some((speaker, phrase.as_str()))
    }

    /// Start emitting into `feed` until `cancel` fires.
    pub fn spawn(self, feed: Arc<UtteranceFeed>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            // The first tick of a tokio interval completes immediately.
            ticker.tick().await;
            let mut tick = 0usize;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Some((speaker, phrase)) = self.pick(tick) {
                            feed.emit(speaker.id.clone(), speaker.name.clone(), phrase);
                        }
                        tick += 1;
                    }
                }
            }
            tracing::debug!(emitted = tick, "mock utterance source stopped");
        })
    }
}

// ── Tests ──────────────────────────────────────────────────────────
