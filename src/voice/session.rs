//! Session controller: owns one live interpretation session.
//!
//! ## Design
//!
//! ```text
//! UtteranceSource ─▸ listener ─▸ registry.append ─▸ spawn produce(snapshot)
//!                                                        │
//!                     generation check ◂─────────────────┘
//!                            │
//!                            ├─ annotate (translation / failure)
//!                            └─ PlaybackScheduler::schedule_batch
//!                                   │ on_start / on_end
//!                                   └─▸ annotate (is_being_read)
//! ```
//!
//! - Each utterance is produced against a copy of [`SessionConfig`] taken
//!   when it arrives; later setter calls never affect it.
//! - `stop()` bumps the generation counter. Every production and timer
//!   callback carries the generation it was started under and is discarded
//!   when that no longer matches, so nothing from an old session can
//!   touch a new one.
//! - The audio sink is acquired by `start()` and released by `stop()` (or
//!   by dropping the controller).
//! - Lock order is `active` → `config` → `registry` → scheduler internals.
//!   `update_config` never holds `config` while taking `active`. Timer
//!   callbacks only ever take `registry`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tracing::Instrument;

use super::audio::AudioSink;
use super::events::SessionEvent;
use super::producer::{ClipProducer, Production};
use super::registry::{AnnotationPatch, TranscriptEntry, UtterancePhase, UtteranceRegistry};
use super::reorder::ArrivalOrderBuffer;
use super::scheduler::{ClipCallbacks, PlaybackScheduler};
use super::utterance::{Subscription, Utterance, UtteranceSource};
use crate::config::{InterpreterSettings, PlaybackOrder, SessionConfig};

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session {0} is already active")]
    AlreadyActive(String),
    #[error("a tokio runtime is required to run a session")]
    NoRuntime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Active,
}

/// Counters for the current session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub utterances: u64,
    pub clips_scheduled: u64,
    pub failures: u64,
}

// ── Controller ─────────────────────────────────────────────────────

/// Orchestrates source → producer → scheduler → registry for one session
/// at a time.
pub struct SessionController {
    inner: Arc<Inner>,
}

struct Inner {
    producer: Arc<ClipProducer>,
    production_timeout: Duration,
    playback_order: PlaybackOrder,
    config: RwLock<SessionConfig>,
    registry: Mutex<UtteranceRegistry>,
    generation: AtomicU64,
    degraded: AtomicBool,
    active: Mutex<Option<ActiveSession>>,
    events: broadcast::Sender<SessionEvent>,
}

struct ActiveSession {
    id: String,
    generation: u64,
    span: tracing::Span,
    runtime: Handle,
    scheduler: Arc<PlaybackScheduler>,
    reorder: ArrivalOrderBuffer<Production>,
    next_arrival: u64,
    stats: SessionStats,
    subscription: Subscription,
}

impl SessionController {
    pub fn new(
        producer: Arc<ClipProducer>,
        settings: &InterpreterSettings,
        initial: SessionConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                producer,
                production_timeout: settings.production_timeout(),
                playback_order: settings.playback_order,
                config: RwLock::new(initial),
                registry: Mutex::new(UtteranceRegistry::new(settings.retention_limit)),
                generation: AtomicU64::new(0),
                degraded: AtomicBool::new(false),
                active: Mutex::new(None),
                events,
            }),
        }
    }

    /// Subscribe to `source` and start playing into `sink`.
    ///
    /// `source` must not invoke the listener from inside `on_utterance`.
    /// Returns the new session id.
    pub fn start(
        &self,
        source: &dyn UtteranceSource,
        sink: Arc<dyn AudioSink>,
    ) -> Result<String, SessionError> {
        let runtime = Handle::try_current().map_err(|_| SessionError::NoRuntime)?;

        let mut active = self.inner.active.lock();
        if let Some(session) = active.as_ref() {
            return Err(SessionError::AlreadyActive(session.id.clone()));
        }

        let generation = self.inner.generation.load(Ordering::SeqCst);
        let id = uuid::Uuid::new_v4().to_string();
        let span = tracing::info_span!("voice_session", session_id = %id);

        self.inner.registry.lock().clear();
        self.inner.degraded.store(false, Ordering::SeqCst);

        let weak = Arc::downgrade(&self.inner);
        let subscription = source.on_utterance(Arc::new(move |utterance: &Utterance| {
            if let Some(inner) = weak.upgrade() {
                inner.on_utterance(utterance, generation);
            }
        }));

        span.in_scope(|| {
            tracing::info!(
                generation,
                order = ?self.inner.playback_order,
                "session started"
            );
        });
        self.inner.emit(SessionEvent::SessionStarted {
            session_id: id.clone(),
            generation,
        });

        *active = Some(ActiveSession {
            id: id.clone(),
            generation,
            span,
            scheduler: Arc::new(PlaybackScheduler::with_runtime(sink, runtime.clone())),
            runtime,
            reorder: ArrivalOrderBuffer::new(),
            next_arrival: 0,
            stats: SessionStats::default(),
            subscription,
        });
        Ok(id)
    }

    /// Tear down the active session. Returns `false` when already idle.
    ///
    /// In-flight productions finish in the background but their results are
    /// discarded. The transcript is cleared and the audio sink released.
    pub fn stop(&self) -> bool {
        let mut active = self.inner.active.lock();
        let Some(session) = active.take() else {
            return false;
        };
        self.inner.generation.fetch_add(1, Ordering::SeqCst);

        let ActiveSession {
            id,
            span,
            scheduler,
            reorder,
            stats,
            subscription,
            ..
        } = session;

        subscription.unsubscribe();
        scheduler.stop_all();
        self.inner.registry.lock().clear();
        self.inner.degraded.store(false, Ordering::SeqCst);

        span.in_scope(|| {
            tracing::info!(
                utterances = stats.utterances,
                clips_scheduled = stats.clips_scheduled,
                failures = stats.failures,
                held_back = reorder.pending_len(),
                "session stopped"
            );
        });
        self.inner.emit(SessionEvent::SessionEnded {
            session_id: id,
            total_utterances: stats.utterances,
        });
        true
    }

    // ── Settings ──────────────────────────────────────────────────

    /// Current settings. Utterances already in flight keep their own copy.
    pub fn config(&self) -> SessionConfig {
        self.inner.config.read().clone()
    }

    pub fn set_target_language(&self, language: impl Into<String>) -> SessionConfig {
        let language = language.into();
        self.update_config(|c| c.target_language = language)
    }

    pub fn set_voice(&self, voice_id: impl Into<String>) -> SessionConfig {
        let voice_id = voice_id.into();
        self.update_config(|c| c.voice_id = voice_id)
    }

    pub fn set_bilingual(&self, enabled: bool) -> SessionConfig {
        self.update_config(|c| c.bilingual_enabled = enabled)
    }

    /// Disabling halts everything already scheduled. Productions finishing
    /// while disabled still annotate their text but play nothing.
    pub fn set_feature_enabled(&self, enabled: bool) -> SessionConfig {
        self.update_config(|c| c.feature_enabled = enabled)
    }

    /// Apply `change` atomically and return the resulting settings.
    pub fn update_config(&self, change: impl FnOnce(&mut SessionConfig)) -> SessionConfig {
        let (was_enabled, updated) = {
            let mut config = self.inner.config.write();
            let was_enabled = config.feature_enabled;
            change(&mut config);
            (was_enabled, config.clone())
        };
        tracing::debug!(
            target_language = %updated.target_language,
            voice = %updated.voice_id,
            bilingual = updated.bilingual_enabled,
            enabled = updated.feature_enabled,
            "session config updated"
        );

        if was_enabled && !updated.feature_enabled {
            self.inner.halt_playback();
        }
        updated
    }

    // ── Observation ───────────────────────────────────────────────

    /// Ordered copy of the transcript, oldest first.
    pub fn snapshot(&self) -> Vec<TranscriptEntry> {
        self.inner.registry.lock().snapshot()
    }

    /// Whether the translation service is currently echoing input back.
    pub fn is_degraded(&self) -> bool {
        self.inner.degraded.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> SessionState {
        if self.inner.active.lock().is_some() {
            SessionState::Active
        } else {
            SessionState::Idle
        }
    }

    pub fn session_id(&self) -> Option<String> {
        self.inner.active.lock().as_ref().map(|s| s.id.clone())
    }

    /// Number of completed teardowns.
    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::SeqCst)
    }

    /// Next free position on the active session's output timeline.
    pub fn playback_cursor(&self) -> Option<Duration> {
        self.inner
            .active
            .lock()
            .as_ref()
            .map(|s| s.scheduler.cursor())
    }

    pub fn stats(&self) -> Option<SessionStats> {
        self.inner.active.lock().as_ref().map(|s| s.stats)
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.stop();
    }
}

// ── Session internals ──────────────────────────────────────────────

impl Inner {
    fn on_utterance(self: &Arc<Self>, utterance: &Utterance, generation: u64) {
        // The generation check, the snapshot and the append happen under one
        // `active` guard so a concurrent stop/start cannot slip in between.
        let (seq, session_id, span, runtime, snapshot, evicted, entry) = {
            let mut active = self.active.lock();
            let Some(session) = active.as_mut().filter(|s| s.generation == generation) else {
                return;
            };
            let seq = session.next_arrival;
            session.next_arrival += 1;
            session.stats.utterances += 1;

            let snapshot = self.config.read().clone();
            let mut registry = self.registry.lock();
            let evicted = registry.append(utterance.clone());
            let entry = registry.get(utterance.id).cloned();
            (
                seq,
                session.id.clone(),
                session.span.clone(),
                session.runtime.clone(),
                snapshot,
                evicted,
                entry,
            )
        };
        span.in_scope(|| {
            tracing::debug!(
                utterance_id = utterance.id,
                seq,
                evicted = evicted.len(),
                target_language = %snapshot.target_language,
                "utterance appended"
            );
        });
        if let Some(entry) = entry {
            self.emit(SessionEvent::UtteranceAppended { session_id, entry });
        }

        let inner = Arc::clone(self);
        let utterance = utterance.clone();
        let timeout = self.production_timeout;
        runtime.spawn(
            async move {
                let produced =
                    tokio::time::timeout(timeout, inner.producer.produce(&utterance, &snapshot))
                        .await;
                let production = match produced {
                    Ok(production) => production,
                    Err(_) => {
                        tracing::warn!(
                            utterance_id = utterance.id,
                            timeout_ms = timeout.as_millis() as u64,
                            "production timed out"
                        );
                        Production::timed_out(utterance.id, timeout)
                    }
                };
                inner.complete(generation, seq, production);
            }
            .instrument(span),
        );
    }

    fn complete(self: &Arc<Self>, generation: u64, seq: u64, production: Production) {
        let mut active = self.active.lock();
        let Some(session) = active.as_mut().filter(|s| s.generation == generation) else {
            tracing::debug!(
                utterance_id = production.utterance_id,
                generation,
                "stale production dropped"
            );
            return;
        };

        if production.quota_hit {
            self.set_degraded(&session.id, true);
        } else if production.translated_text.is_some() {
            self.set_degraded(&session.id, false);
        }

        match self.playback_order {
            PlaybackOrder::Completion => self.apply(session, production),
            PlaybackOrder::Arrival => {
                for ready in session.reorder.insert(seq, production) {
                    self.apply(session, ready);
                }
            }
        }
    }

    /// Record `production` in the transcript and put its clips on the timeline.
    fn apply(self: &Arc<Self>, session: &mut ActiveSession, production: Production) {
        let utterance_id = production.utterance_id;
        let failed = production.failed();
        if failed {
            session.stats.failures += 1;
        }

        let mut patch = AnnotationPatch {
            translated_text: production.translated_text,
            failed: failed.then_some(true),
            ..AnnotationPatch::default()
        };

        let enabled = self.config.read().feature_enabled;
        if production.clips.is_empty() || !enabled {
            if !production.clips.is_empty() {
                tracing::debug!(utterance_id, "interpretation disabled; clips discarded");
            }
            patch.phase = Some(UtterancePhase::Done);
            self.annotate(&session.id, utterance_id, patch);
            return;
        }

        patch.phase = Some(UtterancePhase::Scheduled);
        self.annotate(&session.id, utterance_id, patch);

        let callbacks = self.reading_callbacks(session, utterance_id);
        let placed = session
            .scheduler
            .schedule_batch(production.clips, Some(callbacks));
        session.stats.clips_scheduled += placed.len() as u64;

        if let (Some(first), Some(last)) = (placed.first(), placed.last()) {
            tracing::debug!(
                utterance_id,
                clips = placed.len(),
                start_ms = first.start.as_millis() as u64,
                end_ms = last.end.as_millis() as u64,
                "clips scheduled"
            );
        }
    }

    fn reading_callbacks(self: &Arc<Self>, session: &ActiveSession, utterance_id: u64) -> ClipCallbacks {
        let generation = session.generation;
        let (on_start, on_end) = (Arc::downgrade(self), Arc::downgrade(self));
        let (start_id, end_id) = (session.id.clone(), session.id.clone());

        ClipCallbacks::new()
            .on_start(move || {
                if let Some(inner) = on_start.upgrade() {
                    inner.mark_reading(generation, &start_id, utterance_id, true);
                }
            })
            .on_end(move || {
                if let Some(inner) = on_end.upgrade() {
                    inner.mark_reading(generation, &end_id, utterance_id, false);
                }
            })
    }

    fn mark_reading(&self, generation: u64, session_id: &str, utterance_id: u64, reading: bool) {
        if self.generation.load(Ordering::SeqCst) != generation {
            return;
        }
        let mut patch = AnnotationPatch::reading(reading);
        if !reading {
            patch = patch.phase(UtterancePhase::Done);
        }
        self.annotate(session_id, utterance_id, patch);
    }

    /// Stop all audio and settle every entry that was waiting to be read.
    fn halt_playback(&self) {
        let active = self.active.lock();
        let Some(session) = active.as_ref() else {
            return;
        };
        session.scheduler.stop_all();

        let settled: Vec<TranscriptEntry> = {
            let mut registry = self.registry.lock();
            let mut ids = registry.clear_reading();
            ids.extend(
                registry
                    .snapshot()
                    .iter()
                    .filter(|e| e.phase == UtterancePhase::Scheduled)
                    .map(TranscriptEntry::utterance_id),
            );
            ids.sort_unstable();
            ids.dedup();
            ids.into_iter()
                .filter_map(|id| {
                    registry.annotate(id, AnnotationPatch::default().phase(UtterancePhase::Done))
                })
                .collect()
        };

        session.span.in_scope(|| {
            tracing::info!(settled = settled.len(), "interpretation disabled; playback halted");
        });
        for entry in settled {
            self.emit(SessionEvent::UtteranceAnnotated {
                session_id: session.id.clone(),
                entry,
            });
        }
    }

    fn annotate(&self, session_id: &str, utterance_id: u64, patch: AnnotationPatch) {
        let updated = self.registry.lock().annotate(utterance_id, patch);
        match updated {
            Some(entry) => self.emit(SessionEvent::UtteranceAnnotated {
                session_id: session_id.to_string(),
                entry,
            }),
            None => tracing::trace!(utterance_id, "annotation for evicted utterance dropped"),
        }
    }

    fn set_degraded(&self, session_id: &str, degraded: bool) {
        if self.degraded.swap(degraded, Ordering::SeqCst) == degraded {
            return;
        }
        if degraded {
            tracing::info!("translation service is rate-limited; entering degraded mode");
        } else {
            tracing::info!("translation service recovered");
        }
        self.emit(SessionEvent::DegradedChanged {
            session_id: session_id.to_string(),
            degraded,
        });
    }

    fn emit(&self, event: SessionEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }
}

// ── Tests ──────────────────────────────────────────────────────────
