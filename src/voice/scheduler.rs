//! Gapless playback scheduler.
//!
//! Every clip is placed on the output clock at
//! `max(cursor, now)` and the cursor then advances to the clip's end. The
//! read-modify-write on the cursor happens under a single lock, so no two
//! clips can ever be placed from the same stale cursor value.
//!
//! ```text
//! output clock ─────────────────────────────────────────────────▸
//!               |--clip A--|--clip B (batch)--|--clip C--|
//!               ^start      ^cursor after A    ^cursor after B
//! ```
//!
//! Activation callbacks run on tokio timers measured against the sink's
//! clock. [`PlaybackScheduler::stop_all`] cancels every pending timer,
//! halts the device and rewinds the cursor to "now". A scheduler built
//! outside a tokio runtime still places clips but drops their callbacks.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use super::audio::{AudioClip, AudioSink};

type Callback = Box<dyn FnOnce() + Send + 'static>;

/// Callbacks fired when a scheduled clip (or batch) becomes audible and
/// when it finishes.
#[derive(Default)]
pub struct ClipCallbacks {
    on_start: Option<Callback>,
    on_end: Option<Callback>,
}

impl ClipCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_start(mut self, f: impl FnOnce() + Send + 'static) -> Self {
        self.on_start = Some(Box::new(f));
        self
    }

    pub fn on_end(mut self, f: impl FnOnce() + Send + 'static) -> Self {
        self.on_end = Some(Box::new(f));
        self
    }

    fn is_empty(&self) -> bool {
        self.on_start.is_none() && self.on_end.is_none()
    }
}

impl std::fmt::Debug for ClipCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClipCallbacks")
            .field("on_start", &self.on_start.is_some())
            .field("on_end", &self.on_end.is_some())
            .finish()
    }
}

/// Where a clip landed on the output timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledClip {
    pub owner: (u64, usize),
    pub start: Duration,
    pub end: Duration,
    /// `false` when the device refused the buffer; the slot on the
    /// timeline is still reserved.
    pub audible: bool,
}

/// Serializes clips onto a single output timeline.
pub struct PlaybackScheduler {
    sink: Arc<dyn AudioSink>,
    runtime: Option<Handle>,
    cursor: Mutex<Duration>,
    cancel: Mutex<CancellationToken>,
}

impl PlaybackScheduler {
    /// Timers go to the ambient tokio runtime, if there is one.
    pub fn new(sink: Arc<dyn AudioSink>) -> Self {
        Self::build(sink, Handle::try_current().ok())
    }

    /// Timers go to `runtime` whichever thread schedules the clip.
    pub fn with_runtime(sink: Arc<dyn AudioSink>, runtime: Handle) -> Self {
        Self::build(sink, Some(runtime))
    }

    fn build(sink: Arc<dyn AudioSink>, runtime: Option<Handle>) -> Self {
        let now = sink.current_time();
        Self {
            sink,
            runtime,
            cursor: Mutex::new(now),
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    /// Next free position on the output clock.
    pub fn cursor(&self) -> Duration {
        *self.cursor.lock()
    }

    /// Current position of the output clock.
    pub fn now(&self) -> Duration {
        self.sink.current_time()
    }

    /// Schedule one clip right after everything already scheduled.
    pub fn schedule(&self, clip: AudioClip, callbacks: Option<ClipCallbacks>) -> ScheduledClip {
        let (placed, token) = {
            let mut cursor = self.cursor.lock();
            let placed = self.place(&mut cursor, &clip);
            (placed, self.cancel.lock().clone())
        };

        if let Some(callbacks) = callbacks {
            self.arm(placed.start, placed.end, callbacks, token);
        }
        placed
    }

    /// Schedule an ordered list of clips as one contiguous unit.
    ///
    /// The cursor lock is held across the whole batch, so another
    /// utterance's clips can never land between two clips of this batch.
    /// `callbacks` span the batch: `on_start` at the first clip's start,
    /// `on_end` at the last clip's end.
    pub fn schedule_batch(
        &self,
        clips: Vec<AudioClip>,
        callbacks: Option<ClipCallbacks>,
    ) -> Vec<ScheduledClip> {
        if clips.is_empty() {
            return Vec::new();
        }

        let (placed, token) = {
            let mut cursor = self.cursor.lock();
            let placed: Vec<ScheduledClip> = clips
                .iter()
                .map(|clip| self.place(&mut cursor, clip))
                .collect();
            (placed, self.cancel.lock().clone())
        };

        if let (Some(callbacks), Some(first), Some(last)) =
            (callbacks, placed.first(), placed.last())
        {
            self.arm(first.start, last.end, callbacks, token);
        }
        placed
    }

    /// Halt and discard everything scheduled, cancel pending callbacks and
    /// rewind the cursor to the current output time.
    pub fn stop_all(&self) {
        let mut cursor = self.cursor.lock();
        {
            let mut cancel = self.cancel.lock();
            cancel.cancel();
            *cancel = CancellationToken::new();
        }
        self.sink.halt();
        *cursor = self.sink.current_time();
        tracing::debug!(cursor_ms = cursor.as_millis() as u64, "playback stopped");
    }

    // ── Internal helpers ──────────────────────────────────────────

    fn place(&self, cursor: &mut Duration, clip: &AudioClip) -> ScheduledClip {
        let start = (*cursor).max(self.sink.current_time());
        let end = start + clip.duration;

        let audible = match self.sink.enqueue(clip, start) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    utterance_id = clip.utterance_id,
                    slot = %clip.slot,
                    error = %e,
                    "audio output failed; clip kept on timeline silently"
                );
                false
            }
        };

        *cursor = end;
        ScheduledClip {
            owner: clip.owner(),
            start,
            end,
            audible,
        }
    }

    fn arm(
        &self,
        start: Duration,
        end: Duration,
        callbacks: ClipCallbacks,
        token: CancellationToken,
    ) {
        if callbacks.is_empty() {
            return;
        }
        let Some(runtime) = self.runtime.as_ref() else {
            tracing::warn!(
                start_ms = start.as_millis() as u64,
                "no tokio runtime; clip callbacks dropped"
            );
            return;
        };
        let sink = Arc::clone(&self.sink);
        let ClipCallbacks { on_start, on_end } = callbacks;

        runtime.spawn(async move {
            let timeline = async {
                tokio::time::sleep(start.saturating_sub(sink.current_time())).await;
                if let Some(f) = on_start {
                    tracing::trace!(start_ms = start.as_millis() as u64, "clip active");
                    f();
                }
                tokio::time::sleep(end.saturating_sub(sink.current_time())).await;
                if let Some(f) = on_end {
                    tracing::trace!(end_ms = end.as_millis() as u64, "clip inactive");
                    f();
                }
            };

            tokio::select! {
                _ = token.cancelled() => {}
                _ = timeline => {}
            }
        });
    }
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voice::audio::{ClipSlot, SilentSink, DEFAULT_SAMPLE_RATE};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn clip_ms(utterance_id: u64, slot: ClipSlot, ms: u64) -> AudioClip {
        let samples = (DEFAULT_SAMPLE_RATE as u64 * ms / 1000) as usize;
        AudioClip::new(utterance_id, slot, vec![0; samples], DEFAULT_SAMPLE_RATE)
    }

    fn scheduler() -> (Arc<SilentSink>, PlaybackScheduler) {
        let sink = Arc::new(SilentSink::new());
        let scheduler = PlaybackScheduler::new(sink.clone());
        (sink, scheduler)
    }

    #[tokio::test(start_paused = true)]
    async fn consecutive_clips_never_overlap() {
        let (_sink, scheduler) = scheduler();
        let lengths = [300, 50, 1200, 10, 700];

        let mut placed = Vec::new();
        for (i, ms) in lengths.iter().enumerate() {
            placed.push(scheduler.schedule(clip_ms(i as u64, ClipSlot::Translated, *ms), None));
            // let wall time drift between some calls
            if i % 2 == 0 {
                tokio::time::advance(Duration::from_millis(100)).await;
            }
        }

        for pair in placed.windows(2) {
            assert!(pair[1].start >= pair[0].end, "{pair:?}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn idle_timeline_starts_at_now() {
        let (_sink, scheduler) = scheduler();
        scheduler.schedule(clip_ms(1, ClipSlot::Translated, 100), None);

        tokio::time::advance(Duration::from_secs(2)).await;
        let second = scheduler.schedule(clip_ms(2, ClipSlot::Translated, 100), None);
        assert_eq!(second.start, Duration::from_secs(2));
        assert_eq!(scheduler.cursor(), Duration::from_millis(2100));
    }

    #[tokio::test(start_paused = true)]
    async fn batch_is_back_to_back_in_order() {
        let (sink, scheduler) = scheduler();
        let placed = scheduler.schedule_batch(
            vec![
                clip_ms(1, ClipSlot::Original, 1000),
                clip_ms(1, ClipSlot::Translated, 1200),
            ],
            None,
        );

        assert_eq!(placed[0].owner, (1, 0));
        assert_eq!(placed[1].owner, (1, 1));
        assert_eq!(placed[0].start, Duration::ZERO);
        assert_eq!(placed[0].end, placed[1].start);
        assert_eq!(placed[1].end, Duration::from_millis(2200));
        assert_eq!(sink.queued().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_batch_leaves_cursor() {
        let (_sink, scheduler) = scheduler();
        assert!(scheduler.schedule_batch(Vec::new(), None).is_empty());
        assert_eq!(scheduler.cursor(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn batch_callbacks_span_whole_batch() {
        let (_sink, scheduler) = scheduler();
        let active = Arc::new(AtomicUsize::new(0));
        let (a, b) = (active.clone(), active.clone());

        scheduler.schedule_batch(
            vec![
                clip_ms(1, ClipSlot::Original, 1000),
                clip_ms(1, ClipSlot::Translated, 1200),
            ],
            Some(
                ClipCallbacks::new()
                    .on_start(move || {
                        a.store(1, Ordering::SeqCst);
                    })
                    .on_end(move || {
                        b.store(2, Ordering::SeqCst);
                    }),
            ),
        );

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(active.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(2000)).await;
        assert_eq!(active.load(Ordering::SeqCst), 1, "still inside batch at 2.01s");

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(active.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_all_cancels_callbacks_and_rewinds() {
        let (sink, scheduler) = scheduler();
        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();

        scheduler.schedule(clip_ms(1, ClipSlot::Translated, 5000), None);
        scheduler.schedule(
            clip_ms(2, ClipSlot::Translated, 500),
            Some(ClipCallbacks::new().on_start(move || {
                f.fetch_add(1, Ordering::SeqCst);
            })),
        );

        tokio::time::advance(Duration::from_secs(1)).await;
        scheduler.stop_all();
        assert_eq!(scheduler.cursor(), Duration::from_secs(1));
        assert_eq!(sink.halt_count(), 1);
        assert!(sink.queued().is_empty());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        let next = scheduler.schedule(clip_ms(3, ClipSlot::Translated, 100), None);
        assert_eq!(next.start, Duration::from_secs(11));
    }

    #[tokio::test(start_paused = true)]
    async fn device_failure_keeps_bookkeeping() {
        let sink = Arc::new(SilentSink::failing());
        let scheduler = PlaybackScheduler::new(sink);

        let first = scheduler.schedule(clip_ms(1, ClipSlot::Translated, 400), None);
        let second = scheduler.schedule(clip_ms(2, ClipSlot::Translated, 400), None);
        assert!(!first.audible);
        assert_eq!(second.start, first.end);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_schedules_never_share_a_start() {
        let (_sink, scheduler) = scheduler();
        let scheduler = Arc::new(scheduler);

        let mut tasks = Vec::new();
        for i in 0..16u64 {
            let s = Arc::clone(&scheduler);
            tasks.push(tokio::spawn(async move {
                s.schedule(clip_ms(i, ClipSlot::Translated, 100), None)
            }));
        }
        let mut placed = Vec::new();
        for task in tasks {
            placed.push(task.await.unwrap());
        }
        placed.sort_by_key(|p| p.start);
        for pair in placed.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
        }
    }

    #[test]
    fn callbacks_without_runtime_are_dropped() {
        let (_sink, scheduler) = scheduler();
        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();

        let placed = scheduler.schedule_batch(
            vec![clip_ms(1, ClipSlot::Translated, 200)],
            Some(ClipCallbacks::new().on_start(move || {
                f.fetch_add(1, Ordering::SeqCst);
            })),
        );
        assert_eq!(placed.len(), 1);
        assert_eq!(scheduler.cursor(), placed[0].end);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn explicit_runtime_runs_callbacks_from_any_thread() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        let sink = Arc::new(SilentSink::new());
        let scheduler = PlaybackScheduler::with_runtime(sink, runtime.handle().clone());
        let (tx, rx) = std::sync::mpsc::channel();

        scheduler.schedule(
            clip_ms(1, ClipSlot::Translated, 10),
            Some(ClipCallbacks::new().on_end(move || {
                let _ = tx.send(());
            })),
        );
        runtime.block_on(async {
            tokio::time::sleep(Duration::from_millis(100)).await;
        });
        assert!(rx.try_recv().is_ok());
    }
}
