//! Audio clips and the output device seam.
//!
//! Clips carry decoded PCM16 samples plus an exact duration derived from the
//! sample count, so back-to-back scheduling never accumulates float error.
//! The output device is abstracted behind [`AudioSink`]; the scheduler only
//! needs a monotonically advancing clock and a way to enqueue a buffer at a
//! point on that clock.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

/// Default speech synthesis output rate (24kHz mono PCM16).
pub const DEFAULT_SAMPLE_RATE: u32 = 24_000;

// ── Clip slots ─────────────────────────────────────────────────────

/// Which rendering of an utterance a clip carries.
///
/// The slot index orders clips within one utterance: the original-language
/// clip always precedes the translated one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ClipSlot {
    /// Original text in the fixed neutral voice (bilingual mode only).
    Original,
    /// Translated text in the user's selected voice.
    Translated,
}

impl ClipSlot {
    pub fn index(self) -> usize {
        match self {
            Self::Original => 0,
            Self::Translated => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Original => "original",
            Self::Translated => "translated",
        }
    }
}

impl std::fmt::Display for ClipSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Audio clip ─────────────────────────────────────────────────────

/// A synthesized audio buffer for one slot of one utterance.
///
/// Produced once, consumed exactly once by the scheduler.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioClip {
    pub utterance_id: u64,
    pub slot: ClipSlot,
    pub samples: Vec<i16>,
    pub sample_rate: u32,
    pub duration: Duration,
}

impl AudioClip {
    /// Build a clip from raw samples; duration is computed from the count.
    pub fn new(utterance_id: u64, slot: ClipSlot, samples: Vec<i16>, sample_rate: u32) -> Self {
        let duration = samples_to_duration(samples.len(), sample_rate);
        Self {
            utterance_id,
            slot,
            samples,
            sample_rate,
            duration,
        }
    }

    /// Decode little-endian PCM16 bytes as returned by speech synthesis.
    pub fn from_pcm16le(utterance_id: u64, slot: ClipSlot, bytes: &[u8], sample_rate: u32) -> Self {
        Self::new(utterance_id, slot, decode_pcm16le(bytes), sample_rate)
    }

    /// Composite owner key: `(utterance_id, slot_index)`.
    pub fn owner(&self) -> (u64, usize) {
        (self.utterance_id, self.slot.index())
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Decode PCM16LE bytes. A trailing odd byte is ignored.
pub fn decode_pcm16le(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Exact duration of `samples` frames at `sample_rate` (integer nanoseconds).
pub fn samples_to_duration(samples: usize, sample_rate: u32) -> Duration {
    if sample_rate == 0 {
        return Duration::ZERO;
    }
    let nanos = (samples as u128) * 1_000_000_000 / u128::from(sample_rate);
    Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
}

// ── Output device ──────────────────────────────────────────────────

/// Errors reported by an audio output device.
#[derive(Debug, thiserror::Error)]
pub enum AudioError {
    #[error("audio output unavailable: {0}")]
    Unavailable(String),
    #[error("audio output rejected buffer: {0}")]
    Rejected(String),
}

/// An audio output with its own clock.
///
/// `current_time` is the position of the output clock, measured from when
/// the device was opened. `enqueue` asks the device to start playing
/// `clip` at `start` on that clock. Dropping the sink releases the device.
pub trait AudioSink: Send + Sync {
    fn current_time(&self) -> Duration;

    fn enqueue(&self, clip: &AudioClip, start: Duration) -> Result<(), AudioError>;

    /// Halt everything playing or queued.
    fn halt(&self);
}

/// One buffer handed to a [`SilentSink`].
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedBuffer {
    pub owner: (u64, usize),
    pub start: Duration,
    pub duration: Duration,
}

/// A sink that keeps time but produces no sound.
///
/// Used by the host binary when no device is wired in, and by tests to
/// observe exactly what would have been played. Its clock follows tokio's
/// time source, so paused-clock tests advance it deterministically.
pub struct SilentSink {
    opened_at: Instant,
    queued: Mutex<Vec<QueuedBuffer>>,
    halts: Mutex<usize>,
    fail_enqueue: bool,
}

impl SilentSink {
    pub fn new() -> Self {
        Self {
            opened_at: Instant::now(),
            queued: Mutex::new(Vec::new()),
            halts: Mutex::new(0),
            fail_enqueue: false,
        }
    }

    /// A sink whose every `enqueue` fails, for exercising device-failure paths.
    pub fn failing() -> Self {
        Self {
            fail_enqueue: true,
            ..Self::new()
        }
    }

    /// Buffers accepted so far, in enqueue order.
    pub fn queued(&self) -> Vec<QueuedBuffer> {
        self.queued.lock().clone()
    }

    pub fn halt_count(&self) -> usize {
        *self.halts.lock()
    }
}

impl Default for SilentSink {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSink for SilentSink {
    fn current_time(&self) -> Duration {
        self.opened_at.elapsed()
    }

    fn enqueue(&self, clip: &AudioClip, start: Duration) -> Result<(), AudioError> {
        if self.fail_enqueue {
            return Err(AudioError::Unavailable("no output device".into()));
        }
        self.queued.lock().push(QueuedBuffer {
            owner: clip.owner(),
            start,
            duration: clip.duration,
        });
        Ok(())
    }

    fn halt(&self) {
        self.queued.lock().clear();
        *self.halts.lock() += 1;
    }
}

// ── Tests ──────────────────────────────────────────────────────────
