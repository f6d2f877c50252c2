//! Live bilingual interpretation pipeline.
//!
//! Turns a stream of attributed utterances into spoken translations played
//! back without gaps or overlaps, while keeping a bounded transcript for UI
//! rendering.
//!
//! ## Design
//! - `UtteranceSource` delivers utterances; `UtteranceFeed` is the in-process
//!   fan-out and `MockUtteranceSource` a timer-driven stand-in
//! - `ClipProducer` calls translation and speech synthesis (trait-driven,
//!   any backend) and never lets a collaborator error escape
//! - `PlaybackScheduler` places clips on a single output timeline so an
//!   utterance's clips always play back to back
//! - `UtteranceRegistry` keeps the last N utterances with annotation state
//! - `SessionController` wires them together under a generation counter so
//!   late results from a torn-down session are dropped

pub mod audio;
pub mod events;
pub mod language;
pub mod producer;
pub mod registry;
pub mod reorder;
pub mod scheduler;
pub mod session;
pub mod utterance;

pub use audio::{AudioClip, AudioError, AudioSink, ClipSlot, SilentSink};
pub use events::SessionEvent;
pub use producer::{ClipProducer, Production, ProductionError, SpeechSynthesizer, TranslationService};
pub use registry::{AnnotationPatch, TranscriptEntry, UtterancePhase, UtteranceRegistry};
pub use scheduler::{ClipCallbacks, PlaybackScheduler, ScheduledClip};
pub use session::{SessionController, SessionError, SessionState, SessionStats};
pub use utterance::{
    MockUtteranceSource, Participant, Subscription, Utterance, UtteranceFeed, UtteranceListener,
    UtteranceSource,
};
