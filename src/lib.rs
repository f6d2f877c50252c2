//! Live bilingual voice translation for audio rooms.
//!
//! Utterances from a room are translated and spoken back through a single
//! gapless playback timeline, optionally preceded by the original phrase in a
//! neutral voice. See [`voice`] for the pipeline and [`gemini`] for the
//! bundled translation/speech backend.

pub mod config;
pub mod gemini;
pub mod observability;
pub mod voice;

pub use config::{Config, SessionConfig};
pub use voice::{SessionController, SessionEvent};
