//! Clip production: utterance + config snapshot → ordered audio clips.
//!
//! Wraps the two external collaborators (text translation and speech
//! synthesis) behind async traits. Every failure is caught here and turned
//! into a [`ProductionError`] carried on the [`Production`]; nothing from a
//! collaborator ever propagates past this boundary.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::audio::{AudioClip, ClipSlot, DEFAULT_SAMPLE_RATE};
use super::language::{detect_language, is_original};
use super::utterance::Utterance;
use crate::config::SessionConfig;

// ── Collaborator traits ────────────────────────────────────────────

/// Text translation backend.
///
/// On quota exhaustion a backend may return `text` unchanged instead of an
/// error; callers treat an echo as a degradation signal.
#[async_trait]
pub trait TranslationService: Send + Sync {
    async fn translate(&self, text: &str, target_language: &str) -> anyhow::Result<String>;
}

/// Speech synthesis backend returning raw PCM16LE mono audio.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str, language: &str, voice_id: &str)
        -> anyhow::Result<Vec<u8>>;

    /// Sample rate of the PCM returned by [`synthesize`](Self::synthesize).
    fn sample_rate(&self) -> u32 {
        DEFAULT_SAMPLE_RATE
    }
}

// ── Results ────────────────────────────────────────────────────────

/// Why one utterance (or one slot of it) produced no audio.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProductionError {
    #[error("translation failed: {0}")]
    Translation(String),
    #[error("{slot} speech synthesis failed: {message}")]
    Synthesis { slot: ClipSlot, message: String },
    #[error("{slot} speech synthesis returned no audio")]
    EmptyAudio { slot: ClipSlot },
    #[error("production abandoned after {0:?}")]
    TimedOut(Duration),
}

/// Outcome of producing one utterance.
#[derive(Debug, Clone, PartialEq)]
pub struct Production {
    pub utterance_id: u64,
    /// Translated text, when translation succeeded with a real answer.
    pub translated_text: Option<String>,
    /// Clips in playback order (original before translated).
    pub clips: Vec<AudioClip>,
    /// The translator echoed its input: the service is rate-limited.
    pub quota_hit: bool,
    pub errors: Vec<ProductionError>,
}

impl Production {
    fn empty(utterance_id: u64) -> Self {
        Self {
            utterance_id,
            translated_text: None,
            clips: Vec::new(),
            quota_hit: false,
            errors: Vec::new(),
        }
    }

    /// A production that never finished in time.
    pub fn timed_out(utterance_id: u64, after: Duration) -> Self {
        Self {
            errors: vec![ProductionError::TimedOut(after)],
            ..Self::empty(utterance_id)
        }
    }

    pub fn failed(&self) -> bool {
        !self.errors.is_empty()
    }
}

// ── Producer ───────────────────────────────────────────────────────

/// Turns utterances into clips using the configured collaborators.
pub struct ClipProducer {
    translator: Arc<dyn TranslationService>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    neutral_voice: String,
    source_language: String,
}

impl ClipProducer {
    pub fn new(
        translator: Arc<dyn TranslationService>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
    ) -> Self {
        Self {
            translator,
            synthesizer,
            neutral_voice: "Kore".to_string(),
            source_language: "English".to_string(),
        }
    }

    /// Voice used for the original-language clip in bilingual mode.
    pub fn with_neutral_voice(mut self, voice: impl Into<String>) -> Self {
        self.neutral_voice = voice.into();
        self
    }

    /// Language assumed for Latin-script originals.
    pub fn with_source_language(mut self, language: impl Into<String>) -> Self {
        self.source_language = language.into();
        self
    }

    pub fn neutral_voice(&self) -> &str {
        &self.neutral_voice
    }

    /// Produce the clips for `utterance` using the `config` snapshot taken
    /// when it arrived. The snapshot is never re-read.
    pub async fn produce(&self, utterance: &Utterance, config: &SessionConfig) -> Production {
        let mut production = Production::empty(utterance.id);

        if !config.feature_enabled || is_original(&config.target_language) {
            return production;
        }

        let translated = match self
            .translator
            .translate(&utterance.text, &config.target_language)
            .await
        {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!(utterance_id = utterance.id, error = %e, "translation failed");
                production
                    .errors
                    .push(ProductionError::Translation(e.to_string()));
                return production;
            }
        };

        if translated.trim() == utterance.text.trim() {
            tracing::debug!(
                utterance_id = utterance.id,
                "translation echoed input; skipping speech synthesis"
            );
            production.quota_hit = true;
            return production;
        }

        let translated_fut = self.synthesize_slot(
            utterance.id,
            ClipSlot::Translated,
            &translated,
            &config.target_language,
            &config.voice_id,
        );

        let results = if config.bilingual_enabled {
            let original_language = detect_language(&utterance.text, &self.source_language);
            let original_fut = self.synthesize_slot(
                utterance.id,
                ClipSlot::Original,
                &utterance.text,
                original_language,
                &self.neutral_voice,
            );
            let (original, translated) = tokio::join!(original_fut, translated_fut);
            vec![original, translated]
        } else {
            vec![translated_fut.await]
        };

        for result in results {
            match result {
                Ok(clip) => production.clips.push(clip),
                Err(e) => {
                    tracing::warn!(utterance_id = utterance.id, error = %e, "clip production failed");
                    production.errors.push(e);
                }
            }
        }
        production.translated_text = Some(translated);
        production
    }

    async fn synthesize_slot(
        &self,
        utterance_id: u64,
        slot: ClipSlot,
        text: &str,
        language: &str,
        voice_id: &str,
    ) -> Result<AudioClip, ProductionError> {
        let pcm = self
            .synthesizer
            .synthesize(text, language, voice_id)
            .await
            .map_err(|e| ProductionError::Synthesis {
                slot,
                message: e.to_string(),
            })?;

        let clip =
            AudioClip::from_pcm16le(utterance_id, slot, &pcm, self.synthesizer.sample_rate());
        if clip.is_empty() {
            return Err(ProductionError::EmptyAudio { slot });
        }
        Ok(clip)
    }
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use parking_lot::Mutex;

    struct Dictionary;

    #[async_trait]
    impl TranslationService for Dictionary {
        async fn translate(&self, text: &str, target: &str) -> anyhow::Result<String> {
            match (text, target) {
                ("Hello", "French") => Ok("Bonjour".into()),
                ("Boom", _) => anyhow::bail!("503 from upstream"),
                (other, _) => Ok(other.to_string()),
            }
        }
    }

    /// Returns `len` bytes per call and records every request.
    struct Recorder {
        calls: Mutex<Vec<(String, String, String)>>,
        fail_voice: Option<&'static str>,
        len: usize,
    }

    impl Recorder {
        fn new(len: usize) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                fail_voice: None,
                len,
            }
        }
    }

    #[async_trait]
    impl SpeechSynthesizer for Recorder {
        async fn synthesize(&self, text: &str, language: &str, voice: &str) -> anyhow::Result<Vec<u8>> {
            self.calls
                .lock()
                .push((text.to_string(), language.to_string(), voice.to_string()));
            if self.fail_voice == Some(voice) {
                anyhow::bail!("voice {voice} unavailable");
            }
            Ok(vec![0; self.len])
        }
    }

    fn utterance(text: &str) -> Utterance {
        Utterance {
            id: 1,
            speaker_id: "s".into(),
            speaker_name: "Sam".into(),
            text: text.into(),
            arrived_at: Utc::now(),
        }
    }

    fn config(target: &str, bilingual: bool) -> SessionConfig {
        SessionConfig {
            target_language: target.into(),
            voice_id: "Zephyr".into(),
            bilingual_enabled: bilingual,
            feature_enabled: true,
        }
    }

    fn producer(synth: Arc<Recorder>) -> ClipProducer {
        ClipProducer::new(Arc::new(Dictionary), synth).with_neutral_voice("Kore")
    }

    #[tokio::test]
    async fn disabled_or_original_makes_no_calls() {
        let synth = Arc::new(Recorder::new(48));
        let p = producer(synth.clone());

        let mut disabled = config("French", true);
        disabled.feature_enabled = false;
        assert!(p.produce(&utterance("Hello"), &disabled).await.clips.is_empty());
        assert!(p.produce(&utterance("Hello"), &config("Original", true)).await.clips.is_empty());
        assert!(synth.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn bilingual_orders_original_first() {
        let synth = Arc::new(Recorder::new(48));
        let production = producer(synth.clone())
            .produce(&utterance("Hello"), &config("French", true))
            .await;

        assert_eq!(production.translated_text.as_deref(), Some("Bonjour"));
        let slots: Vec<_> = production.clips.iter().map(|c| c.slot).collect();
        assert_eq!(slots, vec![ClipSlot::Original, ClipSlot::Translated]);

        let calls = synth.calls.lock();
        assert!(calls.contains(&("Hello".into(), "English".into(), "Kore".into())));
        assert!(calls.contains(&("Bonjour".into(), "French".into(), "Zephyr".into())));
    }

    #[tokio::test]
    async fn monolingual_makes_one_clip() {
        let synth = Arc::new(Recorder::new(48));
        let production = producer(synth.clone())
            .produce(&utterance("Hello"), &config("French", false))
            .await;
        assert_eq!(production.clips.len(), 1);
        assert_eq!(production.clips[0].slot, ClipSlot::Translated);
        assert_eq!(synth.calls.lock().len(), 1);
    }

    #[tokio::test]
    async fn echo_marks_quota_and_skips_synthesis() {
        let synth = Arc::new(Recorder::new(48));
        let production = producer(synth.clone())
            .produce(&utterance("Untranslatable"), &config("French", true))
            .await;
        assert!(production.quota_hit);
        assert!(!production.failed());
        assert!(production.clips.is_empty());
        assert!(synth.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn translation_error_yields_failure() {
        let synth = Arc::new(Recorder::new(48));
        let production = producer(synth)
            .produce(&utterance("Boom"), &config("French", true))
            .await;
        assert!(production.failed());
        assert!(production.translated_text.is_none());
        assert!(matches!(production.errors[0], ProductionError::Translation(_)));
    }

    #[tokio::test]
    async fn one_failed_slot_keeps_the_other() {
        let synth = Arc::new(Recorder {
            fail_voice: Some("Kore"),
            ..Recorder::new(48)
        });
        let production = producer(synth)
            .produce(&utterance("Hello"), &config("French", true))
            .await;
        assert!(production.failed());
        assert_eq!(production.clips.len(), 1);
        assert_eq!(production.clips[0].slot, ClipSlot::Translated);
        assert_eq!(production.translated_text.as_deref(), Some("Bonjour"));
    }

    #[tokio::test]
    async fn empty_audio_is_a_failure() {
        let synth = Arc::new(Recorder::new(0));
        let production = producer(synth)
            .produce(&utterance("Hello"), &config("French", false))
            .await;
        assert_eq!(
            production.errors,
            vec![ProductionError::EmptyAudio {
                slot: ClipSlot::Translated
            }]
        );
    }
}
