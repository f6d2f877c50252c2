use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::voice::audio::DEFAULT_SAMPLE_RATE;
use crate::voice::language::ORIGINAL;
use crate::voice::registry::DEFAULT_RETENTION;

/// Environment variable that overrides `[gemini].api_key`.
pub const API_KEY_ENV: &str = "GEMINI_API_KEY";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ── Root ───────────────────────────────────────────────────────────

/// Top-level `config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub interpreter: InterpreterSettings,
    pub gemini: GeminiConfig,
    /// Initial per-session preferences.
    pub session: SessionConfig,
}

impl Config {
    /// Load from `path`, or from the platform config directory when `None`.
    ///
    /// An explicit path must exist. The default location may be absent, in
    /// which case defaults are used. `GEMINI_API_KEY` wins over the file.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::load_from(path)?,
            None => match default_config_path() {
                Some(path) if path.exists() => Self::load_from(&path)?,
                _ => Self::default(),
            },
        };

        if let Ok(key) = std::env::var(API_KEY_ENV) {
            if !key.trim().is_empty() {
                config.gemini.api_key = Some(key);
            }
        }

        config.validate()?;
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let interpreter = &self.interpreter;
        if interpreter.retention_limit == 0 {
            return Err(ConfigError::Invalid(
                "interpreter.retention_limit must be at least 1".into(),
            ));
        }
        if interpreter.sample_rate == 0 {
            return Err(ConfigError::Invalid(
                "interpreter.sample_rate must be positive".into(),
            ));
        }
        if interpreter.production_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "interpreter.production_timeout_secs must be positive".into(),
            ));
        }
        if self.gemini.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid("gemini.base_url must not be empty".into()));
        }
        Ok(())
    }

    /// TOML rendering with the API key masked.
    pub fn to_redacted_toml(&self) -> Result<String, ConfigError> {
        let mut shown = self.clone();
        if shown.gemini.api_key.is_some() {
            shown.gemini.api_key = Some("***".into());
        }
        Ok(toml::to_string_pretty(&shown)?)
    }
}

/// `<config dir>/voxbridge/config.toml` for the current platform.
pub fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "voxbridge", "voxbridge")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

// ── Interpreter ────────────────────────────────────────────────────

/// Which order finished productions reach the playback timeline in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackOrder {
    /// Schedule as soon as each production finishes.
    #[default]
    Completion,
    /// Hold finished productions until every earlier arrival is scheduled.
    Arrival,
}

/// Process-wide tuning of the interpreter pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterpreterSettings {
    pub retention_limit: usize,
    pub production_timeout_secs: u64,
    pub playback_order: PlaybackOrder,
    /// Voice for the original-language clip in bilingual mode.
    pub neutral_voice: String,
    /// Assumed language of Latin-script speech.
    pub source_language: String,
    pub sample_rate: u32,
    pub mock_interval_secs: u64,
}

impl InterpreterSettings {
    pub fn production_timeout(&self) -> Duration {
        Duration::from_secs(self.production_timeout_secs)
    }

    pub fn mock_interval(&self) -> Duration {
        Duration::from_secs(self.mock_interval_secs.max(1))
    }
}

impl Default for InterpreterSettings {
    fn default() -> Self {
        Self {
            retention_limit: DEFAULT_RETENTION,
            production_timeout_secs: 15,
            playback_order: PlaybackOrder::Completion,
            neutral_voice: "Kore".into(),
            source_language: "English".into(),
            sample_rate: DEFAULT_SAMPLE_RATE,
            mock_interval_secs: 10,
        }
    }
}

// ── Gemini ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeminiConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub base_url: String,
    pub translation_model: String,
    pub tts_model: String,
    pub request_timeout_secs: u64,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://generativelanguage.googleapis.com/v1beta".into(),
            translation_model: "gemini-2.5-flash".into(),
            tts_model: "gemini-2.5-flash-preview-tts".into(),
            request_timeout_secs: 30,
        }
    }
}

// ── Session ────────────────────────────────────────────────────────

/// User-adjustable settings of a live session. Each utterance is produced
/// against a copy taken when it arrives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Language name, or `"Original"` for no translation.
    pub target_language: String,
    pub voice_id: String,
    pub bilingual_enabled: bool,
    pub feature_enabled: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            target_language: ORIGINAL.into(),
            voice_id: "Zephyr".into(),
            bilingual_enabled: false,
            feature_enabled: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_gives_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.interpreter.retention_limit, 20);
        assert_eq!(config.interpreter.production_timeout(), Duration::from_secs(15));
        assert_eq!(config.session.target_language, "Original");
        config.validate().unwrap();
    }

    #[test]
    fn partial_sections_merge_with_defaults() {
        let toml_str = r#"
[interpreter]
playback_order = "arrival"
retention_limit = 5

[session]
target_language = "French"
bilingual_enabled = true
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.interpreter.playback_order, PlaybackOrder::Arrival);
        assert_eq!(config.interpreter.retention_limit, 5);
        assert_eq!(config.interpreter.neutral_voice, "Kore");
        assert_eq!(config.session.target_language, "French");
        assert!(config.session.bilingual_enabled);
        assert!(config.session.feature_enabled);
    }

    #[test]
    fn validation_rejects_zero_values() {
        let mut config = Config::default();
        config.interpreter.retention_limit = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = Config::default();
        config.interpreter.sample_rate = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = Config::default();
        config.interpreter.production_timeout_secs = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn load_from_reports_parse_errors_with_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[interpreter\nretention_limit = 3").unwrap();

        let err = Config::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("config.toml"));
    }

    #[test]
    fn explicit_missing_path_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(Some(&dir.path().join("absent.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn redacted_rendering_hides_key() {
        let mut config = Config::default();
        config.gemini.api_key = Some("secret-key".into());
        let rendered = config.to_redacted_toml().unwrap();
        assert!(!rendered.contains("secret-key"));
        assert!(rendered.contains("[interpreter]"));
    }
}
