pub mod preferences;
pub mod schema;

pub use preferences::{JsonPreferenceStore, PreferenceStore};
pub use schema::{
    default_config_path, Config, ConfigError, GeminiConfig, InterpreterSettings, PlaybackOrder,
    SessionConfig, API_KEY_ENV,
};
