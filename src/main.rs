use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

use voxbridge::config::{Config, JsonPreferenceStore, PreferenceStore, SessionConfig};
use voxbridge::gemini::GeminiClient;
use voxbridge::observability::init_logging;
use voxbridge::voice::{
    ClipProducer, MockUtteranceSource, Participant, SessionController, SessionEvent, SilentSink,
    UtteranceFeed, UtterancePhase,
};

#[derive(Parser, Debug)]
#[command(name = "voxbridge", version, about = "Live bilingual voice translation")]
struct Cli {
    /// Path to config.toml (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Interpret a simulated room until Ctrl-C (or --duration)
    Room {
        /// Target language, or "Original" to disable translation
        #[arg(long)]
        target: Option<String>,

        /// Voice for translated speech
        #[arg(long)]
        voice: Option<String>,

        /// Speak the original phrase before each translation
        #[arg(long)]
        bilingual: bool,

        /// Stop after this many seconds
        #[arg(long)]
        duration: Option<u64>,
    },

    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(if cli.verbose {
        "voxbridge=debug"
    } else {
        "voxbridge=info"
    });

    let config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;

    match cli.command {
        Commands::Config => {
            print!("{}", config.to_redacted_toml()?);
            Ok(())
        }
        Commands::Room {
            target,
            voice,
            bilingual,
            duration,
        } => run_room(config, target, voice, bilingual, duration.map(Duration::from_secs)).await,
    }
}

async fn run_room(
    config: Config,
    target: Option<String>,
    voice: Option<String>,
    bilingual: bool,
    duration: Option<Duration>,
) -> anyhow::Result<()> {
    let store = JsonPreferenceStore::in_data_dir();
    let mut initial = load_preferences(store.as_ref()).unwrap_or_else(|| config.session.clone());
    let overridden = target.is_some() || voice.is_some() || bilingual;
    if let Some(target) = target {
        initial.target_language = target;
    }
    if let Some(voice) = voice {
        initial.voice_id = voice;
    }
    if bilingual {
        initial.bilingual_enabled = true;
    }
    if overridden {
        if let Some(store) = store.as_ref() {
            if let Err(e) = store.save(&initial) {
                tracing::warn!(error = %e, "could not persist preferences");
            }
        }
    }

    let gemini = Arc::new(
        GeminiClient::new(&config.gemini).with_sample_rate(config.interpreter.sample_rate),
    );
    if !gemini.has_api_key() {
        tracing::warn!("no Gemini API key configured; every utterance will be marked failed");
    }
    let producer = ClipProducer::new(gemini.clone(), gemini)
        .with_neutral_voice(config.interpreter.neutral_voice.clone())
        .with_source_language(config.interpreter.source_language.clone());
    let controller = SessionController::new(Arc::new(producer), &config.interpreter, initial);

    let feed = Arc::new(UtteranceFeed::new());
    let mut events = controller.subscribe_events();
    controller
        .start(feed.as_ref(), Arc::new(SilentSink::new()))
        .context("failed to start session")?;

    let retention = config.interpreter.retention_limit;
    let printer = tokio::spawn(async move {
        let mut shown = PrintedTranslations::new(retention);
        loop {
            match events.recv().await {
                Ok(SessionEvent::SessionEnded { .. }) | Err(RecvError::Closed) => break,
                Ok(event) => print_event(&event, &mut shown),
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "transcript display fell behind");
                }
            }
        }
    });

    let cancel = CancellationToken::new();
    let mock = MockUtteranceSource::new(room_participants(), config.interpreter.mock_interval())
        .spawn(Arc::clone(&feed), cancel.clone());

    let deadline = async {
        match duration {
            Some(d) => tokio::time::sleep(d).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for Ctrl-C")?;
        }
        () = deadline => {}
    }

    cancel.cancel();
    let _ = mock.await;
    controller.stop();
    let _ = printer.await;
    Ok(())
}

fn load_preferences(store: Option<&JsonPreferenceStore>) -> Option<SessionConfig> {
    match store?.load() {
        Ok(saved) => saved,
        Err(e) => {
            tracing::warn!(error = %e, "ignoring unreadable preferences");
            None
        }
    }
}

fn room_participants() -> Vec<Participant> {
    vec![
        Participant::new("spk-1", "Mina"),
        Participant::new("spk-2", "Jonas"),
        Participant::new("spk-3", "Priya"),
    ]
}

/// Utterance ids whose translation line was already printed, bounded to
/// the transcript's retention window.
struct PrintedTranslations {
    ids: VecDeque<u64>,
    limit: usize,
}

impl PrintedTranslations {
    fn new(limit: usize) -> Self {
        Self {
            ids: VecDeque::with_capacity(limit),
            limit: limit.max(1),
        }
    }

    /// `false` when `id` was already recorded.
    fn insert(&mut self, id: u64) -> bool {
        if self.ids.contains(&id) {
            return false;
        }
        if self.ids.len() == self.limit {
            self.ids.pop_front();
        }
        self.ids.push_back(id);
        true
    }
}

fn print_event(event: &SessionEvent, shown: &mut PrintedTranslations) {
    match event {
        SessionEvent::SessionStarted { session_id, .. } => {
            println!("── session {session_id} ──");
        }
        SessionEvent::UtteranceAppended { entry, .. } => {
            println!("[{}] {}", entry.utterance.speaker_name, entry.utterance.text);
        }
        SessionEvent::UtteranceAnnotated { entry, .. } => {
            if entry.phase == UtterancePhase::Producing || !shown.insert(entry.utterance_id()) {
                return;
            }
            match (&entry.translated_text, entry.failed) {
                (Some(text), _) => println!("    → {text}"),
                (None, true) => println!("    ✗ no translation"),
                (None, false) => {}
            }
        }
        SessionEvent::DegradedChanged { degraded, .. } => {
            if *degraded {
                println!("(translation rate-limited; showing originals)");
            } else {
                println!("(translation restored)");
            }
        }
        SessionEvent::SessionEnded { .. } => {}
    }
}
