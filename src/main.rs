//! VibeCoach - Live Social Coaching Assistant
//!
//! Runs a coaching session: polls camera frames for social-cue
//! suggestions, keeps a continuous speech-to-text session alive, and
//! speaks confident suggestions aloud.

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing::{debug, info, Level};
use tracing_subscriber::FmtSubscriber;
use vibecoach::audio::MicConstraints;
use vibecoach::config::Config;
use vibecoach::frame::FileFrameSource;
use vibecoach::intake::{CloudProvider, LocalProvider, SpeechProvider};
use vibecoach::session::{CoachSession, SessionOptions};
use vibecoach::vision::VisionClient;
use vibecoach::voice::{HttpSpeechBackend, RodioOutput};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Audio input device index
    #[arg(short, long)]
    device: Option<usize>,

    /// Target vibe for suggestions
    #[arg(long)]
    vibe: Option<String>,

    /// Recognition language tag (e.g. en-US)
    #[arg(long)]
    language: Option<String>,

    /// Start with coaching voice muted
    #[arg(long)]
    muted: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Setup logging
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("💬 VibeCoach v{} starting...", env!("CARGO_PKG_VERSION"));

    let config = Config::load()?;

    let mut options = SessionOptions::from_config(&config);
    if let Some(vibe) = args.vibe {
        options.target_vibe = vibe;
    }
    if let Some(language) = args.language {
        options.language = language;
    }
    options.muted = args.muted;

    // Collaborator endpoints
    let vision = Arc::new(VisionClient::new(&config.analyze_url));
    if !vision.health_check().await {
        info!("⚠️ Vision endpoint not reachable yet; the poller will keep retrying");
    }
    let speech = Arc::new(HttpSpeechBackend::new(&config.speak_url));
    let output = Arc::new(RodioOutput::new()?);

    // Frame source fed by a companion capture tool
    let frames = Arc::new(FileFrameSource::new(&config.frame_dir));

    // Speech providers: cloud primary, local vosk fallback
    let primary: Box<dyn SpeechProvider> = Box::new(CloudProvider::new(
        &config.token_url,
        &config.cloud_speech_host,
        config.cloud_speech_port,
        MicConstraints::default(),
        args.device,
    ));
    let fallback: Box<dyn SpeechProvider> = Box::new(LocalProvider::new(&config, args.device));

    let mut session = CoachSession::start(
        vision,
        frames,
        speech,
        output,
        primary,
        Some(fallback),
        options,
    )
    .await;

    info!("✅ Session running - Ctrl-C to stop");

    // Surface the coaching view at debug level until interrupted
    let mut status = tokio::time::interval(std::time::Duration::from_secs(10));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = status.tick() => {
                debug!("Phase: {:?}", session.phase());
                for entry in session.visible_context() {
                    debug!("  [{:?}] {}: {}", entry.kind, entry.label, entry.value);
                }
                for line in session.diagnostics() {
                    debug!("  {}", line);
                }
            }
        }
    }

    session.shutdown().await;
    info!("👋 Goodbye");
    Ok(())
}
