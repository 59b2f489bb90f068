use anyhow::{Context, Result};
use clap::Parser;
use loqa_transcribe::engine::scripted::replies_from_json;
use loqa_transcribe::{
    create_router, AppState, Config, LoadMonitor, ScriptedEngine, SchedulerObserver, Tokenizer,
    TranscriptionHandler, WhisperVocabulary,
};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "loqa-transcribe", version, about = "Windowed speech transcription service")]
struct Args {
    /// Configuration file (extension optional)
    #[arg(long, default_value = "config/loqa-transcribe")]
    config: String,

    /// Override service.http.bind
    #[arg(long)]
    bind: Option<String>,

    /// Override service.http.port
    #[arg(long)]
    port: Option<u16>,
}

fn load_tokenizer(cfg: &Config) -> Result<Arc<dyn Tokenizer>> {
    match &cfg.engine.tokenizer_path {
        #[cfg(feature = "hf-tokenizer")]
        Some(path) => {
            info!("Loading tokenizer from {}", path.display());
            Ok(loqa_transcribe::engine::tokenizer::load_tokenizer_file(path)?)
        }
        #[cfg(not(feature = "hf-tokenizer"))]
        Some(path) => anyhow::bail!(
            "engine.tokenizer_path ({}) requires the hf-tokenizer feature",
            path.display()
        ),
        None => {
            info!("Using built-in Whisper vocabulary");
            Ok(Arc::new(WhisperVocabulary::new()))
        }
    }
}

fn build_engine(cfg: &Config, monitor: &LoadMonitor) -> Result<ScriptedEngine> {
    let tokenizer = load_tokenizer(cfg)?;
    let observer: Arc<dyn SchedulerObserver> = Arc::new(monitor.clone());

    let mut engine = ScriptedEngine::with_observer(
        tokenizer,
        cfg.engine.max_model_len,
        cfg.engine.max_in_flight,
        Some(observer),
    );

    if let Some(path) = &cfg.engine.script_path {
        let script = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read engine script {}", path.display()))?;
        let replies = replies_from_json(&script)?;
        info!("Loaded {} scripted window replies from {}", replies.len(), path.display());
        engine = engine.with_replies(replies);
    }

    Ok(engine)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let mut cfg = Config::load(&args.config)?;
    if let Some(bind) = args.bind {
        cfg.service.http.bind = bind;
    }
    if let Some(port) = args.port {
        cfg.service.http.port = port;
    }

    info!("{} v{}", cfg.service.name, env!("CARGO_PKG_VERSION"));
    info!(
        "Windows: {}s at {} Hz, logprob scope {:?}",
        cfg.transcription.window_duration_sec,
        cfg.transcription.sample_rate,
        cfg.transcription.logprob_scope
    );

    let monitor = LoadMonitor::new();
    let engine = Arc::new(build_engine(&cfg, &monitor)?);
    let handler = TranscriptionHandler::new(engine, cfg.transcription.settings());

    let state = AppState::new(Arc::new(handler), monitor)
        .with_default_language(cfg.transcription.default_language()?)
        .with_max_body_bytes(cfg.service.http.max_body_bytes());
    let app = create_router(state);

    let addr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("HTTP server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
