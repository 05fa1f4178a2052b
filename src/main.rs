use clap::Parser;
use openai_gateway::config::config_search_paths;
use openai_gateway::{build_router, AppState, GatewayConfig, SharedJournal};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "openai-gateway",
    about = "OpenAI-compatible gateway for Azure OpenAI, Gemini, PaLM and Qwen",
    version
)]
struct Cli {
    /// Path to config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Delay between streamed frames in milliseconds (overrides config)
    #[arg(long)]
    pacing_ms: Option<u64>,

    /// Exchange journal path (JSONL)
    #[arg(long, default_value = "openai-gateway.jsonl")]
    journal_file: PathBuf,

    /// Print config search paths and exit
    #[arg(long)]
    show_config_paths: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "openai_gateway=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if cli.show_config_paths {
        println!("Config search paths:");
        for (i, path) in config_search_paths().iter().enumerate() {
            println!("  {}. {}", i + 1, path.display());
        }
        return Ok(());
    }

    let mut config = GatewayConfig::find_and_load(cli.config.as_deref())?;

    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(pacing_ms) = cli.pacing_ms {
        config.stream.pacing_ms = pacing_ms;
    }

    let journal = SharedJournal::open(&cli.journal_file)?;

    info!("openai-gateway v{}", env!("CARGO_PKG_VERSION"));
    info!("  Port:      {}", config.port);
    info!("  Backends:  {}", config.backends.len());
    info!("  Models:    {} routed", config.models.len());
    info!("  Pacing:    {} ms", config.stream.pacing_ms);
    info!("  Journal:   {}", cli.journal_file.display());
    for (name, entry) in &config.backends {
        let base_url = GatewayConfig::effective_base_url(name, entry)?;
        info!("  [{}] {} -> {}", name, entry.kind.as_str(), base_url);
    }

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(300))
        .build()?;

    let state = Arc::new(AppState {
        config: config.clone(),
        client,
        journal,
    });

    let app = build_router(state);
    let bind_addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    info!("Listening on http://{}", bind_addr);
    info!("  OPENAI_BASE_URL=http://localhost:{}/v1", config.port);

    axum::serve(listener, app).await?;

    Ok(())
}
