//! Main Entrypoint for the Voice Tutor Agent
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment (and an optional env file).
//! 2. Loading the persona and greeting prompts.
//! 3. Building the shared worker state.
//! 4. Either reporting which integrations are configured (`check`) or serving
//!    rooms until Ctrl+C, at which point every live session reports before exit.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::{collections::HashMap, fs, net::SocketAddr, path::PathBuf, sync::Arc};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};
use tutor_agent::{
    config::{Config, TerminationStrategy},
    router::create_router,
    state::{AppState, SessionRegistry},
};

#[derive(Parser, Debug)]
#[command(version, about = "Voice tutor session worker")]
struct Cli {
    /// Load environment variables from this file instead of `./.env`.
    #[arg(long, value_name = "PATH")]
    env_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    /// Run the worker (default).
    Serve,
    /// Print which optional integrations are configured and exit.
    Check,
}

/// Waits for Ctrl+C, then shuts down every live session and waits for their reports.
async fn shutdown_signal(sessions: SessionRegistry) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal. Shutting down gracefully...");
    sessions.shutdown_all().await;
}

/// A helper function to load prompts from a directory.
fn load_prompts(prompts_path: &std::path::Path) -> anyhow::Result<HashMap<String, String>> {
    let mut prompts = HashMap::new();
    for entry in fs::read_dir(prompts_path)
        .with_context(|| format!("Failed to read prompts from {}", prompts_path.display()))?
    {
        let entry = entry?;
        let path = entry.path();
        if path.is_file() && path.extension().and_then(|s| s.to_str()) == Some("md") {
            let prompt_key = path
                .file_stem()
                .and_then(|s| s.to_str())
                .context("Could not get file stem")?
                .to_string();
            let content = fs::read_to_string(&path)?;
            prompts.insert(prompt_key, content.trim().to_string());
        }
    }
    Ok(prompts)
}

fn configured(value: bool) -> &'static str {
    if value { "configured" } else { "not configured" }
}

fn print_check(config: &Config) {
    println!("Voice tutor agent configuration");
    println!("  bind address:     {}", config.bind_address);
    println!("  gemini model:     {} ({})", config.gemini_model, config.gemini_voice);
    println!(
        "  lesson content:   {}",
        configured(config.lesson_content_url.is_some())
    );
    println!(
        "  weather tool:     {}",
        configured(config.weather_webhook_url.is_some())
    );
    println!(
        "  trade tool:       {}",
        configured(config.trade_webhook_url.is_some())
    );
    println!(
        "  calendar tool:    {}",
        configured(config.calendar_webhook_url.is_some())
    );
    println!(
        "  web search:       {}",
        configured(config.tavily_api_key.is_some())
    );
    println!(
        "  vocabulary store: {}",
        configured(config.vocabulary_api_url.is_some())
    );
    let email = if config.email.demo_mode {
        format!("demo mode, writing to {}", config.email.demo_dir.display())
    } else {
        format!(
            "{} ({})",
            config.email.provider.name(),
            configured(config.email.smtp_credentials().is_some())
        )
    };
    println!("  email:            {email}");
    println!(
        "  report recipient: {}",
        config.email.admin_email.as_deref().unwrap_or("not configured")
    );
    let termination = match config.termination {
        TerminationStrategy::Poll => format!("poll every {:?}", config.poll_interval),
        TerminationStrategy::Callback => "host callback only".to_string(),
    };
    println!("  termination:      {termination}");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // --- 1. Load Configuration ---
    if let Some(env_file) = &cli.env_file {
        dotenvy::from_path(env_file)
            .with_context(|| format!("Failed to load env file {}", env_file.display()))?;
    }
    let config = Config::from_env().context("Failed to load configuration")?;

    if cli.command == Some(Command::Check) {
        print_check(&config);
        return Ok(());
    }

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Initializing worker state...");

    // --- 3. Load Prompts ---
    let mut prompts = load_prompts(&config.prompts_path)?;
    let persona = prompts
        .remove("persona")
        .context("persona.md not found in prompts directory")?;
    let greeting = prompts
        .remove("greeting")
        .context("greeting.md not found in prompts directory")?;

    // --- 4. Build Shared State ---
    let app_state = Arc::new(AppState::new(config.clone(), persona, greeting)?);
    let sessions = app_state.sessions.clone();

    // --- 5. Create Router and Apply Middleware ---
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(app_state).layer(cors);

    // --- 6. Start Server ---
    info!(
        model = %config.gemini_model,
        termination = ?config.termination,
        bind_address = %config.bind_address,
        "Worker configured. Starting server..."
    );
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(sessions))
    .await?;

    info!("Server has shut down.");
    Ok(())
}
