use anyhow::Result;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use assessment_engine::{
    api::{create_router, AppState},
    config::{Config, LoggingConfig},
    database::Database,
    llm_service::LLMService,
    log_system_event,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    let config = Config::from_env()?;
    let _guard = setup_logging(&config.logging)?;
    config.validate()?;

    log_system_event!(startup, component = "server", "Starting assessment engine");

    let db = Database::new(&config.database.url).await?;
    info!("Database initialized successfully");

    let llm_service = LLMService::new_with_provider(
        config.llm.api_key.clone(),
        config.llm.base_url.clone(),
        config.llm.provider,
        config.llm.model.clone(),
    );
    info!(
        provider = llm_service.provider_name(),
        model = llm_service.model_name(),
        "Initialized text-generation service"
    );

    let db = Arc::new(db);
    let state = AppState::build(&config.engine, db.clone(), db, llm_service);

    let app = create_router(state).layer(ServiceBuilder::new().layer(CorsLayer::permissive()));

    let addr = config.server.address();
    info!("Server starting on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    log_system_event!(shutdown, component = "server", "Assessment engine stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
}

fn setup_logging(logging: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::fmt;

    let env_filter = EnvFilter::try_new(&logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    let console_layer = logging.console_enabled.then(|| {
        fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .with_ansi(true)
    });

    let (file_layer, guard) = if logging.file_enabled {
        std::fs::create_dir_all(&logging.log_directory).unwrap_or_else(|e| {
            eprintln!("Warning: Could not create logs directory: {}", e);
        });

        // Daily rotation, no ANSI colors in files
        let file_appender = tracing_appender::rolling::daily(&logging.log_directory, "assessment-engine.log");
        let (non_blocking_file, guard) = tracing_appender::non_blocking(file_appender);
        let layer = fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .with_ansi(false)
            .with_writer(non_blocking_file);
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    info!(
        directory = %logging.log_directory,
        file_enabled = logging.file_enabled,
        "Logging initialized"
    );

    Ok(guard)
}
