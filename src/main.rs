use std::sync::Arc;

use absence_line::classifier::{Classifier, ClassifierConfig, OpenAiClassifier};
use absence_line::config::AppConfig;
use absence_line::http::{AppState, routes};
use absence_line::store::{Database, LibSqlBackend};
use absence_line::tracker::{ConversationTracker, TrackerConfig};
use absence_line::transport::{HttpSmsTransport, SmsTransport, TransportConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = AppConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        std::process::exit(1);
    });

    let transport_config = TransportConfig::from_env().unwrap_or_else(|| {
        eprintln!("Error: SMS transport not configured");
        eprintln!("  export SENDBLUE_BASE_URL=https://api.sendblue.co/api");
        eprintln!("  export SENDBLUE_API_KEY=...");
        eprintln!("  export SENDBLUE_API_SECRET=...");
        std::process::exit(1);
    });

    let classifier_config = ClassifierConfig::from_env().unwrap_or_else(|| {
        eprintln!("Error: OPENAI_API_KEY not set");
        eprintln!("  export OPENAI_API_KEY=sk-...");
        std::process::exit(1);
    });

    eprintln!("📞 Absence Line v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Bind: http://{}", config.bind_addr);
    eprintln!("   Model: {}", classifier_config.model);
    eprintln!("   Auto-approve: {}", config.auto_approve);
    eprintln!("   Database: {}\n", config.db_path);

    let db: Arc<dyn Database> = Arc::new(
        LibSqlBackend::new_local(std::path::Path::new(&config.db_path))
            .await
            .unwrap_or_else(|e| {
                eprintln!("Error: Failed to open database at {}: {e}", config.db_path);
                std::process::exit(1);
            }),
    );

    let transport: Arc<dyn SmsTransport> = Arc::new(HttpSmsTransport::new(transport_config)?);
    let classifier: Arc<dyn Classifier> = Arc::new(OpenAiClassifier::new(classifier_config));

    let callback_url = format!(
        "{}/webhooks/delivery_status",
        config.callback_base_url.trim_end_matches('/')
    );
    let tracker = Arc::new(ConversationTracker::new(
        Arc::clone(&db),
        transport,
        classifier,
        TrackerConfig {
            opening_template: config.opening_template.clone(),
            callback_url,
            dispatch_timeout: config.dispatch_timeout,
            classify_timeout: config.classify_timeout,
        },
    ));

    let app = routes(AppState {
        db,
        tracker,
        auto_approve: config.auto_approve,
    });

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, "Absence Line server started");
    axum::serve(listener, app).await?;

    Ok(())
}
