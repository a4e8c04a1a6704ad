use fiscalpulse::{
    aggregator::McpAggregator, api::start_server, config::AppConfig, llm::GeminiClient,
    pipeline::AuditPipeline,
};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    // Load environment variables
    dotenv::dotenv().ok();
    let config = AppConfig::from_env();

    info!("FiscalPulse Audit Orchestrator - API Server");
    info!("Port: {}", config.port);

    // Composition root: one model client, one aggregator, one pipeline.
    let model = Arc::new(GeminiClient::new(config.gemini_api_key.clone()));
    let source = Arc::new(McpAggregator::new(
        config.db_connector(),
        config.fs_connector(),
        &config.docs_path,
    ));
    let pipeline = Arc::new(AuditPipeline::new(model, source));

    info!("Pipeline initialized");
    info!("Starting API server...");

    start_server(pipeline, config.port).await?;

    Ok(())
}
