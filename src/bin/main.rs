use fiscalpulse::{
    aggregator::McpAggregator, config::AppConfig, llm::GeminiClient, pipeline::AuditPipeline,
};
use std::io::{self, BufRead, Write};
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

    println!("--- FiscalPulse: Autonomous Audit ---");
    print!("\nWhat would you like to audit today? (e.g., 'Check my hardware expenses')\n> ");
    io::stdout().flush()?;

    let mut query = String::new();
    io::stdin().lock().read_line(&mut query)?;
    let query = query.trim();

    if query.is_empty() {
        eprintln!("No query entered.");
        return Ok(());
    }

    // Composition root: one model client, one aggregator, one pipeline.
    let model = Arc::new(GeminiClient::new(config.gemini_api_key.clone()));
    let source = Arc::new(McpAggregator::new(
        config.db_connector(),
        config.fs_connector(),
        &config.docs_path,
    ));
    let pipeline = AuditPipeline::new(model, source);

    info!(query, "running audit");

    match pipeline.run(query).await {
        Ok(record) => {
            println!("\n{}", "=".repeat(60));
            println!("FISCALPULSE FINAL AUDIT REPORT");
            println!("{}", "=".repeat(60));
            println!("{}", record.final_output);
            println!("{}", "=".repeat(60));
            Ok(())
        }
        Err(e) => {
            eprintln!("Audit failed: {}", e);
            eprintln!("Tip: make sure the Postgres and filesystem MCP servers can be spawned.");
            Err(Box::new(e) as Box<dyn std::error::Error>)
        }
    }
}
