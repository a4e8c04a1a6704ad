//! Environment-backed configuration
//!
//! Read once at the composition root. Connector parameters are read-only
//! after construction; each pipeline invocation opens its own sessions.

use crate::connector::ConnectorConfig;
use std::env;
use tracing::warn;

const POSTGRES_SERVER_PACKAGE: &str = "@modelcontextprotocol/server-postgres";
const FILESYSTEM_SERVER_PACKAGE: &str = "@modelcontextprotocol/server-filesystem";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub gemini_api_key: String,
    pub port: u16,
    pub database_url: String,
    pub docs_path: String,
    pub db_command: String,
    pub fs_command: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let gemini_api_key = env::var("GEMINI_API_KEY").unwrap_or_else(|_| {
            warn!("GEMINI_API_KEY not set; classification will degrade to GENERAL");
            String::new()
        });

        let port = env::var("PORT")
            .or_else(|_| env::var("API_PORT"))
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or(8080);

        let database_url = env::var("FINANCE_DB_URL")
            .unwrap_or_else(|_| "postgresql://localhost:5432/finance_db".to_string());

        let docs_path = env::var("TAX_DOCS_PATH").unwrap_or_else(|_| "./tax-docs".to_string());

        let db_command = env::var("MCP_DB_COMMAND").unwrap_or_else(|_| "npx".to_string());
        let fs_command = env::var("MCP_FS_COMMAND").unwrap_or_else(|_| "npx".to_string());

        Self {
            gemini_api_key,
            port,
            database_url,
            docs_path,
            db_command,
            fs_command,
        }
    }

    pub fn db_connector(&self) -> ConnectorConfig {
        ConnectorConfig::new(
            &self.db_command,
            vec![
                POSTGRES_SERVER_PACKAGE.to_string(),
                self.database_url.clone(),
            ],
        )
    }

    pub fn fs_connector(&self) -> ConnectorConfig {
        ConnectorConfig::new(
            &self.fs_command,
            vec![FILESYSTEM_SERVER_PACKAGE.to_string(), self.docs_path.clone()],
        )
    }
}
