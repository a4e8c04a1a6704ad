//! Data aggregator
//!
//! Owns the connector configuration for both data sources and merges their
//! results into one [`AuditData`] record. Connector sessions are opened per
//! fetch and released on every exit path; there is no pooling.
//!
//! Failures propagate whole. Degrading them to "no data available" is the
//! fetch stage's decision, not this module's.

use crate::connector::{ConnectorConfig, ConnectorSession};
use crate::models::AuditData;
use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

/// Fixed statement issued against the relational connector.
const TRANSACTIONS_SQL: &str = "SELECT * FROM business_transactions WHERE is_filled = FALSE;";

/// Policy file read from the document connector, relative to the docs root.
const POLICY_FILE: &str = "tax_docs.md";

/// Trait for the audit data source
#[async_trait]
pub trait AuditDataSource: Send + Sync {
    async fn fetch_audit_data(&self) -> crate::Result<AuditData>;
}

/// Aggregator backed by the two MCP connector subprocesses
pub struct McpAggregator {
    db: ConnectorConfig,
    docs: ConnectorConfig,
    policy_path: String,
}

impl McpAggregator {
    pub fn new(db: ConnectorConfig, docs: ConnectorConfig, docs_path: &str) -> Self {
        Self {
            db,
            docs,
            policy_path: policy_path(docs_path),
        }
    }

    async fn fetch_inner(
        db_session: &mut ConnectorSession,
        fs_session: &mut ConnectorSession,
        policy_path: &str,
    ) -> crate::Result<AuditData> {
        let transactions = db_session
            .call_tool("query", json!({ "sql": TRANSACTIONS_SQL }))
            .await?
            .into_text();

        let rules = fs_session
            .call_tool("read_file", json!({ "path": policy_path }))
            .await?
            .into_text();

        Ok(AuditData {
            transactions,
            rules,
        })
    }
}

#[async_trait]
impl AuditDataSource for McpAggregator {
    async fn fetch_audit_data(&self) -> crate::Result<AuditData> {
        debug!("opening connector sessions");

        let mut db_session = ConnectorSession::open("postgres", &self.db).await?;
        let mut fs_session = match ConnectorSession::open("filesystem", &self.docs).await {
            Ok(session) => session,
            Err(e) => {
                db_session.close().await;
                return Err(e);
            }
        };

        let result =
            Self::fetch_inner(&mut db_session, &mut fs_session, &self.policy_path).await;

        db_session.close().await;
        fs_session.close().await;

        result
    }
}

fn policy_path(docs_path: &str) -> String {
    format!("{}/{}", docs_path.trim_end_matches('/'), POLICY_FILE)
}

/// Fixed-data source for development & testing
/// Keeps the pipeline functional without connector subprocesses
pub struct StaticSource {
    data: AuditData,
    calls: AtomicUsize,
}

impl StaticSource {
    pub fn new(data: AuditData) -> Self {
        Self {
            data,
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of fetches made so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuditDataSource for StaticSource {
    async fn fetch_audit_data(&self) -> crate::Result<AuditData> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.data.clone())
    }
}
