//! Audit pipeline runner
//!
//! Threads a single record through the fixed stage order:
//! CLASSIFY → FETCH → ANALYZE → FINALIZE
//!
//! Classification and fetch are fail-open: their failures degrade to a safe
//! default and the run keeps going. Analysis is fail-closed: an inference
//! failure while writing the report surfaces to the caller.

use crate::aggregator::AuditDataSource;
use crate::error::AuditError;
use crate::llm::TextModel;
use crate::models::{AuditData, AuditRecord, Category, StageOutcome};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Report returned when no transaction or policy data is available.
pub const NO_DATA_REPORT: &str = "No transaction or policy data was available for this audit.";

/// Trigger words that mark a filing request.
const FORM_TRIGGERS: [&str; 2] = ["prepare", "file"];

/// Coordinates the four stages over injected collaborators
pub struct AuditPipeline {
    model: Arc<dyn TextModel>,
    source: Arc<dyn AuditDataSource>,
}

impl AuditPipeline {
    pub fn new(model: Arc<dyn TextModel>, source: Arc<dyn AuditDataSource>) -> Self {
        Self { model, source }
    }

    /// Run one audit. Each stage writes exactly one slice of the record.
    pub async fn run(&self, query: &str) -> crate::Result<AuditRecord> {
        let mut record = AuditRecord::new(query);

        info!(
            run_id = %record.run_id,
            query = %record.query,
            "audit run started"
        );

        // === CLASSIFY ===
        let classified = self.classify(&record.query).await;
        if let StageOutcome::Degraded { reason, .. } = &classified {
            warn!(run_id = %record.run_id, %reason, "classification degraded to GENERAL");
        }
        record.category = classified.into_value();
        debug!(run_id = %record.run_id, category = %record.category, "classification complete");

        // === FETCH ===
        let fetched = self.fetch(record.category).await;
        if let StageOutcome::Degraded { reason, .. } = &fetched {
            warn!(run_id = %record.run_id, %reason, "fetch degraded to empty data");
        }
        record.raw_data = fetched.into_value();

        // === ANALYZE ===
        record.report = self.analyze(&record.query, &record.raw_data).await?;

        // === FINALIZE ===
        let (form_prepared, final_output) = finalize(&record.query, &record.report);
        record.form_prepared = form_prepared;
        record.final_output = final_output;

        info!(
            run_id = %record.run_id,
            category = %record.category,
            form_prepared = record.form_prepared,
            "audit run complete"
        );

        Ok(record)
    }

    /// Classify stage: one inference call, fail-open to `General`.
    async fn classify(&self, query: &str) -> StageOutcome<Category> {
        let prompt = format!(
            "Categorize this financial query: '{}'. \
             Reply with only one word: 'DATABASE', 'FILESYSTEM', or 'GENERAL'.",
            query
        );

        match self.model.generate(&prompt).await {
            Ok(reply) => match Category::parse(&reply) {
                Some(category) => StageOutcome::Ok(category),
                None => StageOutcome::degraded(
                    Category::General,
                    format!("unrecognized category reply: {:?}", reply.trim()),
                ),
            },
            Err(e) => StageOutcome::degraded(
                Category::General,
                format!("classification call failed: {}", e),
            ),
        }
    }

    /// Fetch stage: short-circuits for `General`, degrades on source failure.
    async fn fetch(&self, category: Category) -> StageOutcome<AuditData> {
        if !category.requires_fetch() {
            debug!("no data fetch needed for GENERAL category");
            return StageOutcome::Ok(AuditData::default());
        }

        match self.source.fetch_audit_data().await {
            Ok(data) => StageOutcome::Ok(data),
            Err(e) => {
                StageOutcome::degraded(AuditData::default(), format!("data fetch failed: {}", e))
            }
        }
    }

    /// Analysis stage: one inference call; guaranteed-empty input skips it.
    async fn analyze(&self, query: &str, data: &AuditData) -> crate::Result<String> {
        if data.is_empty() {
            debug!("no data available, skipping analysis call");
            return Ok(NO_DATA_REPORT.to_string());
        }

        let prompt = build_audit_prompt(query, data);

        self.model
            .generate(&prompt)
            .await
            .map_err(|e| AuditError::AnalysisError(format!("report generation failed: {}", e)))
    }
}

/// Finalization stage: pure function of query and report.
///
/// A query containing a trigger word (any case, anywhere) marks the form as
/// prepared and wraps the report in the completion template; otherwise the
/// report passes through unchanged.
fn finalize(query: &str, report: &str) -> (bool, String) {
    let lowered = query.to_lowercase();

    if FORM_TRIGGERS.iter().any(|word| lowered.contains(word)) {
        (
            true,
            format!("Audit Complete. Form Prepared. \n{}", report),
        )
    } else {
        (false, report.to_string())
    }
}

fn build_audit_prompt(query: &str, data: &AuditData) -> String {
    format!(
        r#"You are FiscalPulse, a professional autonomous tax auditor.

USER REQUEST: {}

FACTS (from the transaction database):
{}

KNOWLEDGE (from the tax policy):
{}

INSTRUCTIONS:
- Compare each transaction to the policy rules.
- Identify which items are 100% deductible.
- Flag any items that are 'Personal' or exceed the limits.
- Provide a final total for suggested deductions.
- Be precise and professional."#,
        query, data.transactions, data.rules
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::{AuditDataSource, StaticSource};
    use crate::llm::MockModel;
    use async_trait::async_trait;

    struct FailingSource;

    #[async_trait]
    impl AuditDataSource for FailingSource {
        async fn fetch_audit_data(&self) -> crate::Result<AuditData> {
            Err(AuditError::ConnectorError(
                "postgres connector unreachable".to_string(),
            ))
        }
    }

    fn sample_data() -> AuditData {
        AuditData {
            transactions: "laptop 1200.00 | monitor 300.00".to_string(),
            rules: "Hardware under 2500 is 100% deductible.".to_string(),
        }
    }

    #[tokio::test]
    async fn test_general_category_skips_fetch_and_analysis() {
        let model = Arc::new(MockModel::new(["GENERAL"]));
        let source = Arc::new(StaticSource::new(sample_data()));
        let pipeline = AuditPipeline::new(model.clone(), source.clone());

        let record = pipeline.run("what counts as a deduction?").await.unwrap();

        assert_eq!(record.category, Category::General);
        assert!(record.raw_data.is_empty());
        assert_eq!(record.report, NO_DATA_REPORT);
        assert_eq!(source.calls(), 0);
        // Only the classification call; no analysis on guaranteed-empty input.
        assert_eq!(model.calls(), 1);
    }

    #[tokio::test]
    async fn test_healthy_run_produces_report() {
        let model = Arc::new(MockModel::new([
            "DATABASE",
            "Both transactions are fully deductible.",
        ]));
        let source = Arc::new(StaticSource::new(sample_data()));
        let pipeline = AuditPipeline::new(model.clone(), source.clone());

        let record = pipeline.run("Check my hardware expenses").await.unwrap();

        assert_eq!(record.category, Category::Database);
        assert!(!record.raw_data.transactions.is_empty());
        assert_eq!(record.report, "Both transactions are fully deductible.");
        assert!(!record.form_prepared);
        assert_eq!(record.final_output, record.report);
        assert_eq!(source.calls(), 1);
        assert_eq!(model.calls(), 2);
    }

    #[tokio::test]
    async fn test_classifier_failure_degrades_to_general() {
        // Empty script: the classification call itself errors.
        let model = Arc::new(MockModel::new(Vec::<String>::new()));
        let source = Arc::new(StaticSource::new(sample_data()));
        let pipeline = AuditPipeline::new(model, source.clone());

        let record = pipeline.run("anything at all").await.unwrap();

        assert_eq!(record.category, Category::General);
        assert!(record.raw_data.is_empty());
        assert_eq!(record.report, NO_DATA_REPORT);
        assert_eq!(source.calls(), 0);
    }

    #[tokio::test]
    async fn test_unknown_category_reply_degrades_to_general() {
        let model = Arc::new(MockModel::new(["HARDWARE"]));
        let source = Arc::new(StaticSource::new(sample_data()));
        let pipeline = AuditPipeline::new(model, source.clone());

        let record = pipeline.run("check my expenses").await.unwrap();

        assert_eq!(record.category, Category::General);
        assert_eq!(source.calls(), 0);
    }

    #[tokio::test]
    async fn test_aggregator_failure_degrades_to_no_data_report() {
        let model = Arc::new(MockModel::new(["DATABASE"]));
        let pipeline = AuditPipeline::new(model.clone(), Arc::new(FailingSource));

        let record = pipeline.run("Check my hardware expenses").await.unwrap();

        assert_eq!(record.raw_data.transactions, "");
        assert!(record.raw_data.is_empty());
        assert_eq!(record.report, NO_DATA_REPORT);
        // No wasted analysis call on guaranteed-empty input.
        assert_eq!(model.calls(), 1);
    }

    #[tokio::test]
    async fn test_prepare_keyword_sets_form_flag() {
        let model = Arc::new(MockModel::new(["DATABASE", "Q3 deduction summary."]));
        let source = Arc::new(StaticSource::new(sample_data()));
        let pipeline = AuditPipeline::new(model, source);

        let record = pipeline
            .run("Please prepare and file my Q3 deductions")
            .await
            .unwrap();

        assert!(record.form_prepared);
        assert!(record
            .final_output
            .starts_with("Audit Complete. Form Prepared."));
        assert!(record.final_output.contains("Q3 deduction summary."));
    }

    #[tokio::test]
    async fn test_analysis_failure_propagates() {
        // One reply for classification, nothing left for analysis.
        let model = Arc::new(MockModel::new(["DATABASE"]));
        let source = Arc::new(StaticSource::new(sample_data()));
        let pipeline = AuditPipeline::new(model, source);

        let result = pipeline.run("Check my hardware expenses").await;

        assert!(matches!(result, Err(AuditError::AnalysisError(_))));
    }

    #[test]
    fn test_finalize_matches_keywords_case_insensitively() {
        assert!(finalize("PREPARE my taxes", "r").0);
        assert!(finalize("please File form 8829", "r").0);
        assert!(finalize("my filed returns", "r").0);
        assert!(!finalize("check my expenses", "r").0);
    }

    #[test]
    fn test_finalize_passthrough_is_exact() {
        let (prepared, output) = finalize("check my expenses", "the report");
        assert!(!prepared);
        assert_eq!(output, "the report");
    }
}
