use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use tracing::{info_span, Instrument};

use crate::analysis::{Classifier, InsightGenerator, TaskSynthesizer};
use crate::broadcast::report_events::ReportPhase;
use crate::config::AnalysisConfig;
use crate::db::analysis_repo::{self, AnalysisRecord, PersistOutcome};
use crate::db::stats_repo::{self, UsageSample};
use crate::db::{log_repo, report_repo, task_repo, Database};
use crate::error::ExtractError;
use crate::extractor::{ExtractedData, ExtractorRegistry};
use crate::llm::{LanguageModel, TokenUsage};
use crate::model::{
    Classification, DocumentType, InsightBundle, LogStatus, ProcessingLogEntry, Report,
};
use crate::notification::NotifyJob;
use crate::queue::{JobQueue, Lane};
use crate::sanitize;
use crate::storage::{IntakeStorage, ARCHIVE_DIR};

use super::context::Analysis;
use super::error::PipelineError;
use super::progress::ProgressReporter;

pub struct Pipeline {
    db: Database,
    queue: JobQueue,
    extractor: ExtractorRegistry,
    classifier: Classifier,
    insights: InsightGenerator,
    synthesizer: TaskSynthesizer,
    storage: IntakeStorage,
    sample_chars: usize,
}

impl Pipeline {
    pub fn new(
        db: Database,
        queue: JobQueue,
        model: Arc<dyn LanguageModel>,
        analysis: &AnalysisConfig,
        storage: IntakeStorage,
    ) -> Self {
        Self {
            db,
            queue,
            extractor: ExtractorRegistry::new(),
            classifier: Classifier::new(Arc::clone(&model), analysis.classification_sample_chars),
            insights: InsightGenerator::new(model, analysis.insight_sample_rows),
            synthesizer: TaskSynthesizer::new(analysis.base_revenue),
            storage,
            sample_chars: analysis.classification_sample_chars,
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Runs a queued report to completion: analysis, follow-up
    /// notifications, archival and the `completed` transition.
    ///
    /// Returns `None` when the report is already terminal.
    pub async fn run(
        &self,
        report: &Report,
        progress: &dyn ProgressReporter,
    ) -> Result<Option<Analysis>, PipelineError> {
        let span = info_span!("pipeline",
            report_id = %report.id,
            tenant = %report.tenant_id,
            filename = %sanitize::redact_path(Path::new(&report.filename)),
        );
        self.run_inner(report, progress).instrument(span).await
    }

    async fn run_inner(
        &self,
        report: &Report,
        progress: &dyn ProgressReporter,
    ) -> Result<Option<Analysis>, PipelineError> {
        if report.status.is_terminal() {
            info!("Report {} is already {}, nothing to do", report.id, report.status);
            return Ok(None);
        }
        let started = Instant::now();
        report_repo::mark_processing(&self.db, &report.id, Utc::now())?;

        let analysis = self.analyze(report, progress).await?;

        self.enqueue_notifications(report)?;
        progress.phase(ReportPhase::Notifying, "Notifications queued");

        self.archive_source(report)?;

        let now = Utc::now();
        if report_repo::mark_completed(&self.db, &report.id, now)? {
            let duration_ms = self.processing_duration_ms(report, now, started);
            self.record_usage(
                report,
                analysis.classification.document_type,
                true,
                duration_ms,
                analysis.usage,
            );
            self.log_stage(
                &report.id,
                "complete",
                LogStatus::Succeeded,
                format!("Completed with {} task(s)", analysis.tasks.len()),
                Some(duration_ms),
            );
        }

        info!(
            "Report {} completed: {} ({:.2}), {} task(s){}",
            report.id,
            analysis.classification.document_type,
            analysis.classification.confidence,
            analysis.tasks.len(),
            if analysis.is_degraded() { ", degraded" } else { "" }
        );
        Ok(Some(analysis))
    }

    /// Extraction through persistence. Reuses an earlier attempt's stored
    /// analysis instead of calling the providers again.
    pub async fn analyze(
        &self,
        report: &Report,
        progress: &dyn ProgressReporter,
    ) -> Result<Analysis, PipelineError> {
        if let Some(stored) = self.load_persisted(report)? {
            info!("Reusing stored analysis of report {}", report.id);
            progress.phase(ReportPhase::Persisting, "Analysis already stored");
            return Ok(stored);
        }

        let source = Path::new(&report.file_path);

        // Extraction
        let step = Instant::now();
        let raw = {
            let _span = info_span!("extract").entered();
            match self.extractor.read(source) {
                Ok(raw) => raw,
                Err(ExtractError::NotFound(path)) => {
                    return Err(PipelineError::SourceMissing(path));
                }
                Err(e) => return Err(e.into()),
            }
        };
        let (extract_status, extract_message) = if raw.is_metadata_only() {
            (
                LogStatus::Degraded,
                format!("Metadata only ({} bytes)", raw.metadata.size_bytes),
            )
        } else {
            (
                LogStatus::Succeeded,
                format!("Read {} row(s)", raw.table.rows.len()),
            )
        };
        self.log_stage(&report.id, "extract", extract_status, extract_message, Some(elapsed_ms(step)));
        progress.phase(ReportPhase::Extracting, "Content extracted");

        // Classification feeds the domain extractor.
        let step = Instant::now();
        let sample = raw.sample(self.sample_chars);
        let classified = self.classifier.classify(&sample, &report.filename).await;
        let classification = classified.classification.clone();
        let data = {
            let _span = info_span!("structure", document_type = %classification.document_type).entered();
            ExtractedData::from_raw(raw, &classification)
        };
        match &classified.fallback_reason {
            Some(reason) => self.log_stage(
                &report.id,
                "classify",
                LogStatus::Degraded,
                format!("Fallback classification: {}", reason),
                Some(elapsed_ms(step)),
            ),
            None => self.log_stage(
                &report.id,
                "classify",
                LogStatus::Succeeded,
                format!(
                    "{} ({:.2}) via {}",
                    classification.document_type,
                    classification.confidence,
                    classified.provider.as_deref().unwrap_or("unknown")
                ),
                Some(elapsed_ms(step)),
            ),
        }
        progress.phase(ReportPhase::Classifying, &format!("Classified as {}", classification.document_type));

        // Insights
        let step = Instant::now();
        let insight = self.insights.analyze(&data, &classification).await;
        let bundle = insight.bundle;
        self.log_stage(
            &report.id,
            "insights",
            if bundle.degraded { LogStatus::Degraded } else { LogStatus::Succeeded },
            format!(
                "{} finding(s), {} risk(s), {} opportunity(ies)",
                bundle.insight.key_findings.len(),
                bundle.insight.risks.len(),
                bundle.insight.opportunities.len()
            ),
            Some(elapsed_ms(step)),
        );
        progress.phase(ReportPhase::GeneratingInsights, "Insights generated");

        // Tasks and persistence
        let step = Instant::now();
        let tasks = self.synthesizer.synthesize(
            &report.id,
            &bundle,
            data.structured.revenue_base(),
            Utc::now(),
        );
        let summary = data.summary_json();
        let outcome = {
            let _span = info_span!("persist").entered();
            analysis_repo::persist_analysis(
                &self.db,
                &report.id,
                &AnalysisRecord {
                    classification: &classification,
                    extracted_summary: &summary,
                    data_quality: data.data_quality,
                    bundle: &bundle,
                    tasks: &tasks,
                },
            )?
        };
        let tasks = match outcome {
            PersistOutcome::Inserted => tasks,
            PersistOutcome::AlreadyPersisted => task_repo::list_by_report(&self.db, &report.id)?,
        };
        self.log_stage(
            &report.id,
            "persist",
            LogStatus::Succeeded,
            format!("Stored {} task(s)", tasks.len()),
            Some(elapsed_ms(step)),
        );
        progress.phase(ReportPhase::Persisting, "Results stored");

        let mut usage = classified.usage;
        usage.add(insight.usage);

        Ok(Analysis {
            report_id: report.id.clone(),
            classification,
            extracted: Some(summary),
            bundle,
            tasks,
            usage,
            reused: outcome == PersistOutcome::AlreadyPersisted,
        })
    }

    fn load_persisted(&self, report: &Report) -> Result<Option<Analysis>, PipelineError> {
        let Some(stored) = analysis_repo::find_insight(&self.db, &report.id)? else {
            return Ok(None);
        };
        let classification = analysis_repo::find_classification(&self.db, &report.id)?
            .unwrap_or_else(Classification::fallback);
        let tasks = task_repo::list_by_report(&self.db, &report.id)?;

        Ok(Some(Analysis {
            report_id: report.id.clone(),
            classification,
            extracted: None,
            bundle: InsightBundle {
                insight: stored.insight,
                action_items: Vec::new(),
                provider: stored.provider,
                degraded: stored.degraded,
            },
            tasks,
            usage: TokenUsage::default(),
            reused: true,
        }))
    }

    /// Role e-mails plus the sender confirmation. Dedupe keys make a
    /// retried job enqueue nothing new.
    fn enqueue_notifications(&self, report: &Report) -> Result<(), PipelineError> {
        let ready = NotifyJob::ReportReady {
            report_id: report.id.clone(),
        };
        self.queue
            .enqueue(Lane::Notify, &ready, ready.dedupe_key().as_deref())?;

        if report.sender.is_some() {
            let confirmation = NotifyJob::Confirmation {
                report_id: report.id.clone(),
            };
            self.queue.enqueue(
                Lane::Notify,
                &confirmation,
                confirmation.dedupe_key().as_deref(),
            )?;
        }
        Ok(())
    }

    fn archive_source(&self, report: &Report) -> Result<(), PipelineError> {
        let source = Path::new(&report.file_path);
        if in_folder(source, ARCHIVE_DIR) {
            return Ok(());
        }
        if !source.exists() {
            warn!(
                "Source of report {} is gone, nothing to archive: {}",
                report.id,
                sanitize::redact_path(source)
            );
            return Ok(());
        }

        let _span = info_span!("archive").entered();
        let archived = self.storage.archive(source).map_err(PipelineError::Archive)?;
        report_repo::update_file_path(&self.db, &report.id, &archived.to_string_lossy())?;
        Ok(())
    }

    /// Records a failed attempt that will be retried. The report stays
    /// `processing`.
    pub fn record_attempt_failure(&self, report_id: &str, error: &str, attempt: u32) {
        if let Err(e) = report_repo::record_attempt_error(&self.db, report_id, error) {
            warn!("Could not record error on report {}: {}", report_id, e);
        }
        self.log_stage(
            report_id,
            "attempt",
            LogStatus::Retrying,
            format!("Attempt {} failed: {}", attempt, error),
            None,
        );
    }

    /// Terminal failure: the report becomes `failed`, its source moves to
    /// the errors folder and the sender is told.
    ///
    /// Returns the report when this call made the transition.
    pub fn fail_report(
        &self,
        report_id: &str,
        error: &str,
        attempts: u32,
    ) -> Result<Option<Report>, PipelineError> {
        let Some(report) = report_repo::find_by_id(&self.db, report_id)? else {
            return Err(PipelineError::ReportNotFound(report_id.to_string()));
        };
        let now = Utc::now();
        if !report_repo::mark_failed(&self.db, report_id, error, now)? {
            debug!("Report {} was already terminal", report_id);
            return Ok(None);
        }

        self.log_stage(
            report_id,
            "failed",
            LogStatus::Failed,
            format!("Giving up after {} attempt(s): {}", attempts, error),
            None,
        );

        let source = Path::new(&report.file_path);
        if source.exists() && !in_folder(source, crate::storage::ERRORS_DIR) {
            match self.storage.quarantine(source) {
                Ok(moved) => {
                    report_repo::update_file_path(&self.db, report_id, &moved.to_string_lossy())?;
                }
                Err(e) => error!("Could not move failed source of report {}: {}", report_id, e),
            }
        }

        let document_type = analysis_repo::find_classification(&self.db, report_id)?
            .map(|c| c.document_type)
            .unwrap_or(DocumentType::Other);
        let duration_ms = self.processing_duration_ms(&report, now, Instant::now());
        self.record_usage(&report, document_type, false, duration_ms, TokenUsage::default());

        if report.sender.is_some() {
            let notice = NotifyJob::ReportFailed {
                report_id: report_id.to_string(),
            };
            self.queue
                .enqueue(Lane::Notify, &notice, notice.dedupe_key().as_deref())?;
        }

        Ok(Some(report))
    }

    fn processing_duration_ms(&self, report: &Report, now: DateTime<Utc>, started: Instant) -> i64 {
        let first_start = report_repo::find_by_id(&self.db, &report.id)
            .ok()
            .flatten()
            .and_then(|r| r.processing_started_at);
        match first_start {
            Some(at) => (now - at).num_milliseconds().max(0),
            None => elapsed_ms(started),
        }
    }

    fn record_usage(
        &self,
        report: &Report,
        document_type: DocumentType,
        succeeded: bool,
        duration_ms: i64,
        usage: TokenUsage,
    ) {
        let date = Utc::now().format("%Y-%m-%d").to_string();
        let sample = UsageSample {
            date: &date,
            tenant_id: &report.tenant_id,
            document_type: document_type.as_str(),
            succeeded,
            duration_ms,
            input_tokens: usage.input_tokens as i64,
            output_tokens: usage.output_tokens as i64,
        };
        if let Err(e) = stats_repo::record_usage(&self.db, &sample) {
            warn!("Could not record usage for report {}: {}", report.id, e);
        }
    }

    fn log_stage(
        &self,
        report_id: &str,
        stage: &str,
        status: LogStatus,
        message: String,
        duration_ms: Option<i64>,
    ) {
        let entry = ProcessingLogEntry::new(report_id, stage, status, message, duration_ms);
        if let Err(e) = log_repo::append(&self.db, &entry) {
            warn!("Could not append {} log for report {}: {}", stage, report_id, e);
        }
    }
}

fn elapsed_ms(since: Instant) -> i64 {
    i64::try_from(since.elapsed().as_millis()).unwrap_or(i64::MAX)
}

fn in_folder(path: &Path, folder: &str) -> bool {
    path.parent()
        .and_then(|p| p.file_name())
        .is_some_and(|name| name == folder)
}
