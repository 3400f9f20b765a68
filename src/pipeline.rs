//! Per-message orchestration: rules with statistical fallback, company
//! resolution, metadata, then propagation into the thread aggregate.

use crate::classifier::RuleClassifier;
use crate::company::{CompanyResolver, ResolveContext, ResolverEnv};
use crate::config::{ClassificationConfig, Config};
use crate::domains::DomainRegistry;
use crate::metadata::MetadataExtractor;
use crate::model::{clamp_confidence, ClassificationOutput, InboundMessage, Label, Message, ModelError};
use crate::patterns::PatternRegistry;
use crate::prediction::{NoPredictor, Predictor};
use crate::propagation::{LabelPropagator, PropagationInput, PropagationOutcome};
use crate::registry::HotReload;
use crate::store::{AggregateStore, MemoryStore, SqliteStore};
use crate::text::strip_html;
use anyhow::Context;
use serde::Serialize;
use std::io::BufRead;

const PREDICTION_STAGE: &str = "ml_prediction";

pub struct Engine {
    settings: ClassificationConfig,
    patterns: HotReload<PatternRegistry>,
    domains: HotReload<DomainRegistry>,
    predictor: Box<dyn Predictor>,
    store: Box<dyn AggregateStore>,
    resolver: CompanyResolver,
}

/// Result of ingesting one message.
#[derive(Debug, Clone)]
pub struct IngestReport {
    pub message: Message,
    pub output: ClassificationOutput,
    pub outcome: PropagationOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestSummary {
    pub processed: usize,
    pub created: usize,
    pub updated: usize,
    pub merged: usize,
    pub unchanged: usize,
    pub skipped_reviewed: usize,
    pub not_tracked: usize,
    pub needs_manual_company: usize,
    pub failed: usize,
}

impl IngestSummary {
    fn record(&mut self, report: &IngestReport) {
        self.processed += 1;
        if report.output.needs_manual_company {
            self.needs_manual_company += 1;
        }
        match report.outcome {
            PropagationOutcome::Created => self.created += 1,
            PropagationOutcome::Updated => self.updated += 1,
            PropagationOutcome::MergedInto(_) => self.merged += 1,
            PropagationOutcome::Unchanged => self.unchanged += 1,
            PropagationOutcome::SkippedReviewed => self.skipped_reviewed += 1,
            PropagationOutcome::NotTracked => self.not_tracked += 1,
        }
    }
}

impl Engine {
    /// Registries from the configured documents, SQLite when a database path
    /// is set, otherwise an in-memory store.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let store: Box<dyn AggregateStore> = match config.database_path.as_deref() {
            Some(path) => Box::new(
                SqliteStore::open(path)
                    .with_context(|| format!("Failed to open aggregate store {path}"))?,
            ),
            None => {
                log::info!("No database configured, keeping thread aggregates in memory");
                Box::new(MemoryStore::new())
            }
        };

        Ok(Self::with_registries(
            HotReload::load(&config.patterns_path),
            HotReload::load(&config.companies_path),
            store,
            config.classification.clone(),
        ))
    }

    pub fn with_registries(
        patterns: HotReload<PatternRegistry>,
        domains: HotReload<DomainRegistry>,
        store: Box<dyn AggregateStore>,
        settings: ClassificationConfig,
    ) -> Self {
        Self {
            settings,
            patterns,
            domains,
            predictor: Box::new(NoPredictor),
            store,
            resolver: CompanyResolver::new(),
        }
    }

    pub fn with_predictor(mut self, predictor: Box<dyn Predictor>) -> Self {
        log::info!("Using predictor '{}'", predictor.name());
        self.predictor = predictor;
        self
    }

    pub fn store(&self) -> &dyn AggregateStore {
        self.store.as_ref()
    }

    /// Picks up edited pattern or company documents. Returns whether either
    /// snapshot changed; a broken document keeps its previous snapshot.
    pub fn refresh(&self) -> bool {
        let patterns = self.patterns.reload_if_needed().unwrap_or_else(|e| {
            log::warn!("Pattern reload failed, keeping previous registry: {e:#}");
            false
        });
        let domains = self.domains.reload_if_needed().unwrap_or_else(|e| {
            log::warn!("Company reload failed, keeping previous registry: {e:#}");
            false
        });
        patterns || domains
    }

    /// Classifies one message against the current registry snapshots.
    /// Pure with respect to the store.
    pub fn process(&self, message: &InboundMessage) -> ClassificationOutput {
        let patterns = self.patterns.snapshot();
        let domains = self.domains.snapshot();
        let body = strip_html(&message.body);
        let sender_domain = message.sender_domain();

        let rule = RuleClassifier::new(&patterns, &domains).classify_detailed(
            &message.subject,
            &body,
            sender_domain.as_deref(),
        );
        let (label, confidence, stage) = match rule {
            Some(rule) => {
                log::debug!(
                    "Thread {}: {} via {}",
                    message.thread_id,
                    rule.label,
                    rule.stage
                );
                (
                    Some(rule.label),
                    clamp_confidence(self.settings.rule_confidence),
                    Some(rule.stage.to_string()),
                )
            }
            None => self.predict_label(message, &body),
        };

        let env = ResolverEnv {
            patterns: &patterns,
            domains: &domains,
            predictor: self.predictor.as_ref(),
            min_confidence: self.settings.min_prediction_confidence,
        };
        let resolution = self
            .resolver
            .resolve(&ResolveContext::new(message, label), &env);

        let metadata = MetadataExtractor::new(&patterns);
        let needs_manual_company =
            resolution.company.is_none() && !matches!(label, Some(Label::Noise | Label::Blank));

        ClassificationOutput {
            label,
            confidence,
            company: resolution.company,
            company_source: resolution.source,
            company_status: resolution.status,
            job_title: resolution.job_title,
            job_id: metadata.extract_job_id(&message.subject),
            status_dates: metadata.extract_status_dates(
                &message.subject,
                &body,
                message.received_date(),
            ),
            organizer: metadata.extract_organizer_from_icalendar(&message.body),
            stage,
            needs_manual_company,
        }
    }

    fn predict_label(&self, message: &InboundMessage, body: &str) -> (Option<Label>, f64, Option<String>) {
        let text = format!("{}\n{body}", message.subject);
        match self.predictor.predict_label(&text) {
            Ok(Some(prediction))
                if prediction.confidence >= self.settings.min_prediction_confidence =>
            {
                log::debug!(
                    "Thread {}: {} predicted at {:.2}",
                    message.thread_id,
                    prediction.value,
                    prediction.confidence
                );
                (
                    Some(prediction.value),
                    clamp_confidence(prediction.confidence),
                    Some(PREDICTION_STAGE.to_string()),
                )
            }
            Ok(_) => (None, 0.0, None),
            Err(e) => {
                log::warn!(
                    "Predictor '{}' failed for thread {}: {e:#}",
                    self.predictor.name(),
                    message.thread_id
                );
                (None, 0.0, None)
            }
        }
    }

    /// Classifies, builds the stored record and propagates into the thread
    /// aggregate. Only record-construction and store failures are errors.
    pub fn ingest(&self, message: &InboundMessage, override_review: bool) -> anyhow::Result<IngestReport> {
        let output = self.process(message);
        let record = Message::new(message, &output)?;

        let outcome = match PropagationInput::from_output(message, &output) {
            Some(input) => LabelPropagator::new(self.store.as_ref())
                .propagate(&input, override_review)
                .with_context(|| {
                    format!("Failed to update aggregate for thread {}", message.thread_id)
                })?,
            None => PropagationOutcome::NotTracked,
        };

        Ok(IngestReport {
            message: record,
            output,
            outcome,
        })
    }

    /// Sequential batch. A message that cannot become a record is counted
    /// and skipped; a store failure stops the batch. Edited registry
    /// documents are picked up between messages.
    pub fn ingest_all<I>(&self, messages: I, override_review: bool) -> anyhow::Result<IngestSummary>
    where
        I: IntoIterator<Item = InboundMessage>,
    {
        let mut summary = IngestSummary::default();
        for message in messages {
            self.ingest_into(&message, override_review, &mut summary)?;
        }
        Ok(summary)
    }

    /// One JSON-encoded `InboundMessage` per line; blank lines are ignored
    /// and unparsable lines are counted as failed.
    pub fn ingest_jsonl<R: BufRead>(&self, reader: R, override_review: bool) -> anyhow::Result<IngestSummary> {
        let mut summary = IngestSummary::default();
        for (index, line) in reader.lines().enumerate() {
            let line = line.with_context(|| format!("Failed to read input line {}", index + 1))?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<InboundMessage>(&line) {
                Ok(message) => self.ingest_into(&message, override_review, &mut summary)?,
                Err(e) => {
                    log::warn!("Skipping line {}: {e}", index + 1);
                    summary.failed += 1;
                }
            }
        }
        log::info!(
            "Ingested {} messages ({} created, {} updated, {} merged, {} failed)",
            summary.processed,
            summary.created,
            summary.updated,
            summary.merged,
            summary.failed
        );
        Ok(summary)
    }

    fn ingest_into(
        &self,
        message: &InboundMessage,
        override_review: bool,
        summary: &mut IngestSummary,
    ) -> anyhow::Result<()> {
        self.refresh();
        match self.ingest(message, override_review) {
            Ok(report) => summary.record(&report),
            Err(e) if e.downcast_ref::<ModelError>().is_some() => {
                log::warn!("Skipping message in thread '{}': {e}", message.thread_id);
                summary.failed += 1;
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }
}
