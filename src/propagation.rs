//! Folds one message's classification into its thread aggregate.

use crate::model::{clamp_confidence, ClassificationOutput, InboundMessage, Label, ThreadAggregate};
use crate::store::{AggregateStore, AggregateTx};
use chrono::NaiveDate;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub struct PropagationInput {
    pub thread_id: String,
    pub label: Label,
    pub confidence: f64,
    pub company: Option<String>,
    pub job_title: Option<String>,
    pub job_id: Option<String>,
    pub message_date: NaiveDate,
}

impl PropagationInput {
    /// `None` for unlabeled messages; there is nothing to propagate.
    pub fn from_output(message: &InboundMessage, output: &ClassificationOutput) -> Option<Self> {
        Some(Self {
            thread_id: message.thread_id.clone(),
            label: output.label?,
            confidence: output.confidence,
            company: output.company.clone(),
            job_title: output.job_title.clone(),
            job_id: output.job_id.clone(),
            message_date: message.received_date(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropagationOutcome {
    Created,
    Updated,
    /// Folded into another thread's aggregate for the same company.
    MergedInto(String),
    Unchanged,
    SkippedReviewed,
    /// No aggregate exists and this label/company does not open one.
    NotTracked,
}

impl fmt::Display for PropagationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropagationOutcome::Created => f.write_str("created"),
            PropagationOutcome::Updated => f.write_str("updated"),
            PropagationOutcome::MergedInto(thread) => write!(f, "merged into {thread}"),
            PropagationOutcome::Unchanged => f.write_str("unchanged"),
            PropagationOutcome::SkippedReviewed => f.write_str("skipped (reviewed)"),
            PropagationOutcome::NotTracked => f.write_str("not tracked"),
        }
    }
}

pub struct LabelPropagator<'a> {
    store: &'a dyn AggregateStore,
}

impl<'a> LabelPropagator<'a> {
    pub fn new(store: &'a dyn AggregateStore) -> Self {
        Self { store }
    }

    /// One atomic read-modify-write for the message's thread. Reviewed
    /// aggregates are only touched when `override_review` is set.
    pub fn propagate(
        &self,
        input: &PropagationInput,
        override_review: bool,
    ) -> anyhow::Result<PropagationOutcome> {
        let mut outcome = PropagationOutcome::Unchanged;
        self.store.transaction(&mut |tx: &mut dyn AggregateTx| {
            outcome = apply(tx, input, override_review)?;
            Ok(())
        })?;
        log::debug!(
            "Propagated {} for thread {}: {outcome}",
            input.label,
            input.thread_id
        );
        Ok(outcome)
    }
}

fn apply(
    tx: &mut dyn AggregateTx,
    input: &PropagationInput,
    override_review: bool,
) -> anyhow::Result<PropagationOutcome> {
    if let Some(mut aggregate) = tx.get(&input.thread_id)? {
        if aggregate.reviewed && !override_review {
            log::debug!(
                "Aggregate for thread {} is reviewed, not overwriting",
                input.thread_id
            );
            return Ok(PropagationOutcome::SkippedReviewed);
        }

        let before = aggregate.clone();
        fold(&mut aggregate, input);
        if override_review {
            aggregate.reviewed = false;
        }
        if aggregate == before {
            return Ok(PropagationOutcome::Unchanged);
        }
        tx.put(&aggregate)?;
        return Ok(PropagationOutcome::Updated);
    }

    let Some(company) = input.company.as_deref() else {
        return Ok(PropagationOutcome::NotTracked);
    };
    if !input.label.opens_aggregate() {
        return Ok(PropagationOutcome::NotTracked);
    }

    if matches!(input.label, Label::Prescreen | Label::InterviewInvite) {
        for mut other in tx.find_by_company(company, &input.thread_id)? {
            if other.reviewed {
                continue;
            }
            // Already carrying this message's date counts as free so that
            // re-applying the same message stays idempotent.
            let slot_free = other
                .date_field(input.label)
                .is_some_and(|slot| slot.is_none() || *slot == Some(input.message_date));
            if !slot_free {
                continue;
            }

            let before = other.clone();
            fold(&mut other, input);
            if other == before {
                return Ok(PropagationOutcome::Unchanged);
            }
            tx.put(&other)?;
            log::info!(
                "Merged {} for {company} from thread {} into thread {}",
                input.label,
                input.thread_id,
                other.thread_id
            );
            return Ok(PropagationOutcome::MergedInto(other.thread_id));
        }
    }

    let mut aggregate = ThreadAggregate::new(&input.thread_id);
    fold(&mut aggregate, input);
    tx.put(&aggregate)?;
    log::info!(
        "Created aggregate for thread {} ({company}, {})",
        input.thread_id,
        input.label
    );
    Ok(PropagationOutcome::Created)
}

/// Applies the incoming label, its date field, the same-day
/// prescreen/interview swap, confidence and any missing identity fields.
fn fold(aggregate: &mut ThreadAggregate, input: &PropagationInput) {
    let date = input.message_date;
    aggregate.label = Some(input.label);

    if let Some(slot) = aggregate.date_field_mut(input.label) {
        if slot.is_none() {
            *slot = Some(date);
        }
    }
    match input.label {
        Label::Prescreen if aggregate.interview_date == Some(date) => {
            aggregate.interview_date = None;
        }
        Label::InterviewInvite if aggregate.prescreen_date == Some(date) => {
            aggregate.prescreen_date = None;
        }
        _ => {}
    }

    let confidence = clamp_confidence(input.confidence);
    if (aggregate.confidence - confidence).abs() > f64::EPSILON {
        aggregate.confidence = confidence;
    }

    fill_missing(&mut aggregate.company, &input.company);
    fill_missing(&mut aggregate.job_title, &input.job_title);
    fill_missing(&mut aggregate.job_id, &input.job_id);
}

fn fill_missing(slot: &mut Option<String>, value: &Option<String>) {
    if slot.is_none() {
        if let Some(value) = value.as_ref().filter(|v| !v.trim().is_empty()) {
            *slot = Some(value.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, SqliteStore};

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 4, d).unwrap()
    }

    fn input(thread: &str, label: Label, company: Option<&str>, date: NaiveDate) -> PropagationInput {
        PropagationInput {
            thread_id: thread.to_string(),
            label,
            confidence: 0.95,
            company: company.map(str::to_string),
            job_title: None,
            job_id: None,
            message_date: date,
        }
    }

    fn stores() -> Vec<Box<dyn AggregateStore>> {
        vec![
            Box::new(MemoryStore::new()),
            Box::new(SqliteStore::open_in_memory().unwrap()),
        ]
    }

    #[test]
    fn test_lazy_creation_requires_opening_label_and_company() {
        for store in stores() {
            let propagator = LabelPropagator::new(store.as_ref());

            let outcome = propagator
                .propagate(&input("t1", Label::Rejection, Some("Acme"), day(1)), false)
                .unwrap();
            assert_eq!(outcome, PropagationOutcome::NotTracked);

            let outcome = propagator
                .propagate(&input("t1", Label::JobApplication, None, day(1)), false)
                .unwrap();
            assert_eq!(outcome, PropagationOutcome::NotTracked);
            assert!(store.get("t1").unwrap().is_none());

            let outcome = propagator
                .propagate(&input("t1", Label::JobApplication, Some("Acme"), day(1)), false)
                .unwrap();
            assert_eq!(outcome, PropagationOutcome::Created);
            let aggregate = store.get("t1").unwrap().unwrap();
            assert_eq!(aggregate.sent_date, Some(day(1)));
            assert_eq!(aggregate.label, Some(Label::JobApplication));
            assert_eq!(aggregate.company.as_deref(), Some("Acme"));
        }
    }

    #[test]
    fn test_repeated_propagation_is_unchanged() {
        for store in stores() {
            let propagator = LabelPropagator::new(store.as_ref());
            let message = input("t1", Label::JobApplication, Some("Acme"), day(1));
            assert_eq!(
                propagator.propagate(&message, false).unwrap(),
                PropagationOutcome::Created
            );
            let first = store.get("t1").unwrap();
            assert_eq!(
                propagator.propagate(&message, false).unwrap(),
                PropagationOutcome::Unchanged
            );
            assert_eq!(store.get("t1").unwrap(), first);
        }
    }

    #[test]
    fn test_later_label_overwrites_and_seeds_date() {
        for store in stores() {
            let propagator = LabelPropagator::new(store.as_ref());
            propagator
                .propagate(&input("t1", Label::JobApplication, Some("Acme"), day(1)), false)
                .unwrap();
            let outcome = propagator
                .propagate(&input("t1", Label::Rejection, None, day(9)), false)
                .unwrap();
            assert_eq!(outcome, PropagationOutcome::Updated);

            let aggregate = store.get("t1").unwrap().unwrap();
            assert_eq!(aggregate.label, Some(Label::Rejection));
            assert_eq!(aggregate.rejection_date, Some(day(9)));
            assert_eq!(aggregate.sent_date, Some(day(1)));
            assert_eq!(aggregate.company.as_deref(), Some("Acme"));
        }
    }

    #[test]
    fn test_interview_merges_into_same_company_thread() {
        for store in stores() {
            let propagator = LabelPropagator::new(store.as_ref());
            propagator
                .propagate(&input("t1", Label::JobApplication, Some("Acme"), day(1)), false)
                .unwrap();

            let invite = input("t2", Label::InterviewInvite, Some("ACME"), day(5));
            let outcome = propagator.propagate(&invite, false).unwrap();
            assert_eq!(outcome, PropagationOutcome::MergedInto("t1".to_string()));
            assert!(store.get("t2").unwrap().is_none());

            let aggregate = store.get("t1").unwrap().unwrap();
            assert_eq!(aggregate.label, Some(Label::InterviewInvite));
            assert_eq!(aggregate.interview_date, Some(day(5)));

            assert_eq!(
                propagator.propagate(&invite, false).unwrap(),
                PropagationOutcome::Unchanged
            );
        }
    }

    #[test]
    fn test_no_merge_when_date_already_set() {
        for store in stores() {
            let propagator = LabelPropagator::new(store.as_ref());
            propagator
                .propagate(&input("t1", Label::InterviewInvite, Some("Acme"), day(1)), false)
                .unwrap();
            let outcome = propagator
                .propagate(&input("t2", Label::InterviewInvite, Some("Acme"), day(3)), false)
                .unwrap();
            assert_eq!(outcome, PropagationOutcome::Created);
            assert_eq!(
                store.get("t2").unwrap().unwrap().interview_date,
                Some(day(3))
            );
        }
    }

    #[test]
    fn test_job_application_never_merges() {
        for store in stores() {
            let propagator = LabelPropagator::new(store.as_ref());
            propagator
                .propagate(&input("t1", Label::JobApplication, Some("Acme"), day(1)), false)
                .unwrap();
            let outcome = propagator
                .propagate(&input("t2", Label::JobApplication, Some("Acme"), day(2)), false)
                .unwrap();
            assert_eq!(outcome, PropagationOutcome::Created);
        }
    }

    #[test]
    fn test_same_day_prescreen_clears_interview_and_back() {
        for store in stores() {
            let propagator = LabelPropagator::new(store.as_ref());
            propagator
                .propagate(&input("t1", Label::InterviewInvite, Some("Acme"), day(4)), false)
                .unwrap();
            propagator
                .propagate(&input("t1", Label::Prescreen, None, day(4)), false)
                .unwrap();
            let aggregate = store.get("t1").unwrap().unwrap();
            assert_eq!(aggregate.prescreen_date, Some(day(4)));
            assert_eq!(aggregate.interview_date, None);

            propagator
                .propagate(&input("t1", Label::InterviewInvite, None, day(4)), false)
                .unwrap();
            let aggregate = store.get("t1").unwrap().unwrap();
            assert_eq!(aggregate.interview_date, Some(day(4)));
            assert_eq!(aggregate.prescreen_date, None);
        }
    }

    #[test]
    fn test_prescreen_keeps_interview_from_other_day() {
        for store in stores() {
            let propagator = LabelPropagator::new(store.as_ref());
            propagator
                .propagate(&input("t1", Label::InterviewInvite, Some("Acme"), day(2)), false)
                .unwrap();
            propagator
                .propagate(&input("t1", Label::Prescreen, None, day(4)), false)
                .unwrap();
            let aggregate = store.get("t1").unwrap().unwrap();
            assert_eq!(aggregate.interview_date, Some(day(2)));
            assert_eq!(aggregate.prescreen_date, Some(day(4)));
        }
    }

    #[test]
    fn test_confidence_only_update() {
        for store in stores() {
            let propagator = LabelPropagator::new(store.as_ref());
            let mut message = input("t1", Label::JobApplication, Some("Acme"), day(1));
            propagator.propagate(&message, false).unwrap();

            message.confidence = 0.6;
            assert_eq!(
                propagator.propagate(&message, false).unwrap(),
                PropagationOutcome::Updated
            );
            assert_eq!(store.get("t1").unwrap().unwrap().confidence, 0.6);
        }
    }

    #[test]
    fn test_review_lock_and_override() {
        for store in stores() {
            let propagator = LabelPropagator::new(store.as_ref());
            propagator
                .propagate(&input("t1", Label::JobApplication, Some("Acme"), day(1)), false)
                .unwrap();
            store
                .transaction(&mut |tx: &mut dyn AggregateTx| {
                    let mut aggregate = tx.get("t1")?.unwrap();
                    aggregate.reviewed = true;
                    tx.put(&aggregate)
                })
                .unwrap();

            let rejection = input("t1", Label::Rejection, None, day(7));
            assert_eq!(
                propagator.propagate(&rejection, false).unwrap(),
                PropagationOutcome::SkippedReviewed
            );
            assert_eq!(
                store.get("t1").unwrap().unwrap().label,
                Some(Label::JobApplication)
            );

            assert_eq!(
                propagator.propagate(&rejection, true).unwrap(),
                PropagationOutcome::Updated
            );
            let aggregate = store.get("t1").unwrap().unwrap();
            assert_eq!(aggregate.label, Some(Label::Rejection));
            assert!(!aggregate.reviewed);
        }
    }

    #[test]
    fn test_reviewed_aggregate_is_not_a_merge_target() {
        for store in stores() {
            let propagator = LabelPropagator::new(store.as_ref());
            propagator
                .propagate(&input("t1", Label::JobApplication, Some("Acme"), day(1)), false)
                .unwrap();
            store
                .transaction(&mut |tx: &mut dyn AggregateTx| {
                    let mut aggregate = tx.get("t1")?.unwrap();
                    aggregate.reviewed = true;
                    tx.put(&aggregate)
                })
                .unwrap();

            let outcome = propagator
                .propagate(&input("t2", Label::Prescreen, Some("Acme"), day(3)), false)
                .unwrap();
            assert_eq!(outcome, PropagationOutcome::Created);
        }
    }
}
