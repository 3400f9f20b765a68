//! Rule-based label assignment.
//!
//! Stages run in a fixed order and the first one that commits wins. A `None`
//! result means no rule fired and the statistical classifier should decide.

use crate::domains::DomainRegistry;
use crate::model::Label;
use crate::patterns::PatternRegistry;
use lazy_static::lazy_static;
use regex::Regex;
use std::fmt;

lazy_static! {
    static ref REPLY_PREFIX: Regex = Regex::new(r"(?i)^\s*(?:re|fwd?)\s*:").unwrap();
    static ref REPLY_PREFIXES: Regex = Regex::new(r"(?i)^(?:\s*(?:re|fwd?)\s*:)+\s*").unwrap();
}

/// Which evaluation stage produced a label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassificationStage {
    SpecialCase(String),
    EarlyRejection,
    Scheduling,
    EarlyReferral,
    RejectionSignal,
    ApplicationConfirmation,
    PriorityScan,
}

impl fmt::Display for ClassificationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClassificationStage::SpecialCase(name) => write!(f, "special_case:{name}"),
            ClassificationStage::EarlyRejection => f.write_str("early_rejection"),
            ClassificationStage::Scheduling => f.write_str("scheduling"),
            ClassificationStage::EarlyReferral => f.write_str("early_referral"),
            ClassificationStage::RejectionSignal => f.write_str("rejection_signal"),
            ClassificationStage::ApplicationConfirmation => {
                f.write_str("application_confirmation")
            }
            ClassificationStage::PriorityScan => f.write_str("priority_scan"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleMatch {
    pub label: Label,
    pub stage: ClassificationStage,
}

/// Subject starts with a `Re:` / `Fwd:` / `Fw:` marker.
pub fn is_reply_or_forward(subject: &str) -> bool {
    REPLY_PREFIX.is_match(subject)
}

/// Subject with every leading reply/forward marker removed.
pub fn strip_reply_prefix(subject: &str) -> &str {
    match REPLY_PREFIXES.find(subject) {
        Some(m) => &subject[m.end()..],
        None => subject,
    }
}

pub struct RuleClassifier<'a> {
    patterns: &'a PatternRegistry,
    domains: &'a DomainRegistry,
}

impl<'a> RuleClassifier<'a> {
    pub fn new(patterns: &'a PatternRegistry, domains: &'a DomainRegistry) -> Self {
        Self { patterns, domains }
    }

    pub fn classify(&self, subject: &str, body: &str, sender_domain: Option<&str>) -> Option<Label> {
        self.classify_detailed(subject, body, sender_domain)
            .map(|m| m.label)
    }

    pub fn classify_detailed(
        &self,
        subject: &str,
        body: &str,
        sender_domain: Option<&str>,
    ) -> Option<RuleMatch> {
        let text = format!("{subject}\n{body}");
        let early = self.patterns.early();

        for case in self.patterns.special_cases() {
            if case.subject.is_match(subject) {
                log::debug!("Special case '{}' matched subject", case.name);
                return Some(RuleMatch {
                    label: case.label,
                    stage: ClassificationStage::SpecialCase(case.name.clone()),
                });
            }
        }

        if early.rejection.is_match(&text) && self.allowed(Label::Rejection, &text) {
            return Some(self.commit(Label::Rejection, ClassificationStage::EarlyRejection));
        }

        let is_reply = is_reply_or_forward(subject);
        let has_scheduling = early.scheduling.is_match(&text);

        if has_scheduling {
            // A reply carrying scheduling language is logistics for an
            // invite that already happened.
            let label = if is_reply {
                Label::Other
            } else {
                Label::InterviewInvite
            };
            if self.allowed(label, &text) {
                return Some(self.commit(label, ClassificationStage::Scheduling));
            }
        }

        if early.referral.is_match(&text) && self.allowed(Label::Referral, &text) {
            return Some(self.commit(Label::Referral, ClassificationStage::EarlyReferral));
        }

        if early.rejection_signals.is_match(&text)
            && self.patterns.label_matches(Label::Rejection, &text)
            && self.allowed(Label::Rejection, &text)
        {
            return Some(self.commit(Label::Rejection, ClassificationStage::RejectionSignal));
        }

        if early.application_confirmation.is_match(&text)
            && self.allowed(Label::JobApplication, &text)
        {
            return Some(self.commit(
                Label::JobApplication,
                ClassificationStage::ApplicationConfirmation,
            ));
        }

        for label in Label::SCAN_ORDER {
            if !self.patterns.label_matches(label, &text) || self.patterns.is_excluded(label, &text) {
                continue;
            }

            match label {
                Label::HeadHunter => {
                    if self.is_corroborated_sender(sender_domain) {
                        log::debug!("head_hunter skipped: sender is a recognized platform or employer");
                        continue;
                    }
                    if !early.recruiter_signature.is_match(&text) {
                        log::debug!("head_hunter skipped: no recruiter signature");
                        continue;
                    }
                }
                Label::Referral => {
                    if self.is_corroborated_sender(sender_domain) {
                        continue;
                    }
                    if sender_domain.is_none() && !early.referral.is_match(&text) {
                        continue;
                    }
                }
                Label::JobApplication => {
                    let scheduling = has_scheduling
                        || self.patterns.label_matches(Label::InterviewInvite, &text);
                    if scheduling && !is_reply && self.allowed(Label::InterviewInvite, &text) {
                        return Some(
                            self.commit(Label::InterviewInvite, ClassificationStage::PriorityScan),
                        );
                    }
                }
                _ => {}
            }

            return Some(self.commit(label, ClassificationStage::PriorityScan));
        }

        None
    }

    fn allowed(&self, label: Label, text: &str) -> bool {
        let excluded = self.patterns.is_excluded(label, text);
        if excluded {
            log::debug!("{label} excluded by exclusion pattern");
        }
        !excluded
    }

    fn commit(&self, label: Label, stage: ClassificationStage) -> RuleMatch {
        log::debug!("Classified as {label} at stage {stage}");
        RuleMatch { label, stage }
    }

    /// ATS, job-board or mapped-employer senders never count as recruiter
    /// or referral contacts.
    fn is_corroborated_sender(&self, sender_domain: Option<&str>) -> bool {
        sender_domain.is_some_and(|domain| {
            self.domains.is_ats_domain(domain)
                || self.domains.is_job_board_domain(domain)
                || self.domains.map_company_by_domain(domain).is_some()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{domain_registry, pattern_registry};

    fn classify(subject: &str, body: &str, sender_domain: Option<&str>) -> Option<RuleMatch> {
        let patterns = pattern_registry();
        let domains = domain_registry();
        RuleClassifier::new(&patterns, &domains).classify_detailed(subject, body, sender_domain)
    }

    fn label(subject: &str, body: &str, sender_domain: Option<&str>) -> Option<Label> {
        classify(subject, body, sender_domain).map(|m| m.label)
    }

    #[test]
    fn test_reply_prefix_detection() {
        assert!(is_reply_or_forward("Re: hello"));
        assert!(is_reply_or_forward("  FWD: hello"));
        assert!(is_reply_or_forward("Fw : hello"));
        assert!(!is_reply_or_forward("Regarding your application"));
        assert_eq!(strip_reply_prefix("Re: Fwd: RE: Offer"), "Offer");
        assert_eq!(strip_reply_prefix("Offer"), "Offer");
    }

    #[test]
    fn test_scheduling_reply_is_other() {
        let result = classify(
            "Re: Following up on your application",
            "Hi, would you be available for a call on Tuesday?",
            Some("acme.com"),
        )
        .unwrap();
        assert_eq!(result.label, Label::Other);
        assert_eq!(result.stage, ClassificationStage::Scheduling);
    }

    #[test]
    fn test_reply_gating_for_every_marker() {
        let body = "Would you be available for a call this week?";
        assert_eq!(
            label("Next steps", body, Some("acme.com")),
            Some(Label::InterviewInvite)
        );
        for subject in ["Re: Next steps", "Fwd: Next steps", "Fw: Next steps"] {
            assert_eq!(label(subject, body, Some("acme.com")), Some(Label::Other));
        }
    }

    #[test]
    fn test_early_rejection_beats_scheduling() {
        let result = classify(
            "Your candidacy",
            "We regret to inform you that we will not proceed. Earlier we wanted to schedule an interview.",
            Some("acme.com"),
        )
        .unwrap();
        assert_eq!(result.label, Label::Rejection);
        assert_eq!(result.stage, ClassificationStage::EarlyRejection);
    }

    #[test]
    fn test_rejection_beats_job_application() {
        assert_eq!(
            label(
                "Your application to Acme",
                "Thank you for your application. Unfortunately we are not moving forward.",
                Some("acme.com"),
            ),
            Some(Label::Rejection)
        );
    }

    #[test]
    fn test_rejection_exclusion_falls_through_to_scheduling() {
        assert_eq!(
            label(
                "Interview time",
                "We regret to inform you that we need to reschedule. Please book a time below.",
                Some("acme.com"),
            ),
            Some(Label::InterviewInvite)
        );
    }

    #[test]
    fn test_exclusion_cancels_positive_match() {
        // Noise pattern plus a noise exclusion never yields noise.
        let result = label(
            "Weekly digest",
            "Updates on your application status. Click to unsubscribe.",
            Some("acme.com"),
        );
        assert_ne!(result, Some(Label::Noise));

        assert_eq!(
            label("Weekly digest", "Click to unsubscribe.", Some("news.example.org")),
            Some(Label::Noise)
        );
    }

    #[test]
    fn test_special_case_overrides() {
        let result = classify(
            "Indeed Application: Security Engineer",
            "Your application was sent",
            Some("indeed.com"),
        )
        .unwrap();
        assert_eq!(result.label, Label::JobApplication);
        assert_eq!(
            result.stage,
            ClassificationStage::SpecialCase("job_board_confirmation".to_string())
        );

        assert_eq!(
            label("Please complete your application", "", Some("acme.com")),
            Some(Label::Other)
        );
    }

    #[test]
    fn test_application_confirmation() {
        let result = classify(
            "Thanks for applying for Field CTO position @ Claroty!",
            "We will review your background.",
            Some("claroty.com"),
        )
        .unwrap();
        assert_eq!(result.label, Label::JobApplication);
        assert_eq!(result.stage, ClassificationStage::ApplicationConfirmation);
    }

    #[test]
    fn test_job_application_promoted_by_interview_language() {
        assert_eq!(
            label(
                "Your application for Analyst",
                "We would like to invite you to an interview next week.",
                Some("acme.com"),
            ),
            Some(Label::InterviewInvite)
        );
    }

    #[test]
    fn test_head_hunter_requires_signature_and_independent_sender() {
        let body = "My client has an exciting opportunity for you. Best, Dana - Technical Recruiter";
        assert_eq!(
            label("Opportunity", body, Some("agency-example.net")),
            Some(Label::HeadHunter)
        );
        assert_ne!(
            label("Opportunity", body, Some("myworkday.com")),
            Some(Label::HeadHunter)
        );
        assert_ne!(
            label("Opportunity", "My client has an exciting opportunity.", Some("agency-example.net")),
            Some(Label::HeadHunter)
        );
    }

    #[test]
    fn test_referral_without_sender_domain() {
        let result = classify("Good news", "Jane referred you for the Analyst role.", None).unwrap();
        assert_eq!(result.label, Label::Referral);
        assert_eq!(result.stage, ClassificationStage::EarlyReferral);

        assert_eq!(label("Hello", "About the referral bonus", None), None);
    }

    #[test]
    fn test_no_rule_defers() {
        assert_eq!(label("Lunch?", "Want to grab lunch?", Some("gmail.com")), None);
    }

    #[test]
    fn test_classification_is_deterministic() {
        let subject = "Your application to Acme";
        let body = "Thank you for your application.";
        assert_eq!(
            classify(subject, body, Some("acme.com")),
            classify(subject, body, Some("acme.com"))
        );
    }
}
