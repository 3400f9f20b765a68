//! Ordered company-resolution strategies.
//!
//! Each strategy proposes a raw candidate. The resolver normalizes and
//! validates it, and the first accepted candidate is canonicalized against
//! the alias map and known-company list.

use super::validator::CompanyValidator;
use crate::classifier::strip_reply_prefix;
use crate::domain_utils::DomainUtils;
use crate::domains::DomainRegistry;
use crate::model::{CompanySource, CompanyStatus, InboundMessage, Label};
use crate::patterns::PatternRegistry;
use crate::prediction::Predictor;
use crate::text::{collapse_whitespace, strip_html};
use lazy_static::lazy_static;
use regex::{Regex, RegexBuilder};

lazy_static! {
    static ref SENT_TO: Regex =
        Regex::new(r"(?i)\bsent to\s+([^\n.!]+?)(?:\s+(?:for|on)\b|[\n.!]|$)").unwrap();
    static ref ABOUT_APPLICATION: Regex = Regex::new(r"(?i)about your application").unwrap();
    static ref ANCHOR_TEXT: Regex = Regex::new(r"(?is)<a\b[^>]*>(.*?)</a\s*>").unwrap();
    static ref FROM_ABOUT_APPLICATION: Regex = Regex::new(
        r"(?i)\b(?:from|at|by)\s+([^\n]{2,60}?)\s+about your application"
    )
    .unwrap();
    static ref COMPANY_TAIL: Regex =
        Regex::new(r"(?i)\s+(?:for|regarding)\s+.*$|\s+[-–—|]\s+.*$").unwrap();
    static ref LEADING_JOINERS: Regex =
        Regex::new(r"(?i)^(?:\s*(?:at|from|with|via)\s+|\s*[-|,:@]\s*)+").unwrap();
    static ref TRAILING_JOINERS: Regex =
        Regex::new(r"(?i)(?:\s+(?:at|from|with|via)|\s*[-|,:@])+\s*$").unwrap();

    /// Subject patterns in priority order; the first match wins.
    static ref SUBJECT_PATTERNS: Vec<Regex> = [
        r"applying for (?P<title>.+?) position\s*@\s*(?P<company>[^!?,\n]+)",
        r"application (?:for|to) (?:the )?(?P<title>.+?) (?:role|position|opening) (?:at|with) (?P<company>[^!?,\n]+)",
        r"(?:thank you|thanks) for applying to (?:the )?(?P<title>.+?) (?:role|position) at (?P<company>[^!?,\n]+)",
        r"(?:thank you|thanks) for (?:your )?(?:applying|application|interest) (?:to|at|in|with) (?P<company>[^!?,\n]+)",
        r"your application (?:to|at|with) (?P<company>[^!?,\n]+)",
        r"(?P<title>[^,:\n]+?) (?:role|position) at (?P<company>[^!?,\n]+)",
        r"interview (?:with|at) (?P<company>[^!?,\n]+)",
        r"(?:update|news|message) from (?P<company>[^!?,\n]+)",
        r"welcome to (?P<company>[^!?,\n]+?)(?:'s)? (?:talent|career|candidate)",
        r"^(?P<company>[^:|\n]{2,50}?)\s*[|:-]\s*(?:your )?(?:application|thank you)",
        r"\b(?:at|@)\s+(?P<company>[A-Z][\w&.' -]{1,40})$",
    ]
    .iter()
    .map(|p| RegexBuilder::new(p).case_insensitive(true).build().unwrap())
    .collect();
}

/// How far before "about your application" a linked employer name may sit.
const ANCHOR_WINDOW: usize = 300;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub name: String,
    pub job_title: Option<String>,
}

impl Candidate {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            job_title: None,
        }
    }

    pub fn with_job_title(mut self, title: Option<String>) -> Self {
        self.job_title = title
            .map(|t| collapse_whitespace(&t))
            .filter(|t| !t.is_empty());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompanyResolution {
    pub company: Option<String>,
    pub source: CompanySource,
    pub job_title: Option<String>,
    pub status: Option<CompanyStatus>,
}

impl CompanyResolution {
    pub fn unresolved() -> Self {
        Self {
            company: None,
            source: CompanySource::None,
            job_title: None,
            status: None,
        }
    }
}

/// Per-message inputs shared by every strategy.
pub struct ResolveContext<'a> {
    pub message: &'a InboundMessage,
    pub label: Option<Label>,
    pub sender_domain: Option<String>,
    pub sender_address: Option<String>,
    pub display_name: Option<String>,
}

impl<'a> ResolveContext<'a> {
    pub fn new(message: &'a InboundMessage, label: Option<Label>) -> Self {
        Self {
            message,
            label,
            sender_domain: message.sender_domain(),
            sender_address: message.sender_address(),
            display_name: message.display_name(),
        }
    }

    pub fn subject(&self) -> &str {
        &self.message.subject
    }
}

/// Registry snapshots and collaborators the strategies consult.
pub struct ResolverEnv<'a> {
    pub patterns: &'a PatternRegistry,
    pub domains: &'a DomainRegistry,
    pub predictor: &'a dyn Predictor,
    pub min_confidence: f64,
}

impl<'a> ResolverEnv<'a> {
    pub fn validator(&self) -> CompanyValidator<'a> {
        CompanyValidator::new(self.patterns, self.domains)
    }
}

/// `Ok(None)` means the strategy found nothing; `Err` means it failed and
/// the resolver moves on.
pub trait CompanyStrategy: Send + Sync {
    fn source(&self) -> CompanySource;

    fn extract(
        &self,
        ctx: &ResolveContext<'_>,
        env: &ResolverEnv<'_>,
    ) -> anyhow::Result<Option<Candidate>>;
}

/// Sender local part under an ATS domain, e.g. `ngc@myworkday.com`.
pub struct AtsAliasStrategy;

impl CompanyStrategy for AtsAliasStrategy {
    fn source(&self) -> CompanySource {
        CompanySource::AtsAlias
    }

    fn extract(
        &self,
        ctx: &ResolveContext<'_>,
        env: &ResolverEnv<'_>,
    ) -> anyhow::Result<Option<Candidate>> {
        let Some(domain) = ctx.sender_domain.as_deref() else {
            return Ok(None);
        };
        if !env.domains.is_ats_domain(domain) {
            return Ok(None);
        }

        let from_local = ctx
            .sender_address
            .as_deref()
            .and_then(DomainUtils::local_part)
            .and_then(|local| env.domains.lookup_alias(&local));
        // Tenant subdomains such as ngc.wd1.myworkday.com carry the alias too.
        let from_tenant = || {
            domain
                .split('.')
                .next()
                .and_then(|tenant| env.domains.lookup_alias(tenant))
        };

        Ok(from_local.or_else(from_tenant).map(Candidate::new))
    }
}

/// Employer named in a job-board confirmation body.
pub struct JobBoardStrategy;

impl JobBoardStrategy {
    fn applies(ctx: &ResolveContext<'_>, env: &ResolverEnv<'_>) -> bool {
        if !ctx.subject().to_lowercase().contains("application") {
            return false;
        }
        ctx.sender_domain
            .as_deref()
            .is_some_and(|d| env.domains.is_job_board_domain(d))
            || env.domains.job_board_mentioned(&ctx.message.sender)
    }

    fn linked_name_before_anchor(raw: &str) -> Option<String> {
        let anchor = ABOUT_APPLICATION.find(raw)?;
        let mut start = anchor.start().saturating_sub(ANCHOR_WINDOW);
        while !raw.is_char_boundary(start) {
            start -= 1;
        }
        let window = &raw[start..anchor.start()];
        ANCHOR_TEXT
            .captures_iter(window)
            .filter_map(|caps| caps.get(1))
            .map(|m| collapse_whitespace(&strip_html(m.as_str())))
            .filter(|name| !name.is_empty())
            .last()
    }
}

impl CompanyStrategy for JobBoardStrategy {
    fn source(&self) -> CompanySource {
        CompanySource::JobBoardExtraction
    }

    fn extract(
        &self,
        ctx: &ResolveContext<'_>,
        env: &ResolverEnv<'_>,
    ) -> anyhow::Result<Option<Candidate>> {
        if !Self::applies(ctx, env) {
            return Ok(None);
        }

        let raw = &ctx.message.body;
        let text = strip_html(raw);
        let validator = env.validator();
        let accept = |name: String| {
            let name = CompanyValidator::normalize_company_name(&name);
            validator.is_valid_company_name(&name).then_some(name)
        };

        let found = SENT_TO
            .captures(&text)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
            .and_then(&accept)
            .or_else(|| Self::linked_name_before_anchor(raw).and_then(&accept))
            .or_else(|| {
                FROM_ABOUT_APPLICATION
                    .captures(&text)
                    .and_then(|caps| caps.get(1))
                    .map(|m| m.as_str().to_string())
                    .and_then(&accept)
            });

        Ok(found.map(Candidate::new))
    }
}

/// Company (and sometimes job title) parsed out of the subject line.
pub struct SubjectPatternStrategy;

impl CompanyStrategy for SubjectPatternStrategy {
    fn source(&self) -> CompanySource {
        CompanySource::SubjectParse
    }

    fn extract(
        &self,
        ctx: &ResolveContext<'_>,
        env: &ResolverEnv<'_>,
    ) -> anyhow::Result<Option<Candidate>> {
        let subject = strip_reply_prefix(ctx.subject()).trim();
        if subject.is_empty() {
            return Ok(None);
        }

        let Some(caps) = SUBJECT_PATTERNS.iter().find_map(|re| re.captures(subject)) else {
            return Ok(None);
        };
        let Some(company) = caps.name("company") else {
            return Ok(None);
        };

        let company = COMPANY_TAIL.replace(company.as_str().trim(), "");
        let company = company.trim();
        if company.is_empty() {
            return Ok(None);
        }

        let validator = env.validator();
        if validator.looks_like_person(company) {
            log::debug!("Subject candidate '{company}' looks like a person, ignoring");
            return Ok(None);
        }

        let title = caps.name("title").map(|m| m.as_str().to_string());
        Ok(Some(Candidate::new(company).with_job_title(title)))
    }
}

/// Display name with recruiting boilerplate and platform suffixes removed.
pub struct SenderNameStrategy;

impl CompanyStrategy for SenderNameStrategy {
    fn source(&self) -> CompanySource {
        CompanySource::SenderNameMatch
    }

    fn extract(
        &self,
        ctx: &ResolveContext<'_>,
        env: &ResolverEnv<'_>,
    ) -> anyhow::Result<Option<Candidate>> {
        let Some(display) = ctx.display_name.as_deref() else {
            return Ok(None);
        };

        let boilerplate = env.patterns.sender_boilerplate();
        let had_boilerplate = boilerplate.is_match(display);

        let mut cleaned = display.to_string();
        for re in env.patterns.platform_suffixes().iter() {
            cleaned = re.replace_all(&cleaned, "").into_owned();
        }
        for re in boilerplate.iter() {
            cleaned = re.replace_all(&cleaned, " ").into_owned();
        }
        let cleaned = collapse_whitespace(&cleaned);
        let cleaned = LEADING_JOINERS.replace(&cleaned, "");
        let cleaned = TRAILING_JOINERS.replace(&cleaned, "");
        let cleaned = cleaned.trim();
        if cleaned.is_empty() {
            return Ok(None);
        }

        let validator = env.validator();
        if validator.looks_like_person(cleaned) {
            return Ok(None);
        }
        if had_boilerplate || validator.looks_like_company(cleaned) {
            Ok(Some(Candidate::new(cleaned)))
        } else {
            Ok(None)
        }
    }
}

pub struct DomainMappingStrategy;

impl CompanyStrategy for DomainMappingStrategy {
    fn source(&self) -> CompanySource {
        CompanySource::DomainMapping
    }

    fn extract(
        &self,
        ctx: &ResolveContext<'_>,
        env: &ResolverEnv<'_>,
    ) -> anyhow::Result<Option<Candidate>> {
        Ok(ctx
            .sender_domain
            .as_deref()
            .and_then(|domain| env.domains.map_company_by_domain(domain))
            .map(Candidate::new))
    }
}

/// Statistical fallback; not consulted for noise or blank messages.
pub struct PredictionStrategy;

impl CompanyStrategy for PredictionStrategy {
    fn source(&self) -> CompanySource {
        CompanySource::MlPrediction
    }

    fn extract(
        &self,
        ctx: &ResolveContext<'_>,
        env: &ResolverEnv<'_>,
    ) -> anyhow::Result<Option<Candidate>> {
        if matches!(ctx.label, Some(Label::Noise) | Some(Label::Blank)) {
            return Ok(None);
        }

        let text = format!("{}\n{}", ctx.subject(), strip_html(&ctx.message.body));
        let prediction = env.predictor.predict_company(&text)?;
        Ok(prediction
            .filter(|p| p.confidence >= env.min_confidence)
            .map(|p| Candidate::new(p.value)))
    }
}

pub struct CompanyResolver {
    strategies: Vec<Box<dyn CompanyStrategy>>,
}

impl Default for CompanyResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl CompanyResolver {
    pub fn new() -> Self {
        Self {
            strategies: vec![
                Box::new(AtsAliasStrategy),
                Box::new(JobBoardStrategy),
                Box::new(SubjectPatternStrategy),
                Box::new(SenderNameStrategy),
                Box::new(DomainMappingStrategy),
                Box::new(PredictionStrategy),
            ],
        }
    }

    pub fn with_strategies(strategies: Vec<Box<dyn CompanyStrategy>>) -> Self {
        Self { strategies }
    }

    pub fn resolve(&self, ctx: &ResolveContext<'_>, env: &ResolverEnv<'_>) -> CompanyResolution {
        let validator = env.validator();

        for strategy in &self.strategies {
            let source = strategy.source();
            let candidate = match strategy.extract(ctx, env) {
                Ok(Some(candidate)) => candidate,
                Ok(None) => continue,
                Err(e) => {
                    log::warn!("Company strategy {source} failed: {e:#}");
                    continue;
                }
            };

            let name = CompanyValidator::normalize_company_name(&candidate.name);
            if !validator.is_valid_company_name(&name) {
                log::debug!("{source} candidate '{}' rejected", candidate.name);
                continue;
            }

            // The subject only vouches for candidates that were read out of it.
            let subject = (source == CompanySource::SubjectParse).then(|| ctx.subject());
            let company = canonicalize(&name, subject, env.domains);
            log::debug!("Resolved company '{company}' via {source}");
            return CompanyResolution {
                status: Some(company_status(source, ctx, env.domains)),
                company: Some(company),
                source,
                job_title: candidate.job_title,
            };
        }

        log::info!(
            "No company resolved for thread {}, queued for manual labeling",
            ctx.message.thread_id
        );
        CompanyResolution::unresolved()
    }
}

/// Alias on the candidate, then alias anywhere in `subject` when given, then
/// the longest known company contained in the candidate.
pub fn canonicalize(candidate: &str, subject: Option<&str>, domains: &DomainRegistry) -> String {
    domains
        .lookup_alias(candidate)
        .or_else(|| domains.match_alias_in(candidate))
        .or_else(|| subject.and_then(|s| domains.match_alias_in(s)))
        .or_else(|| domains.known_company_in(candidate))
        .map(str::to_string)
        .unwrap_or_else(|| candidate.to_string())
}

fn company_status(
    source: CompanySource,
    ctx: &ResolveContext<'_>,
    domains: &DomainRegistry,
) -> CompanyStatus {
    let domain = ctx.sender_domain.as_deref().unwrap_or_default();
    match source {
        CompanySource::SenderNameMatch | CompanySource::DomainMapping => {
            domains.company_status_for(domain)
        }
        _ if domains.is_headhunter_domain(domain) => CompanyStatus::HeadHunter,
        _ => CompanyStatus::Employer,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prediction::NoPredictor;
    use crate::test_support::{domain_registry, inbound, pattern_registry, StaticPredictor};

    fn resolve_with(
        message: &InboundMessage,
        label: Option<Label>,
        predictor: &dyn Predictor,
    ) -> CompanyResolution {
        let patterns = pattern_registry();
        let domains = domain_registry();
        let env = ResolverEnv {
            patterns: &patterns,
            domains: &domains,
            predictor,
            min_confidence: 0.5,
        };
        CompanyResolver::new().resolve(&ResolveContext::new(message, label), &env)
    }

    fn resolve(message: &InboundMessage) -> CompanyResolution {
        resolve_with(message, Some(Label::JobApplication), &NoPredictor)
    }

    struct FailingStrategy;

    impl CompanyStrategy for FailingStrategy {
        fn source(&self) -> CompanySource {
            CompanySource::SubjectParse
        }

        fn extract(
            &self,
            _ctx: &ResolveContext<'_>,
            _env: &ResolverEnv<'_>,
        ) -> anyhow::Result<Option<Candidate>> {
            anyhow::bail!("decoder blew up")
        }
    }

    #[test]
    fn test_subject_position_at_company() {
        let message = inbound(
            "Thanks for applying for Field CTO position @ Claroty!",
            "We received your application.",
            "Talent <no-reply@greenhouse.io>",
        );
        let result = resolve(&message);
        assert_eq!(result.company.as_deref(), Some("Claroty"));
        assert_eq!(result.job_title.as_deref(), Some("Field CTO"));
        assert_eq!(result.source, CompanySource::SubjectParse);
        assert_eq!(result.status, Some(CompanyStatus::Employer));
    }

    #[test]
    fn test_ats_alias() {
        let message = inbound("Application update", "Thanks", "ngc@myworkday.com");
        let result = resolve(&message);
        assert_eq!(result.company.as_deref(), Some("Northrop Grumman"));
        assert_eq!(result.source, CompanySource::AtsAlias);
    }

    #[test]
    fn test_ats_tenant_subdomain_alias() {
        let message = inbound("Application update", "Thanks", "workday@ngc.wd1.myworkday.com");
        let result = resolve(&message);
        assert_eq!(result.company.as_deref(), Some("Northrop Grumman"));
        assert_eq!(result.source, CompanySource::AtsAlias);
    }

    #[test]
    fn test_domain_mapping_fallback() {
        let message = inbound("Checking in", "Hello there", "someone@example.com");
        let result = resolve(&message);
        assert_eq!(result.company.as_deref(), Some("MappedCo"));
        assert_eq!(result.source, CompanySource::DomainMapping);
    }

    #[test]
    fn test_invalid_subject_candidate_moves_on() {
        let message = inbound("Your application to careers", "Hello", "careers@example.com");
        let result = resolve(&message);
        assert_eq!(result.company.as_deref(), Some("MappedCo"));
        assert_eq!(result.source, CompanySource::DomainMapping);
    }

    #[test]
    fn test_person_name_subject_candidate_rejected() {
        let message = inbound("Interview with Jane Smith", "See you", "jane@gmail.com");
        let result = resolve(&message);
        assert_eq!(result.company, None);
        assert_eq!(result.source, CompanySource::None);
    }

    #[test]
    fn test_alias_canonicalizes_subject_candidate() {
        let message = inbound("Your application to NGC", "Hello", "jobs@unknown-host.org");
        let result = resolve(&message);
        assert_eq!(result.company.as_deref(), Some("Northrop Grumman"));
        assert_eq!(result.source, CompanySource::SubjectParse);
    }

    #[test]
    fn test_subject_alias_does_not_override_domain_mapping() {
        let message = inbound(
            "Checking in after the Northrop merger news",
            "Hello",
            "hr@example.com",
        );
        let result = resolve(&message);
        assert_eq!(result.company.as_deref(), Some("MappedCo"));
        assert_eq!(result.source, CompanySource::DomainMapping);
    }

    #[test]
    fn test_canonicalize_subject_alias_only_when_given() {
        let domains = domain_registry();
        let subject = "Update on your NGC application";
        assert_eq!(canonicalize("Defense Co", Some(subject), &domains), "Northrop Grumman");
        assert_eq!(canonicalize("Defense Co", None, &domains), "Defense Co");
    }

    #[test]
    fn test_known_company_substring_canonicalization() {
        let message = inbound(
            "Your application to Acme Corp Federal",
            "Hello",
            "jobs@unknown-host.org",
        );
        assert_eq!(resolve(&message).company.as_deref(), Some("Acme Corp"));
    }

    #[test]
    fn test_job_board_sent_to() {
        let message = inbound(
            "Indeed Application: Security Engineer",
            "<p>Your application has been sent to <b>Globex Systems</b>.</p><p>Good luck!</p>",
            "Indeed Apply <indeedapply@indeed.com>",
        );
        let result = resolve(&message);
        assert_eq!(result.company.as_deref(), Some("Globex Systems"));
        assert_eq!(result.source, CompanySource::JobBoardExtraction);
    }

    #[test]
    fn test_job_board_linked_name() {
        let message = inbound(
            "Your application on LinkedIn",
            "<table><tr><td><a href=\"https://www.linkedin.com/company/initech\">Initech Labs</a></td></tr>\
             <tr><td>has a message about your application</td></tr></table>",
            "LinkedIn <jobs-noreply@linkedin.com>",
        );
        let result = resolve(&message);
        assert_eq!(result.company.as_deref(), Some("Initech Labs"));
        assert_eq!(result.source, CompanySource::JobBoardExtraction);
    }

    #[test]
    fn test_sender_display_name_cleanup() {
        let message = inbound(
            "Next steps",
            "Hello",
            "\"Initrode Talent Acquisition\" <talent@initrode.io>",
        );
        let result = resolve(&message);
        assert_eq!(result.company.as_deref(), Some("Initrode"));
        assert_eq!(result.source, CompanySource::SenderNameMatch);

        let message = inbound("Next steps", "Hello", "\"Dana Scully\" <dana@initrode.io>");
        assert_eq!(resolve(&message).company, None);
    }

    #[test]
    fn test_sender_display_name_platform_suffix() {
        let message = inbound(
            "Next steps",
            "Hello",
            "\"Vandelay Industries International @ Workday\" <vandelay@mail.example.net>",
        );
        let result = resolve(&message);
        assert_eq!(result.company.as_deref(), Some("Vandelay Industries International"));
        assert_eq!(result.source, CompanySource::SenderNameMatch);
    }

    #[test]
    fn test_prediction_fallback_and_label_gate() {
        let predictor = StaticPredictor::company("Umbrella Corp", 0.8);
        let message = inbound("Hello", "Some text", "someone@unknown-host.org");

        let result = resolve_with(&message, Some(Label::JobApplication), &predictor);
        assert_eq!(result.company.as_deref(), Some("Umbrella Corp"));
        assert_eq!(result.source, CompanySource::MlPrediction);

        let result = resolve_with(&message, Some(Label::Noise), &predictor);
        assert_eq!(result.source, CompanySource::None);

        let weak = StaticPredictor::company("Umbrella Corp", 0.2);
        let result = resolve_with(&message, Some(Label::JobApplication), &weak);
        assert_eq!(result.company, None);
    }

    #[test]
    fn test_failing_strategy_is_skipped() {
        let patterns = pattern_registry();
        let domains = domain_registry();
        let env = ResolverEnv {
            patterns: &patterns,
            domains: &domains,
            predictor: &NoPredictor,
            min_confidence: 0.5,
        };
        let resolver = CompanyResolver::with_strategies(vec![
            Box::new(FailingStrategy),
            Box::new(DomainMappingStrategy),
        ]);
        let message = inbound("Hi", "Hello", "hr@uwe.nsa.gov");
        let result = resolver.resolve(&ResolveContext::new(&message, None), &env);
        assert_eq!(result.company.as_deref(), Some("National Security Agency"));
        assert_eq!(result.source, CompanySource::DomainMapping);
    }

    #[test]
    fn test_prediction_error_is_no_result() {
        let message = inbound("Hello", "Some text", "someone@unknown-host.org");
        let result = resolve_with(&message, Some(Label::Other), &StaticPredictor::failing());
        assert_eq!(result, CompanyResolution::unresolved());
    }
}
