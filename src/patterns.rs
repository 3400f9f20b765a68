//! Label pattern registry.
//!
//! Patterns come from an editable JSON document and are compiled once per
//! load. A bad pattern never takes the registry down: it is logged, recorded
//! in the load report and skipped, so every failure in a document can be
//! reported in one pass.

use crate::model::Label;
use crate::registry::RegistryDocument;
use anyhow::Context;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PatternDocument {
    #[serde(default)]
    pub message_labels: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub message_label_excludes: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub special_cases: Vec<SpecialCaseRule>,
    #[serde(default)]
    pub early_detection: EarlyDetectionPatterns,
    #[serde(default)]
    pub validation_rules: ValidationRules,
    #[serde(default)]
    pub invalid_company_prefixes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpecialCaseRule {
    pub name: String,
    pub label: String,
    #[serde(default)]
    pub subject: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EarlyDetectionPatterns {
    #[serde(default)]
    pub rejection: Vec<String>,
    #[serde(default)]
    pub scheduling: Vec<String>,
    #[serde(default)]
    pub referral: Vec<String>,
    #[serde(default)]
    pub rejection_signals: Vec<String>,
    #[serde(default)]
    pub application_confirmation: Vec<String>,
    #[serde(default)]
    pub recruiter_signature: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationRules {
    #[serde(default = "default_corporate_suffixes")]
    pub corporate_suffixes: Vec<String>,
    #[serde(default = "default_sender_boilerplate")]
    pub sender_boilerplate: Vec<String>,
    #[serde(default = "default_platform_suffixes")]
    pub platform_suffixes: Vec<String>,
}

impl Default for ValidationRules {
    fn default() -> Self {
        Self {
            corporate_suffixes: default_corporate_suffixes(),
            sender_boilerplate: default_sender_boilerplate(),
            platform_suffixes: default_platform_suffixes(),
        }
    }
}

fn default_corporate_suffixes() -> Vec<String> {
    [
        "inc", "incorporated", "llc", "llp", "ltd", "limited", "corp", "corporation", "co",
        "company", "group", "holdings", "labs", "technologies", "technology", "tech",
        "systems", "solutions", "software", "partners", "associates", "consulting", "bank",
        "university", "institute", "agency", "international", "global", "services", "gmbh",
        "plc", "ag", "bv", "ai", "health", "capital", "ventures", "networks", "security",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_sender_boilerplate() -> Vec<String> {
    [
        r"\b(?:no-?reply|do-?not-?reply)\b",
        r"\b(?:talent acquisition|human resources|hiring team|people team|recruiting team|careers team)\b",
        r"\b(?:careers?|jobs|recruiting|recruitment|talent|hiring|notifications?|team|hr)\b",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_platform_suffixes() -> Vec<String> {
    [
        r"\s*(?:@|\bvia\b|\bon\b)\s*(?:my)?(?:workday|greenhouse|lever|icims|smartrecruiters|jobvite|ashby|taleo|successfactors|bamboohr|linkedin|indeed)\b.*$",
        r"\s*[|-]\s*(?:workday|greenhouse|lever|icims|smartrecruiters|jobvite|ashby)\s*$",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// One pattern that failed to compile (or referenced an unknown label).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternError {
    pub context: String,
    pub pattern: String,
    pub message: String,
}

impl fmt::Display for PatternError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: '{}': {}", self.context, self.pattern, self.message)
    }
}

/// A compiled, case-insensitive group of alternatives.
#[derive(Debug, Clone, Default)]
pub struct PatternSet {
    patterns: Vec<Regex>,
}

impl PatternSet {
    pub fn is_match(&self, text: &str) -> bool {
        self.patterns.iter().any(|re| re.is_match(text))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Regex> {
        self.patterns.iter()
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct SpecialCase {
    pub name: String,
    pub label: Label,
    pub subject: PatternSet,
}

#[derive(Debug, Clone, Default)]
pub struct EarlyDetection {
    pub rejection: PatternSet,
    pub scheduling: PatternSet,
    pub referral: PatternSet,
    pub rejection_signals: PatternSet,
    pub application_confirmation: PatternSet,
    pub recruiter_signature: PatternSet,
}

/// Invalid company-name rule; a pattern that does not compile degrades to a
/// literal prefix comparison.
#[derive(Debug, Clone)]
pub enum PrefixRule {
    Pattern(Regex),
    Literal(String),
}

impl PrefixRule {
    pub fn matches(&self, name: &str) -> bool {
        match self {
            PrefixRule::Pattern(re) => re.is_match(name),
            PrefixRule::Literal(prefix) => name.trim().to_lowercase().starts_with(prefix.as_str()),
        }
    }
}

/// Immutable snapshot of the compiled pattern document.
#[derive(Debug, Clone, Default)]
pub struct PatternRegistry {
    labels: HashMap<Label, PatternSet>,
    excludes: HashMap<Label, PatternSet>,
    special_cases: Vec<SpecialCase>,
    early: EarlyDetection,
    corporate_suffixes: HashSet<String>,
    sender_boilerplate: PatternSet,
    platform_suffixes: PatternSet,
    invalid_prefixes: Vec<PrefixRule>,
    errors: Vec<PatternError>,
}

impl PatternRegistry {
    pub fn from_document(doc: &PatternDocument) -> Self {
        let mut errors = Vec::new();

        let labels = compile_label_map("message_labels", &doc.message_labels, &mut errors);
        let excludes = compile_label_map(
            "message_label_excludes",
            &doc.message_label_excludes,
            &mut errors,
        );

        let mut special_cases = Vec::with_capacity(doc.special_cases.len());
        for rule in &doc.special_cases {
            let context = format!("special_cases.{}", rule.name);
            let label = match rule.label.parse::<Label>() {
                Ok(label) => label,
                Err(e) => {
                    log::warn!("Skipping special case '{}': {e}", rule.name);
                    errors.push(PatternError {
                        context,
                        pattern: rule.label.clone(),
                        message: e.to_string(),
                    });
                    continue;
                }
            };
            special_cases.push(SpecialCase {
                name: rule.name.clone(),
                label,
                subject: compile_set(&context, &rule.subject, &mut errors),
            });
        }

        let early_doc = &doc.early_detection;
        let early = EarlyDetection {
            rejection: compile_set("early_detection.rejection", &early_doc.rejection, &mut errors),
            scheduling: compile_set("early_detection.scheduling", &early_doc.scheduling, &mut errors),
            referral: compile_set("early_detection.referral", &early_doc.referral, &mut errors),
            rejection_signals: compile_set(
                "early_detection.rejection_signals",
                &early_doc.rejection_signals,
                &mut errors,
            ),
            application_confirmation: compile_set(
                "early_detection.application_confirmation",
                &early_doc.application_confirmation,
                &mut errors,
            ),
            recruiter_signature: compile_set(
                "early_detection.recruiter_signature",
                &early_doc.recruiter_signature,
                &mut errors,
            ),
        };

        let rules = &doc.validation_rules;
        let corporate_suffixes = rules
            .corporate_suffixes
            .iter()
            .map(|s| s.trim().trim_end_matches('.').to_lowercase())
            .filter(|s| !s.is_empty())
            .collect();
        let sender_boilerplate = compile_set(
            "validation_rules.sender_boilerplate",
            &rules.sender_boilerplate,
            &mut errors,
        );
        let platform_suffixes = compile_set(
            "validation_rules.platform_suffixes",
            &rules.platform_suffixes,
            &mut errors,
        );

        let mut invalid_prefixes = Vec::with_capacity(doc.invalid_company_prefixes.len());
        for source in &doc.invalid_company_prefixes {
            match build_regex(source) {
                Ok(re) => invalid_prefixes.push(PrefixRule::Pattern(re)),
                Err(e) => {
                    log::warn!(
                        "Invalid company prefix pattern '{source}' ({e}), using literal prefix match"
                    );
                    errors.push(PatternError {
                        context: "invalid_company_prefixes".to_string(),
                        pattern: source.clone(),
                        message: e.to_string(),
                    });
                    let literal = source.trim_start_matches('^').to_lowercase();
                    if !literal.is_empty() {
                        invalid_prefixes.push(PrefixRule::Literal(literal));
                    }
                }
            }
        }

        let registry = Self {
            labels,
            excludes,
            special_cases,
            early,
            corporate_suffixes,
            sender_boilerplate,
            platform_suffixes,
            invalid_prefixes,
            errors,
        };
        log::debug!(
            "Compiled {} patterns ({} errors)",
            registry.pattern_count(),
            registry.errors.len()
        );
        registry
    }

    /// Compiles the whole document and returns every failure at once.
    pub fn validate_document(doc: &PatternDocument) -> Result<(), Vec<PatternError>> {
        let registry = Self::from_document(doc);
        if registry.errors.is_empty() {
            Ok(())
        } else {
            Err(registry.errors)
        }
    }

    pub fn load_errors(&self) -> &[PatternError] {
        &self.errors
    }

    pub fn label_matches(&self, label: Label, text: &str) -> bool {
        self.labels.get(&label).is_some_and(|set| set.is_match(text))
    }

    pub fn is_excluded(&self, label: Label, text: &str) -> bool {
        self.excludes.get(&label).is_some_and(|set| set.is_match(text))
    }

    pub fn special_cases(&self) -> &[SpecialCase] {
        &self.special_cases
    }

    pub fn early(&self) -> &EarlyDetection {
        &self.early
    }

    pub fn is_corporate_suffix(&self, token: &str) -> bool {
        let token = token
            .trim_matches(|c: char| !c.is_alphanumeric())
            .to_lowercase();
        self.corporate_suffixes.contains(&token)
    }

    pub fn sender_boilerplate(&self) -> &PatternSet {
        &self.sender_boilerplate
    }

    pub fn platform_suffixes(&self) -> &PatternSet {
        &self.platform_suffixes
    }

    pub fn invalid_prefixes(&self) -> &[PrefixRule] {
        &self.invalid_prefixes
    }

    pub fn pattern_count(&self) -> usize {
        let early = &self.early;
        self.labels.values().map(PatternSet::len).sum::<usize>()
            + self.excludes.values().map(PatternSet::len).sum::<usize>()
            + self.special_cases.iter().map(|c| c.subject.len()).sum::<usize>()
            + early.rejection.len()
            + early.scheduling.len()
            + early.referral.len()
            + early.rejection_signals.len()
            + early.application_confirmation.len()
            + early.recruiter_signature.len()
            + self.sender_boilerplate.len()
            + self.platform_suffixes.len()
            + self.invalid_prefixes.len()
    }
}

impl RegistryDocument for PatternRegistry {
    const KIND: &'static str = "pattern";

    fn load_from_path(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read pattern document {}", path.display()))?;
        let doc: PatternDocument = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse pattern document {}", path.display()))?;
        Ok(Self::from_document(&doc))
    }

    fn empty() -> Self {
        Self::from_document(&PatternDocument::default())
    }
}

fn build_regex(source: &str) -> Result<Regex, regex::Error> {
    RegexBuilder::new(source).case_insensitive(true).build()
}

fn compile_set(context: &str, sources: &[String], errors: &mut Vec<PatternError>) -> PatternSet {
    let mut patterns = Vec::with_capacity(sources.len());
    for source in sources {
        match build_regex(source) {
            Ok(re) => patterns.push(re),
            Err(e) => {
                log::warn!("Skipping invalid {context} pattern '{source}': {e}");
                errors.push(PatternError {
                    context: context.to_string(),
                    pattern: source.clone(),
                    message: e.to_string(),
                });
            }
        }
    }
    PatternSet { patterns }
}

fn compile_label_map(
    context: &str,
    map: &BTreeMap<String, Vec<String>>,
    errors: &mut Vec<PatternError>,
) -> HashMap<Label, PatternSet> {
    let mut compiled = HashMap::new();
    for (key, sources) in map {
        match key.parse::<Label>() {
            Ok(label) => {
                let set = compile_set(&format!("{context}.{key}"), sources, errors);
                compiled.insert(label, set);
            }
            Err(e) => {
                log::warn!("Skipping {context} entry: {e}");
                errors.push(PatternError {
                    context: context.to_string(),
                    pattern: key.clone(),
                    message: e.to_string(),
                });
            }
        }
    }
    compiled
}
