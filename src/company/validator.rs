use crate::domains::DomainRegistry;
use crate::patterns::PatternRegistry;
use crate::text::collapse_whitespace;
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref APPLICATION_FRAGMENT: Regex =
        Regex::new(r"(?i)\s*[-–—|:]\s*(?:your\s+)?application\b.*$").unwrap();
    static ref TRAILING_APPLICATION: Regex = Regex::new(r"(?i)\s+application\s*$").unwrap();
    static ref TRAILING_SEPARATORS: Regex = Regex::new(r"[\s\-–—|:,;!?]+$").unwrap();
    static ref PERSON_TOKEN: Regex = Regex::new(r"^[A-Z][a-z]+(?:[-'][A-Z]?[a-z]+)?$").unwrap();
}

/// Placeholder signature some ATS templates put where the employer goes.
const PSEUDO_COMPANY: &str = "hiring team";

pub struct CompanyValidator<'a> {
    patterns: &'a PatternRegistry,
    domains: &'a DomainRegistry,
}

impl<'a> CompanyValidator<'a> {
    pub fn new(patterns: &'a PatternRegistry, domains: &'a DomainRegistry) -> Self {
        Self { patterns, domains }
    }

    pub fn is_valid_company_name(&self, name: &str) -> bool {
        let name = name.trim();
        if name.is_empty() {
            return false;
        }
        if let Some(rule) = self.patterns.invalid_prefixes().iter().find(|r| r.matches(name)) {
            log::debug!("Rejected company candidate '{name}' ({rule:?})");
            return false;
        }
        true
    }

    pub fn normalize_company_name(name: &str) -> String {
        let name = collapse_whitespace(name);
        let name = APPLICATION_FRAGMENT.replace(&name, "");
        let name = TRAILING_APPLICATION.replace(&name, "");
        let name = TRAILING_SEPARATORS.replace(&name, "");
        let name = name
            .trim()
            .trim_matches(|c: char| c == '"' || c == '\'')
            .trim()
            .to_string();

        if name.eq_ignore_ascii_case(PSEUDO_COMPANY) {
            String::new()
        } else {
            name
        }
    }

    /// Heuristic for candidates that are an individual's name rather than an
    /// employer. One short token counts too, which misfires on short brand
    /// names unless they are in the known-company list.
    pub fn looks_like_person(&self, name: &str) -> bool {
        let tokens: Vec<&str> = name.split_whitespace().collect();
        if tokens.is_empty() || tokens.len() > 3 {
            return false;
        }
        if !tokens.iter().all(|t| PERSON_TOKEN.is_match(t)) {
            return false;
        }
        if tokens.iter().any(|t| self.patterns.is_corporate_suffix(t)) {
            return false;
        }
        if self.domains.is_known_company(name) {
            return false;
        }

        match tokens.as_slice() {
            [single] => single.chars().count() <= 5,
            [first, last] => first.chars().count() <= 12 && last.chars().count() <= 12,
            _ => false,
        }
    }

    /// Three or more words, a corporate suffix, or one long word.
    pub fn looks_like_company(&self, name: &str) -> bool {
        let tokens: Vec<&str> = name.split_whitespace().collect();
        tokens.len() >= 3
            || tokens.iter().any(|t| self.patterns.is_corporate_suffix(t))
            || tokens
                .iter()
                .any(|t| t.chars().filter(|c| c.is_alphabetic()).count() >= 10)
    }
}
