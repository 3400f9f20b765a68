//! Company/domain registry: ATS, job-board and recruiter-agency domain sets,
//! the domain→company map and the alias→company map.

use crate::domain_utils::DomainUtils;
use crate::model::CompanyStatus;
use crate::registry::RegistryDocument;
use anyhow::Context;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// Consumer mailbox providers; a sender here is an individual, not an employer.
const PERSONAL_MAIL_DOMAINS: &[&str] = &[
    "gmail.com",
    "googlemail.com",
    "outlook.com",
    "hotmail.com",
    "live.com",
    "yahoo.com",
    "aol.com",
    "icloud.com",
    "me.com",
    "mac.com",
    "protonmail.com",
    "proton.me",
];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompanyDocument {
    #[serde(default)]
    pub known: Vec<String>,
    #[serde(default)]
    pub domain_to_company: HashMap<String, String>,
    #[serde(default)]
    pub aliases: HashMap<String, String>,
    #[serde(default)]
    pub ats_domains: Vec<String>,
    #[serde(default)]
    pub job_boards: Vec<String>,
    #[serde(default)]
    pub headhunter_domains: Vec<String>,
}

#[derive(Debug, Clone)]
struct AliasRule {
    pattern: Regex,
    canonical: String,
}

/// Immutable snapshot of the company document.
#[derive(Debug, Clone, Default)]
pub struct DomainRegistry {
    known: Vec<String>,
    known_lower: HashSet<String>,
    domain_to_company: HashMap<String, String>,
    aliases: HashMap<String, String>,
    alias_rules: Vec<AliasRule>,
    ats_domains: HashSet<String>,
    job_boards: HashSet<String>,
    headhunter_domains: HashSet<String>,
}

impl DomainRegistry {
    pub fn from_document(doc: &CompanyDocument) -> Self {
        let known: Vec<String> = doc
            .known
            .iter()
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .collect();
        let known_lower = known.iter().map(|name| name.to_lowercase()).collect();

        let domain_to_company = doc
            .domain_to_company
            .iter()
            .map(|(domain, company)| (DomainUtils::canonicalize_domain(domain), company.trim().to_string()))
            .filter(|(domain, company)| !domain.is_empty() && !company.is_empty())
            .collect();

        let aliases: HashMap<String, String> = doc
            .aliases
            .iter()
            .map(|(alias, company)| (alias.trim().to_lowercase(), company.trim().to_string()))
            .filter(|(alias, company)| !alias.is_empty() && !company.is_empty())
            .collect();

        // Longest alias first so "northrop grumman" beats "northrop".
        let mut alias_names: Vec<&String> = aliases.keys().collect();
        alias_names.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        let mut alias_rules = Vec::with_capacity(alias_names.len());
        for alias in alias_names {
            match Regex::new(&format!(r"(?i)\b{}\b", regex::escape(alias))) {
                Ok(pattern) => alias_rules.push(AliasRule {
                    pattern,
                    canonical: aliases[alias].clone(),
                }),
                Err(e) => log::warn!("Skipping alias '{alias}': {e}"),
            }
        }

        Self {
            known,
            known_lower,
            domain_to_company,
            aliases,
            alias_rules,
            ats_domains: domain_set(&doc.ats_domains),
            job_boards: domain_set(&doc.job_boards),
            headhunter_domains: domain_set(&doc.headhunter_domains),
        }
    }

    pub fn is_ats_domain(&self, domain: &str) -> bool {
        in_domain_set(&self.ats_domains, domain)
    }

    pub fn is_job_board_domain(&self, domain: &str) -> bool {
        in_domain_set(&self.job_boards, domain)
    }

    pub fn is_headhunter_domain(&self, domain: &str) -> bool {
        in_domain_set(&self.headhunter_domains, domain)
    }

    pub fn is_personal_domain(&self, domain: &str) -> bool {
        let domain = DomainUtils::canonicalize_domain(domain);
        PERSONAL_MAIL_DOMAINS.contains(&domain.as_str())
    }

    /// Company for the most specific registered suffix of `domain`.
    pub fn map_company_by_domain(&self, domain: &str) -> Option<&str> {
        let domain = DomainUtils::canonicalize_domain(domain);
        let company = DomainUtils::suffixes(&domain)
            .find_map(|suffix| self.domain_to_company.get(suffix))
            .map(String::as_str);
        company
    }

    /// Exact (case-insensitive) alias lookup.
    pub fn lookup_alias(&self, alias: &str) -> Option<&str> {
        self.aliases
            .get(&alias.trim().to_lowercase())
            .map(String::as_str)
    }

    /// Canonical company for the first alias found as a whole word in `text`.
    pub fn match_alias_in(&self, text: &str) -> Option<&str> {
        self.alias_rules
            .iter()
            .find(|rule| rule.pattern.is_match(text))
            .map(|rule| rule.canonical.as_str())
    }

    pub fn is_known_company(&self, name: &str) -> bool {
        self.known_lower.contains(&name.trim().to_lowercase())
    }

    /// Longest known company name contained in `candidate`. Names shorter
    /// than three characters only match exactly.
    pub fn known_company_in(&self, candidate: &str) -> Option<&str> {
        let candidate = candidate.trim().to_lowercase();
        if candidate.is_empty() {
            return None;
        }
        self.known
            .iter()
            .filter(|name| {
                let name = name.to_lowercase();
                if name.chars().count() < 3 {
                    name == candidate
                } else {
                    candidate.contains(&name)
                }
            })
            .max_by_key(|name| name.len())
            .map(String::as_str)
    }

    /// Whether free text (a display name or address) names a job board,
    /// e.g. "Indeed Apply" for `indeed.com`.
    pub fn job_board_mentioned(&self, text: &str) -> bool {
        let text = text.to_lowercase();
        let words: Vec<&str> = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();
        self.job_boards.iter().any(|board| {
            board
                .split('.')
                .next()
                .filter(|root| root.len() >= 4)
                .is_some_and(|root| words.iter().any(|w| w.starts_with(root)))
        })
    }

    pub fn company_status_for(&self, domain: &str) -> CompanyStatus {
        if self.is_headhunter_domain(domain) {
            CompanyStatus::HeadHunter
        } else if self.is_job_board_domain(domain) {
            CompanyStatus::JobBoard
        } else if self.is_personal_domain(domain) {
            CompanyStatus::Personal
        } else {
            CompanyStatus::Employer
        }
    }

    pub fn known_companies(&self) -> &[String] {
        &self.known
    }

    pub fn domain_count(&self) -> usize {
        self.ats_domains.len()
            + self.job_boards.len()
            + self.headhunter_domains.len()
            + self.domain_to_company.len()
    }
}

impl RegistryDocument for DomainRegistry {
    const KIND: &'static str = "company";

    fn load_from_path(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read company document {}", path.display()))?;
        let doc: CompanyDocument = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse company document {}", path.display()))?;
        Ok(Self::from_document(&doc))
    }

    fn empty() -> Self {
        Self::default()
    }
}

fn domain_set(domains: &[String]) -> HashSet<String> {
    domains
        .iter()
        .map(|d| DomainUtils::canonicalize_domain(d))
        .filter(|d| !d.is_empty())
        .collect()
}

fn in_domain_set(set: &HashSet<String>, domain: &str) -> bool {
    let domain = DomainUtils::canonicalize_domain(domain);
    let found = !domain.is_empty() && DomainUtils::suffixes(&domain).any(|suffix| set.contains(suffix));
    found
}
