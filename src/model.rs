use crate::domain_utils::DomainUtils;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Closed label taxonomy for a single message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Label {
    JobApplication,
    InterviewInvite,
    Prescreen,
    Rejection,
    Offer,
    Noise,
    HeadHunter,
    Referral,
    Ghosted,
    FollowUp,
    Response,
    Other,
    Blank,
}

impl Label {
    pub const ALL: [Label; 13] = [
        Label::JobApplication,
        Label::InterviewInvite,
        Label::Prescreen,
        Label::Rejection,
        Label::Offer,
        Label::Noise,
        Label::HeadHunter,
        Label::Referral,
        Label::Ghosted,
        Label::FollowUp,
        Label::Response,
        Label::Other,
        Label::Blank,
    ];

    /// Order of the main pattern scan; earlier labels win.
    pub const SCAN_ORDER: [Label; 10] = [
        Label::Offer,
        Label::Rejection,
        Label::HeadHunter,
        Label::Noise,
        Label::JobApplication,
        Label::InterviewInvite,
        Label::Other,
        Label::Referral,
        Label::Ghosted,
        Label::Blank,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Label::JobApplication => "job_application",
            Label::InterviewInvite => "interview_invite",
            Label::Prescreen => "prescreen",
            Label::Rejection => "rejection",
            Label::Offer => "offer",
            Label::Noise => "noise",
            Label::HeadHunter => "head_hunter",
            Label::Referral => "referral",
            Label::Ghosted => "ghosted",
            Label::FollowUp => "follow_up",
            Label::Response => "response",
            Label::Other => "other",
            Label::Blank => "blank",
        }
    }

    /// Labels that may open a new thread aggregate.
    pub fn opens_aggregate(&self) -> bool {
        matches!(
            self,
            Label::JobApplication | Label::InterviewInvite | Label::Prescreen
        )
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Label {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        Label::ALL
            .iter()
            .copied()
            .find(|label| label.as_str() == wanted)
            .ok_or_else(|| ModelError::UnknownLabel(s.to_string()))
    }
}

/// Which resolution strategy produced a stored company value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompanySource {
    AtsAlias,
    JobBoardExtraction,
    SubjectParse,
    SenderNameMatch,
    DomainMapping,
    MlPrediction,
    Manual,
    #[default]
    None,
}

impl CompanySource {
    pub const ALL: [CompanySource; 8] = [
        CompanySource::AtsAlias,
        CompanySource::JobBoardExtraction,
        CompanySource::SubjectParse,
        CompanySource::SenderNameMatch,
        CompanySource::DomainMapping,
        CompanySource::MlPrediction,
        CompanySource::Manual,
        CompanySource::None,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CompanySource::AtsAlias => "ats_alias",
            CompanySource::JobBoardExtraction => "job_board_extraction",
            CompanySource::SubjectParse => "subject_parse",
            CompanySource::SenderNameMatch => "sender_name_match",
            CompanySource::DomainMapping => "domain_mapping",
            CompanySource::MlPrediction => "ml_prediction",
            CompanySource::Manual => "manual",
            CompanySource::None => "none",
        }
    }
}

impl fmt::Display for CompanySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompanySource {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        CompanySource::ALL
            .iter()
            .copied()
            .find(|source| source.as_str() == wanted)
            .ok_or_else(|| ModelError::UnknownCompanySource(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompanyStatus {
    Employer,
    HeadHunter,
    JobBoard,
    Personal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Company {
    pub name: String,
    pub domain: Option<String>,
    pub status: CompanyStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    UnknownLabel(String),
    UnknownCompanySource(String),
    CompanyWithoutSource(String),
    SourceWithoutCompany(CompanySource),
    MissingThreadId,
}

impl fmt::Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelError::UnknownLabel(label) => write!(f, "unknown label '{label}'"),
            ModelError::UnknownCompanySource(source) => {
                write!(f, "unknown company source '{source}'")
            }
            ModelError::CompanyWithoutSource(company) => {
                write!(f, "company '{company}' has no provenance")
            }
            ModelError::SourceWithoutCompany(source) => {
                write!(f, "company source '{source}' recorded without a company")
            }
            ModelError::MissingThreadId => write!(f, "message has no thread identifier"),
        }
    }
}

impl std::error::Error for ModelError {}

/// Normalized message handed over by the transport layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InboundMessage {
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub sender: String,
    #[serde(default)]
    pub sender_domain: Option<String>,
    pub thread_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub header_hints: HashMap<String, String>,
}

impl InboundMessage {
    /// Sender domain as given, or derived from the sender address.
    pub fn sender_domain(&self) -> Option<String> {
        self.sender_domain
            .as_deref()
            .map(DomainUtils::canonicalize_domain)
            .filter(|d| !d.is_empty())
            .or_else(|| {
                self.sender_address()
                    .and_then(|addr| DomainUtils::extract_domain(&addr))
            })
    }

    pub fn sender_address(&self) -> Option<String> {
        DomainUtils::parse_address(&self.sender).or_else(|| {
            get_header_case_insensitive(&self.header_hints, "from")
                .and_then(|from| DomainUtils::parse_address(from))
        })
    }

    /// Display name from the sender, falling back to the `From` header hint
    /// when the transport only handed over a bare address.
    pub fn display_name(&self) -> Option<String> {
        DomainUtils::display_name(&self.sender).or_else(|| {
            get_header_case_insensitive(&self.header_hints, "from")
                .and_then(|from| DomainUtils::display_name(from))
        })
    }

    pub fn received_date(&self) -> NaiveDate {
        self.timestamp.date_naive()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusDates {
    pub response_date: Option<NaiveDate>,
    pub rejection_date: Option<NaiveDate>,
    pub interview_date: Option<NaiveDate>,
    pub follow_up_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organizer {
    pub email: String,
    pub domain: String,
}

/// Everything the engine derives from one message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassificationOutput {
    pub label: Option<Label>,
    pub confidence: f64,
    pub company: Option<String>,
    pub company_source: CompanySource,
    pub company_status: Option<CompanyStatus>,
    pub job_title: Option<String>,
    pub job_id: Option<String>,
    pub status_dates: StatusDates,
    pub organizer: Option<Organizer>,
    pub stage: Option<String>,
    pub needs_manual_company: bool,
}

impl ClassificationOutput {
    /// Resolved company as an entity, tied to the sender domain it came from.
    pub fn company_record(&self, domain: Option<&str>) -> Option<Company> {
        Some(Company {
            name: self.company.clone()?,
            domain: domain.map(str::to_string),
            status: self.company_status.unwrap_or(CompanyStatus::Employer),
        })
    }
}

/// Stored per-email record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub subject: String,
    pub body: String,
    pub sender: String,
    pub sender_domain: Option<String>,
    pub thread_id: String,
    pub timestamp: DateTime<Utc>,
    pub label: Option<Label>,
    pub confidence: f64,
    pub company: Option<String>,
    pub company_source: CompanySource,
    pub reviewed: bool,
}

impl Message {
    pub fn new(inbound: &InboundMessage, output: &ClassificationOutput) -> Result<Self, ModelError> {
        if inbound.thread_id.trim().is_empty() {
            return Err(ModelError::MissingThreadId);
        }
        check_provenance(output.company.as_deref(), output.company_source)?;

        Ok(Self {
            subject: inbound.subject.clone(),
            body: inbound.body.clone(),
            sender: inbound.sender.clone(),
            sender_domain: inbound.sender_domain(),
            thread_id: inbound.thread_id.clone(),
            timestamp: inbound.timestamp,
            label: output.label,
            confidence: clamp_confidence(output.confidence),
            company: output.company.clone(),
            company_source: output.company_source,
            reviewed: false,
        })
    }

    /// Applies an automated re-classification. Reviewed records are left
    /// alone unless `override_review` is set. Returns whether anything changed.
    pub fn reclassify(
        &mut self,
        output: &ClassificationOutput,
        override_review: bool,
    ) -> Result<bool, ModelError> {
        if self.reviewed && !override_review {
            log::debug!(
                "Message in thread {} is reviewed, keeping manual classification",
                self.thread_id
            );
            return Ok(false);
        }
        check_provenance(output.company.as_deref(), output.company_source)?;

        let confidence = clamp_confidence(output.confidence);
        let changed = self.label != output.label
            || self.company != output.company
            || self.company_source != output.company_source
            || (self.confidence - confidence).abs() > f64::EPSILON;

        self.label = output.label;
        self.confidence = confidence;
        self.company = output.company.clone();
        self.company_source = output.company_source;
        if override_review {
            self.reviewed = false;
        }
        Ok(changed)
    }

    /// Human review: the company becomes a manual assignment and the record
    /// is locked against automated re-classification.
    pub fn apply_review(&mut self, label: Option<Label>, company: Option<String>) {
        let company = company
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());
        self.company_source = if company.is_some() {
            CompanySource::Manual
        } else {
            CompanySource::None
        };
        self.company = company;
        self.label = label;
        self.confidence = 1.0;
        self.reviewed = true;
    }
}

fn check_provenance(company: Option<&str>, source: CompanySource) -> Result<(), ModelError> {
    match (company, source) {
        (Some(name), CompanySource::None) => Err(ModelError::CompanyWithoutSource(name.to_string())),
        (None, CompanySource::None) => Ok(()),
        (None, source) => Err(ModelError::SourceWithoutCompany(source)),
        (Some(_), _) => Ok(()),
    }
}

/// Case-insensitive header hint lookup.
pub fn get_header_case_insensitive<'a>(
    headers: &'a HashMap<String, String>,
    header_name: &str,
) -> Option<&'a String> {
    let header_lower = header_name.to_lowercase();
    headers
        .iter()
        .find(|(k, _)| k.to_lowercase() == header_lower)
        .map(|(_, v)| v)
}

pub fn clamp_confidence(confidence: f64) -> f64 {
    if confidence.is_nan() {
        0.0
    } else {
        confidence.clamp(0.0, 1.0)
    }
}

/// Thread-level roll-up of every message sharing a conversation id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThreadAggregate {
    pub thread_id: String,
    pub company: Option<String>,
    pub job_title: Option<String>,
    pub job_id: Option<String>,
    pub label: Option<Label>,
    pub confidence: f64,
    pub sent_date: Option<NaiveDate>,
    pub response_date: Option<NaiveDate>,
    pub rejection_date: Option<NaiveDate>,
    pub interview_date: Option<NaiveDate>,
    pub prescreen_date: Option<NaiveDate>,
    pub follow_up_date: Option<NaiveDate>,
    pub reviewed: bool,
}

impl ThreadAggregate {
    pub fn new(thread_id: &str) -> Self {
        Self {
            thread_id: thread_id.to_string(),
            ..Default::default()
        }
    }

    /// The "current state" date slot a label drives, if any.
    pub fn date_field(&self, label: Label) -> Option<&Option<NaiveDate>> {
        match label {
            Label::JobApplication => Some(&self.sent_date),
            Label::InterviewInvite => Some(&self.interview_date),
            Label::Prescreen => Some(&self.prescreen_date),
            Label::Rejection => Some(&self.rejection_date),
            Label::Response => Some(&self.response_date),
            Label::FollowUp => Some(&self.follow_up_date),
            _ => None,
        }
    }

    pub fn date_field_mut(&mut self, label: Label) -> Option<&mut Option<NaiveDate>> {
        match label {
            Label::JobApplication => Some(&mut self.sent_date),
            Label::InterviewInvite => Some(&mut self.interview_date),
            Label::Prescreen => Some(&mut self.prescreen_date),
            Label::Rejection => Some(&mut self.rejection_date),
            Label::Response => Some(&mut self.response_date),
            Label::FollowUp => Some(&mut self.follow_up_date),
            _ => None,
        }
    }
}
