use crate::domain_utils::DomainUtils;
use crate::model::{Label, Organizer, StatusDates};
use crate::patterns::PatternRegistry;
use base64::{engine::general_purpose, Engine as _};
use chrono::{Days, NaiveDate};
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref BASE64_LINE: Regex = Regex::new(r"^[A-Za-z0-9+/]+={0,2}$").unwrap();
    static ref BASE64_INLINE: Regex = Regex::new(r"[A-Za-z0-9+/]{40,}={0,2}").unwrap();
    static ref ORGANIZER: Regex =
        Regex::new(r"(?i)ORGANIZER[^\r\n]*?:mailto:([^\s;>\x22]+@[^\s;>\x22]+)").unwrap();
    static ref JOB_ID: Regex = Regex::new(
        r"(?i)(?:\bjob\s*(?:id|#|no\.?|number)|\breq(?:uisition)?(?:\s*(?:id|#|no\.?|number))?\b)\s*[:#.]?\s*([A-Z-]*\d[\w-]*)|\b(R-\d{3,})\b|\((\d{4,})\)"
    )
    .unwrap();
}

/// Shortest base64 run worth decoding.
const MIN_BASE64_RUN: usize = 40;
/// Interview dates are a placeholder a week out; the real date needs a human.
const INTERVIEW_PLACEHOLDER_DAYS: u64 = 7;

const CALENDAR_MARKERS: [&str; 2] = ["BEGIN:VCALENDAR", "BEGIN:VEVENT"];

pub struct MetadataExtractor<'a> {
    patterns: &'a PatternRegistry,
}

impl<'a> MetadataExtractor<'a> {
    pub fn new(patterns: &'a PatternRegistry) -> Self {
        Self { patterns }
    }

    /// Each status is checked on its own, so one message can set several.
    pub fn extract_status_dates(&self, subject: &str, body: &str, received: NaiveDate) -> StatusDates {
        let text = format!("{subject}\n{body}");
        let hit = |label: Label| {
            self.patterns.label_matches(label, &text) && !self.patterns.is_excluded(label, &text)
        };

        StatusDates {
            response_date: hit(Label::Response).then_some(received),
            rejection_date: hit(Label::Rejection).then_some(received),
            interview_date: if hit(Label::InterviewInvite) {
                received.checked_add_days(Days::new(INTERVIEW_PLACEHOLDER_DAYS))
            } else {
                None
            },
            follow_up_date: hit(Label::FollowUp).then_some(received),
        }
    }

    /// Organizer of a calendar invite carried in the body, either inline or
    /// as a base64 part. The first run that decodes to a calendar wins.
    pub fn extract_organizer_from_icalendar(&self, body: &str) -> Option<Organizer> {
        if contains_calendar_marker(body) {
            if let Some(organizer) = parse_organizer(body) {
                return Some(organizer);
            }
        }

        for run in base64_runs(body) {
            let bytes = match general_purpose::STANDARD.decode(run.as_bytes()) {
                Ok(bytes) => bytes,
                Err(e) => {
                    log::debug!("Skipping undecodable base64 run ({} chars): {e}", run.len());
                    continue;
                }
            };
            let decoded = String::from_utf8_lossy(&bytes);
            if !contains_calendar_marker(&decoded) {
                continue;
            }
            if let Some(organizer) = parse_organizer(&decoded) {
                return Some(organizer);
            }
        }
        None
    }

    pub fn extract_job_id(&self, subject: &str) -> Option<String> {
        let caps = JOB_ID.captures(subject)?;
        (1..=3)
            .find_map(|i| caps.get(i))
            .map(|m| m.as_str().trim_end_matches(['-', '_']).to_string())
    }
}

fn contains_calendar_marker(text: &str) -> bool {
    let upper = text.to_uppercase();
    CALENDAR_MARKERS.iter().any(|marker| upper.contains(marker))
}

fn parse_organizer(calendar: &str) -> Option<Organizer> {
    let email = ORGANIZER.captures(calendar)?.get(1)?.as_str().to_lowercase();
    let domain = DomainUtils::extract_domain(&email)?;
    Some(Organizer { email, domain })
}

/// Candidate base64 payloads: blocks of consecutive base64-only lines
/// (line-wrapped MIME parts) and long runs embedded in other lines.
///
/// A wrapped block keeps one line width and may end with one shorter line.
/// A line that breaks that shape starts a new run, so a short word such as
/// a signature directly above the part is not glued onto it.
fn base64_runs(body: &str) -> Vec<String> {
    let mut runs = Vec::new();
    let mut current = String::new();
    let mut width = 0;
    let mut closed = false;

    for line in body.lines() {
        let line = line.trim();
        if !line.is_empty() && BASE64_LINE.is_match(line) {
            let continues = !current.is_empty() && !closed && line.len() <= width;
            if !continues {
                push_run(&mut runs, &mut current);
                width = line.len();
            }
            closed = line.len() < width;
            current.push_str(line);
            continue;
        }
        push_run(&mut runs, &mut current);
        runs.extend(BASE64_INLINE.find_iter(line).map(|m| m.as_str().to_string()));
    }
    push_run(&mut runs, &mut current);
    runs
}

fn push_run(runs: &mut Vec<String>, current: &mut String) {
    if current.len() >= MIN_BASE64_RUN {
        runs.push(std::mem::take(current));
    } else {
        current.clear();
    }
}
