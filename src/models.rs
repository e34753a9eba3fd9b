use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::window::ReportWindow;

pub const ANONYMOUS_MEMBER: &str = "Anonymous Member";
pub const UNNAMED_MEMBER: &str = "Member";
pub const MAX_RATING: u8 = 5;

/// A survey record as the warehouse hands it over, before any validation.
#[derive(Debug, Clone, Default, Deserialize, sqlx::FromRow)]
pub struct SourceRow {
    pub submission_id: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub coach_name: Option<String>,
    pub customer_name: Option<String>,
    pub member_name: Option<String>,
    pub rating_raw: Option<String>,
    pub comments: Option<String>,
    pub consent_raw: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemberName {
    Named(String),
    Anonymous,
    Unknown,
}

impl MemberName {
    pub fn display(&self) -> &str {
        match self {
            MemberName::Named(name) => name,
            MemberName::Anonymous => ANONYMOUS_MEMBER,
            MemberName::Unknown => UNNAMED_MEMBER,
        }
    }

    pub fn is_anonymous(&self) -> bool {
        matches!(self, MemberName::Anonymous)
    }
}

/// A consented submission. Anonymized submissions carry no member identity at all.
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub submission_id: String,
    pub coach_name: String,
    pub member: MemberName,
    pub customer_name: Option<String>,
    pub rating: Option<u8>,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub name: String,
    pub email: String,
}

/// Lower-cased recipient name; the grouping key for reports.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecipientKey(String);

impl RecipientKey {
    pub fn new(name: &str) -> Self {
        Self(name.trim().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Default)]
pub struct RecipientDirectory {
    entries: HashMap<RecipientKey, Recipient>,
    duplicates: Vec<String>,
}

impl RecipientDirectory {
    /// Names that collide case-insensitively keep the first entry seen; later
    /// ones are logged and listed in `duplicates`.
    pub fn new(recipients: impl IntoIterator<Item = Recipient>) -> Self {
        let mut entries: HashMap<RecipientKey, Recipient> = HashMap::new();
        let mut duplicates = Vec::new();
        for recipient in recipients {
            let key = RecipientKey::new(&recipient.name);
            if let Some(kept) = entries.get(&key) {
                tracing::warn!(
                    kept = %kept.name,
                    kept_email = %kept.email,
                    ignored = %recipient.name,
                    ignored_email = %recipient.email,
                    "duplicate recipient name in directory"
                );
                duplicates.push(recipient.name);
                continue;
            }
            entries.insert(key, recipient);
        }
        Self {
            entries,
            duplicates,
        }
    }

    pub fn duplicates(&self) -> &[String] {
        &self.duplicates
    }

    pub fn resolve(&self, name: &str) -> Option<&Recipient> {
        self.entries.get(&RecipientKey::new(name))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeedbackEntry {
    pub member: MemberName,
    pub customer_name: Option<String>,
    pub rating: Option<u8>,
    pub comment: Option<String>,
    pub submitted_at: DateTime<Utc>,
}

impl From<Submission> for FeedbackEntry {
    fn from(submission: Submission) -> Self {
        Self {
            member: submission.member,
            customer_name: submission.customer_name,
            rating: submission.rating,
            comment: submission.comment,
            submitted_at: submission.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecipientReport {
    pub recipient: Recipient,
    pub response_count: usize,
    pub avg_rating: Option<f64>,
    pub entries: Vec<FeedbackEntry>,
    pub window: ReportWindow,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderedReport {
    pub recipient: Recipient,
    pub subject: String,
    pub html: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum DeliveryStatus {
    Sent,
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryOutcome {
    pub recipient: String,
    pub delivered_to: String,
    #[serde(flatten)]
    pub status: DeliveryStatus,
}

impl DeliveryOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self.status, DeliveryStatus::Sent)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: uuid::Uuid,
    pub mode: String,
    pub week_start: NaiveDate,
    pub week_end: NaiveDate,
    pub withheld: usize,
    pub rejected: usize,
    pub recipients: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub failed_recipients: Vec<String>,
    pub outcomes: Vec<DeliveryOutcome>,
}

impl RunSummary {
    pub fn record(&mut self, outcome: DeliveryOutcome) {
        self.recipients += 1;
        if outcome.is_sent() {
            self.succeeded += 1;
        } else {
            self.failed += 1;
            self.failed_recipients.push(outcome.recipient.clone());
        }
        self.outcomes.push(outcome);
    }
}
