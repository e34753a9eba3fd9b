use crate::error::DataShapeError;
use crate::models::{MemberName, SourceRow, Submission, MAX_RATING};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Consent {
    pub to_share: bool,
    pub anonymized: bool,
}

impl Consent {
    /// Survey answers read like "Yes, share my name" or "Yes, but anonymize me".
    pub fn parse(raw: Option<&str>) -> Self {
        let answer = raw.map(str::trim).unwrap_or_default().to_lowercase();
        let to_share = answer.starts_with("yes");
        Self {
            to_share,
            anonymized: to_share && answer.contains("anonym"),
        }
    }
}

#[derive(Debug, Default)]
pub struct Ingested {
    pub submissions: Vec<Submission>,
    pub withheld: usize,
    pub rejected: Vec<DataShapeError>,
}

/// Validates raw rows and drops every row without consent to share.
pub fn ingest(rows: Vec<SourceRow>) -> Ingested {
    let mut ingested = Ingested::default();

    for row in rows {
        let consent = Consent::parse(row.consent_raw.as_deref());
        if !consent.to_share {
            ingested.withheld += 1;
            continue;
        }

        match to_submission(row, consent) {
            Ok(submission) => ingested.submissions.push(submission),
            Err(err) => ingested.rejected.push(err),
        }
    }

    ingested
}

fn to_submission(row: SourceRow, consent: Consent) -> Result<Submission, DataShapeError> {
    let submission_id = non_blank(row.submission_id).ok_or(DataShapeError::MissingField {
        submission_id: "<unknown>".to_string(),
        field: "submission_id",
    })?;
    let missing = |field| DataShapeError::MissingField {
        submission_id: submission_id.clone(),
        field,
    };

    let created_at = row.created_at.ok_or_else(|| missing("created_at"))?;
    let coach_name = non_blank(row.coach_name).ok_or_else(|| missing("coach_name"))?;
    let rating = parse_rating(&submission_id, row.rating_raw.as_deref())?;

    let member = if consent.anonymized {
        MemberName::Anonymous
    } else {
        non_blank(row.member_name)
            .map(MemberName::Named)
            .unwrap_or(MemberName::Unknown)
    };

    Ok(Submission {
        submission_id,
        coach_name,
        member,
        customer_name: non_blank(row.customer_name),
        rating,
        comment: non_blank(row.comments),
        created_at,
    })
}

/// Takes the leading digits of an answer such as "4 - Agree".
pub fn parse_rating(submission_id: &str, raw: Option<&str>) -> Result<Option<u8>, DataShapeError> {
    let digits: String = raw
        .unwrap_or_default()
        .trim()
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    if digits.is_empty() {
        return Ok(None);
    }

    let out_of_range = |rating| DataShapeError::RatingOutOfRange {
        submission_id: submission_id.to_string(),
        rating,
    };
    let value: u32 = digits.parse().map_err(|_| out_of_range(u32::MAX))?;
    if (1..=MAX_RATING as u32).contains(&value) {
        Ok(Some(value as u8))
    } else {
        Err(out_of_range(value))
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
