use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::error::DataShapeError;
use crate::models::{FeedbackEntry, RecipientDirectory, RecipientKey, RecipientReport, Submission};
use crate::window::ReportWindow;

#[derive(Debug, Default)]
pub struct Aggregation {
    pub reports: BTreeMap<RecipientKey, RecipientReport>,
    pub rejected: Vec<DataShapeError>,
}

impl Aggregation {
    pub fn submission_count(&self) -> usize {
        self.reports.values().map(|r| r.response_count).sum()
    }
}

/// Groups consented submissions by recipient. Submission order within a
/// recipient follows input order.
pub fn aggregate(
    submissions: Vec<Submission>,
    directory: &RecipientDirectory,
    window: &ReportWindow,
    generated_at: DateTime<Utc>,
) -> Aggregation {
    let mut aggregation = Aggregation::default();

    for submission in submissions {
        let Some(recipient) = directory.resolve(&submission.coach_name) else {
            aggregation.rejected.push(DataShapeError::UnknownRecipient {
                submission_id: submission.submission_id,
                name: submission.coach_name,
            });
            continue;
        };

        let report = aggregation
            .reports
            .entry(RecipientKey::new(&recipient.name))
            .or_insert_with(|| RecipientReport {
                recipient: recipient.clone(),
                response_count: 0,
                avg_rating: None,
                entries: Vec::new(),
                window: *window,
                generated_at,
            });
        report.response_count += 1;
        report.entries.push(FeedbackEntry::from(submission));
    }

    for report in aggregation.reports.values_mut() {
        report.avg_rating = average_rating(&report.entries);
    }

    aggregation
}

/// Mean of the present ratings, rounded half-to-even to one decimal. `None`
/// when nothing was rated.
pub fn average_rating(entries: &[FeedbackEntry]) -> Option<f64> {
    let (count, total) = entries
        .iter()
        .filter_map(|entry| entry.rating)
        .fold((0u32, 0u32), |(count, total), rating| {
            (count + 1, total + rating as u32)
        });

    if count == 0 {
        return None;
    }
    let mean = total as f64 / count as f64;
    Some((mean * 10.0).round_ties_even() / 10.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::ingest;
    use crate::models::{MemberName, Recipient, SourceRow, ANONYMOUS_MEMBER};
    use crate::window::RunMode;
    use chrono::{FixedOffset, NaiveDate, TimeZone};

    fn window() -> ReportWindow {
        ReportWindow::for_mode(
            RunMode::Production,
            NaiveDate::from_ymd_opt(2026, 10, 16).unwrap(),
            FixedOffset::east_opt(0).unwrap(),
        )
    }

    fn generated_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 16, 12, 0, 0).unwrap()
    }

    fn directory() -> RecipientDirectory {
        RecipientDirectory::new(vec![
            Recipient {
                name: "Jane Smith".to_string(),
                email: "jane@example.com".to_string(),
            },
            Recipient {
                name: "Bob Lee".to_string(),
                email: "bob@example.com".to_string(),
            },
        ])
    }

    fn submission(id: &str, coach: &str, rating: Option<u8>) -> Submission {
        Submission {
            submission_id: id.to_string(),
            coach_name: coach.to_string(),
            member: MemberName::Named(format!("Member {id}")),
            customer_name: Some("Acme Realty".to_string()),
            rating,
            comment: None,
            created_at: Utc.with_ymd_and_hms(2026, 10, 7, 9, 0, 0).unwrap(),
        }
    }

    fn raw(id: &str, coach: &str, rating: Option<&str>, consent: &str) -> SourceRow {
        SourceRow {
            submission_id: Some(id.to_string()),
            created_at: Some(Utc.with_ymd_and_hms(2026, 10, 7, 9, 0, 0).unwrap()),
            coach_name: Some(coach.to_string()),
            customer_name: Some("Acme Realty".to_string()),
            member_name: Some("Pat Doe".to_string()),
            rating_raw: rating.map(str::to_string),
            comments: None,
            consent_raw: Some(consent.to_string()),
        }
    }

    #[test]
    fn consent_filtered_scenario() {
        let ingested = ingest(vec![
            raw("1", "Jane Smith", Some("5"), "Yes"),
            raw("2", "Jane Smith", None, "Yes, anonymous"),
            raw("3", "Bob Lee", Some("3"), "No"),
        ]);
        let aggregation = aggregate(ingested.submissions, &directory(), &window(), generated_at());

        assert_eq!(aggregation.reports.len(), 1);
        let jane = &aggregation.reports[&RecipientKey::new("Jane Smith")];
        assert_eq!(jane.recipient.name, "Jane Smith");
        assert_eq!(jane.response_count, 2);
        assert_eq!(jane.avg_rating, Some(5.0));
        let anonymous: Vec<_> = jane
            .entries
            .iter()
            .filter(|e| e.member.display() == ANONYMOUS_MEMBER)
            .collect();
        assert_eq!(anonymous.len(), 1);
        assert!(!aggregation.reports.contains_key(&RecipientKey::new("Bob Lee")));
    }

    #[test]
    fn grouping_is_case_insensitive_and_preserves_order() {
        let aggregation = aggregate(
            vec![
                submission("a", "jane smith", Some(4)),
                submission("b", "Bob Lee", Some(2)),
                submission("c", "JANE SMITH", Some(3)),
            ],
            &directory(),
            &window(),
            generated_at(),
        );

        let jane = &aggregation.reports[&RecipientKey::new("Jane Smith")];
        assert_eq!(jane.recipient.email, "jane@example.com");
        let members: Vec<_> = jane.entries.iter().map(|e| e.member.display()).collect();
        assert_eq!(members, vec!["Member a", "Member c"]);
        assert_eq!(jane.avg_rating, Some(3.5));
        assert_eq!(jane.window, window());
        assert_eq!(jane.generated_at, generated_at());
    }

    #[test]
    fn counts_cover_every_resolvable_submission() {
        let aggregation = aggregate(
            vec![
                submission("a", "Jane Smith", None),
                submission("b", "Unknown Coach", Some(5)),
                submission("c", "Bob Lee", None),
                submission("d", "Jane Smith", Some(1)),
            ],
            &directory(),
            &window(),
            generated_at(),
        );

        assert_eq!(aggregation.submission_count(), 3);
        assert_eq!(
            aggregation.rejected,
            vec![DataShapeError::UnknownRecipient {
                submission_id: "b".to_string(),
                name: "Unknown Coach".to_string(),
            }]
        );
    }

    #[test]
    fn average_is_absent_without_ratings() {
        let aggregation = aggregate(
            vec![submission("a", "Bob Lee", None), submission("b", "Bob Lee", None)],
            &directory(),
            &window(),
            generated_at(),
        );
        let bob = &aggregation.reports[&RecipientKey::new("bob lee")];
        assert_eq!(bob.response_count, 2);
        assert_eq!(bob.avg_rating, None);
    }

    #[test]
    fn average_rounds_to_one_decimal() {
        let entries: Vec<FeedbackEntry> = [Some(5), Some(4), Some(4), None]
            .into_iter()
            .enumerate()
            .map(|(i, rating)| submission(&i.to_string(), "Jane Smith", rating).into())
            .collect();
        assert_eq!(average_rating(&entries), Some(4.3));
        assert_eq!(average_rating(&[]), None);
    }

    #[test]
    fn exact_halves_round_to_even() {
        let entries: Vec<FeedbackEntry> = [5, 4, 4, 4]
            .into_iter()
            .enumerate()
            .map(|(i, rating)| submission(&i.to_string(), "Jane Smith", Some(rating)).into())
            .collect();
        assert_eq!(average_rating(&entries), Some(4.2));

        let entries: Vec<FeedbackEntry> = [5, 5, 4, 5]
            .into_iter()
            .enumerate()
            .map(|(i, rating)| submission(&i.to_string(), "Jane Smith", Some(rating)).into())
            .collect();
        assert_eq!(average_rating(&entries), Some(4.8));
    }
}
