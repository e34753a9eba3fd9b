use std::fmt::Write;

use serde::Serialize;

use crate::error::TemplateRenderError;
use crate::models::{FeedbackEntry, RecipientReport, RenderedReport, MAX_RATING};

pub const NO_RATINGS: &str = "No ratings";

/// Everything a report template may reference. Field names are stable.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportContext {
    pub coach_name: String,
    pub week_start: String,
    pub week_end: String,
    pub total_responses: usize,
    pub avg_rating: Option<f64>,
    pub avg_rating_display: String,
    pub max_rating: u8,
    pub feedback_rows: Vec<RowContext>,
    pub generated_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowContext {
    pub member_name: String,
    pub anonymized: bool,
    pub customer_name: Option<String>,
    pub rating: Option<u8>,
    pub comment: Option<String>,
    pub submitted_at: String,
}

impl ReportContext {
    pub fn build(report: &RecipientReport) -> Result<Self, TemplateRenderError> {
        if report.recipient.name.trim().is_empty() {
            return Err(TemplateRenderError::MissingField("coach_name"));
        }

        Ok(Self {
            coach_name: report.recipient.name.clone(),
            week_start: report.window.long_label(),
            week_end: report.window.last_day_label(),
            total_responses: report.response_count,
            avg_rating: report.avg_rating,
            avg_rating_display: report
                .avg_rating
                .map(|avg| format!("{avg:.1}"))
                .unwrap_or_else(|| NO_RATINGS.to_string()),
            max_rating: MAX_RATING,
            feedback_rows: report.entries.iter().map(RowContext::from).collect(),
            generated_at: report.generated_at.format("%Y-%m-%d %H:%M UTC").to_string(),
        })
    }
}

impl From<&FeedbackEntry> for RowContext {
    fn from(entry: &FeedbackEntry) -> Self {
        Self {
            member_name: entry.member.display().to_string(),
            anonymized: entry.member.is_anonymous(),
            customer_name: entry.customer_name.clone(),
            rating: entry.rating,
            comment: entry.comment.clone(),
            submitted_at: entry.submitted_at.format("%b %-d, %Y %H:%M UTC").to_string(),
        }
    }
}

/// Turns a context into a finished document. Implementations must not
/// return partial output.
pub trait Template: Send + Sync {
    fn render(&self, context: &ReportContext) -> Result<String, TemplateRenderError>;
}

/// Built-in HTML email layout.
#[derive(Debug, Clone, Default)]
pub struct HtmlTemplate;

impl Template for HtmlTemplate {
    fn render(&self, ctx: &ReportContext) -> Result<String, TemplateRenderError> {
        let mut out = String::new();

        writeln!(out, "<!DOCTYPE html>")?;
        writeln!(out, "<html><head><meta charset=\"utf-8\">")?;
        writeln!(
            out,
            "<title>Weekly Feedback Summary - {}</title></head>",
            escape_html(&ctx.week_start)
        )?;
        writeln!(
            out,
            "<body style=\"font-family: Arial, sans-serif; color: #222;\">"
        )?;
        writeln!(out, "<h1>Hi {},</h1>", escape_html(&ctx.coach_name))?;
        writeln!(
            out,
            "<p>Here is the feedback your members shared from {} to {}.</p>",
            escape_html(&ctx.week_start),
            escape_html(&ctx.week_end)
        )?;

        writeln!(out, "<table style=\"margin-bottom: 24px;\"><tr>")?;
        writeln!(
            out,
            "<td><strong>{}</strong><br>Responses</td>",
            ctx.total_responses
        )?;
        match ctx.avg_rating {
            Some(_) => writeln!(
                out,
                "<td><strong>{} / {}</strong><br>Average rating</td>",
                ctx.avg_rating_display, ctx.max_rating
            )?,
            None => writeln!(
                out,
                "<td><strong>{}</strong><br>Average rating</td>",
                ctx.avg_rating_display
            )?,
        }
        writeln!(out, "</tr></table>")?;

        for row in &ctx.feedback_rows {
            writeln!(
                out,
                "<div style=\"border-top: 1px solid #ddd; padding: 12px 0;\">"
            )?;
            write!(out, "<p><strong>{}</strong>", escape_html(&row.member_name))?;
            if let Some(customer) = &row.customer_name {
                write!(out, " &middot; {}", escape_html(customer))?;
            }
            writeln!(out, "<br><small>{}</small></p>", escape_html(&row.submitted_at))?;
            if let Some(rating) = row.rating {
                writeln!(
                    out,
                    "<p>{} ({rating} / {})</p>",
                    stars(rating, ctx.max_rating),
                    ctx.max_rating
                )?;
            }
            if let Some(comment) = &row.comment {
                writeln!(out, "<blockquote>{}</blockquote>", escape_html(comment))?;
            }
            writeln!(out, "</div>")?;
        }

        writeln!(
            out,
            "<p style=\"color: #888; font-size: 12px;\">Generated {}</p>",
            escape_html(&ctx.generated_at)
        )?;
        writeln!(out, "</body></html>")?;

        Ok(out)
    }
}

fn stars(rating: u8, max: u8) -> String {
    let filled = rating.min(max) as usize;
    let empty = max.saturating_sub(rating) as usize;
    format!("{}{}", "&#9733;".repeat(filled), "&#9734;".repeat(empty))
}

pub fn escape_html(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            other => escaped.push(other),
        }
    }
    escaped
}

pub struct Renderer {
    template: Box<dyn Template>,
    subject_prefix: String,
}

impl Renderer {
    pub fn new(template: Box<dyn Template>, subject_prefix: impl Into<String>) -> Self {
        Self {
            template,
            subject_prefix: subject_prefix.into(),
        }
    }

    pub fn render(&self, report: &RecipientReport) -> Result<RenderedReport, TemplateRenderError> {
        let context = ReportContext::build(report)?;
        let html = self.template.render(&context)?;
        if html.trim().is_empty() {
            return Err(TemplateRenderError::MissingField("document body"));
        }

        Ok(RenderedReport {
            recipient: report.recipient.clone(),
            subject: format!(
                "{} - Week of {}",
                self.subject_prefix,
                report.window.short_label()
            ),
            html,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MemberName, Recipient};
    use crate::window::{ReportWindow, RunMode};
    use chrono::{FixedOffset, NaiveDate, TimeZone, Utc};

    fn report() -> RecipientReport {
        RecipientReport {
            recipient: Recipient {
                name: "Jane Smith".to_string(),
                email: "jane@example.com".to_string(),
            },
            response_count: 2,
            avg_rating: Some(5.0),
            entries: vec![
                FeedbackEntry {
                    member: MemberName::Named("Pat <Doe>".to_string()),
                    customer_name: Some("Acme & Sons".to_string()),
                    rating: Some(5),
                    comment: Some("Really helpful".to_string()),
                    submitted_at: Utc.with_ymd_and_hms(2026, 10, 6, 14, 5, 0).unwrap(),
                },
                FeedbackEntry {
                    member: MemberName::Anonymous,
                    customer_name: None,
                    rating: None,
                    comment: None,
                    submitted_at: Utc.with_ymd_and_hms(2026, 10, 7, 9, 0, 0).unwrap(),
                },
            ],
            window: ReportWindow::for_mode(
                RunMode::Production,
                NaiveDate::from_ymd_opt(2026, 10, 16).unwrap(),
                FixedOffset::east_opt(0).unwrap(),
            ),
            generated_at: Utc.with_ymd_and_hms(2026, 10, 16, 12, 0, 0).unwrap(),
        }
    }

    fn renderer() -> Renderer {
        Renderer::new(Box::new(HtmlTemplate), "Your Weekly Feedback Summary")
    }

    struct EchoTemplate;

    impl Template for EchoTemplate {
        fn render(&self, context: &ReportContext) -> Result<String, TemplateRenderError> {
            Ok(format!("{context:?}"))
        }
    }

    struct BlankTemplate;

    impl Template for BlankTemplate {
        fn render(&self, _context: &ReportContext) -> Result<String, TemplateRenderError> {
            Ok(String::new())
        }
    }

    #[test]
    fn context_exposes_summary_fields() {
        let ctx = ReportContext::build(&report()).unwrap();
        assert_eq!(ctx.coach_name, "Jane Smith");
        assert_eq!(ctx.week_start, "October 5, 2026");
        assert_eq!(ctx.week_end, "October 11, 2026");
        assert_eq!(ctx.total_responses, 2);
        assert_eq!(ctx.avg_rating_display, "5.0");
        assert_eq!(ctx.max_rating, 5);
        assert_eq!(ctx.generated_at, "2026-10-16 12:00 UTC");
        assert_eq!(ctx.feedback_rows[1].member_name, "Anonymous Member");
        assert!(ctx.feedback_rows[1].anonymized);
    }

    #[test]
    fn missing_average_uses_no_ratings_marker() {
        let mut unrated = report();
        unrated.avg_rating = None;
        let ctx = ReportContext::build(&unrated).unwrap();
        assert_eq!(ctx.avg_rating_display, NO_RATINGS);
        let html = renderer().render(&unrated).unwrap().html;
        assert!(html.contains("<strong>No ratings</strong>"));
    }

    #[test]
    fn rendering_is_deterministic() {
        let first = renderer().render(&report()).unwrap();
        let second = renderer().render(&report()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn html_escapes_free_text() {
        let html = renderer().render(&report()).unwrap().html;
        assert!(html.contains("Pat &lt;Doe&gt;"));
        assert!(html.contains("Acme &amp; Sons"));
        assert!(!html.contains("Pat <Doe>"));
    }

    #[test]
    fn subject_names_the_week() {
        let rendered = renderer().render(&report()).unwrap();
        assert_eq!(
            rendered.subject,
            "Your Weekly Feedback Summary - Week of Oct 5, 2026"
        );
        assert_eq!(rendered.recipient.email, "jane@example.com");
    }

    #[test]
    fn rendering_does_not_need_a_destination_address() {
        let mut no_address = report();
        no_address.recipient.email.clear();
        let rendered = renderer().render(&no_address).unwrap();
        assert!(rendered.html.contains("from October 5, 2026 to October 11, 2026"));
    }

    #[test]
    fn renderer_works_with_any_template() {
        let renderer = Renderer::new(Box::new(EchoTemplate), "Summary");
        let rendered = renderer.render(&report()).unwrap();
        assert!(rendered.html.contains("Anonymous Member"));
    }

    #[test]
    fn missing_context_never_produces_a_document() {
        let mut nameless = report();
        nameless.recipient.name = " ".to_string();
        assert!(matches!(
            renderer().render(&nameless),
            Err(TemplateRenderError::MissingField("coach_name"))
        ));

        let blank = Renderer::new(Box::new(BlankTemplate), "Summary");
        assert!(blank.render(&report()).is_err());
    }
}
