use chrono::{DateTime, FixedOffset, Utc};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::aggregate::aggregate;
use crate::error::RunError;
use crate::ingest::ingest;
use crate::mailer::{dispatch, MailTransport, TestOverride};
use crate::models::{DeliveryOutcome, DeliveryStatus, RecipientKey, RunSummary};
use crate::report::Renderer;
use crate::source::FeedbackSource;
use crate::window::{ReportWindow, RunMode};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub mode: RunMode,
    /// Only report on this recipient (matched case-insensitively).
    pub coach: Option<String>,
    pub test_override: Option<TestOverride>,
}

impl RunRequest {
    pub fn production() -> Self {
        Self {
            mode: RunMode::Production,
            coach: None,
            test_override: None,
        }
    }

    pub fn test(coach: impl Into<String>, address: impl Into<String>, marker: impl Into<String>) -> Self {
        Self {
            mode: RunMode::Test,
            coach: Some(coach.into()),
            test_override: Some(TestOverride {
                address: address.into(),
                marker: marker.into(),
            }),
        }
    }
}

pub struct RunController<'a> {
    source: &'a dyn FeedbackSource,
    transport: &'a dyn MailTransport,
    renderer: &'a Renderer,
    offset: FixedOffset,
}

impl<'a> RunController<'a> {
    pub fn new(
        source: &'a dyn FeedbackSource,
        transport: &'a dyn MailTransport,
        renderer: &'a Renderer,
        offset: FixedOffset,
    ) -> Self {
        Self {
            source,
            transport,
            renderer,
            offset,
        }
    }

    /// Fetch, aggregate, then render and send one report per recipient.
    /// Setup failures abort before anything is sent; per-recipient failures
    /// are recorded in the summary.
    pub async fn run(&self, request: &RunRequest, now: DateTime<Utc>) -> Result<RunSummary, RunError> {
        let run_id = Uuid::new_v4();
        let today = now.with_timezone(&self.offset).date_naive();
        let window = ReportWindow::for_mode(request.mode, today, self.offset);
        info!(
            %run_id,
            mode = request.mode.label(),
            week_start = %window.start,
            week_end = %window.end,
            "starting feedback run"
        );

        let directory = self.source.fetch_directory().await?;
        if directory.is_empty() {
            warn!(%run_id, "recipient directory is empty");
        } else {
            info!(%run_id, recipients = directory.len(), "loaded recipient directory");
        }
        let rows = self.source.fetch_rows(&window).await?;
        info!(%run_id, rows = rows.len(), "fetched feedback rows");

        let ingested = ingest(rows);
        let mut aggregation = aggregate(ingested.submissions, &directory, &window, now);
        let rejected: Vec<_> = ingested
            .rejected
            .into_iter()
            .chain(std::mem::take(&mut aggregation.rejected))
            .collect();
        for err in &rejected {
            warn!(%run_id, "skipping submission: {err}");
        }
        info!(
            %run_id,
            consented = aggregation.submission_count(),
            withheld = ingested.withheld,
            rejected = rejected.len(),
            "aggregated submissions"
        );

        if let Some(coach) = &request.coach {
            let recipient = directory
                .resolve(coach)
                .ok_or_else(|| RunError::RecipientNotFound(coach.clone()))?;
            let key = RecipientKey::new(&recipient.name);
            aggregation.reports.retain(|k, _| *k == key);
        }

        let mut summary = RunSummary {
            run_id,
            mode: request.mode.label().to_string(),
            week_start: window.start,
            week_end: window.end,
            withheld: ingested.withheld,
            rejected: rejected.len(),
            recipients: 0,
            succeeded: 0,
            failed: 0,
            failed_recipients: Vec::new(),
            outcomes: Vec::new(),
        };

        if aggregation.reports.is_empty() {
            let scope = request
                .coach
                .as_deref()
                .map(|c| format!(" for coach: {c}"))
                .unwrap_or_default();
            info!(
                %run_id,
                "No consented feedback found for the week of {}{scope}. No emails sent.",
                window.long_label()
            );
            return Ok(summary);
        }

        for (key, report) in &aggregation.reports {
            let outcome = match self.renderer.render(report) {
                Ok(rendered) => {
                    dispatch(self.transport, rendered, request.test_override.as_ref()).await
                }
                Err(err) => DeliveryOutcome {
                    recipient: report.recipient.name.clone(),
                    delivered_to: String::new(),
                    status: DeliveryStatus::Failed {
                        reason: format!("render: {err}"),
                    },
                },
            };

            match &outcome.status {
                DeliveryStatus::Sent => info!(
                    %run_id,
                    recipient = key.as_str(),
                    to = %outcome.delivered_to,
                    responses = report.response_count,
                    "report sent"
                ),
                DeliveryStatus::Failed { reason } => error!(
                    %run_id,
                    recipient = key.as_str(),
                    "failed to process/send report: {reason}"
                ),
            }
            summary.record(outcome);
        }

        info!(
            %run_id,
            recipients = summary.recipients,
            succeeded = summary.succeeded,
            failed = summary.failed,
            "run finished"
        );
        if summary.failed > 0 {
            warn!(%run_id, "finished with errors for: {}", summary.failed_recipients.join(", "));
        }

        Ok(summary)
    }
}
