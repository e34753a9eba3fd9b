use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::SourceError;
use crate::models::{Recipient, RecipientDirectory, SourceRow};
use crate::window::ReportWindow;

/// Where recipients and survey rows come from.
#[async_trait]
pub trait FeedbackSource: Send + Sync {
    async fn fetch_directory(&self) -> Result<RecipientDirectory, SourceError>;

    /// Rows submitted inside `window`, newest first.
    async fn fetch_rows(&self, window: &ReportWindow) -> Result<Vec<SourceRow>, SourceError>;
}

/// Offline source: `coaches.csv` (coach_name, coach_email) and
/// `submissions.csv` (one column per `SourceRow` field) in one directory.
pub struct CsvSource {
    coaches: PathBuf,
    submissions: PathBuf,
}

impl CsvSource {
    pub fn from_dir(dir: &Path) -> Self {
        Self {
            coaches: dir.join("coaches.csv"),
            submissions: dir.join("submissions.csv"),
        }
    }
}

fn open(path: &Path) -> Result<csv::Reader<std::fs::File>, SourceError> {
    csv::Reader::from_path(path)
        .map_err(|e| SourceError::Connection(format!("{}: {e}", path.display())))
}

#[async_trait]
impl FeedbackSource for CsvSource {
    async fn fetch_directory(&self) -> Result<RecipientDirectory, SourceError> {
        #[derive(serde::Deserialize)]
        struct CoachRow {
            coach_name: String,
            coach_email: Option<String>,
        }

        let mut reader = open(&self.coaches)?;
        let mut recipients = Vec::new();
        for result in reader.deserialize::<CoachRow>() {
            let row = result?;
            recipients.push(Recipient {
                name: row.coach_name.trim().to_string(),
                email: row.coach_email.unwrap_or_default().trim().to_string(),
            });
        }

        Ok(RecipientDirectory::new(recipients))
    }

    async fn fetch_rows(&self, window: &ReportWindow) -> Result<Vec<SourceRow>, SourceError> {
        let mut reader = open(&self.submissions)?;
        let mut rows = Vec::new();
        for result in reader.deserialize::<SourceRow>() {
            let row = result?;
            // Undated rows are kept so ingestion can report them.
            if row.created_at.map_or(true, |at| window.contains(at)) {
                rows.push(row);
            }
        }

        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }
}
