use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Production,
    Test,
}

impl RunMode {
    pub fn label(&self) -> &'static str {
        match self {
            RunMode::Production => "production",
            RunMode::Test => "test",
        }
    }
}

/// A half-open calendar week `[start, end)` running Monday to Monday in the
/// reporting timezone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
    offset: FixedOffset,
}

impl ReportWindow {
    /// Production reports on the week before `today`; test mode on the week containing it.
    pub fn for_mode(mode: RunMode, today: NaiveDate, offset: FixedOffset) -> Self {
        let monday = today - Duration::days(today.weekday().num_days_from_monday() as i64);
        let start = match mode {
            RunMode::Production => monday - Duration::weeks(1),
            RunMode::Test => monday,
        };
        Self {
            start,
            end: start + Duration::weeks(1),
            offset,
        }
    }

    pub fn start_utc(&self) -> DateTime<Utc> {
        self.midnight_utc(self.start)
    }

    pub fn end_utc(&self) -> DateTime<Utc> {
        self.midnight_utc(self.end)
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start_utc() && at < self.end_utc()
    }

    /// "October 5, 2026"
    pub fn long_label(&self) -> String {
        self.start.format("%B %-d, %Y").to_string()
    }

    /// "Oct 5, 2026"
    pub fn short_label(&self) -> String {
        self.start.format("%b %-d, %Y").to_string()
    }

    /// Last day inside the window, e.g. "October 11, 2026".
    pub fn last_day_label(&self) -> String {
        (self.end - Duration::days(1)).format("%B %-d, %Y").to_string()
    }

    fn midnight_utc(&self, date: NaiveDate) -> DateTime<Utc> {
        let local = date.and_time(NaiveTime::MIN);
        let utc = local - Duration::seconds(self.offset.local_minus_utc() as i64);
        DateTime::from_naive_utc_and_offset(utc, Utc)
    }
}
