use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::FixedOffset;
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_PATH: &str = "coach-feedback.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub smtp: SmtpConfig,
    #[serde(default)]
    pub report: ReportConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub schema: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: 1,
            schema: "coach_feedback".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Falls back to `username` when blank.
    pub from_address: String,
    pub from_name: String,
    pub timeout_secs: u64,
}

impl SmtpConfig {
    pub fn sender(&self) -> &str {
        if self.from_address.trim().is_empty() {
            &self.username
        } else {
            &self.from_address
        }
    }
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: "smtp.gmail.com".into(),
            port: 587,
            username: String::new(),
            password: String::new(),
            from_address: String::new(),
            from_name: "Coaching Team".into(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// Offset of the reporting timezone from UTC; week boundaries are local midnights.
    pub timezone_offset_minutes: i32,
    pub subject_prefix: String,
    pub test_marker: String,
}

impl ReportConfig {
    pub fn offset(&self) -> Result<FixedOffset> {
        FixedOffset::east_opt(self.timezone_offset_minutes * 60).with_context(|| {
            format!(
                "report.timezone_offset_minutes out of range: {}",
                self.timezone_offset_minutes
            )
        })
    }
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            timezone_offset_minutes: 0,
            subject_prefix: "Your Weekly Feedback Summary".into(),
            test_marker: "[TEST]".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub write_to_file: bool,
    pub file_path: String,
    pub max_bytes: u64,
    pub backups: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            write_to_file: true,
            file_path: "status.log".into(),
            max_bytes: 1024 * 1024,
            backups: 1,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config: {}", path.display()))?;
        let cfg: Config = toml::from_str(&raw)
            .with_context(|| format!("parsing TOML: {}", path.display()))?;
        Ok(cfg)
    }

    /// Explicit path, else `./coach-feedback.toml` when present, else defaults.
    pub fn resolve(user: Option<&Path>) -> Result<Self> {
        if let Some(path) = user {
            return Self::load(path);
        }
        let default = PathBuf::from(DEFAULT_CONFIG_PATH);
        if default.exists() {
            Self::load(&default)
        } else {
            Ok(Self::default())
        }
    }

    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_vars(|name| std::env::var(name).ok())
    }

    fn apply_vars(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        let var = |name: &str| var(name).filter(|v| !v.trim().is_empty());

        if let Some(url) = var("DATABASE_URL") {
            self.database.url = url;
        }
        if let Some(host) = var("SMTP_SERVER") {
            self.smtp.host = host;
        }
        if let Some(port) = var("SMTP_PORT") {
            self.smtp.port = port
                .trim()
                .parse()
                .with_context(|| format!("SMTP_PORT is not a port number: {port}"))?;
        }
        if let Some(user) = var("SMTP_USER") {
            self.smtp.username = user;
        }
        if let Some(pass) = var("SMTP_PASS") {
            self.smtp.password = pass;
        }
        if let Some(from) = var("EMAIL_FROM") {
            self.smtp.from_address = from;
        }
        if let Some(name) = var("EMAIL_FROM_NAME") {
            self.smtp.from_name = name;
        }
        Ok(())
    }

    pub fn validate_for_database(&self) -> Result<()> {
        if self.database.url.trim().is_empty() {
            bail!("DATABASE_URL (or database.url) must be set to reach the feedback warehouse");
        }
        Ok(())
    }

    pub fn validate_for_delivery(&self) -> Result<()> {
        if self.smtp.host.trim().is_empty() {
            bail!("SMTP_SERVER (or smtp.host) must be set");
        }
        if self.smtp.username.trim().is_empty() {
            bail!("SMTP_USER (or smtp.username) must be set");
        }
        if self.smtp.password.is_empty() {
            bail!("SMTP_PASS (or smtp.password) must be set");
        }
        Ok(())
    }
}
