use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use crate::config::SmtpConfig;
use crate::error::DeliveryError;
use crate::models::{DeliveryOutcome, DeliveryStatus, RenderedReport};

const PLAIN_FALLBACK: &str =
    "Please view this email in an HTML-capable client to see your feedback report.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    /// Directory name of the coach the report is about.
    pub recipient: String,
    pub to_name: String,
    pub to_address: String,
    pub subject: String,
    pub html: String,
}

/// Redirects every delivery in a run to one address and marks the subject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestOverride {
    pub address: String,
    pub marker: String,
}

impl OutgoingEmail {
    /// Resolves the destination. The recipient's own address is only needed
    /// when no override is in effect.
    pub fn addressed(
        rendered: RenderedReport,
        test_override: Option<&TestOverride>,
    ) -> Result<Self, DeliveryError> {
        match test_override {
            Some(redirect) => Ok(Self {
                recipient: rendered.recipient.name,
                to_name: redirect.address.clone(),
                to_address: redirect.address.clone(),
                subject: format!("{} {}", redirect.marker, rendered.subject),
                html: rendered.html,
            }),
            None if rendered.recipient.email.trim().is_empty() => {
                Err(DeliveryError::InvalidAddress {
                    address: String::new(),
                    reason: format!("no email address on file for {}", rendered.recipient.name),
                })
            }
            None => Ok(Self {
                to_name: rendered.recipient.name.clone(),
                recipient: rendered.recipient.name,
                to_address: rendered.recipient.email,
                subject: rendered.subject,
                html: rendered.html,
            }),
        }
    }
}

#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), DeliveryError>;
}

/// Sends one report and reports the result instead of propagating it, so a
/// single bad mailbox cannot stop the rest of the run.
pub async fn dispatch(
    transport: &dyn MailTransport,
    rendered: RenderedReport,
    test_override: Option<&TestOverride>,
) -> DeliveryOutcome {
    let recipient = rendered.recipient.name.clone();
    let email = match OutgoingEmail::addressed(rendered, test_override) {
        Ok(email) => email,
        Err(err) => {
            return DeliveryOutcome {
                recipient,
                delivered_to: String::new(),
                status: DeliveryStatus::Failed {
                    reason: err.to_string(),
                },
            }
        }
    };
    let status = match transport.send(&email).await {
        Ok(()) => DeliveryStatus::Sent,
        Err(err) => DeliveryStatus::Failed {
            reason: err.to_string(),
        },
    };

    DeliveryOutcome {
        recipient: email.recipient,
        delivered_to: email.to_address,
        status,
    }
}

/// STARTTLS SMTP session shared by every delivery in a run.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(config: &SmtpConfig) -> Result<Self, DeliveryError> {
        let from = Mailbox::new(
            Some(config.from_name.clone()),
            parse_address(config.sender())?,
        );
        let credentials = Credentials::new(config.username.clone(), config.password.clone());

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
            .map_err(|e| DeliveryError::Transport(format!("SMTP relay {}: {e}", config.host)))?
            .port(config.port)
            .credentials(credentials)
            .timeout(Some(Duration::from_secs(config.timeout_secs)))
            .build();

        Ok(Self { transport, from })
    }
}

#[async_trait]
impl MailTransport for SmtpMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), DeliveryError> {
        let to = Mailbox::new(Some(email.to_name.clone()), parse_address(&email.to_address)?);

        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(email.subject.clone())
            .multipart(MultiPart::alternative_plain_html(
                PLAIN_FALLBACK.to_string(),
                email.html.clone(),
            ))
            .map_err(|e| DeliveryError::Build(e.to_string()))?;

        self.transport
            .send(message)
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;

        tracing::debug!(to = %email.to_address, "smtp accepted message");
        Ok(())
    }
}

/// Writes each message to disk instead of sending it. Recipients whose names
/// reduce to the same slug get numbered files (`jane-smith-2.html`).
pub struct PreviewMailer {
    dir: PathBuf,
    claimed: Mutex<HashMap<String, usize>>,
}

impl PreviewMailer {
    pub fn new(dir: &Path) -> Result<Self, DeliveryError> {
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            claimed: Mutex::new(HashMap::new()),
        })
    }

    fn claim_path(&self, email: &OutgoingEmail) -> PathBuf {
        let base = slug(&email.recipient);
        let mut claimed = self
            .claimed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let seen = claimed.entry(base.clone()).or_insert(0);
        *seen += 1;
        let name = match *seen {
            1 => format!("{base}.html"),
            n => format!("{base}-{n}.html"),
        };
        self.dir.join(name)
    }
}

#[async_trait]
impl MailTransport for PreviewMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), DeliveryError> {
        parse_address(&email.to_address)?;
        let path = self.claim_path(email);
        let document = format!(
            "<!-- To: {} <{}> -->\n<!-- Subject: {} -->\n{}",
            email.to_name, email.to_address, email.subject, email.html
        );
        tokio::fs::write(&path, document).await?;
        tracing::debug!(path = %path.display(), "wrote preview");
        Ok(())
    }
}

fn parse_address(raw: &str) -> Result<Address, DeliveryError> {
    raw.trim()
        .parse::<Address>()
        .map_err(|e| DeliveryError::InvalidAddress {
            address: raw.to_string(),
            reason: e.to_string(),
        })
}

fn slug(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for ch in name.trim().chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let slug = slug.trim_matches('-').to_string();
    if slug.is_empty() {
        "recipient".to_string()
    } else {
        slug
    }
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingTransport;
    use super::*;
    use crate::models::Recipient;

    fn rendered(name: &str, email: &str) -> RenderedReport {
        RenderedReport {
            recipient: Recipient {
                name: name.to_string(),
                email: email.to_string(),
            },
            subject: "Your Weekly Feedback Summary - Week of Oct 5, 2026".to_string(),
            html: "<p>report</p>".to_string(),
        }
    }

    fn test_override() -> TestOverride {
        TestOverride {
            address: "qa@example.com".to_string(),
            marker: "[TEST]".to_string(),
        }
    }

    #[tokio::test]
    async fn production_sends_to_the_recipient() {
        let transport = RecordingTransport::default();
        let outcome = dispatch(&transport, rendered("Jane Smith", "jane@example.com"), None).await;

        assert!(outcome.is_sent());
        assert_eq!(outcome.delivered_to, "jane@example.com");
        let sent = transport.sent();
        assert_eq!(sent[0].to_name, "Jane Smith");
        assert!(!sent[0].subject.starts_with("[TEST]"));
    }

    #[tokio::test]
    async fn override_redirects_and_marks_every_report() {
        let transport = RecordingTransport::default();
        let redirect = test_override();
        for (name, email) in [("Jane Smith", "jane@example.com"), ("Bob Lee", "bob@example.com")] {
            dispatch(&transport, rendered(name, email), Some(&redirect)).await;
        }

        let sent = transport.sent();
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().all(|e| e.to_address == "qa@example.com"));
        assert!(sent.iter().all(|e| e.subject.starts_with("[TEST] ")));
        assert_eq!(sent[1].recipient, "Bob Lee");
    }

    #[tokio::test]
    async fn transport_failure_becomes_a_failed_outcome() {
        let transport = RecordingTransport::rejecting(&["bob@example.com"]);
        let outcome = dispatch(&transport, rendered("Bob Lee", "bob@example.com"), None).await;

        assert_eq!(outcome.recipient, "Bob Lee");
        match outcome.status {
            DeliveryStatus::Failed { reason } => assert!(reason.contains("550")),
            DeliveryStatus::Sent => panic!("expected a failure"),
        }
    }

    #[tokio::test]
    async fn preview_writes_one_file_per_recipient() {
        let dir = tempfile::tempdir().unwrap();
        let mailer = PreviewMailer::new(dir.path()).unwrap();
        let outcome = dispatch(
            &mailer,
            rendered("Jane Smith", "jane@example.com"),
            Some(&test_override()),
        )
        .await;
        assert!(outcome.is_sent());

        let written = std::fs::read_to_string(dir.path().join("jane-smith.html")).unwrap();
        assert!(written.contains("Subject: [TEST] Your Weekly Feedback Summary"));
        assert!(written.contains("<p>report</p>"));
    }

    #[tokio::test]
    async fn preview_keeps_colliding_names_apart() {
        let dir = tempfile::tempdir().unwrap();
        let mailer = PreviewMailer::new(dir.path()).unwrap();
        dispatch(&mailer, rendered("Jane Smith", "jane@example.com"), None).await;
        let outcome = dispatch(&mailer, rendered("Jane-Smith", "jsmith@example.com"), None).await;
        assert!(outcome.is_sent());

        let first = std::fs::read_to_string(dir.path().join("jane-smith.html")).unwrap();
        let second = std::fs::read_to_string(dir.path().join("jane-smith-2.html")).unwrap();
        assert!(first.contains("jane@example.com"));
        assert!(second.contains("jsmith@example.com"));
    }

    #[tokio::test]
    async fn missing_address_fails_only_without_an_override() {
        let transport = RecordingTransport::default();
        let outcome = dispatch(&transport, rendered("Jane Smith", ""), None).await;
        assert_eq!(outcome.recipient, "Jane Smith");
        match &outcome.status {
            DeliveryStatus::Failed { reason } => assert!(reason.starts_with("invalid address")),
            DeliveryStatus::Sent => panic!("expected a failure"),
        }
        assert!(transport.sent().is_empty());

        let outcome = dispatch(&transport, rendered("Jane Smith", ""), Some(&test_override())).await;
        assert!(outcome.is_sent());
        assert_eq!(transport.sent()[0].to_address, "qa@example.com");
    }

    #[tokio::test]
    async fn preview_rejects_malformed_addresses() {
        let dir = tempfile::tempdir().unwrap();
        let mailer = PreviewMailer::new(dir.path()).unwrap();
        let outcome = dispatch(&mailer, rendered("Jane Smith", "not-an-address"), None).await;
        assert!(!outcome.is_sent());
    }

    #[test]
    fn slugs_are_filesystem_safe() {
        assert_eq!(slug("Jane  Smith"), "jane-smith");
        assert_eq!(slug("O'Neil, Pat"), "o-neil-pat");
        assert_eq!(slug("***"), "recipient");
    }
}
