//! Outbound email transport (SMTP).
//!
//! # Responsibilities
//! - Greet the SMTP server once at initialize (`220`, `EHLO`, `QUIT`)
//! - Deliver messages in their own SMTP session, retrying with backoff
//! - Describe every send attempt as an [`EmailAudit`] row
//!
//! # Design Decisions
//! - `send` never fails: a message that could not be delivered is audited
//!   as `failed` with the last SMTP error
//! - Dry-run and disabled modes skip SMTP entirely

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use crate::config::EmailConfig;
use crate::lifecycle::{ManagedService, Readiness, ServiceError};
use crate::observability::metrics;
use crate::resilience::backoff::Backoff;

pub const SERVICE_NAME: &str = "email";

/// Analytics table receiving [`EmailAudit`] rows.
pub const AUDIT_TABLE: &str = "email_audit";

const EHLO_DOMAIN: &str = "imbi";
const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum EmailError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SMTP session timed out after {0}s")]
    Timeout(u64),

    #[error("expected SMTP {expected} reply, got '{line}'")]
    UnexpectedReply { expected: u16, line: String },

    #[error("invalid email address '{0}'")]
    InvalidAddress(String),
}

/// A rendered message ready for delivery.
#[derive(Debug, Clone, Default)]
pub struct EmailMessage {
    pub to_email: String,
    pub subject: String,
    /// Name of the template the bodies were rendered from.
    pub template: String,
    pub text_body: Option<String>,
    pub html_body: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailStatus {
    Sent,
    Failed,
    Skipped,
    DryRun,
}

impl EmailStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmailStatus::Sent => "sent",
            EmailStatus::Failed => "failed",
            EmailStatus::Skipped => "skipped",
            EmailStatus::DryRun => "dry_run",
        }
    }
}

/// One row of the `email_audit` table.
#[derive(Debug, Clone, Serialize)]
pub struct EmailAudit {
    pub to_email: String,
    pub subject: String,
    pub template: String,
    pub status: EmailStatus,
    pub error: Option<String>,
}

impl EmailAudit {
    fn new(message: &EmailMessage, status: EmailStatus, error: Option<String>) -> Self {
        metrics::record_email(status.as_str());
        Self {
            to_email: message.to_email.clone(),
            subject: message.subject.clone(),
            template: message.template.clone(),
            status,
            error,
        }
    }
}

/// A bare address such as `ops@example.com`, safe to place in headers and envelopes.
pub fn is_plain_address(address: &str) -> bool {
    let Some((local, domain)) = address.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.is_empty()
        && !domain.contains('@')
        && address
            .chars()
            .all(|c| !c.is_whitespace() && !c.is_control() && !matches!(c, '<' | '>' | ',' | ';'))
}

/// Render headers and body with CRLF line endings and leading dots stuffed.
fn render_message(config: &EmailConfig, message: &EmailMessage, boundary: &str) -> String {
    let mut out = String::new();
    out.push_str(&format!("From: {} <{}>\n", header_text(&config.from_name), config.from_email));
    out.push_str(&format!("To: {}\n", message.to_email));
    out.push_str(&format!("Subject: {}\n", header_text(&message.subject)));
    if let Some(reply_to) = &config.reply_to {
        out.push_str(&format!("Reply-To: {}\n", reply_to));
    }
    out.push_str("MIME-Version: 1.0\n");

    match (&message.text_body, &message.html_body) {
        (Some(text), Some(html)) => {
            out.push_str(&format!(
                "Content-Type: multipart/alternative; boundary=\"{}\"\n\n",
                boundary
            ));
            for (subtype, body) in [("plain", text), ("html", html)] {
                out.push_str(&format!("--{}\n", boundary));
                out.push_str(&format!("Content-Type: text/{}; charset=utf-8\n", subtype));
                out.push_str("Content-Transfer-Encoding: 8bit\n\n");
                out.push_str(body);
                out.push('\n');
            }
            out.push_str(&format!("--{}--\n", boundary));
        }
        (text, html) => {
            let (subtype, body) = match (text, html) {
                (None, Some(html)) => ("html", html.as_str()),
                (text, _) => ("plain", text.as_deref().unwrap_or_default()),
            };
            out.push_str(&format!("Content-Type: text/{}; charset=utf-8\n", subtype));
            out.push_str("Content-Transfer-Encoding: 8bit\n\n");
            out.push_str(body);
            out.push('\n');
        }
    }

    out.replace("\r\n", "\n")
        .split('\n')
        .map(|line| if line.starts_with('.') { format!(".{}", line) } else { line.to_string() })
        .collect::<Vec<_>>()
        .join("\r\n")
}

fn header_text(value: &str) -> String {
    value.replace(['\r', '\n'], " ")
}

/// An SMTP session past the greeting and `EHLO`.
struct Session {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Session {
    async fn open(host: &str, port: u16) -> Result<Self, EmailError> {
        let stream = TcpStream::connect((host, port)).await?;
        let (reader, writer) = stream.into_split();
        let mut session = Self {
            reader: BufReader::new(reader),
            writer,
        };

        expect_reply(&mut session.reader, 220).await?;
        session.command(&format!("EHLO {}", EHLO_DOMAIN), 250).await?;
        Ok(session)
    }

    async fn command(&mut self, line: &str, expected: u16) -> Result<(), EmailError> {
        self.writer.write_all(format!("{}\r\n", line).as_bytes()).await?;
        expect_reply(&mut self.reader, expected).await
    }

    async fn quit(mut self) {
        // The server may close before answering QUIT.
        let _ = self.command("QUIT", 221).await;
    }
}

/// Read one (possibly multi-line) SMTP reply and check its code.
async fn expect_reply<R>(reader: &mut R, expected: u16) -> Result<(), EmailError>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 {
            return Err(EmailError::UnexpectedReply {
                expected,
                line: "<connection closed>".to_string(),
            });
        }
        let line = line.trim_end();

        let code = line.get(..3).and_then(|c| c.parse::<u16>().ok());
        if code != Some(expected) {
            return Err(EmailError::UnexpectedReply {
                expected,
                line: line.to_string(),
            });
        }
        // "250-" continues a multi-line reply; "250 " ends it.
        if line.as_bytes().get(3) != Some(&b'-') {
            return Ok(());
        }
    }
}

/// SMTP transport whose readiness is established by greeting the server.
pub struct EmailTransport {
    config: EmailConfig,
    ready: AtomicBool,
}

impl EmailTransport {
    pub fn new(config: EmailConfig) -> Self {
        Self {
            config,
            ready: AtomicBool::new(false),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Connect, greet and quit within the configured timeout.
    pub async fn check_server(&self) -> Result<(), EmailError> {
        self.with_timeout(async {
            Session::open(&self.config.smtp_host, self.config.smtp_port)
                .await?
                .quit()
                .await;
            Ok::<(), EmailError>(())
        })
        .await
    }

    /// Deliver `message`, retrying transient failures, and describe the outcome.
    pub async fn send(&self, message: &EmailMessage) -> EmailAudit {
        if !self.config.enabled {
            return EmailAudit::new(message, EmailStatus::Skipped, Some("Email disabled".to_string()));
        }
        if self.config.dry_run {
            tracing::info!(
                to = %message.to_email,
                subject = %message.subject,
                "DRY RUN: email not sent"
            );
            return EmailAudit::new(message, EmailStatus::DryRun, Some("Dry run mode".to_string()));
        }

        let attempts = self.config.max_retries.saturating_add(1);
        let mut backoff = Backoff::new(
            Duration::from_millis(self.config.initial_retry_delay_ms),
            MAX_RETRY_DELAY,
        );
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match self.deliver(message).await {
                Ok(()) => {
                    tracing::info!(to = %message.to_email, attempt, "Email sent");
                    return EmailAudit::new(message, EmailStatus::Sent, None);
                }
                Err(e @ EmailError::InvalidAddress(_)) => {
                    tracing::error!(to = %message.to_email, error = %e, "Email rejected");
                    return EmailAudit::new(message, EmailStatus::Failed, Some(e.to_string()));
                }
                Err(e) if attempt < attempts => {
                    let delay = backoff.next_delay();
                    tracing::warn!(
                        to = %message.to_email,
                        attempt,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "Email send failed, retrying"
                    );
                    last_error = e.to_string();
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    tracing::error!(to = %message.to_email, attempts, error = %e, "Email send failed");
                    last_error = e.to_string();
                }
            }
        }

        EmailAudit::new(
            message,
            EmailStatus::Failed,
            Some(format!("SMTP error after {} attempts: {}", attempts, last_error)),
        )
    }

    async fn deliver(&self, message: &EmailMessage) -> Result<(), EmailError> {
        if !is_plain_address(&message.to_email) {
            return Err(EmailError::InvalidAddress(message.to_email.clone()));
        }
        let boundary = format!("imbi-{:016x}", rand::random::<u64>());
        let data = render_message(&self.config, message, &boundary);

        self.with_timeout(async {
            let mut session = Session::open(&self.config.smtp_host, self.config.smtp_port).await?;
            session
                .command(&format!("MAIL FROM:<{}>", self.config.from_email), 250)
                .await?;
            session
                .command(&format!("RCPT TO:<{}>", message.to_email), 250)
                .await?;
            session.command("DATA", 354).await?;
            session.writer.write_all(data.as_bytes()).await?;
            session.command("\r\n.", 250).await?;
            session.quit().await;
            Ok::<(), EmailError>(())
        })
        .await
    }

    async fn with_timeout<F>(&self, session: F) -> Result<(), EmailError>
    where
        F: std::future::Future<Output = Result<(), EmailError>>,
    {
        let timeout = self.config.smtp_timeout_secs;
        tokio::time::timeout(Duration::from_secs(timeout), session)
            .await
            .map_err(|_| EmailError::Timeout(timeout))?
    }
}

#[async_trait]
impl ManagedService for EmailTransport {
    fn name(&self) -> &'static str {
        SERVICE_NAME
    }

    async fn initialize(&self) -> Result<Readiness, ServiceError> {
        if self.is_ready() {
            return Ok(Readiness::Ready);
        }

        if !self.config.enabled {
            tracing::info!("Email sending disabled");
        } else {
            tracing::debug!(
                host = %self.config.smtp_host,
                port = self.config.smtp_port,
                dry_run = self.config.dry_run,
                "Checking SMTP server"
            );
            self.check_server()
                .await
                .map_err(|e| ServiceError::new(SERVICE_NAME, e))?;
            tracing::info!(host = %self.config.smtp_host, "Email client initialized");
        }

        self.ready.store(true, Ordering::SeqCst);
        Ok(Readiness::Ready)
    }

    async fn close(&self) -> Result<(), ServiceError> {
        self.ready.store(false, Ordering::SeqCst);
        tracing::debug!("Email client shut down");
        Ok(())
    }
}
