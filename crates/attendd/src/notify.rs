//! Best-effort owner notifications.
//!
//! Flows hand a message to [`NotificationDispatcher::notify`] and move on.
//! A background task delivers it, by mail when a relay is configured and to
//! the notification log otherwise. Delivery failures are logged and written
//! to the fallback log, never reported to the request that caused them.

use attend_core::{Config, SmtpSettings};
use chrono::{DateTime, Local};
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("notification log: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid mail address: {0}")]
    Address(#[from] lettre::address::AddressError),
    #[error("mail build failed: {0}")]
    Message(#[from] lettre::error::Error),
    #[error("smtp: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
}

pub const MAIL_SUBJECT: &str = "Attendance System - Notification";

#[derive(Debug, Clone)]
pub struct Notification {
    pub at: DateTime<Local>,
    pub text: String,
}

impl Notification {
    pub fn now(text: impl Into<String>) -> Self {
        Self {
            at: Local::now(),
            text: text.into(),
        }
    }

    /// `<iso timestamp> - <text>`, the form used in both mail bodies and the log.
    pub fn line(&self) -> String {
        format!("{} - {}", self.at.to_rfc3339(), self.text)
    }
}

/// A delivery channel for owner notifications.
#[trait_variant::make(Notifier: Send)]
pub trait LocalNotifier {
    async fn deliver(&self, note: &Notification) -> Result<(), NotifyError>;
}

/// Appends one line per notification to a plain text file.
pub struct FileNotifier {
    path: PathBuf,
    recipient: Option<String>,
}

impl FileNotifier {
    pub fn new(path: impl Into<PathBuf>, recipient: Option<String>) -> Self {
        Self {
            path: path.into(),
            recipient,
        }
    }
}

impl Notifier for FileNotifier {
    async fn deliver(&self, note: &Notification) -> Result<(), NotifyError> {
        let line = match &self.recipient {
            Some(to) => format!("{} [owner: {to}]\n", note.line()),
            None => format!("{}\n", note.line()),
        };
        append_line(&self.path, &line).await?;
        Ok(())
    }
}

/// Mails each notification to the owner through an SMTP relay.
///
/// Port 465 uses implicit TLS; any other port upgrades with STARTTLS.
pub struct SmtpNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Mailbox,
}

impl SmtpNotifier {
    pub fn new(smtp: &SmtpSettings, recipient: &str) -> Result<Self, NotifyError> {
        let builder = if smtp.implicit_tls() {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&smtp.host)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&smtp.host)?
        };
        let transport = builder
            .port(smtp.port)
            .credentials(Credentials::new(smtp.user.clone(), smtp.password.clone()))
            .build();
        Ok(Self {
            transport,
            from: smtp.user.parse()?,
            to: recipient.parse()?,
        })
    }

    fn message(&self, note: &Notification) -> Result<Message, NotifyError> {
        Ok(Message::builder()
            .from(self.from.clone())
            .to(self.to.clone())
            .subject(MAIL_SUBJECT)
            .body(format!("{}\n", note.line()))?)
    }
}

impl Notifier for SmtpNotifier {
    async fn deliver(&self, note: &Notification) -> Result<(), NotifyError> {
        let message = self.message(note)?;
        self.transport.send(message).await?;
        tracing::debug!(to = %self.to, "owner notification mailed");
        Ok(())
    }
}

/// The delivery channel chosen from configuration.
pub enum OwnerNotifier {
    Mail(SmtpNotifier),
    Log(FileNotifier),
}

impl OwnerNotifier {
    /// Mail when both a relay and an owner address are configured, the
    /// notification log otherwise.
    pub fn from_config(config: &Config) -> Result<Self, NotifyError> {
        match config.mail_route() {
            Some((smtp, to)) => {
                tracing::info!(host = %smtp.host, port = smtp.port, to, "owner notifications by mail");
                Ok(Self::Mail(SmtpNotifier::new(smtp, to)?))
            }
            None => {
                tracing::info!(path = %config.notify_log.display(), "owner notifications to log file");
                Ok(Self::Log(FileNotifier::new(
                    &config.notify_log,
                    config.owner_email.clone(),
                )))
            }
        }
    }
}

impl Notifier for OwnerNotifier {
    async fn deliver(&self, note: &Notification) -> Result<(), NotifyError> {
        match self {
            Self::Mail(n) => Notifier::deliver(n, note).await,
            Self::Log(n) => Notifier::deliver(n, note).await,
        }
    }
}

async fn append_line(path: &Path, line: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(line.as_bytes()).await?;
    file.flush().await
}

/// Clone-safe, non-blocking handle to the notification task.
#[derive(Clone)]
pub struct NotificationDispatcher {
    tx: mpsc::UnboundedSender<Notification>,
}

impl NotificationDispatcher {
    /// Start the delivery task. It drains the queue and exits once every
    /// dispatcher clone has been dropped; await the handle to flush.
    pub fn spawn<N>(notifier: N, fallback_log: Option<PathBuf>) -> (Self, JoinHandle<()>)
    where
        N: Notifier + Send + Sync + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<Notification>();

        let worker = tokio::spawn(async move {
            while let Some(note) = rx.recv().await {
                if let Err(e) = notifier.deliver(&note).await {
                    tracing::warn!(error = %e, text = %note.text, "owner notification failed");
                    if let Some(path) = &fallback_log {
                        let line = format!(
                            "{} - NOTIFICATION ERROR: {e}\n",
                            Local::now().to_rfc3339()
                        );
                        if let Err(io) = append_line(path, &line).await {
                            tracing::error!(error = %io, path = %path.display(), "fallback log write failed");
                        }
                    }
                }
            }
            tracing::debug!("notification task exiting");
        });

        (Self { tx }, worker)
    }

    /// Queue a notification. Never blocks and never fails the caller.
    pub fn notify(&self, text: impl Into<String>) {
        let note = Notification::now(text);
        if self.tx.send(note).is_err() {
            tracing::warn!("notification task is gone; message dropped");
        }
    }
}
