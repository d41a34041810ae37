//! User-facing messages, shown as desktop notifications when possible.
//!
//! Whether `notify-send` is available is decided once, when the [`Notifier`]
//! is created. Any failure to show a notification falls back to the console,
//! so reporting a message never fails.

use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use log::{debug, warn};

/// Program used to show desktop notifications.
pub const NOTIFY_SEND: &str = "notify-send";

/// Message severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Error,
    /// Reported, then the process exits with a non-zero status.
    Fatal,
}

/// Urgency levels understood by the notification daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Urgency {
    Low,
    Normal,
}

impl Urgency {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
        }
    }
}

impl Severity {
    /// Notification urgency for this severity.
    pub fn urgency(self) -> Urgency {
        match self {
            Self::Info => Urgency::Low,
            Self::Error => Urgency::Normal,
            Self::Fatal => Urgency::Normal,
        }
    }
}

/// A message for the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub severity: Severity,
    pub text: String,
}

impl Message {
    pub fn new(severity: Severity, text: impl Into<String>) -> Self {
        Self {
            severity,
            text: text.into(),
        }
    }

    pub fn info(text: impl Into<String>) -> Self {
        Self::new(Severity::Info, text)
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self::new(Severity::Error, text)
    }

    pub fn fatal(text: impl Into<String>) -> Self {
        Self::new(Severity::Fatal, text)
    }
}

/// Where a message ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Desktop,
    Console,
}

/// Shows messages to the user.
#[derive(Debug, Clone)]
pub struct Notifier {
    app_name: String,
    notify_send: Option<PathBuf>,
}

impl Notifier {
    /// Creates a notifier, using desktop notifications if `notify-send` is
    /// installed.
    pub fn detect(app_name: impl Into<String>) -> Self {
        let notify_send = which::which(NOTIFY_SEND).ok();
        if notify_send.is_none() {
            debug!("{} not found, messages go to the console", NOTIFY_SEND);
        }
        Self {
            app_name: app_name.into(),
            notify_send,
        }
    }

    /// Creates a notifier that only writes to the console.
    pub fn console(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            notify_send: None,
        }
    }

    /// Creates a notifier that uses the given `notify-send` executable.
    pub fn with_notify_send(app_name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            app_name: app_name.into(),
            notify_send: Some(path.into()),
        }
    }

    /// Shows a message and returns where it was shown.
    ///
    /// This does not exit, even for [`Severity::Fatal`]; use [`Notifier::fatal`]
    /// for that.
    pub fn report(&self, message: &Message) -> Delivery {
        if self.notify_desktop(message) {
            return Delivery::Desktop;
        }
        write_console(message);
        Delivery::Console
    }

    /// Reports a fatal message and exits with status 1.
    pub fn fatal(&self, text: impl Into<String>) -> ! {
        self.report(&Message::fatal(text));
        std::process::exit(1);
    }

    fn notify_desktop(&self, message: &Message) -> bool {
        let Some(notify_send) = &self.notify_send else {
            return false;
        };

        let status = Command::new(notify_send)
            .args([
                "--app-name",
                self.app_name.as_str(),
                "--urgency",
                message.severity.urgency().as_str(),
                self.app_name.as_str(),
                message.text.as_str(),
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();

        match status {
            Ok(status) if status.success() => true,
            Ok(status) => {
                debug!("{} exited with {}", notify_send.display(), status);
                false
            }
            Err(e) => {
                warn!("Failed to run {}: {}", notify_send.display(), e);
                false
            }
        }
    }
}

/// Info goes to stdout, everything else to stderr.
fn write_console(message: &Message) {
    // A closed stream must not turn a report into a panic.
    let _ = match message.severity {
        Severity::Info => writeln!(std::io::stdout().lock(), "{}", message.text),
        Severity::Error | Severity::Fatal => {
            writeln!(std::io::stderr().lock(), "{}", message.text)
        }
    };
}
