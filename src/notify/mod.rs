//! Alert delivery.
//!
//! `Notifier` is the transport seam: one `notify` call per fired alert,
//! executed on the dispatcher's worker thread so a slow transport never
//! stalls frame processing. Failures are reported, not retried.

mod command;
mod dispatcher;
#[cfg(feature = "notify-webhook")]
mod webhook;

use anyhow::{anyhow, Result};

pub use command::CommandNotifier;
pub use dispatcher::{DispatchStats, NotificationDispatcher, DISPATCH_QUEUE_DEPTH};
#[cfg(feature = "notify-webhook")]
pub use webhook::WebhookNotifier;

use crate::alert::Alert;
use crate::config::{NotifierKind, NotifierSettings};

pub trait Notifier: Send {
    fn name(&self) -> &'static str;

    fn notify(&mut self, alert: &Alert) -> Result<()>;
}

/// Writes alerts to the log. Default transport for dry runs.
#[derive(Debug, Default)]
pub struct LogNotifier {
    sent: u64,
}

impl LogNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> u64 {
        self.sent
    }
}

impl Notifier for LogNotifier {
    fn name(&self) -> &'static str {
        "log"
    }

    fn notify(&mut self, alert: &Alert) -> Result<()> {
        self.sent += 1;
        log::warn!(
            "ALERT [{}] {} {} in zone for {:.1}s (alert #{} this episode)",
            alert.context,
            alert.occupancy,
            alert.label,
            alert.dwell().as_secs_f64(),
            alert.ordinal
        );
        Ok(())
    }
}

/// Build the configured transport.
pub fn open_notifier(settings: &NotifierSettings) -> Result<Box<dyn Notifier>> {
    match settings.kind {
        NotifierKind::Log => Ok(Box::new(LogNotifier::new())),
        NotifierKind::Command => {
            let program = settings
                .command
                .as_deref()
                .ok_or_else(|| anyhow!("command notifier requires notifier.command"))?;
            Ok(Box::new(
                CommandNotifier::new(program)
                    .with_args(settings.args.clone())
                    .with_timeout(settings.timeout),
            ))
        }
        NotifierKind::Webhook => open_webhook(settings),
    }
}

#[cfg(feature = "notify-webhook")]
fn open_webhook(settings: &NotifierSettings) -> Result<Box<dyn Notifier>> {
    let url = settings
        .webhook_url
        .as_deref()
        .ok_or_else(|| anyhow!("webhook notifier requires notifier.webhook_url"))?;
    Ok(Box::new(WebhookNotifier::new(url, settings.timeout)))
}

#[cfg(not(feature = "notify-webhook"))]
fn open_webhook(_settings: &NotifierSettings) -> Result<Box<dyn Notifier>> {
    Err(anyhow!("webhook notifier requires the notify-webhook feature"))
}
