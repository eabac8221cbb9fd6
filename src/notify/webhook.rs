//! HTTP webhook transport: POSTs the alert as JSON.

use std::time::Duration;

use anyhow::{anyhow, Result};

use super::Notifier;
use crate::alert::Alert;

pub struct WebhookNotifier {
    url: String,
    agent: ureq::Agent,
}

impl WebhookNotifier {
    pub fn new(url: &str, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self {
            url: url.to_string(),
            agent,
        }
    }
}

impl Notifier for WebhookNotifier {
    fn name(&self) -> &'static str {
        "webhook"
    }

    fn notify(&mut self, alert: &Alert) -> Result<()> {
        match self.agent.post(&self.url).send_json(alert) {
            Ok(_) => Ok(()),
            Err(ureq::Error::Status(code, _)) => {
                Err(anyhow!("webhook {} rejected alert with HTTP {}", self.url, code))
            }
            Err(err) => Err(anyhow!("webhook {} unreachable: {}", self.url, err)),
        }
    }
}
