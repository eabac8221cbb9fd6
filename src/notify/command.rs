//! External-command transport.
//!
//! Runs a program once per alert, e.g. a mail or SMS script. The context
//! identifier is appended as the last argument and every alert field is
//! exported as a `DWELL_*` environment variable.

use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};

use super::Notifier;
use crate::alert::Alert;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Clone, Debug)]
pub struct CommandNotifier {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandNotifier {
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
            args: Vec::new(),
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn command(&self, alert: &Alert) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg(&alert.context)
            .env("DWELL_CONTEXT", &alert.context)
            .env("DWELL_LABEL", &alert.label)
            .env("DWELL_OCCUPANCY", alert.occupancy.to_string())
            .env("DWELL_DWELL_MS", alert.dwell_ms.to_string())
            .env("DWELL_ORDINAL", alert.ordinal.to_string())
            .env("DWELL_RAISED_AT", alert.raised_at_epoch_s.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit());
        cmd
    }
}

impl Notifier for CommandNotifier {
    fn name(&self) -> &'static str {
        "command"
    }

    fn notify(&mut self, alert: &Alert) -> Result<()> {
        let mut child = self
            .command(alert)
            .spawn()
            .with_context(|| format!("failed to start alert command '{}'", self.program))?;

        // A timeout too large to represent as an instant never expires.
        let deadline = Instant::now().checked_add(self.timeout);
        loop {
            if let Some(status) = child.try_wait().context("wait for alert command")? {
                if status.success() {
                    return Ok(());
                }
                return Err(anyhow!("alert command '{}' exited with {}", self.program, status));
            }
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                if let Err(err) = child.kill() {
                    log::debug!("failed to kill alert command: {}", err);
                }
                // Reap; the exit status is irrelevant after a kill.
                let _ = child.wait();
                return Err(anyhow!(
                    "alert command '{}' timed out after {:?}",
                    self.program,
                    self.timeout
                ));
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }
}
