//! Write confirmation.
//!
//! The remote API may acknowledge a write before readers can see it. The
//! monitor runs the write in the background and polls the stored content
//! hash until it matches the hash computed when the body was built.
//!
//! ```text
//!  Pending ── write ok / tick ──→ AwaitingConfirmation ── hash match ──→ Confirmed
//!     │                                   │
//!     ├── write error ──→ Failed          ├── check error ──→ Failed
//!     └── deadline ─────→ DeadlineExceeded ←── deadline ──────┘
//! ```

use std::future::Future;
use std::time::Duration;
use tessera_core::{
    AccessError, AccessResult, ConfirmConfig, ConsistencyError, ContextError, Diagnostics,
    OpContext,
};
use tokio::time::{interval_at, Instant, MissedTickBehavior};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteState {
    /// Write request in flight
    Pending,
    /// Write returned, or a hash check has run
    AwaitingConfirmation,
    Confirmed,
    /// The write or a hash check failed outright
    Failed,
    /// No matching hash was observed before the deadline
    DeadlineExceeded,
}

impl WriteState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WriteState::Confirmed | WriteState::Failed | WriteState::DeadlineExceeded
        )
    }
}

/// How a confirmation ended.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorReport {
    pub state: WriteState,
    /// Hash checks that saw an older document
    pub mismatches: u32,
    pub checks: u32,
    /// The write call itself returned success
    pub write_accepted: bool,
    pub elapsed: Duration,
    pub error: Option<AccessError>,
}

impl MonitorReport {
    /// Convert to the caller-facing result for the object `object_type/key`.
    ///
    /// Convergence after one or more mismatches is a success with a single
    /// warning. An unconfirmed write is an error whose cause tells a lost
    /// write apart from one that was accepted but never became visible.
    pub fn into_result(self, object_type: &str, key: &str) -> AccessResult<Diagnostics> {
        match self.state {
            WriteState::Confirmed => {
                let mut diagnostics = Diagnostics::new();
                if self.mismatches > 0 {
                    diagnostics.warn(
                        "Write confirmation required retries",
                        format!(
                            "{} {}: content hash matched after {} mismatched checks ({} ms); \
                             the remote API is slow to expose writes",
                            object_type,
                            key,
                            self.mismatches,
                            self.elapsed.as_millis()
                        ),
                    );
                }
                Ok(diagnostics)
            }
            WriteState::DeadlineExceeded if self.write_accepted => {
                Err(ConsistencyError::ConfirmationDeadlineExceeded {
                    object_type: object_type.to_string(),
                    key: key.to_string(),
                    mismatches: self.mismatches,
                }
                .into())
            }
            WriteState::DeadlineExceeded => Err(ContextError::DeadlineExceeded.into()),
            _ => Err(self
                .error
                .unwrap_or(AccessError::Context(ContextError::Cancelled))),
        }
    }
}

/// Drives one write through the confirmation state machine.
#[derive(Debug, Clone)]
pub struct WriteMonitor {
    config: ConfirmConfig,
}

impl WriteMonitor {
    pub fn new(config: ConfirmConfig) -> Self {
        Self { config }
    }

    /// Run `write` on a background task and poll `check` until it reports a
    /// matching hash, the write fails, or the deadline passes.
    ///
    /// `check` returns `Ok(true)` when the stored hash matches. Both closures
    /// receive a context bounded by the confirmation deadline. Cancelling
    /// `ctx` stops monitoring with [`ContextError::Cancelled`].
    pub async fn run<W, WF, C, CF>(&self, ctx: &OpContext, write: W, check: C) -> MonitorReport
    where
        W: FnOnce(OpContext) -> WF,
        WF: Future<Output = AccessResult<()>> + Send + 'static,
        C: Fn(OpContext) -> CF,
        CF: Future<Output = AccessResult<bool>>,
    {
        let started = Instant::now();
        let bounded = ctx.child_with_timeout(self.config.deadline);
        let pending_write = write(bounded.child());
        let mut write_task = tokio::spawn(async move {
            let result = pending_write.await;
            // Also reached after confirmation, when nobody awaits the task.
            if let Err(e) = &result {
                tracing::warn!(error = %e, "write request failed");
            }
            result
        });

        let poll = self.config.poll_interval;
        let mut ticker = interval_at(started + poll, poll);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut report = MonitorReport {
            state: WriteState::Pending,
            mismatches: 0,
            checks: 0,
            write_accepted: false,
            elapsed: Duration::ZERO,
            error: None,
        };

        while !report.state.is_terminal() {
            tokio::select! {
                joined = &mut write_task, if !report.write_accepted => {
                    match joined {
                        Ok(Ok(())) => {
                            report.write_accepted = true;
                            tracing::debug!(elapsed_ms = started.elapsed().as_millis() as u64, "write accepted");
                        }
                        Ok(Err(e)) => {
                            self.fail(&mut report, &bounded, e);
                            continue;
                        }
                        Err(join) => {
                            tracing::error!(error = %join, "write task did not complete");
                            self.fail(&mut report, &bounded, ContextError::Cancelled.into());
                            continue;
                        }
                    }
                }
                _ = ticker.tick() => {}
                cause = bounded.done() => {
                    self.expire(&mut report, cause);
                    continue;
                }
            }

            report.state = WriteState::AwaitingConfirmation;
            report.checks += 1;
            match check(bounded.clone()).await {
                Ok(true) => report.state = WriteState::Confirmed,
                Ok(false) => {
                    report.mismatches += 1;
                    tracing::warn!(
                        mismatches = report.mismatches,
                        write_accepted = report.write_accepted,
                        "content hash does not match yet"
                    );
                }
                Err(e) => self.fail(&mut report, &bounded, e),
            }
        }

        // A confirmed write may still be waiting on its response; let it finish.
        if report.state != WriteState::Confirmed {
            write_task.abort();
        }
        report.elapsed = started.elapsed();
        tracing::debug!(
            state = ?report.state,
            checks = report.checks,
            mismatches = report.mismatches,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "write confirmation finished"
        );
        report
    }

    /// An error from the write or a check, unless the context ran out first.
    fn fail(&self, report: &mut MonitorReport, bounded: &OpContext, error: AccessError) {
        match (&error, bounded.err()) {
            (AccessError::Context(_), Some(cause)) => self.expire(report, cause),
            _ => {
                report.state = WriteState::Failed;
                report.error = Some(error);
            }
        }
    }

    fn expire(&self, report: &mut MonitorReport, cause: ContextError) {
        match cause {
            ContextError::DeadlineExceeded => {
                tracing::warn!(
                    write_accepted = report.write_accepted,
                    mismatches = report.mismatches,
                    "write not confirmed before the deadline"
                );
                report.state = WriteState::DeadlineExceeded;
            }
            ContextError::Cancelled => {
                report.state = WriteState::Failed;
                report.error = Some(cause.into());
            }
        }
    }
}
