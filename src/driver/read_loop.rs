//! Inbound read loop with compile-time state safety.
//!
//! Owns the inbound interrupt channel and keeps exactly one read in flight:
//! submit, wait for the completion, decode, hand the encoded report to the
//! sink, resubmit. Failed completions are retried under a configurable
//! backoff policy; a deliberate abort ends the loop cleanly.

use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use serde::{Deserialize, Serialize};
use statum::{machine, state};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::driver::report::{
    decode_input_report, encode_hid_report, DecodedReport, HidReport, INPUT_REPORT_LEN,
};
use crate::usb::pipe::{InterruptPipe, UsbError};

/// Retry policy for failed read completions.
///
/// The delay grows exponentially from `initial_backoff_ms` up to
/// `max_backoff_ms` and resets after every successful completion.
/// `max_attempts` bounds consecutive failures before the loop gives up and
/// surfaces a fatal error; `None` keeps retrying indefinitely. Zero backoff
/// together with `max_attempts = None` yields immediate unconditional
/// resubmission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 5,
            max_backoff_ms: 1000,
            max_attempts: None,
        }
    }
}

impl RetryPolicy {
    /// Backoff delay after the given consecutive failure count (1-based).
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let delay = self
            .initial_backoff_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_backoff_ms);
        Duration::from_millis(delay)
    }

    /// True once the consecutive failure count reaches the configured
    /// ceiling.
    pub fn exhausted(&self, attempts: u32) -> bool {
        self.max_attempts
            .map(|limit| attempts >= limit)
            .unwrap_or(false)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReadLoopError {
    #[error("Inbound channel failed after {attempts} read attempts: {last_error}")]
    ChannelFailed { attempts: u32, last_error: UsbError },
}

// Read loop lifecycle states
#[state]
#[derive(Debug, Clone)]
pub enum ReadLoopState {
    Idle,
    Reading,
    Stopped,
}

#[machine]
pub struct ReadLoop<S: ReadLoopState> {
    // Inbound interrupt channel, read-only after classification
    pipe: Arc<dyn InterruptPipe>,

    // Sink for finished HID reports
    report_sender: mpsc::Sender<HidReport>,

    // Policy for failed completions
    retry: RetryPolicy,
}

impl ReadLoop<Idle> {
    pub fn create(
        pipe: Arc<dyn InterruptPipe>,
        report_sender: mpsc::Sender<HidReport>,
        retry: RetryPolicy,
    ) -> Self {
        debug!("Creating read loop with retry policy: {:?}", retry);
        Self::new(pipe, report_sender, retry)
    }

    pub fn start(self) -> ReadLoop<Reading> {
        info!("Read loop starting");
        self.transition()
    }
}

impl ReadLoop<Reading> {
    /// Main completion loop with graceful shutdown support.
    ///
    /// Runs until the shutdown signal arrives or the pending read completes
    /// as aborted. Every completed read is immediately followed by a fresh
    /// submission, so at most one read is outstanding at any instant.
    pub async fn run_until_shutdown(
        self,
        mut shutdown_rx: oneshot::Receiver<()>,
    ) -> Result<ReadLoop<Stopped>, ReadLoopError> {
        info!("Read loop entering steady state");

        let mut failed_attempts: u32 = 0;

        // Throughput stats, logged periodically
        let mut decoded_frames: u64 = 0;
        let mut ignored_frames: u64 = 0;
        let mut last_stats_time = Local::now();
        let stats_interval = chrono::Duration::seconds(10);

        loop {
            // Fresh buffer per submission; completions never share storage.
            let mut buffer = vec![0u8; INPUT_REPORT_LEN];

            tokio::select! {
                _ = &mut shutdown_rx => {
                    info!("Shutdown signal received, stopping read loop");
                    break;
                }

                completion = self.pipe.read(&mut buffer) => match completion {
                    Ok(len) => {
                        failed_attempts = 0;
                        match decode_input_report(&buffer[..len]) {
                            Ok(DecodedReport::Gamepad(state)) => {
                                let report = encode_hid_report(&state);
                                match self.report_sender.try_send(report) {
                                    Ok(()) => decoded_frames += 1,
                                    Err(mpsc::error::TrySendError::Full(_)) => {
                                        warn!("Report sink full, dropping frame");
                                    }
                                    Err(mpsc::error::TrySendError::Closed(_)) => {
                                        info!("Report sink closed, stopping read loop");
                                        break;
                                    }
                                }
                            }
                            Ok(DecodedReport::Ignored) => {
                                ignored_frames += 1;
                                debug!("Non-gamepad frame ignored");
                            }
                            Err(err) => {
                                ignored_frames += 1;
                                debug!(%err, "Dropping malformed frame");
                            }
                        }
                    }
                    Err(UsbError::Aborted) => {
                        info!("Pending read aborted, stopping read loop");
                        break;
                    }
                    Err(err) => {
                        failed_attempts += 1;
                        if self.retry.exhausted(failed_attempts) {
                            error!(
                                %err,
                                attempts = failed_attempts,
                                "Inbound channel failing persistently, giving up"
                            );
                            return Err(ReadLoopError::ChannelFailed {
                                attempts: failed_attempts,
                                last_error: err,
                            });
                        }
                        let backoff = self.retry.backoff_after(failed_attempts);
                        warn!(
                            %err,
                            attempt = failed_attempts,
                            backoff_ms = backoff.as_millis() as u64,
                            "Read completion failed, resubmitting"
                        );
                        if !backoff.is_zero() {
                            tokio::time::sleep(backoff).await;
                        }
                    }
                }
            }

            let now = Local::now();
            if now - last_stats_time > stats_interval {
                info!(
                    decoded = decoded_frames,
                    ignored = ignored_frames,
                    "Read loop stats for the last {}s",
                    stats_interval.num_seconds()
                );
                decoded_frames = 0;
                ignored_frames = 0;
                last_stats_time = now;
            }
        }

        info!("Read loop stopped");
        // In den Stopped-Zustand wechseln
        Ok(self.transition())
    }
}

impl ReadLoop<Stopped> {}
