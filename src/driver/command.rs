//! Outbound command path: rumble and LED frames to the controller.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::driver::report::{led_command, rumble_command, LedPattern};
use crate::usb::pipe::{InterruptPipe, UsbError};

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("Invalid command: {0}")]
    InvalidArgument(String),
}

/// Writer for the outbound interrupt channel.
///
/// Every call submits exactly one asynchronous write and returns once the
/// submission is made; the completion is observed in the background and only
/// logged. Overlapping calls are submitted independently, ordering on the
/// wire is the caller's concern. Commands are best-effort: a failed write is
/// not retried.
pub struct CommandWriter {
    pipe: Option<Arc<dyn InterruptPipe>>,
}

impl CommandWriter {
    pub fn new(pipe: Arc<dyn InterruptPipe>) -> Self {
        Self { pipe: Some(pipe) }
    }

    /// Submits one raw command frame to the controller.
    pub fn send(&self, command: &[u8]) -> Result<(), CommandError> {
        let pipe = self.pipe.as_ref().ok_or_else(|| {
            CommandError::InvalidArgument("outbound channel released".to_string())
        })?;
        if command.is_empty() {
            return Err(CommandError::InvalidArgument(
                "command buffer is empty".to_string(),
            ));
        }

        let pipe = pipe.clone();
        let payload = command.to_vec();
        tokio::spawn(async move {
            match pipe.write(&payload).await {
                Ok(written) => debug!(written, "Command write complete"),
                Err(UsbError::Aborted) => debug!("Command write aborted"),
                Err(err) => warn!(%err, "Command write failed"),
            }
        });

        Ok(())
    }

    /// Drives the two rumble motors. Zero for both stops the rumble.
    pub fn set_rumble(&self, strong: u8, weak: u8) -> Result<(), CommandError> {
        self.send(&rumble_command(strong, weak))
    }

    /// Sets the LED ring pattern.
    pub fn set_led(&self, pattern: LedPattern) -> Result<(), CommandError> {
        self.send(&led_command(pattern))
    }

    /// Aborts any pending write and drops the channel. Subsequent sends
    /// fail with `InvalidArgument`.
    pub(crate) fn release(&mut self) {
        if let Some(pipe) = self.pipe.take() {
            pipe.abort();
        }
    }
}
