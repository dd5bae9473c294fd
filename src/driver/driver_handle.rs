//! Driver Handle - Unified API for one attached controller
//!
//! Orchestrates the driver lifecycle: open the device interface, classify
//! its endpoints into the inbound/outbound channel pair, run the read loop
//! in a background task and expose the outbound command path. One handle
//! owns exactly one attachment; dropping or stopping it releases every
//! claimed resource.

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub use super::command::{CommandError, CommandWriter};
pub use super::read_loop::{ReadLoopError, RetryPolicy};
pub use super::report::{HidReport, LedPattern};

use std::sync::Arc;

use crate::config::BridgeConfig;
use crate::driver::read_loop::ReadLoop;
use crate::usb::endpoints::{classify_endpoints, EndpointError, UsbInterface};
use crate::usb::pipe::{open_device, InterruptPipe, UsbError};

/// Errors surfaced across the driver boundary.
///
/// Only startup problems reach the caller; steady-state read failures are
/// absorbed by the retry policy and command failures are logged only.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("USB error: {0}")]
    Usb(#[from] UsbError),

    #[error("Endpoint error: {0}")]
    Endpoint(#[from] EndpointError),

    #[error("Read loop error: {0}")]
    ReadLoop(#[from] ReadLoopError),

    #[error("Driver task failed: {0}")]
    TaskFailed(String),
}

/// Handle for one attached controller.
///
/// # Lifecycle
///
/// ```text
/// start ──► classify endpoints ──► read loop task ──► Running
///                                                       │
/// stop  ◄── close interface ◄── release outbound ◄── abort read
/// ```
///
/// Any failure during start aborts the whole sequence; no partially started
/// driver is ever returned. `stop` tears down in reverse order, checks every
/// resource for presence first and is safe to call repeatedly.
pub struct DriverHandle {
    command: CommandWriter,
    inbound: Arc<dyn InterruptPipe>,
    interface: Option<Box<dyn UsbInterface>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    read_task: Option<JoinHandle<Result<(), ReadLoopError>>>,
}

impl DriverHandle {
    /// Opens the configured device and attaches the driver to it.
    pub fn start(
        config: &BridgeConfig,
        report_sender: mpsc::Sender<HidReport>,
    ) -> Result<Self, DriverError> {
        let interface = open_device(&config.device)?;
        Self::attach(Box::new(interface), config.retry.clone(), report_sender)
    }

    /// Attaches the driver to an already opened interface.
    ///
    /// Classifies the interface's endpoints, then spawns the read loop.
    /// Decoded reports are delivered through `report_sender`; the consumer
    /// behind that channel is the HID sink.
    pub fn attach(
        mut interface: Box<dyn UsbInterface>,
        retry: RetryPolicy,
        report_sender: mpsc::Sender<HidReport>,
    ) -> Result<Self, DriverError> {
        info!("Attaching controller driver");

        let pipes = match classify_endpoints(interface.as_mut()) {
            Ok(pipes) => pipes,
            Err(err) => {
                error!(%err, "Endpoint classification failed, aborting startup");
                interface.close();
                return Err(err.into());
            }
        };

        let read_loop = ReadLoop::create(pipes.inbound.clone(), report_sender, retry).start();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let read_task = tokio::spawn(async move {
            match read_loop.run_until_shutdown(shutdown_rx).await {
                Ok(_stopped) => Ok(()),
                Err(err) => {
                    error!(%err, "Read loop terminated with error");
                    Err(err)
                }
            }
        });

        info!("Controller driver running");
        Ok(Self {
            command: CommandWriter::new(pipes.outbound),
            inbound: pipes.inbound,
            interface: Some(interface),
            shutdown_tx: Some(shutdown_tx),
            read_task: Some(read_task),
        })
    }

    /// Outbound command path of this attachment.
    pub fn command(&self) -> &CommandWriter {
        &self.command
    }

    /// Stops the driver: aborts the pending read, waits for the read loop,
    /// releases the outbound channel, closes the interface.
    ///
    /// Idempotent; every teardown step checks resource presence before
    /// releasing, so stopping an already-stopped or partially started
    /// handle is a no-op.
    pub async fn stop(&mut self) -> Result<(), DriverError> {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            info!("Stopping controller driver");
            if shutdown_tx.send(()).is_err() {
                debug!("Read loop already finished");
            }
        }

        self.inbound.abort();

        if let Some(read_task) = self.read_task.take() {
            match read_task.await {
                Ok(Ok(())) => debug!("Read loop stopped cleanly"),
                Ok(Err(err)) => warn!(%err, "Read loop had already failed before stop"),
                Err(err) => {
                    error!(%err, "Read loop task panicked");
                    return Err(DriverError::TaskFailed(err.to_string()));
                }
            }
        }

        self.command.release();

        if let Some(mut interface) = self.interface.take() {
            interface.close();
        }

        Ok(())
    }
}

impl Drop for DriverHandle {
    fn drop(&mut self) {
        // A dropped handle must not leave a blocking read behind.
        self.inbound.abort();
        self.command.release();
        if let Some(mut interface) = self.interface.take() {
            interface.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::usb::endpoints::testing::{interrupt_in, interrupt_out, MockInterface};
    use crate::usb::pipe::testing::MockPipe;

    fn gamepad_frame(payload: [u8; 18]) -> Vec<u8> {
        let mut frame = vec![0x00, 0x14];
        frame.extend_from_slice(&payload);
        frame
    }

    #[tokio::test]
    async fn attach_streams_reports_and_stop_is_idempotent() {
        let mut payload = [0u8; 18];
        payload[0] = 0x0a;
        let inbound = MockPipe::hanging(vec![Ok(gamepad_frame(payload))]);
        let interface = MockInterface::new(vec![interrupt_in(0x81), interrupt_out(0x01)])
            .with_pipe(0x81, inbound);
        let closed = interface.closed_flag();

        let (sender, mut receiver) = mpsc::channel(8);
        let mut driver = DriverHandle::attach(
            Box::new(interface),
            RetryPolicy::default(),
            sender,
        )
        .expect("attach must succeed");

        let report = receiver.recv().await.expect("one report expected");
        assert_eq!(report.0[2], 0x8a);

        driver.stop().await.expect("first stop");
        assert!(closed.load(Ordering::SeqCst));
        driver.stop().await.expect("second stop is a no-op");
    }

    #[tokio::test]
    async fn missing_channel_aborts_startup_and_closes_interface() {
        let interface = MockInterface::new(vec![interrupt_in(0x81)]);
        let closed = interface.closed_flag();

        let (sender, _receiver) = mpsc::channel(8);
        let result = DriverHandle::attach(Box::new(interface), RetryPolicy::default(), sender);

        assert!(matches!(
            result,
            Err(DriverError::Endpoint(EndpointError::MissingChannel { .. }))
        ));
        assert!(closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn command_path_reaches_outbound_pipe() {
        let outbound = MockPipe::scripted(Vec::new());
        let interface = MockInterface::new(vec![interrupt_in(0x81), interrupt_out(0x01)])
            .with_pipe(0x01, outbound.clone());

        let (sender, _receiver) = mpsc::channel(8);
        let mut driver = DriverHandle::attach(
            Box::new(interface),
            RetryPolicy::default(),
            sender,
        )
        .expect("attach must succeed");

        driver
            .command()
            .set_led(LedPattern::Player1)
            .expect("valid command");
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(outbound.write_log(), vec![vec![0x01, 0x03, 0x06]]);

        // Empty raw commands never reach the wire.
        assert!(matches!(
            driver.command().send(&[]),
            Err(CommandError::InvalidArgument(_))
        ));
        assert_eq!(outbound.write_log().len(), 1);

        driver.stop().await.expect("stop");

        // After stop the outbound channel is gone.
        assert!(matches!(
            driver.command().set_rumble(1, 1),
            Err(CommandError::InvalidArgument(_))
        ));
    }
}
