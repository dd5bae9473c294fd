//! Interrupt channel access on top of the host USB stack.
//!
//! The driver core only ever sees the [`InterruptPipe`] trait: one
//! asynchronous read or write per call, completed exactly once, with abort
//! delivered as a distinct benign status. The rusb-backed implementation
//! runs the blocking transfer on the blocking thread pool with a short
//! transfer timeout that is re-checked against the abort token, so a pending
//! read can be cancelled without tearing down the device handle.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rusb::{Context, DeviceHandle, UsbContext};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::DeviceConfig;
use crate::usb::endpoints::{EndpointInfo, UsbInterface};

/// Errors of the host USB boundary.
#[derive(Debug, thiserror::Error)]
pub enum UsbError {
    /// A pending transfer was deliberately aborted. Benign; terminates the
    /// read loop without being treated as a failure.
    #[error("Transfer aborted")]
    Aborted,

    #[error("No matching device found ({vendor_id:04x}:{product_id:04x})")]
    NoDevice { vendor_id: u16, product_id: u16 },

    #[error("Device disconnected: {0}")]
    Disconnected(String),

    #[error("USB setup failed: {0}")]
    Setup(String),

    #[error("Transfer failed: {0}")]
    Transfer(String),
}

/// A claimed, direction-specific interrupt channel.
///
/// The host I/O contract: each call submits exactly one transfer and
/// resolves exactly once with either the transferred byte count or a status.
/// Completions for distinct submissions are never delivered concurrently to
/// the same caller.
#[async_trait]
pub trait InterruptPipe: Send + Sync + 'static {
    /// Submits one interrupt read and waits for its completion.
    async fn read(&self, buf: &mut [u8]) -> Result<usize, UsbError>;

    /// Submits one interrupt write and waits for its completion.
    async fn write(&self, data: &[u8]) -> Result<usize, UsbError>;

    /// Aborts the pending transfer, if any. The pending call resolves with
    /// [`UsbError::Aborted`].
    fn abort(&self);
}

/// Interrupt pipe backed by a shared rusb device handle.
pub struct RusbPipe {
    handle: Arc<DeviceHandle<Context>>,
    address: u8,
    transfer_timeout: Duration,
    abort: CancellationToken,
}

#[async_trait]
impl InterruptPipe for RusbPipe {
    async fn read(&self, buf: &mut [u8]) -> Result<usize, UsbError> {
        let handle = self.handle.clone();
        let address = self.address;
        let timeout = self.transfer_timeout;
        let abort = self.abort.clone();
        let capacity = buf.len();

        let data = tokio::task::spawn_blocking(move || {
            let mut scratch = vec![0u8; capacity];
            loop {
                if abort.is_cancelled() {
                    return Err(UsbError::Aborted);
                }
                match handle.read_interrupt(address, &mut scratch, timeout) {
                    Ok(len) => {
                        scratch.truncate(len);
                        return Ok(scratch);
                    }
                    // The short timeout only exists so the abort token gets
                    // polled; it is not a completion.
                    Err(rusb::Error::Timeout | rusb::Error::Interrupted) => continue,
                    Err(err) => return Err(map_usb_error("interrupt read", err)),
                }
            }
        })
        .await
        .map_err(|err| UsbError::Transfer(format!("read worker terminated: {err}")))??;

        let len = data.len().min(buf.len());
        buf[..len].copy_from_slice(&data[..len]);
        Ok(len)
    }

    async fn write(&self, data: &[u8]) -> Result<usize, UsbError> {
        let handle = self.handle.clone();
        let address = self.address;
        let timeout = self.transfer_timeout;
        let abort = self.abort.clone();
        let payload = data.to_vec();

        tokio::task::spawn_blocking(move || loop {
            if abort.is_cancelled() {
                return Err(UsbError::Aborted);
            }
            match handle.write_interrupt(address, &payload, timeout) {
                Ok(len) => return Ok(len),
                Err(rusb::Error::Timeout | rusb::Error::Interrupted) => continue,
                Err(err) => return Err(map_usb_error("interrupt write", err)),
            }
        })
        .await
        .map_err(|err| UsbError::Transfer(format!("write worker terminated: {err}")))?
    }

    fn abort(&self) {
        self.abort.cancel();
    }
}

/// The opened controller interface: shared device handle plus the endpoint
/// descriptors collected at open time.
pub struct RusbInterface {
    handle: Option<Arc<DeviceHandle<Context>>>,
    interface_number: u8,
    endpoints: Vec<EndpointInfo>,
    transfer_timeout: Duration,
}

impl UsbInterface for RusbInterface {
    fn endpoints(&self) -> Vec<EndpointInfo> {
        self.endpoints.clone()
    }

    fn claim_pipe(&mut self, endpoint: &EndpointInfo) -> Result<Arc<dyn InterruptPipe>, UsbError> {
        let handle = self
            .handle
            .as_ref()
            .ok_or_else(|| UsbError::Setup("interface already closed".to_string()))?;
        Ok(Arc::new(RusbPipe {
            handle: handle.clone(),
            address: endpoint.address,
            transfer_timeout: self.transfer_timeout,
            abort: CancellationToken::new(),
        }))
    }

    fn close(&mut self) {
        if self.handle.take().is_some() {
            debug!(interface = self.interface_number, "Released usb interface");
        }
    }
}

/// Scans the bus for the configured controller, opens it and claims the
/// configured interface.
pub fn open_device(device: &DeviceConfig) -> Result<RusbInterface, UsbError> {
    let context = Context::new().map_err(|err| map_usb_error("create usb context", err))?;
    let devices = context
        .devices()
        .map_err(|err| map_usb_error("list devices", err))?;

    for candidate in devices.iter() {
        let descriptor = candidate
            .device_descriptor()
            .map_err(|err| map_usb_error("read device descriptor", err))?;
        if descriptor.vendor_id() != device.vendor_id
            || descriptor.product_id() != device.product_id
        {
            continue;
        }

        info!(
            vendor_id = device.vendor_id,
            product_id = device.product_id,
            "Found controller, opening interface"
        );
        let handle = candidate
            .open()
            .map_err(|err| map_usb_error("open device", err))?;
        if let Err(err) = handle.set_auto_detach_kernel_driver(true) {
            debug!(%err, "Kernel driver auto-detach unavailable, continuing");
        }
        handle
            .claim_interface(device.interface)
            .map_err(|err| map_usb_error("claim interface", err))?;

        let config_descriptor = candidate
            .active_config_descriptor()
            .map_err(|err| map_usb_error("read configuration descriptor", err))?;
        let mut endpoints = Vec::new();
        for interface in config_descriptor.interfaces() {
            for interface_descriptor in interface.descriptors() {
                if interface_descriptor.interface_number() != device.interface {
                    continue;
                }
                for endpoint in interface_descriptor.endpoint_descriptors() {
                    endpoints.push(EndpointInfo {
                        address: endpoint.address(),
                        transfer: endpoint.transfer_type().into(),
                        direction: endpoint.direction().into(),
                    });
                }
            }
        }
        debug!(count = endpoints.len(), "Collected endpoint descriptors");

        return Ok(RusbInterface {
            handle: Some(Arc::new(handle)),
            interface_number: device.interface,
            endpoints,
            transfer_timeout: Duration::from_millis(device.transfer_timeout_ms),
        });
    }

    Err(UsbError::NoDevice {
        vendor_id: device.vendor_id,
        product_id: device.product_id,
    })
}

fn map_usb_error(op: &str, err: rusb::Error) -> UsbError {
    match err {
        rusb::Error::NoDevice => UsbError::Disconnected(format!("{op}: {err}")),
        other => UsbError::Transfer(format!("{op}: {other}")),
    }
}
