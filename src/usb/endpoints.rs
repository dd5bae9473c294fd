//! Endpoint classification for the controller interface.
//!
//! Takes the endpoint descriptors of the bound interface and claims one
//! inbound and one outbound interrupt channel from them. Anything else the
//! interface exposes is ignored.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::usb::pipe::{InterruptPipe, UsbError};

/// Transfer type bits of an endpoint descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    Control,
    Isochronous,
    Bulk,
    Interrupt,
}

impl From<rusb::TransferType> for TransferKind {
    fn from(value: rusb::TransferType) -> Self {
        match value {
            rusb::TransferType::Control => TransferKind::Control,
            rusb::TransferType::Isochronous => TransferKind::Isochronous,
            rusb::TransferType::Bulk => TransferKind::Bulk,
            rusb::TransferType::Interrupt => TransferKind::Interrupt,
        }
    }
}

/// Direction bit of an endpoint descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeDirection {
    /// Device to host.
    In,
    /// Host to device.
    Out,
}

impl From<rusb::Direction> for PipeDirection {
    fn from(value: rusb::Direction) -> Self {
        match value {
            rusb::Direction::In => PipeDirection::In,
            rusb::Direction::Out => PipeDirection::Out,
        }
    }
}

/// One endpoint descriptor of the bound interface, as supplied by the host
/// USB layer. Consumed once during classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointInfo {
    pub address: u8,
    pub transfer: TransferKind,
    pub direction: PipeDirection,
}

/// An opened device interface as the host USB layer hands it to the driver:
/// a descriptor set plus the ability to claim direction-specific channels.
pub trait UsbInterface: Send {
    /// Endpoint descriptors of the bound interface.
    fn endpoints(&self) -> Vec<EndpointInfo>;

    /// Claims the channel behind one endpoint descriptor.
    fn claim_pipe(&mut self, endpoint: &EndpointInfo) -> Result<Arc<dyn InterruptPipe>, UsbError>;

    /// Releases the interface. Safe to call more than once.
    fn close(&mut self);
}

/// The claimed channel pair the driver core runs on.
pub struct PipePair {
    pub inbound: Arc<dyn InterruptPipe>,
    pub outbound: Arc<dyn InterruptPipe>,
}

#[derive(Debug, thiserror::Error)]
pub enum EndpointError {
    /// The interface did not yield both interrupt channels. Fatal to
    /// startup; the caller must abort.
    #[error("Missing interrupt channel (inbound found: {inbound}, outbound found: {outbound})")]
    MissingChannel { inbound: bool, outbound: bool },
}

/// Partitions the interface's endpoints into one inbound and one outbound
/// interrupt channel.
///
/// Non-interrupt endpoints are skipped. A claim failure on a single endpoint
/// is logged and that endpoint is skipped; only the final check that both
/// channels exist is fatal.
pub fn classify_endpoints(interface: &mut dyn UsbInterface) -> Result<PipePair, EndpointError> {
    let mut inbound: Option<Arc<dyn InterruptPipe>> = None;
    let mut outbound: Option<Arc<dyn InterruptPipe>> = None;

    for endpoint in interface.endpoints() {
        if endpoint.transfer != TransferKind::Interrupt {
            debug!(
                address = endpoint.address,
                transfer = ?endpoint.transfer,
                "Skipping non-interrupt endpoint"
            );
            continue;
        }

        let slot = match endpoint.direction {
            PipeDirection::In => &mut inbound,
            PipeDirection::Out => &mut outbound,
        };
        if slot.is_some() {
            debug!(address = endpoint.address, "Extra interrupt endpoint ignored");
            continue;
        }

        match interface.claim_pipe(&endpoint) {
            Ok(pipe) => {
                debug!(
                    address = endpoint.address,
                    direction = ?endpoint.direction,
                    "Claimed interrupt endpoint"
                );
                *slot = Some(pipe);
            }
            Err(err) => {
                warn!(
                    address = endpoint.address,
                    %err,
                    "Failed to claim interrupt endpoint, skipping"
                );
            }
        }
    }

    match (inbound, outbound) {
        (Some(inbound), Some(outbound)) => Ok(PipePair { inbound, outbound }),
        (inbound, outbound) => Err(EndpointError::MissingChannel {
            inbound: inbound.is_some(),
            outbound: outbound.is_some(),
        }),
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{interrupt_in, interrupt_out, MockInterface};
    use super::*;

    fn bulk_in(address: u8) -> EndpointInfo {
        EndpointInfo {
            address,
            transfer: TransferKind::Bulk,
            direction: PipeDirection::In,
        }
    }

    #[test]
    fn classify_picks_both_interrupt_channels() {
        let mut interface = MockInterface::new(vec![
            bulk_in(0x82),
            interrupt_in(0x81),
            interrupt_out(0x01),
        ]);
        let pair = classify_endpoints(&mut interface);
        assert!(pair.is_ok());
    }

    #[test]
    fn classify_fails_without_inbound_channel() {
        let mut interface = MockInterface::new(vec![interrupt_out(0x01)]);
        match classify_endpoints(&mut interface) {
            Err(EndpointError::MissingChannel { inbound, outbound }) => {
                assert!(!inbound);
                assert!(outbound);
            }
            Ok(_) => panic!("classification should fail without an inbound endpoint"),
        }
    }

    #[test]
    fn classify_fails_without_outbound_channel() {
        let mut interface = MockInterface::new(vec![interrupt_in(0x81), bulk_in(0x82)]);
        match classify_endpoints(&mut interface) {
            Err(EndpointError::MissingChannel { inbound, outbound }) => {
                assert!(inbound);
                assert!(!outbound);
            }
            Ok(_) => panic!("classification should fail without an outbound endpoint"),
        }
    }

    #[test]
    fn claim_failure_skips_endpoint_but_keeps_looking() {
        // First inbound candidate fails to claim, the second one works.
        let mut interface = MockInterface::new(vec![
            interrupt_in(0x81),
            interrupt_in(0x83),
            interrupt_out(0x01),
        ])
        .failing_claim(0x81);
        assert!(classify_endpoints(&mut interface).is_ok());

        // With no replacement candidate the claim failure becomes fatal.
        let mut interface =
            MockInterface::new(vec![interrupt_in(0x81), interrupt_out(0x01)]).failing_claim(0x81);
        assert!(matches!(
            classify_endpoints(&mut interface),
            Err(EndpointError::MissingChannel { .. })
        ));
    }
}
