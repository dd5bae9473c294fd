//! Host USB boundary
//!
//! Everything the driver core needs from the bus: device discovery and
//! opening, the endpoint descriptor set of the bound interface, and claimed
//! interrupt channels behind the [`pipe::InterruptPipe`] seam.

pub mod endpoints;
pub mod pipe;
