//! Driver core for the controller-to-HID bridge
//!
//! Implements the translation pipeline around the two interrupt channels:
//!
//! 1. [`read_loop`] - Inbound read submission and completion handling
//! 2. [`report`] - Wire report decoding and HID encoding
//! 3. [`command`] - Outbound command writer (rumble, LEDs)
//! 4. [`driver_handle`] - Unified API and lifecycle management
//!
//! # Architecture
//!
//! ```text
//! Controller ──► Read Loop ──► Decoder ──► Encoder ──► HID Sink
//!      ▲        (raw frames)   (state)    (reports)
//!      │
//!      └──── Command Writer ◄── rumble / LED calls
//! ```
//!
//! The read loop runs in its own tokio task with exactly one interrupt read
//! outstanding at any time; the command writer submits fire-and-forget
//! writes on the outbound channel.

pub mod command;
pub mod driver_handle;
pub mod read_loop;
pub mod report;
