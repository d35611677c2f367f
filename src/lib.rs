//! System endpoint control plane for a CPC host daemon.
//!
//! CPC (Co-Processor Communication) multiplexes logical endpoints over a
//! serial link between a host ("primary") and an attached co-processor
//! ("secondary"). Endpoint 0 is reserved for the control plane: liveness
//! checks, device reset, and a property get/set protocol used to negotiate
//! capabilities and mirror endpoint state. This crate implements that
//! control plane for the host side:
//!
//! - [`SystemEndpoint`] issues commands, matches replies by sequence number,
//!   retransmits on a per-command timer, fans out unsolicited notifications
//!   and tears the endpoint down on reset.
//! - [`Core`] is the seam to the lower framing layer (frames, poll/final
//!   bits, per-endpoint state), implemented elsewhere.
//! - [`TimerService`] is the seam to the event loop's monotonic one-shot
//!   timers, with [`MonotonicTimers`] as the default implementation.
//! - [`protocol`] holds the wire codec and the command/property id
//!   namespaces.

pub mod command;
pub mod core;
pub mod error;
pub mod protocol;
pub mod system;
pub mod timer;

pub use command::{CommandRef, FinalHandler, Phase, Status};
pub use crate::core::{Core, EndpointState, ErrorReason, OpenFlags, WriteFlag, SYSTEM_ENDPOINT_ID};
pub use error::SystemError;
pub use protocol::CommandId;
pub use system::{LastStatus, SystemEndpoint};
pub use timer::{MonotonicTimers, TimerExpiry, TimerHandle, TimerService};
