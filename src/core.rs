//! Interface to the lower CPC framing layer.
//!
//! The framing layer ("core") owns the HDLC-like link: information and
//! unnumbered frames, poll/final bits, per-endpoint state. The system
//! endpoint drives it through this trait and never touches the transport
//! directly. Inbound traffic flows the other way: the event loop that owns
//! both layers delivers decoded frames by calling the
//! [`SystemEndpoint`](crate::SystemEndpoint) hooks.

/// Endpoint id reserved for the system endpoint.
pub const SYSTEM_ENDPOINT_ID: u8 = 0;

/// State of an endpoint, as encoded in the endpoint-state properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum EndpointState {
    Open = 0,
    Closed = 1,
    Closing = 2,
    ErrorDestinationUnreachable = 3,
    ErrorSecurityIncident = 4,
    ErrorFault = 5,
}

impl EndpointState {
    pub fn to_wire(self) -> u32 {
        self as u32
    }

    pub fn from_wire(v: u32) -> Option<Self> {
        match v {
            0 => Some(Self::Open),
            1 => Some(Self::Closed),
            2 => Some(Self::Closing),
            3 => Some(Self::ErrorDestinationUnreachable),
            4 => Some(Self::ErrorSecurityIncident),
            5 => Some(Self::ErrorFault),
            _ => None,
        }
    }
}

/// Reason an endpoint is forced into an error state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorReason {
    DestinationUnreachable,
    SecurityIncident,
    Fault,
}

/// Frame classes accepted when opening an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OpenFlags {
    /// Accept unnumbered (unsequenced, unacknowledged) frames.
    pub uframe_enable: bool,
    /// Refuse information (sequenced, acknowledged) frames.
    pub iframe_disable: bool,
}

/// How a write is framed on the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteFlag {
    /// Information frame with the poll bit set.
    InformationPoll,
    /// Unnumbered frame with the poll bit set.
    UnnumberedPoll,
    /// Unnumbered reset command, asking the remote to restart its
    /// sequence numbers. Carries no payload.
    UnnumberedResetCommand,
}

/// Operations the system endpoint consumes from the framing layer.
pub trait Core {
    fn open_endpoint(&mut self, endpoint_id: u8, flags: OpenFlags, tx_window: u8);

    fn close_endpoint(&mut self, endpoint_id: u8, notify_secondary: bool, force: bool);

    fn write(&mut self, endpoint_id: u8, frame: &[u8], flag: WriteFlag);

    /// Push any queued frames onto the transport now.
    fn process_transmit_queue(&mut self);

    fn endpoint_state(&self, endpoint_id: u8) -> EndpointState;

    fn set_endpoint_in_error(&mut self, endpoint_id: u8, reason: ErrorReason);

    /// Whether any local application is connected to this endpoint.
    fn has_listeners(&self, endpoint_id: u8) -> bool;
}
