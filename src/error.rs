//! System endpoint error types

use thiserror::Error;

/// Errors raised by the system endpoint.
///
/// Everything in here is a protocol-integrity violation or a programming
/// error: the driving event loop must treat a returned error as fatal for the
/// link. Recoverable conditions (timeouts, retries, cancellation) are never
/// reported this way; they reach the per-command completion handler through
/// its [`Status`](crate::Status) argument instead.
#[derive(Error, Debug)]
pub enum SystemError {
    #[error("Frame of {0} bytes is shorter than the 3-byte command header")]
    TruncatedFrame(usize),

    #[error("Malformed frame: header declares {declared} payload bytes, buffer carries {actual}")]
    MalformedFrame { declared: usize, actual: usize },

    #[error("Property payload of {0} bytes is shorter than the 4-byte property id")]
    TruncatedProperty(usize),

    #[error("Reset reply carries {0} payload bytes, expected a 4-byte status")]
    BadResetPayload(usize),

    #[error("Last-status notification carries {0} value bytes, expected at least 4")]
    ShortLastStatus(usize),

    #[error("Illegal command id 0x{0:02X} on an inbound frame")]
    IllegalCommand(u8),

    #[error("Reply kind {reply} does not match the pending {pending} command")]
    MismatchedReply {
        reply: &'static str,
        pending: &'static str,
    },

    #[error("Unsolicited frame with unknown property id 0x{0:08X}")]
    IllegalProperty(u32),

    #[error("Property-set requires a non-empty value")]
    EmptyPropertyValue,

    #[error("All 256 command sequence numbers are in flight")]
    SequenceSpaceExhausted,
}
