//! Wire format for system endpoint command frames.
//!
//! Every frame is a fixed 3-byte header `[command_id, command_seq, length]`
//! followed by `length` payload bytes. Property commands carry a 4-byte
//! little-endian property id at the start of the payload, optionally followed
//! by the property value. Values of length 2, 4 and 8 are integers and are
//! byte-swapped from host order to little-endian on transmit; any other
//! length is an opaque byte array copied verbatim. Inbound values are handed
//! to handlers as they arrived, with [`value_from_wire`] available to decode
//! them.

use crate::error::SystemError;

/// Fixed size of the command header.
pub const HEADER_LEN: usize = 3;

/// Size of the property id at the start of a property payload.
pub const PROPERTY_ID_LEN: usize = 4;

/// Reset status handed to the reboot callback when the secondary never
/// replied (timeout or cancellation).
pub const RESET_FAILURE: u32 = 1;

/// System endpoint command identifiers.
///
/// The numeric values are fixed by the wire protocol. GET and SET only ever
/// travel primary to secondary; IS is the reply (or an unsolicited
/// notification) and only ever travels secondary to primary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CommandId {
    Noop = 0x01,
    Reset = 0x02,
    PropValueGet = 0x03,
    PropValueSet = 0x04,
    PropValueIs = 0x05,
}

impl CommandId {
    pub fn from_wire(v: u8) -> Option<Self> {
        match v {
            0x01 => Some(Self::Noop),
            0x02 => Some(Self::Reset),
            0x03 => Some(Self::PropValueGet),
            0x04 => Some(Self::PropValueSet),
            0x05 => Some(Self::PropValueIs),
            _ => None,
        }
    }

    /// Human-readable name for log lines.
    pub fn name(self) -> &'static str {
        match self {
            Self::Noop => "NOOP",
            Self::Reset => "RESET",
            Self::PropValueGet => "PROP_VALUE_GET",
            Self::PropValueSet => "PROP_VALUE_SET",
            Self::PropValueIs => "PROP_VALUE_IS",
        }
    }
}

/// Property identifiers understood by the secondary.
pub mod prop {
    /// Last status code, reported unsolicited by the secondary
    /// (typically right after it reboots).
    pub const LAST_STATUS: u32 = 0x00;
    /// Protocol version of the secondary.
    pub const PROTOCOL_VERSION: u32 = 0x01;
    /// Capability bitmask of the secondary.
    pub const CAPABILITIES: u32 = 0x02;
    /// CPC stack version running on the secondary.
    pub const SECONDARY_CPC_VERSION: u32 = 0x03;
    /// Application version running on the secondary.
    pub const SECONDARY_APP_VERSION: u32 = 0x04;
    /// Receive buffer capability of the secondary.
    pub const RX_CAPABILITY: u32 = 0x20;
    /// State of endpoint 0 on the secondary. One id per endpoint, 256 ids.
    pub const ENDPOINT_STATE_0: u32 = 0x1000;
    /// State of endpoint 255 on the secondary.
    pub const ENDPOINT_STATE_255: u32 = 0x10FF;

    /// Property id mirroring the state of `endpoint_id` on the secondary.
    pub fn endpoint_state_id(endpoint_id: u8) -> u32 {
        ENDPOINT_STATE_0 + endpoint_id as u32
    }

    /// Endpoint number encoded in an endpoint-state property id, if any.
    pub fn endpoint_id(property_id: u32) -> Option<u8> {
        if (ENDPOINT_STATE_0..=ENDPOINT_STATE_255).contains(&property_id) {
            Some((property_id - ENDPOINT_STATE_0) as u8)
        } else {
            None
        }
    }

    /// Human-readable name for log lines.
    pub fn name(property_id: u32) -> &'static str {
        match property_id {
            LAST_STATUS => "LAST_STATUS",
            PROTOCOL_VERSION => "PROTOCOL_VERSION",
            CAPABILITIES => "CAPABILITIES",
            SECONDARY_CPC_VERSION => "SECONDARY_CPC_VERSION",
            SECONDARY_APP_VERSION => "SECONDARY_APP_VERSION",
            RX_CAPABILITY => "RX_CAPABILITY",
            ENDPOINT_STATE_0..=ENDPOINT_STATE_255 => "ENDPOINT_STATE",
            _ => "UNKNOWN",
        }
    }
}

/// Retry tuning for commands the endpoint issues on its own behalf.
pub mod timing {
    use std::time::Duration;

    /// Retries when telling the secondary to close an endpoint.
    pub const ENDPOINT_CLOSE_RETRIES: u8 = 5;
    /// Interval between endpoint-close retries.
    pub const ENDPOINT_CLOSE_RETRY_TIMEOUT: Duration = Duration::from_millis(100);
}

/// A decoded command frame, borrowing the receive buffer.
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    /// Raw command id. Dispatch validates it against [`CommandId`].
    pub command_id: u8,
    pub command_seq: u8,
    pub payload: &'a [u8],
}

impl<'a> Frame<'a> {
    /// Parse a received buffer, enforcing that the header length field
    /// matches the actual payload size.
    pub fn parse(buffer: &'a [u8]) -> Result<Self, SystemError> {
        if buffer.len() < HEADER_LEN {
            return Err(SystemError::TruncatedFrame(buffer.len()));
        }
        let declared = buffer[2] as usize;
        let actual = buffer.len() - HEADER_LEN;
        if declared != actual {
            return Err(SystemError::MalformedFrame { declared, actual });
        }
        Ok(Self {
            command_id: buffer[0],
            command_seq: buffer[1],
            payload: &buffer[HEADER_LEN..],
        })
    }
}

/// A decoded property payload (the payload of a PROP_VALUE_* frame).
#[derive(Debug, Clone, Copy)]
pub struct PropertyPayload<'a> {
    /// Property id, already converted to host order.
    pub property_id: u32,
    /// Value bytes as they appear on the wire.
    pub value: &'a [u8],
}

impl<'a> PropertyPayload<'a> {
    pub fn parse(payload: &'a [u8]) -> Result<Self, SystemError> {
        if payload.len() < PROPERTY_ID_LEN {
            return Err(SystemError::TruncatedProperty(payload.len()));
        }
        let property_id = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
        Ok(Self {
            property_id,
            value: &payload[PROPERTY_ID_LEN..],
        })
    }
}

/// Serialize a command frame.
pub fn encode_frame(command_id: CommandId, command_seq: u8, payload: &[u8]) -> Vec<u8> {
    debug_assert!(payload.len() <= u8::MAX as usize);
    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.push(command_id as u8);
    frame.push(command_seq);
    frame.push(payload.len() as u8);
    frame.extend_from_slice(payload);
    frame
}

/// Build the payload of a property command: little-endian property id
/// followed by the value converted to wire order.
pub fn encode_property_payload(property_id: u32, value: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(PROPERTY_ID_LEN + value.len());
    payload.extend_from_slice(&property_id.to_le_bytes());
    payload.extend_from_slice(&value_to_wire(value));
    payload
}

/// Convert a property value from host order to wire (little-endian) order.
///
/// A value of length 2, 4 or 8 is assumed to be the in-memory representation
/// of an integer of that width. Everything else is opaque.
pub fn value_to_wire(value: &[u8]) -> Vec<u8> {
    match value.len() {
        2 => u16::from_ne_bytes([value[0], value[1]]).to_le_bytes().to_vec(),
        4 => u32::from_ne_bytes([value[0], value[1], value[2], value[3]])
            .to_le_bytes()
            .to_vec(),
        8 => u64::from_ne_bytes([
            value[0], value[1], value[2], value[3], value[4], value[5], value[6], value[7],
        ])
        .to_le_bytes()
        .to_vec(),
        _ => value.to_vec(),
    }
}

/// Convert a property value from wire (little-endian) order back to host
/// order. Inverse of [`value_to_wire`].
///
/// The reply dispatcher hands property values to completion handlers raw;
/// a consumer that wants host order applies this itself.
pub fn value_from_wire(value: &[u8]) -> Vec<u8> {
    match value.len() {
        2 => u16::from_le_bytes([value[0], value[1]]).to_ne_bytes().to_vec(),
        4 => u32::from_le_bytes([value[0], value[1], value[2], value[3]])
            .to_ne_bytes()
            .to_vec(),
        8 => u64::from_le_bytes([
            value[0], value[1], value[2], value[3], value[4], value[5], value[6], value[7],
        ])
        .to_ne_bytes()
        .to_vec(),
        _ => value.to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_frame_layout() {
        let frame = encode_frame(CommandId::PropValueGet, 7, &[0xAA, 0xBB]);
        assert_eq!(frame, vec![0x03, 7, 2, 0xAA, 0xBB]);
    }

    #[test]
    fn test_parse_round_trip() {
        let frame = encode_frame(CommandId::Noop, 42, &[]);
        let parsed = Frame::parse(&frame).unwrap();
        assert_eq!(parsed.command_id, 0x01);
        assert_eq!(parsed.command_seq, 42);
        assert!(parsed.payload.is_empty());
    }

    #[test]
    fn test_parse_rejects_length_mismatch() {
        // Header says 5 payload bytes, buffer carries 2
        let buf = [0x01, 0, 5, 0xAA, 0xBB];
        assert!(matches!(
            Frame::parse(&buf),
            Err(SystemError::MalformedFrame {
                declared: 5,
                actual: 2
            })
        ));
    }

    #[test]
    fn test_parse_rejects_short_buffer() {
        assert!(matches!(
            Frame::parse(&[0x01, 0]),
            Err(SystemError::TruncatedFrame(2))
        ));
    }

    #[test]
    fn test_property_payload_round_trip() {
        // u32 value 0x12345678 in host order must land little-endian on the wire
        let value = 0x12345678u32.to_ne_bytes();
        let payload = encode_property_payload(0x0000_000A, &value);
        assert_eq!(payload, vec![0x0A, 0, 0, 0, 0x78, 0x56, 0x34, 0x12]);

        let parsed = PropertyPayload::parse(&payload).unwrap();
        assert_eq!(parsed.property_id, 0x0A);
        let back = value_from_wire(parsed.value);
        assert_eq!(u32::from_ne_bytes([back[0], back[1], back[2], back[3]]), 0x12345678);
    }

    #[test]
    fn test_value_swap_widths() {
        for value in [
            0xBEEFu16.to_ne_bytes().to_vec(),
            0xDEAD_BEEFu32.to_ne_bytes().to_vec(),
            0x0123_4567_89AB_CDEFu64.to_ne_bytes().to_vec(),
            vec![0x5A],
        ] {
            assert_eq!(value_from_wire(&value_to_wire(&value)), value);
        }
    }

    #[test]
    fn test_odd_length_value_is_opaque() {
        let value = [1u8, 2, 3];
        assert_eq!(value_to_wire(&value), value.to_vec());
        assert_eq!(value_from_wire(&value), value.to_vec());
    }

    #[test]
    fn test_truncated_property_payload() {
        assert!(matches!(
            PropertyPayload::parse(&[0x0A, 0, 0]),
            Err(SystemError::TruncatedProperty(3))
        ));
    }

    #[test]
    fn test_endpoint_state_property_mapping() {
        assert_eq!(prop::endpoint_state_id(0), prop::ENDPOINT_STATE_0);
        assert_eq!(prop::endpoint_state_id(255), prop::ENDPOINT_STATE_255);
        assert_eq!(prop::endpoint_id(prop::ENDPOINT_STATE_0 + 7), Some(7));
        assert_eq!(prop::endpoint_id(prop::LAST_STATUS), None);
        assert_eq!(prop::endpoint_id(prop::ENDPOINT_STATE_255 + 1), None);
    }

    #[test]
    fn test_names() {
        assert_eq!(CommandId::from_wire(0x05), Some(CommandId::PropValueIs));
        assert_eq!(CommandId::from_wire(0x06), None);
        assert_eq!(CommandId::Reset.name(), "RESET");
        assert_eq!(prop::name(prop::ENDPOINT_STATE_0 + 31), "ENDPOINT_STATE");
        assert_eq!(prop::name(0xFFFF_FFFF), "UNKNOWN");
    }
}
