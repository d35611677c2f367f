//! In-flight command descriptors and the table that owns them.

use std::time::Duration;

use crate::protocol::{CommandId, HEADER_LEN, PROPERTY_ID_LEN};
use crate::timer::TimerHandle;

/// Delivery status handed to a completion handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Final reply received on the first attempt.
    Ok,
    /// Final reply received, but at least one retransmission occurred.
    InProgress,
    /// Retries exhausted without a reply.
    Timeout,
    /// Dropped by an endpoint reset before any reply arrived.
    Cancelled,
}

/// Where a command sits in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Written to the link, retransmit timer not running.
    Issued,
    /// Poll acknowledged by the secondary, retransmit timer running.
    PollAcked,
    /// Reply matched, completion handler about to run.
    Finalizing,
    /// Completed. Only observable transiently; dead descriptors leave the
    /// table immediately.
    Dead,
}

/// Identity of a command, passed to its completion handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandRef {
    pub command_id: CommandId,
    pub command_seq: u8,
}

/// Completion handler, tagged by command kind.
///
/// Only the handler matching the descriptor's command can ever be invoked;
/// the reply dispatcher treats a tag mismatch as a protocol violation rather
/// than calling through the wrong signature.
pub enum FinalHandler {
    /// `(command, status)`
    Noop(Box<dyn FnOnce(CommandRef, Status)>),
    /// `(command, status, reset_status)` with the secondary's reset status in
    /// host order.
    Reset(Box<dyn FnOnce(CommandRef, Status, u32)>),
    /// `(command, property_id, value, status)`. The value bytes are exactly
    /// as they arrived on the wire; `None` when no reply arrived (timeout or
    /// cancellation).
    Property(Box<dyn FnOnce(CommandRef, u32, Option<&[u8]>, Status)>),
}

impl FinalHandler {
    /// Kind name for diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Noop(_) => "NOOP",
            Self::Reset(_) => "RESET",
            Self::Property(_) => "PROP_VALUE_GET/SET",
        }
    }
}

/// One in-flight command: the serialized frame, its completion handler and
/// the retry state. Owned by the [`CommandTable`] from issue until the single
/// removal on reply, terminal timeout or endpoint reset.
pub struct CommandDescriptor {
    pub(crate) command_id: CommandId,
    pub(crate) command_seq: u8,
    pub(crate) frame: Vec<u8>,
    pub(crate) on_final: Option<FinalHandler>,
    pub(crate) retry_count: u8,
    pub(crate) retry_timeout: Duration,
    pub(crate) status: Status,
    pub(crate) timer: Option<TimerHandle>,
    pub(crate) phase: Phase,
}

impl CommandDescriptor {
    pub(crate) fn new(
        command_id: CommandId,
        command_seq: u8,
        frame: Vec<u8>,
        on_final: FinalHandler,
        retry_count: u8,
        retry_timeout: Duration,
    ) -> Self {
        Self {
            command_id,
            command_seq,
            frame,
            on_final: Some(on_final),
            retry_count,
            retry_timeout,
            status: Status::Ok,
            timer: None,
            phase: Phase::Issued,
        }
    }

    pub fn command_id(&self) -> CommandId {
        self.command_id
    }

    pub fn command_seq(&self) -> u8 {
        self.command_seq
    }

    pub fn command_ref(&self) -> CommandRef {
        CommandRef {
            command_id: self.command_id,
            command_seq: self.command_seq,
        }
    }

    /// Property id this command was issued with, read back from its own
    /// frame. `None` for commands without a property payload.
    pub(crate) fn tx_property_id(&self) -> Option<u32> {
        match self.command_id {
            CommandId::PropValueGet | CommandId::PropValueSet => {
                let bytes = self.frame.get(HEADER_LEN..HEADER_LEN + PROPERTY_ID_LEN)?;
                Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
            }
            _ => None,
        }
    }
}

/// Ordered collection of in-flight commands, keyed by sequence number.
///
/// Commands sit in issuance order; lookup is a linear scan, which is fine for
/// the handful of control-plane commands ever in flight at once.
#[derive(Default)]
pub struct CommandTable {
    entries: Vec<CommandDescriptor>,
}

impl CommandTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a descriptor. A sequence number may only appear once.
    pub fn insert_tail(&mut self, descriptor: CommandDescriptor) {
        debug_assert!(
            !self.contains(descriptor.command_seq),
            "duplicate command seq in table"
        );
        self.entries.push(descriptor);
    }

    pub fn contains(&self, command_seq: u8) -> bool {
        self.entries.iter().any(|d| d.command_seq == command_seq)
    }

    pub fn find_mut(&mut self, command_seq: u8) -> Option<&mut CommandDescriptor> {
        self.entries
            .iter_mut()
            .find(|d| d.command_seq == command_seq)
    }

    pub fn remove(&mut self, command_seq: u8) -> Option<CommandDescriptor> {
        let index = self
            .entries
            .iter()
            .position(|d| d.command_seq == command_seq)?;
        Some(self.entries.remove(index))
    }

    /// Take every descriptor, leaving the table empty.
    pub fn drain_all(&mut self) -> Vec<CommandDescriptor> {
        std::mem::take(&mut self.entries)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CommandDescriptor> {
        self.entries.iter()
    }
}
