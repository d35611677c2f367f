//! The system endpoint: control-plane request/reply over endpoint 0.
//!
//! The primary issues NOOP, RESET and property get/set commands; the
//! secondary answers each with a final reply matched by sequence number, and
//! pushes unsolicited property notifications of its own. Everything runs on
//! one event loop:
//!
//! ```text
//! [event loop] ── cmd_noop / cmd_reboot / cmd_property_* ──► [SystemEndpoint]
//! [event loop] ── on_final / on_unsolicited / poll ack ────► [SystemEndpoint]
//! [event loop] ── poll_timers(now) ────────────────────────► [SystemEndpoint]
//!                                      [SystemEndpoint] ───► [Core] (writes)
//! ```
//!
//! Two transmission modes exist. The default submits commands as information
//! frames with the poll bit set and arms the retransmit timer only once the
//! secondary acknowledges the poll, so a slow first delivery does not turn
//! into a retransmit storm. The `legacy-upoll` feature instead submits
//! unnumbered polls and arms the timer at issue time, for secondaries that
//! predate the poll acknowledgement.

use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use crate::command::{CommandDescriptor, CommandRef, CommandTable, FinalHandler, Phase, Status};
use crate::core::{Core, EndpointState, ErrorReason, OpenFlags, WriteFlag, SYSTEM_ENDPOINT_ID};
use crate::error::SystemError;
use crate::protocol::{self, prop, timing, CommandId, Frame, PropertyPayload};
use crate::timer::TimerService;

#[cfg(not(feature = "legacy-upoll"))]
const POLL_WRITE_FLAG: WriteFlag = WriteFlag::InformationPoll;
#[cfg(feature = "legacy-upoll")]
const POLL_WRITE_FLAG: WriteFlag = WriteFlag::UnnumberedPoll;

/// Status code reported unsolicited by the secondary through the
/// `LAST_STATUS` property, typically right after it reboots.
///
/// The wire carries four bytes. Integrations have historically read them
/// either as a little-endian integer or as raw memory, so both readings are
/// exposed and the listener picks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LastStatus {
    raw: [u8; 4],
}

impl LastStatus {
    /// The four value bytes exactly as they arrived.
    pub fn raw(self) -> [u8; 4] {
        self.raw
    }

    /// The value decoded as a little-endian integer.
    pub fn to_host(self) -> u32 {
        u32::from_le_bytes(self.raw)
    }
}

/// The system endpoint of a CPC host: command issuance, reply matching,
/// retransmission, unsolicited fan-out and endpoint reset.
///
/// Single-threaded by design. The owning event loop delivers every inbound
/// hook, timer tick and issuer call sequentially; no handler suspends.
pub struct SystemEndpoint<C: Core, T: TimerService> {
    core: C,
    timers: T,
    table: CommandTable,
    /// Sequence number stamped on the next command, post-incremented.
    next_command_seq: u8,
    last_status_listeners: Vec<Box<dyn Fn(LastStatus)>>,
    /// Set by the daemon around a planned reboot so the reset-reason
    /// notification that follows is expected; cleared by the reset reply.
    ignore_reset_reason: bool,
}

impl<C: Core, T: TimerService> SystemEndpoint<C, T> {
    /// Open the system endpoint on `core` and return the control plane
    /// driving it.
    pub fn new(core: C, timers: T) -> Self {
        let mut endpoint = Self {
            core,
            timers,
            table: CommandTable::new(),
            next_command_seq: 0,
            last_status_listeners: Vec::new(),
            ignore_reset_reason: false,
        };
        endpoint.open_endpoint();
        endpoint
    }

    fn open_endpoint(&mut self) {
        let flags = OpenFlags {
            uframe_enable: true,
            iframe_disable: cfg!(feature = "legacy-upoll"),
        };
        self.core.open_endpoint(SYSTEM_ENDPOINT_ID, flags, 1);
    }

    /// Register a listener for unsolicited `LAST_STATUS` notifications.
    /// Listeners run in registration order.
    pub fn register_unsolicited_last_status_callback<F>(&mut self, callback: F)
    where
        F: Fn(LastStatus) + 'static,
    {
        self.last_status_listeners.push(Box::new(callback));
    }

    // ========================================================================
    // Command issuers
    // ========================================================================

    /// Send a no-operation query, a pure liveness check.
    pub fn cmd_noop<F>(
        &mut self,
        on_noop_reply: F,
        retry_count: u8,
        retry_timeout: Duration,
    ) -> Result<(), SystemError>
    where
        F: FnOnce(CommandRef, Status) + 'static,
    {
        let command_seq = self.allocate_seq()?;
        let frame = protocol::encode_frame(CommandId::Noop, command_seq, &[]);
        self.write_command(CommandDescriptor::new(
            CommandId::Noop,
            command_seq,
            frame,
            FinalHandler::Noop(Box::new(on_noop_reply)),
            retry_count,
            retry_timeout,
        ));
        Ok(())
    }

    /// Ask the secondary to reboot. The reply carries the secondary's reset
    /// status in host order.
    pub fn cmd_reboot<F>(
        &mut self,
        on_reset_reply: F,
        retry_count: u8,
        retry_timeout: Duration,
    ) -> Result<(), SystemError>
    where
        F: FnOnce(CommandRef, Status, u32) + 'static,
    {
        let command_seq = self.allocate_seq()?;
        let frame = protocol::encode_frame(CommandId::Reset, command_seq, &[]);
        self.write_command(CommandDescriptor::new(
            CommandId::Reset,
            command_seq,
            frame,
            FinalHandler::Reset(Box::new(on_reset_reply)),
            retry_count,
            retry_timeout,
        ));
        Ok(())
    }

    /// Query a property value.
    pub fn cmd_property_get<F>(
        &mut self,
        on_property_get_reply: F,
        property_id: u32,
        retry_count: u8,
        retry_timeout: Duration,
    ) -> Result<(), SystemError>
    where
        F: FnOnce(CommandRef, u32, Option<&[u8]>, Status) + 'static,
    {
        let command_seq = self.allocate_seq()?;
        let payload = protocol::encode_property_payload(property_id, &[]);
        let frame = protocol::encode_frame(CommandId::PropValueGet, command_seq, &payload);
        self.write_command(CommandDescriptor::new(
            CommandId::PropValueGet,
            command_seq,
            frame,
            FinalHandler::Property(Box::new(on_property_get_reply)),
            retry_count,
            retry_timeout,
        ));
        debug!(
            "property-get sent for {} (0x{:X})",
            prop::name(property_id),
            property_id
        );
        Ok(())
    }

    /// Set a property value. `value` is in host order; 2, 4 and 8 byte values
    /// are converted to little-endian on the wire.
    pub fn cmd_property_set<F>(
        &mut self,
        on_property_set_reply: F,
        retry_count: u8,
        retry_timeout: Duration,
        property_id: u32,
        value: &[u8],
    ) -> Result<(), SystemError>
    where
        F: FnOnce(CommandRef, u32, Option<&[u8]>, Status) + 'static,
    {
        if value.is_empty() {
            return Err(SystemError::EmptyPropertyValue);
        }
        let command_seq = self.allocate_seq()?;
        let payload = protocol::encode_property_payload(property_id, value);
        let frame = protocol::encode_frame(CommandId::PropValueSet, command_seq, &payload);
        self.write_command(CommandDescriptor::new(
            CommandId::PropValueSet,
            command_seq,
            frame,
            FinalHandler::Property(Box::new(on_property_set_reply)),
            retry_count,
            retry_timeout,
        ));
        debug!(
            "property-set sent for {} (0x{:X})",
            prop::name(property_id),
            property_id
        );
        Ok(())
    }

    /// Tear the system endpoint down and bring it back up: ask the remote to
    /// restart its sequence numbers, flush the transmit queue, complete every
    /// in-flight command with [`Status::Cancelled`], then close and reopen.
    ///
    /// Used when the secondary is known to have reset and nothing in flight
    /// can be answered anymore.
    pub fn reset_endpoint(&mut self) {
        debug!("Requesting reset of sequence numbers on the remote");
        self.core
            .write(SYSTEM_ENDPOINT_ID, &[], WriteFlag::UnnumberedResetCommand);
        // Push the reset out before tearing the endpoint down.
        self.core.process_transmit_queue();

        for mut descriptor in self.table.drain_all() {
            warn!(
                "Dropped system command {} seq #{}",
                descriptor.command_id().name(),
                descriptor.command_seq()
            );
            if let Some(handle) = descriptor.timer.take() {
                self.timers.cancel(handle);
            }
            complete_locally(descriptor, Status::Cancelled);
        }

        self.core.close_endpoint(SYSTEM_ENDPOINT_ID, false, true);
        self.open_endpoint();
    }

    // ========================================================================
    // Inbound hooks, called by the event loop
    // ========================================================================

    /// A final reply arrived on the system endpoint.
    ///
    /// A reply whose sequence number matches nothing in flight is dropped
    /// with a warning; legitimate races around endpoint reset produce those.
    /// Anything else that does not parse or dispatch cleanly is fatal.
    pub fn on_final(&mut self, endpoint_id: u8, buffer: &[u8]) -> Result<(), SystemError> {
        trace!("Reply received on endpoint #{endpoint_id}");
        let frame = Frame::parse(buffer)?;

        let Some(mut descriptor) = self.table.remove(frame.command_seq) else {
            warn!("Received a system final for which no pending poll is registered");
            return Ok(());
        };
        if let Some(handle) = descriptor.timer.take() {
            self.timers.cancel(handle);
        }
        descriptor.phase = Phase::Finalizing;

        let reply_id = CommandId::from_wire(frame.command_id)
            .ok_or(SystemError::IllegalCommand(frame.command_id))?;
        let reference = descriptor.command_ref();
        let status = descriptor.status;

        match (reply_id, descriptor.on_final.take()) {
            (CommandId::Noop, Some(FinalHandler::Noop(callback))) => {
                trace!("NOOP reply for seq #{}", frame.command_seq);
                callback(reference, status);
            }
            (CommandId::Reset, Some(FinalHandler::Reset(callback))) => {
                trace!("RESET reply for seq #{}", frame.command_seq);
                self.ignore_reset_reason = false;
                if frame.payload.len() != 4 {
                    return Err(SystemError::BadResetPayload(frame.payload.len()));
                }
                let reset_status = u32::from_le_bytes([
                    frame.payload[0],
                    frame.payload[1],
                    frame.payload[2],
                    frame.payload[3],
                ]);
                callback(reference, status, reset_status);
            }
            (CommandId::PropValueIs, Some(FinalHandler::Property(callback))) => {
                let property = PropertyPayload::parse(frame.payload)?;
                trace!(
                    "PROP_VALUE_IS reply for seq #{} property {}",
                    frame.command_seq,
                    prop::name(property.property_id)
                );
                // Only the property id is decoded; the value bytes reach the
                // handler exactly as they arrived.
                callback(reference, property.property_id, Some(property.value), status);
            }
            (CommandId::PropValueGet | CommandId::PropValueSet, _) => {
                // Those only ever travel primary to secondary.
                return Err(SystemError::IllegalCommand(frame.command_id));
            }
            (reply, Some(handler)) => {
                return Err(SystemError::MismatchedReply {
                    reply: reply.name(),
                    pending: handler.name(),
                });
            }
            (reply, None) => {
                return Err(SystemError::MismatchedReply {
                    reply: reply.name(),
                    pending: "already completed",
                });
            }
        }

        descriptor.phase = Phase::Dead;
        Ok(())
    }

    /// An unsolicited (uframe) notification arrived on the system endpoint.
    pub fn on_unsolicited(&mut self, endpoint_id: u8, buffer: &[u8]) -> Result<(), SystemError> {
        trace!("Unsolicited received on endpoint #{endpoint_id}");
        let frame = Frame::parse(buffer)?;
        if frame.command_id != CommandId::PropValueIs as u8 {
            return Err(SystemError::IllegalCommand(frame.command_id));
        }
        let property = PropertyPayload::parse(frame.payload)?;

        if property.property_id == prop::LAST_STATUS {
            if property.value.len() < 4 {
                return Err(SystemError::ShortLastStatus(property.value.len()));
            }
            let last_status = LastStatus {
                raw: [
                    property.value[0],
                    property.value[1],
                    property.value[2],
                    property.value[3],
                ],
            };
            for callback in &self.last_status_listeners {
                callback(last_status);
            }
        } else if let Some(closed_endpoint) = prop::endpoint_id(property.property_id) {
            debug!("Secondary closed endpoint #{closed_endpoint}");
            if self.core.has_listeners(closed_endpoint)
                && self.core.endpoint_state(closed_endpoint) == EndpointState::Open
            {
                self.core
                    .set_endpoint_in_error(closed_endpoint, ErrorReason::DestinationUnreachable);
            }
            // Mirror the close back so both sides agree on the state.
            let closed = EndpointState::Closed.to_wire().to_ne_bytes();
            self.cmd_property_set(
                on_endpoint_close_reply,
                timing::ENDPOINT_CLOSE_RETRIES,
                timing::ENDPOINT_CLOSE_RETRY_TIMEOUT,
                property.property_id,
                &closed,
            )?;
        } else {
            return Err(SystemError::IllegalProperty(property.property_id));
        }
        Ok(())
    }

    /// The link layer acknowledged the poll for `command_seq`; start (or
    /// restart) that command's retransmit timer.
    #[cfg(not(feature = "legacy-upoll"))]
    pub fn on_poll_acknowledged(&mut self, command_seq: u8) {
        let Some(descriptor) = self.table.find_mut(command_seq) else {
            warn!("Received a system poll ack for which no pending poll is registered");
            return;
        };
        match descriptor.status {
            Status::Ok | Status::InProgress => {
                debug!(
                    "Secondary acknowledged command {} seq #{command_seq}",
                    descriptor.command_id().name()
                );
                if let Some(stale) = descriptor.timer.take() {
                    self.timers.cancel(stale);
                }
                let handle = self.timers.arm(command_seq, descriptor.retry_timeout);
                descriptor.timer = Some(handle);
                descriptor.phase = Phase::PollAcked;
            }
            Status::Timeout | Status::Cancelled => {
                warn!("Received an ack for a command that already timed out, ignoring");
            }
        }
    }

    // ========================================================================
    // Timers
    // ========================================================================

    /// Run every retransmit timer whose deadline is at or before `now`.
    pub fn poll_timers(&mut self, now: Instant) {
        for expiry in self.timers.poll_expired(now) {
            self.handle_timer_expired(expiry.owner);
        }
    }

    /// Earliest pending retransmit deadline, for the event loop's wakeup.
    pub fn next_timer_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    fn handle_timer_expired(&mut self, command_seq: u8) {
        let Some(descriptor) = self.table.find_mut(command_seq) else {
            warn!("A command timer fired but seq #{command_seq} is not in the table");
            return;
        };
        // The one-shot handle was spent when it fired.
        descriptor.timer = None;

        if descriptor.retry_count == 0 {
            if let Some(descriptor) = self.table.remove(command_seq) {
                warn!(
                    "Command {} seq #{command_seq} timeout",
                    descriptor.command_id().name()
                );
                complete_locally(descriptor, Status::Timeout);
            }
            return;
        }

        descriptor.retry_count -= 1;
        descriptor.status = Status::InProgress;
        debug!(
            "Command {} seq #{command_seq}: retransmitting, {} retries left",
            descriptor.command_id().name(),
            descriptor.retry_count
        );

        #[cfg(not(feature = "legacy-upoll"))]
        {
            // Reuse the sequence number and go back through the issuer path;
            // the timer stays off until the secondary acknowledges this poll.
            if let Some(mut descriptor) = self.table.remove(command_seq) {
                descriptor.phase = Phase::Issued;
                self.write_command(descriptor);
            }
        }

        #[cfg(feature = "legacy-upoll")]
        {
            self.core
                .write(SYSTEM_ENDPOINT_ID, &descriptor.frame, WriteFlag::UnnumberedPoll);
            let handle = self.timers.arm(command_seq, descriptor.retry_timeout);
            descriptor.timer = Some(handle);
        }
    }

    // ========================================================================
    // Internals
    // ========================================================================

    /// Stamp the next sequence number. The counter wraps; a value still held
    /// by a live command is skipped so in-flight commands stay unique.
    fn allocate_seq(&mut self) -> Result<u8, SystemError> {
        for _ in 0..=u8::MAX {
            let command_seq = self.next_command_seq;
            self.next_command_seq = self.next_command_seq.wrapping_add(1);
            if !self.table.contains(command_seq) {
                return Ok(command_seq);
            }
        }
        Err(SystemError::SequenceSpaceExhausted)
    }

    fn write_command(&mut self, descriptor: CommandDescriptor) {
        let command_seq = descriptor.command_seq();
        let command_name = descriptor.command_id().name();
        self.core
            .write(SYSTEM_ENDPOINT_ID, &descriptor.frame, POLL_WRITE_FLAG);
        self.table.insert_tail(descriptor);

        #[cfg(feature = "legacy-upoll")]
        if let Some(descriptor) = self.table.find_mut(command_seq) {
            let handle = self.timers.arm(command_seq, descriptor.retry_timeout);
            descriptor.timer = Some(handle);
        }

        debug!("Submitted command {command_name} seq #{command_seq}");
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    /// Number of commands awaiting a reply.
    pub fn in_flight(&self) -> usize {
        self.table.len()
    }

    /// Number of running retransmit timers.
    pub fn armed_timers(&self) -> usize {
        self.timers.armed()
    }

    pub fn ignore_reset_reason(&self) -> bool {
        self.ignore_reset_reason
    }

    /// Mark the next reset reason from the secondary as expected. Cleared
    /// automatically when a reboot command completes.
    pub fn set_ignore_reset_reason(&mut self, ignore: bool) {
        self.ignore_reset_reason = ignore;
    }

    pub fn core(&self) -> &C {
        &self.core
    }

    pub fn core_mut(&mut self) -> &mut C {
        &mut self.core
    }
}

/// Complete a command that will never get a reply (timeout or reset drain).
/// Property handlers receive the property id the command was issued with and
/// no value.
fn complete_locally(mut descriptor: CommandDescriptor, status: Status) {
    descriptor.status = status;
    descriptor.phase = Phase::Dead;
    let reference = descriptor.command_ref();
    match descriptor.on_final.take() {
        Some(FinalHandler::Noop(callback)) => callback(reference, status),
        Some(FinalHandler::Reset(callback)) => {
            callback(reference, status, protocol::RESET_FAILURE)
        }
        Some(FinalHandler::Property(callback)) => {
            let property_id = descriptor.tx_property_id().unwrap_or_default();
            callback(reference, property_id, None, status);
        }
        None => {}
    }
}

/// Completion of the property-set issued when the secondary reports one of
/// our endpoints closed.
fn on_endpoint_close_reply(
    _command: CommandRef,
    property_id: u32,
    _value: Option<&[u8]>,
    status: Status,
) {
    let Some(endpoint_id) = prop::endpoint_id(property_id) else {
        return;
    };
    match status {
        Status::Ok | Status::InProgress => {
            debug!("Secondary acknowledged the close of endpoint #{endpoint_id}");
        }
        Status::Timeout => {
            warn!("Secondary never acknowledged the close of endpoint #{endpoint_id}");
        }
        Status::Cancelled => {}
    }
}
