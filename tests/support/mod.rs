//! Shared test fixtures: a scripted link core and clock helpers.
#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::{Duration, Instant};

use cpc_system::{Core, EndpointState, ErrorReason, OpenFlags, WriteFlag};

/// Retry timeout used by most tests. Generous so a slow test runner can
/// never make a timer fire before the test asks for it.
pub const RETRY_TIMEOUT: Duration = Duration::from_secs(60);

/// An instant safely past one retry timeout.
pub fn past_one_timeout() -> Instant {
    Instant::now() + Duration::from_secs(90)
}

/// An instant safely past every timer a test could have armed.
pub fn past_all_timeouts() -> Instant {
    Instant::now() + Duration::from_secs(600)
}

/// Opt-in log output: `RUST_LOG=debug cargo test -- --nocapture`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Everything the system endpoint asked the framing layer to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreOp {
    Open {
        endpoint_id: u8,
        flags: OpenFlags,
        tx_window: u8,
    },
    Close {
        endpoint_id: u8,
        notify_secondary: bool,
        force: bool,
    },
    Write {
        endpoint_id: u8,
        frame: Vec<u8>,
        flag: WriteFlag,
    },
    ProcessTransmitQueue,
    SetEndpointInError {
        endpoint_id: u8,
        reason: ErrorReason,
    },
}

pub type CoreLog = Rc<RefCell<Vec<CoreOp>>>;

/// Scripted [`Core`]: records every call, answers state queries from a
/// per-endpoint script set up by the test.
pub struct FakeCore {
    log: CoreLog,
    states: HashMap<u8, EndpointState>,
    listeners: HashMap<u8, bool>,
}

impl FakeCore {
    pub fn new() -> (Self, CoreLog) {
        let log: CoreLog = Rc::new(RefCell::new(Vec::new()));
        (
            Self {
                log: Rc::clone(&log),
                states: HashMap::new(),
                listeners: HashMap::new(),
            },
            log,
        )
    }

    /// Script the state and listener presence of an endpoint.
    pub fn with_endpoint(mut self, endpoint_id: u8, state: EndpointState, listeners: bool) -> Self {
        self.states.insert(endpoint_id, state);
        self.listeners.insert(endpoint_id, listeners);
        self
    }
}

impl Core for FakeCore {
    fn open_endpoint(&mut self, endpoint_id: u8, flags: OpenFlags, tx_window: u8) {
        self.log.borrow_mut().push(CoreOp::Open {
            endpoint_id,
            flags,
            tx_window,
        });
    }

    fn close_endpoint(&mut self, endpoint_id: u8, notify_secondary: bool, force: bool) {
        self.log.borrow_mut().push(CoreOp::Close {
            endpoint_id,
            notify_secondary,
            force,
        });
    }

    fn write(&mut self, endpoint_id: u8, frame: &[u8], flag: WriteFlag) {
        self.log.borrow_mut().push(CoreOp::Write {
            endpoint_id,
            frame: frame.to_vec(),
            flag,
        });
    }

    fn process_transmit_queue(&mut self) {
        self.log.borrow_mut().push(CoreOp::ProcessTransmitQueue);
    }

    fn endpoint_state(&self, endpoint_id: u8) -> EndpointState {
        self.states
            .get(&endpoint_id)
            .copied()
            .unwrap_or(EndpointState::Closed)
    }

    fn set_endpoint_in_error(&mut self, endpoint_id: u8, reason: ErrorReason) {
        self.states.insert(
            endpoint_id,
            EndpointState::ErrorDestinationUnreachable,
        );
        self.log
            .borrow_mut()
            .push(CoreOp::SetEndpointInError {
                endpoint_id,
                reason,
            });
    }

    fn has_listeners(&self, endpoint_id: u8) -> bool {
        self.listeners.get(&endpoint_id).copied().unwrap_or(false)
    }
}

/// All command frames written so far, as `(frame, flag)` pairs.
pub fn writes(log: &CoreLog) -> Vec<(Vec<u8>, WriteFlag)> {
    log.borrow()
        .iter()
        .filter_map(|op| match op {
            CoreOp::Write { frame, flag, .. } if !frame.is_empty() => {
                Some((frame.clone(), *flag))
            }
            _ => None,
        })
        .collect()
}

/// Sequence number of the most recently written command frame.
pub fn last_write_seq(log: &CoreLog) -> u8 {
    let frames = writes(log);
    let (frame, _) = frames.last().expect("no command written");
    frame[1]
}
