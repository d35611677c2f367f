//! Generative checks of the in-flight bookkeeping: random command traffic
//! (issue, poll-ack, reply, timer expiry, endpoint reset) against a model,
//! verifying that live commands never share a sequence number and that
//! exactly one timer runs per acknowledged command.
#![cfg(not(feature = "legacy-upoll"))]

mod support;

use std::collections::HashMap;

use proptest::prelude::*;

use cpc_system::{MonotonicTimers, SystemEndpoint, SystemError};
use support::{FakeCore, RETRY_TIMEOUT};

#[derive(Debug, Clone)]
enum Op {
    /// Issue a NOOP with this many retries.
    Issue { retries: u8 },
    /// Poll-ack one of the live commands.
    Ack { pick: usize },
    /// Deliver a final reply for one of the live commands.
    Reply { pick: usize },
    /// Let every running retransmit timer expire.
    FireTimers,
    /// Reset the endpoint, dropping everything in flight.
    Reset,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        5 => (0u8..3).prop_map(|retries| Op::Issue { retries }),
        3 => any::<usize>().prop_map(|pick| Op::Ack { pick }),
        3 => any::<usize>().prop_map(|pick| Op::Reply { pick }),
        2 => Just(Op::FireTimers),
        1 => Just(Op::Reset),
    ]
}

/// Model of one live command: retries left and whether its timer is running.
struct Expected {
    retries: u8,
    armed: bool,
}

proptest! {
    #[test]
    fn live_sequences_stay_unique_and_timers_match_acks(
        ops in proptest::collection::vec(op_strategy(), 1..300),
    ) {
        let (core, log) = FakeCore::new();
        let mut sys = SystemEndpoint::new(core, MonotonicTimers::new());

        let mut live: Vec<u8> = Vec::new();
        let mut expected: HashMap<u8, Expected> = HashMap::new();

        for op in ops {
            match op {
                Op::Issue { retries } => {
                    match sys.cmd_noop(|_, _| {}, retries, RETRY_TIMEOUT) {
                        Ok(()) => {
                            let seq = support::last_write_seq(&log);
                            // A freshly stamped sequence number never
                            // collides with a live command, even after the
                            // counter wraps and reuses freed values
                            prop_assert!(!live.contains(&seq));
                            live.push(seq);
                            expected.insert(seq, Expected { retries, armed: false });
                        }
                        Err(SystemError::SequenceSpaceExhausted) => {
                            prop_assert_eq!(live.len(), 256);
                        }
                        Err(other) => prop_assert!(false, "unexpected issuer error: {other}"),
                    }
                }
                Op::Ack { pick } => {
                    if live.is_empty() {
                        continue;
                    }
                    let seq = live[pick % live.len()];
                    sys.on_poll_acknowledged(seq);
                    expected.get_mut(&seq).unwrap().armed = true;
                }
                Op::Reply { pick } => {
                    if live.is_empty() {
                        continue;
                    }
                    let seq = live[pick % live.len()];
                    sys.on_final(0, &[0x01, seq, 0x00]).unwrap();
                    live.retain(|s| *s != seq);
                    expected.remove(&seq);
                }
                Op::FireTimers => {
                    sys.poll_timers(support::past_one_timeout());
                    // Each running timer either retransmitted (timer off
                    // until the next ack) or exhausted its retries
                    let mut timed_out = Vec::new();
                    for (&seq, entry) in expected.iter_mut() {
                        if !entry.armed {
                            continue;
                        }
                        entry.armed = false;
                        if entry.retries > 0 {
                            entry.retries -= 1;
                        } else {
                            timed_out.push(seq);
                        }
                    }
                    for seq in timed_out {
                        live.retain(|s| *s != seq);
                        expected.remove(&seq);
                    }
                }
                Op::Reset => {
                    sys.reset_endpoint();
                    live.clear();
                    expected.clear();
                }
            }

            // One running timer per acknowledged in-flight command, none for
            // anything else
            let armed = expected.values().filter(|e| e.armed).count();
            prop_assert_eq!(sys.armed_timers(), armed);
            prop_assert_eq!(sys.in_flight(), live.len());
        }
    }
}
