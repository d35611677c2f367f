//! One-shot retransmission timers.
//!
//! The system endpoint arms a timer per in-flight command and the event loop
//! drains expirations between I/O. Handles carry the owning command's
//! sequence number so expiration never has to reach back into the timer
//! service to find its descriptor; the command table does the lookup.

use std::cmp::Ordering;
use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap};
use std::time::{Duration, Instant};

use tracing::trace;

/// Opaque handle to an armed timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerHandle(u64);

/// A fired timer and the command sequence number that owns it.
#[derive(Debug, Clone, Copy)]
pub struct TimerExpiry {
    pub handle: TimerHandle,
    pub owner: u8,
}

/// Monotonic one-shot timer primitive consumed by the system endpoint.
///
/// Timers fire exactly once; re-arming is arming a fresh handle. A cancelled
/// handle never surfaces from [`poll_expired`](TimerService::poll_expired).
pub trait TimerService {
    /// Arm a one-shot timer owned by command `owner`, expiring `interval`
    /// from now.
    fn arm(&mut self, owner: u8, interval: Duration) -> TimerHandle;

    /// Cancel an armed timer. Returns false if the handle already fired or
    /// was cancelled.
    fn cancel(&mut self, handle: TimerHandle) -> bool;

    /// Drain every timer whose deadline is at or before `now`, in deadline
    /// order (arming order breaks ties).
    fn poll_expired(&mut self, now: Instant) -> Vec<TimerExpiry>;

    /// Earliest pending deadline, for the event loop's wakeup calculation.
    fn next_deadline(&self) -> Option<Instant>;

    /// Number of armed (not yet fired, not cancelled) timers.
    fn armed(&self) -> usize;
}

/// Default [`TimerService`]: a binary-heap deadline queue with lazy removal
/// of cancelled entries.
pub struct MonotonicTimers {
    queue: BinaryHeap<Reverse<Scheduled>>,
    cancelled: BTreeSet<TimerHandle>,
    next_handle: u64,
    armed: usize,
}

struct Scheduled {
    deadline: Instant,
    handle: TimerHandle,
    owner: u8,
}

impl MonotonicTimers {
    pub fn new() -> Self {
        Self {
            queue: BinaryHeap::new(),
            cancelled: BTreeSet::new(),
            next_handle: 0,
            armed: 0,
        }
    }
}

impl Default for MonotonicTimers {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerService for MonotonicTimers {
    fn arm(&mut self, owner: u8, interval: Duration) -> TimerHandle {
        let handle = TimerHandle(self.next_handle);
        self.next_handle = self.next_handle.wrapping_add(1);
        self.queue.push(Reverse(Scheduled {
            deadline: Instant::now() + interval,
            handle,
            owner,
        }));
        self.armed += 1;
        trace!("Armed timer {:?} for command seq #{owner}", handle);
        handle
    }

    fn cancel(&mut self, handle: TimerHandle) -> bool {
        if handle.0 >= self.next_handle || self.cancelled.contains(&handle) {
            return false;
        }
        // The entry stays in the heap and is skipped when it surfaces.
        let live = self.queue.iter().any(|Reverse(s)| s.handle == handle);
        if !live {
            return false;
        }
        self.cancelled.insert(handle);
        self.armed -= 1;
        trace!("Cancelled timer {:?}", handle);
        true
    }

    fn poll_expired(&mut self, now: Instant) -> Vec<TimerExpiry> {
        let mut expired = Vec::new();
        while let Some(Reverse(scheduled)) = self.queue.peek() {
            if scheduled.deadline > now {
                break;
            }
            let Some(Reverse(scheduled)) = self.queue.pop() else {
                break;
            };
            if self.cancelled.remove(&scheduled.handle) {
                continue;
            }
            self.armed -= 1;
            expired.push(TimerExpiry {
                handle: scheduled.handle,
                owner: scheduled.owner,
            });
        }
        expired
    }

    fn next_deadline(&self) -> Option<Instant> {
        // May name a cancelled entry; a spurious early wakeup drains nothing.
        self.queue.peek().map(|Reverse(s)| s.deadline)
    }

    fn armed(&self) -> usize {
        self.armed
    }
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.handle == other.handle
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> Ordering {
        // Handles are allocated in arming order, so they double as a FIFO
        // tie-break for equal deadlines.
        self.deadline
            .cmp(&other.deadline)
            .then_with(|| self.handle.cmp(&other.handle))
    }
}
