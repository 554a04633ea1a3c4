//! Tracking of commands between "queued", "written" and "acknowledged".
//!
//! The device does not echo request ids, so acknowledgements are matched
//! to written commands in FIFO order. Not every command is echoed, so the
//! written queue is bounded in length and age to keep later echoes from
//! resolving a stale command.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::command::RemoteCommand;

/// Most written commands kept waiting for an echo.
pub const MAX_AWAITING_ACK: usize = 32;
/// How long a written command may wait for its echo.
pub const ACK_WINDOW: Duration = Duration::from_secs(5);

// ── TrackedCommand ───────────────────────────────────────────────

/// A command handed to the transport.
#[derive(Debug, Clone)]
pub struct TrackedCommand {
    pub seq: u64,
    pub command: RemoteCommand,
    /// When the command was queued.
    pub queued_at: Instant,
}

impl TrackedCommand {
    /// How long this command has been in flight.
    pub fn elapsed(&self) -> Duration {
        self.queued_at.elapsed()
    }
}

// ── CommandLedger ────────────────────────────────────────────────

/// Outstanding commands for one channel lifecycle.
#[derive(Debug)]
pub struct CommandLedger {
    next_seq: u64,
    ack_window: Duration,
    /// Queued to the transport, write not yet confirmed.
    queued: HashMap<u64, TrackedCommand>,
    /// Written, waiting for the device echo.
    written: VecDeque<TrackedCommand>,
}

impl Default for CommandLedger {
    fn default() -> Self {
        Self {
            next_seq: 0,
            ack_window: ACK_WINDOW,
            queued: HashMap::new(),
            written: VecDeque::new(),
        }
    }
}

impl CommandLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a command about to be queued and return its sequence number.
    pub fn queue(&mut self, command: RemoteCommand) -> u64 {
        self.next_seq += 1;
        let seq = self.next_seq;
        self.queued.insert(
            seq,
            TrackedCommand {
                seq,
                command,
                queued_at: Instant::now(),
            },
        );
        seq
    }

    /// The transport confirmed the write of `seq`.
    pub fn mark_written(&mut self, seq: u64) -> Option<&RemoteCommand> {
        let tracked = self.queued.remove(&seq)?;
        if self.written.len() == MAX_AWAITING_ACK {
            if let Some(oldest) = self.written.pop_front() {
                debug!(seq = oldest.seq, "dropping unacknowledged command");
            }
        }
        self.written.push_back(tracked);
        self.written.back().map(|t| &t.command)
    }

    /// The device echoed a command; resolve the oldest written one that is
    /// still inside the acknowledgement window.
    pub fn acknowledge(&mut self) -> Option<TrackedCommand> {
        while let Some(front) = self.written.front() {
            if front.elapsed() <= self.ack_window {
                break;
            }
            debug!(seq = front.seq, "unacknowledged command expired");
            self.written.pop_front();
        }
        self.written.pop_front()
    }

    /// Forget a queued command whose write failed.
    pub fn abandon(&mut self, seq: u64) -> Option<TrackedCommand> {
        self.queued.remove(&seq)
    }

    /// Drop everything (on disconnect).
    pub fn clear(&mut self) {
        self.queued.clear();
        self.written.clear();
    }
}

// ── Tests ────────────────────────────────────────────────────────
