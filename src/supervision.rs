//! Decoder keep-alive supervision.
//!
//! Each enabled decoder is supervised by a rearm-on-every-tick timer. Every
//! tick counts one missed ping and, unless a restart is in progress, sends a
//! downstream ping. An upstream ping resets the count. Reaching the
//! configured threshold means the decoder is lost (`ServerUnavailable`).
//!
//! The state machine is driven by explicit timestamps so it can be tested
//! with a mock clock:
//!
//! ```rust
//! use rs_trainz_fleet::supervision::Supervision;
//!
//! let mut sup = Supervision::new(1000, 3);
//! sup.arm();
//! assert!(sup.poll(0).is_none()); // schedules the first tick
//!
//! let tick = sup.poll(1000).unwrap();
//! assert!(tick.send_ping);
//! assert_eq!(tick.missed, 1);
//! assert!(!tick.lost);
//!
//! sup.on_ping();
//! assert_eq!(sup.missed(), 0);
//! ```

use serde::{Deserialize, Serialize};

/// Result of a supervision tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SupervisionTick {
    /// A downstream ping should be published.
    pub send_ping: bool,
    /// Consecutive ticks without an upstream ping.
    pub missed: u32,
    /// The missed count is at or above the threshold.
    pub lost: bool,
    /// This tick crossed the threshold.
    pub newly_lost: bool,
}

/// Per-decoder keep-alive state.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Supervision {
    period_ms: u64,
    max_missed: u32,
    missed: u32,
    armed: bool,
    next_due_ms: Option<u64>,
    restart: bool,
}

impl Supervision {
    /// Creates a disarmed supervision.
    pub fn new(period_ms: u64, max_missed: u32) -> Self {
        Self {
            period_ms: period_ms.max(1),
            max_missed: max_missed.max(1),
            missed: 0,
            armed: false,
            next_due_ms: None,
            restart: false,
        }
    }

    /// Updates the parameters; a new period applies from the next rearm.
    pub fn configure(&mut self, period_ms: u64, max_missed: u32) {
        self.period_ms = period_ms.max(1);
        self.max_missed = max_missed.max(1);
    }

    /// Starts the timer chain; the first poll schedules the first tick.
    pub fn arm(&mut self) {
        if !self.armed {
            self.armed = true;
            self.next_due_ms = None;
        }
    }

    /// Cancels the timer chain and resets the missed count.
    pub fn disarm(&mut self) {
        self.armed = false;
        self.next_due_ms = None;
        self.missed = 0;
    }

    /// Whether the timer chain is running.
    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Consecutive ticks without an upstream ping.
    pub fn missed(&self) -> u32 {
        self.missed
    }

    /// Threshold of missed pings.
    pub fn max_missed(&self) -> u32 {
        self.max_missed
    }

    /// Tick period.
    pub fn period_ms(&self) -> u64 {
        self.period_ms
    }

    /// Next scheduled tick.
    pub fn next_due_ms(&self) -> Option<u64> {
        self.next_due_ms
    }

    /// Whether a restart suppresses the next downstream ping.
    pub fn restart_pending(&self) -> bool {
        self.restart
    }

    /// Marks a reboot in progress.
    pub fn request_restart(&mut self) {
        self.restart = true;
    }

    /// Runs the tick if it is due at `now_ms`.
    pub fn poll(&mut self, now_ms: u64) -> Option<SupervisionTick> {
        if !self.armed {
            return None;
        }
        match self.next_due_ms {
            None => {
                self.next_due_ms = Some(now_ms + self.period_ms);
                None
            }
            Some(due) if now_ms >= due => Some(self.tick(now_ms)),
            Some(_) => None,
        }
    }

    fn tick(&mut self, now_ms: u64) -> SupervisionTick {
        self.missed = self.missed.saturating_add(1);
        self.next_due_ms = Some(now_ms + self.period_ms);
        let send_ping = !self.restart;
        self.restart = false;
        SupervisionTick {
            send_ping,
            missed: self.missed,
            lost: self.missed >= self.max_missed,
            newly_lost: self.missed == self.max_missed,
        }
    }

    /// Upstream ping received. Returns whether the decoder was considered lost.
    pub fn on_ping(&mut self) -> bool {
        let was_lost = self.missed >= self.max_missed;
        self.missed = 0;
        was_lost
    }
}
