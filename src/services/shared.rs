//! Shared fleet state for all services.
//!
//! `SharedFleetState` provides thread-safe access to a single [`Fleet`]
//! that is shared between the REST API and the MQTT service.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use rs_trainz_fleet::config::Config;
//! use rs_trainz_fleet::fleet::Fleet;
//! use rs_trainz_fleet::services::SharedFleetState;
//! use rs_trainz_fleet::traits::NullRegistrar;
//!
//! let fleet = Fleet::new(&Config::default(), Box::new(NullRegistrar));
//! let state = Arc::new(SharedFleetState::new(fleet));
//!
//! // The MQTT service drives supervision with the shared time base
//! let now_ms = state.now_ms();
//! state.with_fleet(|fleet| fleet.tick(now_ms));
//! ```

use std::sync::{Mutex, PoisonError};

use crate::fleet::Fleet;
use crate::traits::{Clock, MonotonicClock};

/// Single fleet instance shared by every service.
///
/// Uses a `Mutex` rather than an `RwLock`: nearly every access mutates
/// (inbound traffic, supervision ticks, effect draining).
pub struct SharedFleetState {
    fleet: Mutex<Fleet>,
    clock: Box<dyn Clock>,
}

impl SharedFleetState {
    /// Wraps a fleet; time starts at zero now.
    pub fn new(fleet: Fleet) -> Self {
        Self::with_clock(fleet, MonotonicClock::new())
    }

    /// Wraps a fleet with an explicit time source.
    pub fn with_clock(fleet: Fleet, clock: impl Clock + 'static) -> Self {
        Self {
            fleet: Mutex::new(fleet),
            clock: Box::new(clock),
        }
    }

    /// Current time in milliseconds on the shared time base.
    #[inline]
    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Access the fleet with a mutable lock.
    ///
    /// The closure pattern prevents accidentally holding the lock across
    /// await points.
    pub fn with_fleet<R, F>(&self, f: F) -> R
    where
        F: FnOnce(&mut Fleet) -> R,
    {
        let mut guard = self.fleet.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }
}
