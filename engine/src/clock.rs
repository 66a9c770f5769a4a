//! Server time source.
//!
//! Watermarks and `lastSynced` stamps must use the server's notion of time,
//! not the device clock, so incremental downloads do not skip records when
//! the two disagree.

use crate::{error::Result, Timestamp};
use chrono::Utc;

/// Supplies the authoritative server time.
pub trait ServerClock {
    /// Current server time. Usually fetched from the system-info endpoint.
    fn server_time(&self) -> Result<Timestamp>;
}

/// Uses the device clock. Suitable when the server time is unavailable.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl ServerClock for SystemClock {
    fn server_time(&self) -> Result<Timestamp> {
        Ok(Utc::now())
    }
}

/// Always returns the same instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedClock(pub Timestamp);

impl ServerClock for FixedClock {
    fn server_time(&self) -> Result<Timestamp> {
        Ok(self.0)
    }
}

impl<C: ServerClock + ?Sized> ServerClock for &C {
    fn server_time(&self) -> Result<Timestamp> {
        (**self).server_time()
    }
}
