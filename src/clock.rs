//! Clock abstraction (spec §9 Design Notes: explicit dependency injection,
//! no ambient globals). Every timestamp the engine stamps onto a ledger
//! entry, cursor or run record goes through this trait so tests can pin
//! time instead of racing `Utc::now()`.

use chrono::{DateTime, Utc};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[cfg(test)]
#[derive(Debug, Clone)]
pub struct FixedClock(pub std::sync::Arc<parking_lot::Mutex<DateTime<Utc>>>);

#[cfg(test)]
impl FixedClock {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self(std::sync::Arc::new(parking_lot::Mutex::new(at)))
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.0.lock() = at;
    }
}

#[cfg(test)]
impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock()
    }
}
