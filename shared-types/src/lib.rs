//! This crate implements various shared types and helpers that we need access to in
//! multiple modules.

use serde::Deserialize;

/// One credentialed bot account that the proxy can drive through matchmaking.
///
/// The roster is loaded once at startup (see `authproxy-config`) and is fixed for the
/// lifetime of the process; `roster.len()` is the pool size.
#[derive(Clone, Debug, Deserialize)]
pub struct BotIdentity {
    pub uid: String,

    #[serde(alias = "playKey")]
    pub play_key: String,

    #[serde(alias = "connectCode")]
    pub connect_code: String,
}

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A thread-safe flag backed by an atomic boolean. This simply offers us
/// a more consistent and concise API for our purposes.
#[derive(Clone, Debug)]
pub struct Flag(Arc<AtomicBool>);

impl Flag {
    /// Initializes and returns a new `Flag`.
    pub fn new(val: bool) -> Self {
        Self(Arc::new(AtomicBool::new(val)))
    }

    /// Sets the value of this `Flag`.
    pub fn set(&self, val: bool) {
        self.0.store(val, Ordering::Release);
    }

    /// Gets the raw boolean value of this `Flag`.
    pub fn get(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_roundtrips() {
        let flag = Flag::new(false);
        assert!(!flag.get());
        flag.set(true);
        assert!(flag.get());
    }

    #[test]
    fn flag_clone_shares_state() {
        let flag = Flag::new(false);
        let clone = flag.clone();
        flag.set(true);
        assert!(clone.get());
    }
}
