//! This module houses the event bus: one-way routing of typed lifecycle events from
//! workers to the control-plane server, and command events from the server to the
//! worker pool.
//!
//! Delivery is synchronous on the emitter's thread — handlers must be non-blocking or
//! defer work themselves. There is no event queue and no backpressure.

mod bus;
pub use bus::Bus;

mod events;
pub use events::{LifecycleEvent, QueueCommand};

/// A bus carrying worker-emitted lifecycle events out to subscribers (the
/// control-plane server).
pub type EventBus = Bus<LifecycleEvent>;

/// A bus carrying `queue` commands in from the control-plane server to the pool.
pub type CommandBus = Bus<QueueCommand>;
