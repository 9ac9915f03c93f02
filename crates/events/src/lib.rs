//! Domain events and their distribution.
//!
//! Mechanics only: the `Event` contract, the envelope that carries an event
//! with its stream metadata, and a pub/sub bus abstraction with an in-memory
//! implementation.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
