//! `wareflow-events`: event plumbing shared by every module.
//!
//! Event trait + envelope + pub/sub abstraction. No storage here; the event
//! store lives in `wareflow-infra`.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;
pub mod tenant;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
pub use tenant::TenantScoped;
