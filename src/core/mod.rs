pub mod clock;
pub mod delivery;
pub mod events;
pub mod orchestrator;
pub mod registry;

pub use delivery::DeliveryReport;
pub use events::{DomainEvent, EventPublisher, EventStream, event_queue};
pub use orchestrator::{Orchestrator, Services};
pub use registry::Registry;
