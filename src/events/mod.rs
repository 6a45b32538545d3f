pub mod event_bus;
pub mod types;

pub use event_bus::{EventBus, EventHandler};
pub use types::{Event, EventPayload, EventType, LevelDistance};
