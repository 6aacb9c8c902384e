pub mod config;
pub mod error;
pub mod events;
pub mod types;

pub use config::ActuatorConfig;
pub use error::{ActuatorError, Result};
pub use events::{ApprovedActionSignal, DomainEvent};
pub use types::*;
