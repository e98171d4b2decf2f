//! Graceful shutdown: readiness confirmation followed by connection drain.

mod completion;
mod confirmation;
mod coordinator;
mod settings;

pub use completion::{ShutdownCompletion, ShutdownOutcome};
pub use coordinator::DrainCoordinator;
pub use settings::DrainSettings;
