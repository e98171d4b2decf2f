mod errors;
mod launch;
mod signals;

pub use errors::LaunchError;
pub use launch::{
    ConfigLoader, RunningServer, StaticConfigLoader, SystemConfigLoader, launch, run_server,
    run_server_with,
};
pub use signals::{SignalError, SignalHandlers, TERMINATION_SIGNALS};

pub(crate) const PROCESS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::process");
