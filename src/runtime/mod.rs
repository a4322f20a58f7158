// runtime/mod.rs

// Controller runtime: the shared state, the fixed-cadence control loop and the
// exactly-once shutdown path.

pub mod controller;
pub mod state;

pub use controller::{cycle_sleep, Controller, ShutdownGuard};
pub use state::{ArgumentOutcome, ControllerRuntimeState, ControllerStatus, RuntimeSnapshot};
