// runtime/state.rs

// State shared between the control loop and the dispatcher. A single mutex
// guards the motor targets and the active behavior, so a behavior switch
// (cleanup of the old one, start of the new one) is one critical section and
// the control loop can never step a half-switched behavior. The lock is never
// held across a sleep or a socket wait.

use crate::behavior::{Behavior, BehaviorError, BehaviorState, BehaviorStep};
use crate::core::{clamp_motor, DroneCI, InitReport};
use log::{error, info, warn};
use parking_lot::Mutex;
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::time::Instant;

/// Human-readable controller status
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControllerStatus {
    /// Constructed, not yet looping
    Starting,
    /// Control loop active
    Running,
    /// Cleanup in progress or done
    ShuttingDown,
}

impl fmt::Display for ControllerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ControllerStatus::Starting => "Starting",
            ControllerStatus::Running => "Running",
            ControllerStatus::ShuttingDown => "Shutting down",
        };
        f.write_str(text)
    }
}

struct ActiveBehavior {
    behavior: Box<dyn Behavior>,
    state: BehaviorState,
}

struct Inner {
    left: f64,
    right: f64,
    active: Option<ActiveBehavior>,
    timestep: u64,
    status: ControllerStatus,
    init: InitReport,
}

/// Point-in-time copy of the runtime state, used by the STATUS provider
#[derive(Clone, Debug, PartialEq)]
pub struct RuntimeSnapshot {
    /// Controller status
    pub status: ControllerStatus,
    /// Active behavior id
    pub active_behavior: Option<String>,
    /// Active behavior lifecycle state; `Idle` when none
    pub behavior_state: BehaviorState,
    /// Completed cycles
    pub timestep: u64,
    /// Seconds since construction
    pub uptime_seconds: f64,
    /// Motor targets
    pub motors: (f64, f64),
    /// Startup diagnostic
    pub init: InitReport,
}

/// Result of a `set_argument` command
#[derive(Debug, PartialEq)]
pub enum ArgumentOutcome {
    /// Forwarded and accepted
    Applied,
    /// The named behavior is not the active one
    NotActive {
        /// Id of the behavior that is active, if any
        active: Option<String>,
    },
}

/// Motor targets and the single active behavior
pub struct ControllerRuntimeState {
    inner: Mutex<Inner>,
    start_time: Instant,
}

impl ControllerRuntimeState {
    /// Idle state: no behavior, motors at zero
    pub fn new() -> Self {
        ControllerRuntimeState {
            inner: Mutex::new(Inner {
                left: 0.0,
                right: 0.0,
                active: None,
                timestep: 0,
                status: ControllerStatus::Starting,
                init: InitReport::new(),
            }),
            start_time: Instant::now(),
        }
    }

    /// Sets motor targets; values are clamped to [-1, 1]
    ///
    /// Ignored once shutdown has begun, so the targets stay at zero.
    pub fn set_motor_targets(&self, left: f64, right: f64) {
        let mut inner = self.inner.lock();
        if inner.status == ControllerStatus::ShuttingDown {
            return;
        }
        inner.left = clamp_motor(left);
        inner.right = clamp_motor(right);
    }

    /// Enters the shutting-down status, stops the active behavior and zeroes
    /// the motor targets, all under one lock
    pub fn begin_shutdown(&self, ci: &dyn DroneCI) -> Option<String> {
        let mut inner = self.inner.lock();
        inner.status = ControllerStatus::ShuttingDown;
        let stopped = stop_active(&mut inner, ci);
        inner.left = 0.0;
        inner.right = 0.0;
        stopped
    }

    /// Current motor targets
    pub fn motor_targets(&self) -> (f64, f64) {
        let inner = self.inner.lock();
        (inner.left, inner.right)
    }

    /// Id of the running behavior
    pub fn active_behavior(&self) -> Option<String> {
        self.inner
            .lock()
            .active
            .as_ref()
            .map(|a| a.behavior.id().to_string())
    }

    /// Completed control cycles
    pub fn timestep(&self) -> u64 {
        self.inner.lock().timestep
    }

    /// Controller status
    pub fn status(&self) -> ControllerStatus {
        self.inner.lock().status
    }

    /// Updates the controller status
    pub fn set_status(&self, status: ControllerStatus) {
        self.inner.lock().status = status;
    }

    /// Stores the startup diagnostic
    pub fn set_init_report(&self, report: InitReport) {
        self.inner.lock().init = report;
    }

    /// Time since the state was created
    pub fn uptime_seconds(&self) -> f64 {
        self.start_time.elapsed().as_secs_f64()
    }

    /// Copy of everything the STATUS payload reports
    pub fn snapshot(&self) -> RuntimeSnapshot {
        let inner = self.inner.lock();
        RuntimeSnapshot {
            status: inner.status,
            active_behavior: inner.active.as_ref().map(|a| a.behavior.id().to_string()),
            behavior_state: inner
                .active
                .as_ref()
                .map_or(BehaviorState::Idle, |a| a.state),
            timestep: inner.timestep,
            uptime_seconds: self.uptime_seconds(),
            motors: (inner.left, inner.right),
            init: inner.init.clone(),
        }
    }

    /// Stops the running behavior, if any, then starts `behavior`
    ///
    /// Returns the id of the behavior that was replaced. If `start` fails the
    /// new behavior is cleaned up and nothing is left running.
    pub fn activate(
        &self,
        mut behavior: Box<dyn Behavior>,
        ci: &dyn DroneCI,
    ) -> Result<Option<String>, BehaviorError> {
        let mut inner = self.inner.lock();
        if inner.status == ControllerStatus::ShuttingDown {
            return Err(BehaviorError::ShuttingDown);
        }
        let replaced = stop_active(&mut inner, ci);
        if let Err(e) = behavior.start(ci) {
            behavior.cleanup(ci);
            return Err(e);
        }
        info!("Behavior {} started", behavior.id());
        inner.active = Some(ActiveBehavior {
            behavior,
            state: BehaviorState::Running,
        });
        Ok(replaced)
    }

    /// Stops the running behavior only if its id is `id`
    pub fn deactivate(&self, id: &str, ci: &dyn DroneCI) -> bool {
        let mut inner = self.inner.lock();
        match inner.active.as_ref() {
            Some(active) if active.behavior.id() == id => {
                stop_active(&mut inner, ci);
                true
            }
            _ => false,
        }
    }

    /// Stops whatever is running
    pub fn stop_behavior(&self, ci: &dyn DroneCI) -> Option<String> {
        stop_active(&mut self.inner.lock(), ci)
    }

    /// Forwards an argument to the running behavior if it is `id`
    pub fn set_argument(&self, id: &str, index: u32, value: f64) -> Result<ArgumentOutcome, BehaviorError> {
        let mut inner = self.inner.lock();
        match inner.active.as_mut() {
            Some(active) if active.behavior.id() == id => {
                active.behavior.set_argument(index, value)?;
                Ok(ArgumentOutcome::Applied)
            }
            other => Ok(ArgumentOutcome::NotActive {
                active: other.map(|a| a.behavior.id().to_string()),
            }),
        }
    }

    /// One control-cycle step of the active behavior
    ///
    /// Drive outputs become the motor targets. A finished, failing or panicking
    /// behavior is stopped and cleaned up here; the fault never leaves this call.
    /// Returns the motor targets to apply.
    pub fn step_behavior(&self, ci: &dyn DroneCI, dt: f64) -> (f64, f64) {
        let mut inner = self.inner.lock();
        inner.timestep += 1;
        let Some(active) = inner.active.as_mut() else {
            return (inner.left, inner.right);
        };
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| active.behavior.step(ci, dt)));
        match outcome {
            Ok(Ok(BehaviorStep::Drive { left, right })) => {
                inner.left = clamp_motor(left);
                inner.right = clamp_motor(right);
            }
            Ok(Ok(BehaviorStep::Hold)) => {}
            Ok(Ok(BehaviorStep::Finished)) => {
                active.state = BehaviorState::Terminating;
                info!("Behavior {} finished", active.behavior.id());
                stop_active(&mut inner, ci);
            }
            Ok(Err(e)) => {
                error!("Behavior {} failed: {}", active.behavior.id(), e);
                stop_active(&mut inner, ci);
            }
            Err(payload) => {
                let e = BehaviorError::Panicked {
                    behavior: active.behavior.id().to_string(),
                    message: panic_message(payload.as_ref()),
                };
                error!("{}", e);
                stop_active(&mut inner, ci);
            }
        }
        (inner.left, inner.right)
    }
}

impl Default for ControllerRuntimeState {
    fn default() -> Self {
        ControllerRuntimeState::new()
    }
}

// Cleanup runs exactly once per behavior: the instance is taken out first.
// Motor targets return to zero so nothing keeps driving on a stale command.
fn stop_active(inner: &mut Inner, ci: &dyn DroneCI) -> Option<String> {
    let mut active = inner.active.take()?;
    let id = active.behavior.id().to_string();
    active.state = BehaviorState::Terminating;
    if panic::catch_unwind(AssertUnwindSafe(|| active.behavior.cleanup(ci))).is_err() {
        warn!("Behavior {} panicked during cleanup", id);
    }
    inner.left = 0.0;
    inner.right = 0.0;
    info!("Behavior {} stopped", id);
    Some(id)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{NoopLogger, SimulatedDroneCI};
    use crate::{DroneConfig, SimulationConfig};
    use std::sync::Arc;

    // Steps a fixed number of times, counting cleanups through a shared cell
    struct Scripted {
        id: &'static str,
        remaining: u32,
        cleanups: Arc<Mutex<u32>>,
        fail: bool,
    }

    impl Behavior for Scripted {
        fn id(&self) -> &str {
            self.id
        }

        fn step(&mut self, _ci: &dyn DroneCI, _dt: f64) -> Result<BehaviorStep, BehaviorError> {
            if self.fail {
                panic!("scripted fault");
            }
            if self.remaining == 0 {
                return Ok(BehaviorStep::Finished);
            }
            self.remaining -= 1;
            Ok(BehaviorStep::Drive { left: 0.4, right: 0.2 })
        }

        fn set_argument(&mut self, index: u32, _value: f64) -> Result<(), BehaviorError> {
            Err(BehaviorError::UnknownArgument {
                behavior: self.id.to_string(),
                index,
            })
        }

        fn cleanup(&mut self, _ci: &dyn DroneCI) {
            *self.cleanups.lock() += 1;
        }
    }

    fn ci() -> SimulatedDroneCI {
        let sim = SimulatedDroneCI::new(&SimulationConfig::default()).unwrap();
        sim.begin(&DroneConfig::default(), Arc::new(NoopLogger));
        sim
    }

    fn scripted(id: &'static str, steps: u32, cleanups: &Arc<Mutex<u32>>) -> Box<dyn Behavior> {
        Box::new(Scripted {
            id,
            remaining: steps,
            cleanups: cleanups.clone(),
            fail: false,
        })
    }

    #[test]
    fn test_finished_behavior_is_cleaned_up_once() {
        let ci = ci();
        let state = ControllerRuntimeState::new();
        let cleanups = Arc::new(Mutex::new(0));
        state.activate(scripted("a", 1, &cleanups), &ci).unwrap();
        assert_eq!(state.step_behavior(&ci, 0.1), (0.4, 0.2));
        assert_eq!(state.step_behavior(&ci, 0.1), (0.0, 0.0));
        state.step_behavior(&ci, 0.1);
        assert_eq!(*cleanups.lock(), 1);
        assert_eq!(state.active_behavior(), None);
        assert_eq!(state.timestep(), 3);
    }

    #[test]
    fn test_panicking_behavior_is_force_stopped() {
        let ci = ci();
        let state = ControllerRuntimeState::new();
        let cleanups = Arc::new(Mutex::new(0));
        let faulty = Box::new(Scripted {
            id: "faulty",
            remaining: 5,
            cleanups: cleanups.clone(),
            fail: true,
        });
        state.activate(faulty, &ci).unwrap();
        state.step_behavior(&ci, 0.1);
        assert_eq!(state.active_behavior(), None);
        assert_eq!(*cleanups.lock(), 1);
    }

    #[test]
    fn test_set_argument_targets_active_only() {
        let ci = ci();
        let state = ControllerRuntimeState::new();
        let cleanups = Arc::new(Mutex::new(0));
        state.activate(scripted("a", 10, &cleanups), &ci).unwrap();
        assert_eq!(
            state.set_argument("b", 0, 1.0).unwrap(),
            ArgumentOutcome::NotActive {
                active: Some("a".to_string())
            }
        );
        assert!(state.set_argument("a", 0, 1.0).is_err());
    }

    #[test]
    fn test_deactivate_ignores_other_ids() {
        let ci = ci();
        let state = ControllerRuntimeState::new();
        let cleanups = Arc::new(Mutex::new(0));
        state.activate(scripted("a", 10, &cleanups), &ci).unwrap();
        assert!(!state.deactivate("b", &ci));
        assert!(state.deactivate("a", &ci));
        assert_eq!(*cleanups.lock(), 1);
    }

    #[test]
    fn test_shutdown_pins_motors_at_zero() {
        let ci = ci();
        let state = ControllerRuntimeState::new();
        let cleanups = Arc::new(Mutex::new(0));
        state.activate(scripted("a", 10, &cleanups), &ci).unwrap();
        state.set_motor_targets(0.7, 0.7);
        assert_eq!(state.begin_shutdown(&ci).as_deref(), Some("a"));
        state.set_motor_targets(0.9, 0.9);
        assert_eq!(state.motor_targets(), (0.0, 0.0));
        assert!(state.activate(scripted("b", 1, &cleanups), &ci).is_err());
        assert_eq!(*cleanups.lock(), 1);
    }

    #[test]
    fn test_status_display() {
        assert_eq!(ControllerStatus::ShuttingDown.to_string(), "Shutting down");
    }
}
