// behavior/mod.rs

// Behavior engine. A behavior is a steppable control strategy that produces
// motor targets each control cycle. Behaviors are created by id from a
// registry, so a BehaviorCommand received over the network resolves to a fresh
// instance. The runtime owns the single active instance; see runtime/state.rs.

pub mod navigation;
pub mod turn;

pub use navigation::WaypointNavigation;
pub use turn::TurnToOrientation;

use crate::core::DroneCI;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Outcome of one behavior step
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum BehaviorStep {
    /// Keep running with these motor targets
    Drive {
        /// Left motor target in [-1, 1]
        left: f64,
        /// Right motor target in [-1, 1]
        right: f64,
    },
    /// Keep running, leave the motor targets untouched
    Hold,
    /// Done; the runtime stops the behavior and runs its cleanup
    Finished,
}

/// Lifecycle of a behavior instance
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BehaviorState {
    /// Not started, or cleaned up
    Idle,
    /// Stepped every cycle
    Running,
    /// Step reported completion, cleanup pending
    Terminating,
}

impl fmt::Display for BehaviorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BehaviorState::Idle => "idle",
            BehaviorState::Running => "running",
            BehaviorState::Terminating => "terminating",
        };
        f.write_str(name)
    }
}

/// Behavior faults
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BehaviorError {
    /// The behavior has no argument at this index
    #[error("behavior {behavior} has no argument {index}")]
    UnknownArgument {
        /// Behavior id
        behavior: String,
        /// Requested index
        index: u32,
    },
    /// Argument value out of its accepted range
    #[error("argument {index} of {behavior} rejects value {value}")]
    InvalidArgument {
        /// Behavior id
        behavior: String,
        /// Argument index
        index: u32,
        /// Rejected value
        value: f64,
    },
    /// A required input (compass, GPS) is unavailable
    #[error("{0} unavailable")]
    MissingInput(&'static str),
    /// The controller is shutting down and accepts no new behavior
    #[error("controller is shutting down")]
    ShuttingDown,
    /// The step panicked
    #[error("behavior {behavior} panicked: {message}")]
    Panicked {
        /// Behavior id
        behavior: String,
        /// Panic payload, when it was a string
        message: String,
    },
}

/// Steppable control strategy
///
/// The runtime calls `start` once on activation, `step` once per control cycle
/// while running, and `cleanup` exactly once when the behavior leaves the
/// running state (finished, replaced, deactivated, faulted or shut down).
pub trait Behavior: Send {
    /// Registry id
    fn id(&self) -> &str;

    /// Called once before the first step
    fn start(&mut self, _ci: &dyn DroneCI) -> Result<(), BehaviorError> {
        Ok(())
    }

    /// Advances the behavior by `dt` seconds
    fn step(&mut self, ci: &dyn DroneCI, dt: f64) -> Result<BehaviorStep, BehaviorError>;

    /// Updates a numbered argument
    fn set_argument(&mut self, index: u32, value: f64) -> Result<(), BehaviorError>;

    /// Releases whatever the behavior holds
    fn cleanup(&mut self, _ci: &dyn DroneCI) {}
}

/// Factory producing a fresh behavior instance
pub type BehaviorFactory = Box<dyn Fn() -> Box<dyn Behavior> + Send + Sync>;

/// Maps behavior ids to factories
pub struct BehaviorRegistry {
    factories: BTreeMap<String, BehaviorFactory>,
}

impl BehaviorRegistry {
    /// Empty registry
    pub fn new() -> Self {
        BehaviorRegistry {
            factories: BTreeMap::new(),
        }
    }

    /// Registry with the built-in behaviors
    pub fn with_builtin() -> Self {
        let mut registry = BehaviorRegistry::new();
        registry.register(navigation::BEHAVIOR_ID, || {
            Box::new(WaypointNavigation::default())
        });
        registry.register(turn::BEHAVIOR_ID, || Box::new(TurnToOrientation::default()));
        registry
    }

    /// Adds or replaces the factory for `id`
    pub fn register<F>(&mut self, id: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn Behavior> + Send + Sync + 'static,
    {
        self.factories.insert(id.into(), Box::new(factory));
    }

    /// Fresh instance of `id`, if registered
    pub fn create(&self, id: &str) -> Option<Box<dyn Behavior>> {
        self.factories.get(id).map(|factory| factory())
    }

    /// Whether `id` is registered
    pub fn contains(&self, id: &str) -> bool {
        self.factories.contains_key(id)
    }

    /// Registered ids in sorted order
    pub fn ids(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }
}

impl Default for BehaviorRegistry {
    fn default() -> Self {
        BehaviorRegistry::with_builtin()
    }
}

// Differential steering toward a heading error; positive error turns clockwise
pub(crate) fn steer(heading_error: f64, speed: f64, gain: f64) -> (f64, f64) {
    let turn = (heading_error * gain).clamp(-1.0, 1.0);
    let forward = speed * (1.0 - turn.abs()).max(0.0);
    (
        crate::core::clamp_motor(forward + turn),
        crate::core::clamp_motor(forward - turn),
    )
}
