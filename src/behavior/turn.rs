// behavior/turn.rs

// Rotates in place until the compass heading is within tolerance of a target.
// Arguments: 0 = target heading (degrees), 1 = tolerance (degrees).

use super::{steer, Behavior, BehaviorError, BehaviorStep};
use crate::core::{geo, DroneCI};
use log::info;

/// Registry id
pub const BEHAVIOR_ID: &str = "turn_to_orientation";

const DEFAULT_TOLERANCE_DEGREES: f64 = 5.0;
const TURN_GAIN: f64 = 1.0 / 45.0;

/// Turns to a compass heading
#[derive(Debug, Clone)]
pub struct TurnToOrientation {
    target: f64,
    tolerance: f64,
}

impl Default for TurnToOrientation {
    fn default() -> Self {
        TurnToOrientation {
            target: 0.0,
            tolerance: DEFAULT_TOLERANCE_DEGREES,
        }
    }
}

impl TurnToOrientation {
    /// Target heading in [0, 360)
    pub fn target(&self) -> f64 {
        self.target
    }
}

impl Behavior for TurnToOrientation {
    fn id(&self) -> &str {
        BEHAVIOR_ID
    }

    fn start(&mut self, _ci: &dyn DroneCI) -> Result<(), BehaviorError> {
        info!("Turning to {:.1} degrees (±{:.1})", self.target, self.tolerance);
        Ok(())
    }

    fn step(&mut self, ci: &dyn DroneCI, _dt: f64) -> Result<BehaviorStep, BehaviorError> {
        let heading = ci
            .orientation_degrees()
            .ok_or(BehaviorError::MissingInput("compass"))?;
        let error = geo::heading_error(heading, self.target);
        if error.abs() <= self.tolerance {
            return Ok(BehaviorStep::Finished);
        }
        // pure rotation: no forward component
        let (left, right) = steer(error, 0.0, TURN_GAIN);
        Ok(BehaviorStep::Drive { left, right })
    }

    fn set_argument(&mut self, index: u32, value: f64) -> Result<(), BehaviorError> {
        let invalid = || BehaviorError::InvalidArgument {
            behavior: BEHAVIOR_ID.to_string(),
            index,
            value,
        };
        match index {
            0 if value.is_finite() => self.target = geo::normalize_degrees(value),
            1 if value.is_finite() && value > 0.0 && value < 180.0 => self.tolerance = value,
            0 | 1 => return Err(invalid()),
            _ => {
                return Err(BehaviorError::UnknownArgument {
                    behavior: BEHAVIOR_ID.to_string(),
                    index,
                })
            }
        }
        Ok(())
    }

    fn cleanup(&mut self, ci: &dyn DroneCI) {
        ci.set_motor_speeds(0.0, 0.0);
    }
}
