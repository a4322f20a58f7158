// behavior/navigation.rs

// Waypoint navigation: visits the world model's waypoints in order, steering
// toward each with a proportional heading controller, and finishes after the
// last one is reached.
// Arguments: 0 = cruise speed in [0, 1], 1 = arrival radius in meters.

use super::{steer, Behavior, BehaviorError, BehaviorStep};
use crate::core::entities::{self, Waypoint};
use crate::core::{geo, DroneCI};
use log::{debug, info};

/// Registry id
pub const BEHAVIOR_ID: &str = "waypoint_navigation";

const DEFAULT_SPEED: f64 = 0.6;
const DEFAULT_ARRIVAL_RADIUS_M: f64 = 3.0;
const HEADING_GAIN: f64 = 1.0 / 90.0;

/// Drives through the world model's waypoints
#[derive(Debug, Clone)]
pub struct WaypointNavigation {
    speed: f64,
    arrival_radius: f64,
    route: Vec<Waypoint>,
    next: usize,
}

impl Default for WaypointNavigation {
    fn default() -> Self {
        WaypointNavigation {
            speed: DEFAULT_SPEED,
            arrival_radius: DEFAULT_ARRIVAL_RADIUS_M,
            route: Vec::new(),
            next: 0,
        }
    }
}

impl WaypointNavigation {
    /// Waypoint currently steered toward
    pub fn current_target(&self) -> Option<&Waypoint> {
        self.route.get(self.next)
    }
}

impl Behavior for WaypointNavigation {
    fn id(&self) -> &str {
        BEHAVIOR_ID
    }

    fn start(&mut self, ci: &dyn DroneCI) -> Result<(), BehaviorError> {
        let snapshot = ci.entities();
        self.route = entities::waypoints(&snapshot).into_iter().cloned().collect();
        self.next = 0;
        info!("Navigating {} waypoints at speed {:.2}", self.route.len(), self.speed);
        Ok(())
    }

    fn step(&mut self, ci: &dyn DroneCI, _dt: f64) -> Result<BehaviorStep, BehaviorError> {
        let position = ci.position().ok_or(BehaviorError::MissingInput("GPS"))?;
        // skip every waypoint already inside the arrival radius
        while let Some(target) = self.route.get(self.next) {
            if geo::distance_m(position, target.position) > self.arrival_radius {
                break;
            }
            debug!("Reached waypoint {}", target.name);
            self.next += 1;
        }
        let Some(target) = self.route.get(self.next) else {
            return Ok(BehaviorStep::Finished);
        };
        let heading = ci
            .orientation_degrees()
            .ok_or(BehaviorError::MissingInput("compass"))?;
        let bearing = geo::bearing_degrees(position, target.position);
        let (left, right) = steer(geo::heading_error(heading, bearing), self.speed, HEADING_GAIN);
        Ok(BehaviorStep::Drive { left, right })
    }

    fn set_argument(&mut self, index: u32, value: f64) -> Result<(), BehaviorError> {
        let invalid = || BehaviorError::InvalidArgument {
            behavior: BEHAVIOR_ID.to_string(),
            index,
            value,
        };
        match index {
            0 if (0.0..=1.0).contains(&value) => self.speed = value,
            1 if value.is_finite() && value > 0.0 => self.arrival_radius = value,
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
        self.route.clear();
        ci.set_motor_speeds(0.0, 0.0);
    }
}
