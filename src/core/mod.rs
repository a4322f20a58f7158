// core/mod.rs

// The capability interface ("common interface") that behavior code, the protocol
// layer and the broadcast layer are written against. Two variants implement it:
// a simulated backend driven by a kinematic model and a hardware backend driven
// by device drivers. Which one runs is decided once, at construction time.

pub mod entities;
pub mod geo;
pub mod hardware;
pub mod logger;
pub mod simulated;

// Re-export key types for a unified API
pub use entities::{
    Entity, EntityError, EntityKind, FormationTarget, GeoEntity, GeoFence, LatLon, MotionProfile,
    ObstacleLocation, Waypoint, WorldModel,
};
pub use hardware::{CompassDriver, DriverSet, GpsDriver, GpsFix, HardwareDroneCI, IndicatorDriver, MotorDriver};
pub use logger::{CiLogger, LogFacadeLogger, NoopLogger};
pub use simulated::SimulatedDroneCI;

use crate::DroneConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// State of an indicator light
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedState {
    /// Light off
    #[default]
    Off,
    /// Light on
    On,
    /// Light blinking
    Blinking,
}

/// What a sensor measures
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SensorKind {
    /// Magnetic heading
    Compass,
    /// Satellite position
    Gps,
    /// Anything a backend exposes beyond the standard set
    Other,
}

/// Capability description of one registered sensor
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SensorDescriptor {
    /// Sensor name as reported by the backend
    pub name: String,
    /// Measured quantity
    pub kind: SensorKind,
    /// Whether the sensor produced data at startup
    pub available: bool,
}

/// Outcome of initializing one component
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum InitStatus {
    /// Component is up
    Ok,
    /// Component is missing; the process keeps running without it
    Unavailable(String),
}

/// One line of the startup diagnostic
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InitEntry {
    /// Component name
    pub component: String,
    /// Result of its initialization
    pub status: InitStatus,
}

/// Startup diagnostic accumulated by `begin()` and the controller
///
/// Hardware and network components that fail to come up are recorded here
/// instead of aborting; the report is logged once and served as part of the
/// STATUS payload.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct InitReport {
    entries: Vec<InitEntry>,
}

impl InitReport {
    /// Empty report
    pub fn new() -> Self {
        InitReport::default()
    }

    /// Records a component that came up
    pub fn ok(&mut self, component: impl Into<String>) {
        self.entries.push(InitEntry {
            component: component.into(),
            status: InitStatus::Ok,
        });
    }

    /// Records a component that is absent, with the reason
    pub fn unavailable(&mut self, component: impl Into<String>, reason: impl Into<String>) {
        self.entries.push(InitEntry {
            component: component.into(),
            status: InitStatus::Unavailable(reason.into()),
        });
    }

    /// True if at least one component is unavailable
    pub fn is_degraded(&self) -> bool {
        self.entries
            .iter()
            .any(|e| matches!(e.status, InitStatus::Unavailable(_)))
    }

    /// Entries in insertion order
    pub fn entries(&self) -> &[InitEntry] {
        &self.entries
    }
}

impl fmt::Display for InitReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in &self.entries {
            match &entry.status {
                InitStatus::Ok => writeln!(f, "[INIT] {}: ok", entry.component)?,
                InitStatus::Unavailable(reason) => {
                    writeln!(f, "[INIT] {}: unavailable ({})", entry.component, reason)?
                }
            }
        }
        Ok(())
    }
}

/// Drone capability interface
///
/// Everything above this trait (behaviors, message providers, the control
/// loop, the broadcast layer) is backend agnostic. Implementations use
/// interior mutability so one instance can be shared between the control loop
/// (motor writer, pose reader) and message providers (readers only).
///
/// Sensor reads return `None` when the backing device is absent, which only
/// happens on the hardware variant running in degraded mode.
pub trait DroneCI: Send + Sync {
    /// Starts the backend; failures are reported, never fatal
    fn begin(&self, config: &DroneConfig, logger: Arc<dyn CiLogger>) -> InitReport;

    /// Stops the backend. Idempotent; motors are commanded to zero on every call.
    fn shutdown(&self);

    /// Sets motor speeds in [-1, 1]; out-of-range values saturate
    fn set_motor_speeds(&self, left: f64, right: f64);

    /// Last motor speeds issued to the backend
    fn motor_speeds(&self) -> (f64, f64);

    /// Compass heading in [0, 360)
    fn orientation_degrees(&self) -> Option<f64>;

    /// GPS latitude in decimal degrees
    fn latitude(&self) -> Option<f64>;

    /// GPS longitude in decimal degrees
    fn longitude(&self) -> Option<f64>;

    /// Course over ground reported by the GPS, in [0, 360)
    fn gps_orientation_degrees(&self) -> Option<f64>;

    /// Seconds since `begin()`, monotonic, 0 before it
    fn elapsed_seconds(&self) -> f64;

    /// Sets the state of indicator light `index`
    fn set_indicator(&self, index: usize, state: LedState);

    /// Snapshot of the world model
    fn entities(&self) -> Vec<Entity>;

    /// Registered sensors
    fn sensors(&self) -> Vec<SensorDescriptor>;

    /// Current position, when both coordinates are known
    fn position(&self) -> Option<LatLon> {
        Some(LatLon::new(self.latitude()?, self.longitude()?))
    }
}

/// Clamps a motor value to [-1, 1]; NaN becomes 0
pub fn clamp_motor(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(-1.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_report_display() {
        let mut report = InitReport::new();
        report.ok("ConnectionListener");
        report.unavailable("Compass", "no device");
        let text = report.to_string();
        assert!(text.contains("[INIT] ConnectionListener: ok"));
        assert!(text.contains("[INIT] Compass: unavailable (no device)"));
        assert!(report.is_degraded());
    }

    #[test]
    fn test_clamp_motor() {
        assert_eq!(clamp_motor(1.7), 1.0);
        assert_eq!(clamp_motor(-3.0), -1.0);
        assert_eq!(clamp_motor(0.25), 0.25);
        assert_eq!(clamp_motor(f64::NAN), 0.0);
    }
}
