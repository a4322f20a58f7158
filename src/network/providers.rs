// network/providers.rs

// Payload sources for InfoRequest, keyed by data type. Providers only read:
// they hold the capability interface and the runtime state but never command
// anything through them.

use super::messages::{DataType, EntitySnapshot, GpsReading, InfoPayload, StatusReport};
use crate::core::DroneCI;
use crate::runtime::ControllerRuntimeState;
use std::sync::Arc;

/// Source of the current value for one data type
pub trait MessageProvider: Send {
    /// Data type served
    fn data_type(&self) -> DataType;

    /// Current value
    fn payload(&self) -> InfoPayload;
}

/// STATUS: controller status, active behavior, counters and diagnostics
pub struct StatusProvider {
    drone_id: String,
    runtime: Arc<ControllerRuntimeState>,
}

impl StatusProvider {
    /// Creates a provider for drone `drone_id`
    pub fn new(drone_id: impl Into<String>, runtime: Arc<ControllerRuntimeState>) -> Self {
        StatusProvider {
            drone_id: drone_id.into(),
            runtime,
        }
    }
}

impl MessageProvider for StatusProvider {
    fn data_type(&self) -> DataType {
        DataType::Status
    }

    fn payload(&self) -> InfoPayload {
        let snapshot = self.runtime.snapshot();
        InfoPayload::Status(StatusReport {
            drone_id: self.drone_id.clone(),
            status: snapshot.status.to_string(),
            active_behavior: snapshot.active_behavior,
            behavior_state: snapshot.behavior_state,
            timestep: snapshot.timestep,
            uptime_seconds: snapshot.uptime_seconds,
            motors: snapshot.motors,
            init: snapshot.init,
        })
    }
}

/// COMPASS: heading in degrees
pub struct CompassProvider {
    ci: Arc<dyn DroneCI>,
}

impl CompassProvider {
    /// Creates a provider reading from `ci`
    pub fn new(ci: Arc<dyn DroneCI>) -> Self {
        CompassProvider { ci }
    }
}

impl MessageProvider for CompassProvider {
    fn data_type(&self) -> DataType {
        DataType::Compass
    }

    fn payload(&self) -> InfoPayload {
        InfoPayload::Compass(self.ci.orientation_degrees())
    }
}

/// GPS: latitude, longitude and course
pub struct GpsProvider {
    ci: Arc<dyn DroneCI>,
}

impl GpsProvider {
    /// Creates a provider reading from `ci`
    pub fn new(ci: Arc<dyn DroneCI>) -> Self {
        GpsProvider { ci }
    }
}

impl MessageProvider for GpsProvider {
    fn data_type(&self) -> DataType {
        DataType::Gps
    }

    fn payload(&self) -> InfoPayload {
        let position = self.ci.position();
        InfoPayload::Gps(GpsReading {
            latitude: position.map(|p| p.lat),
            longitude: position.map(|p| p.lon),
            orientation: self.ci.gps_orientation_degrees(),
        })
    }
}

/// ENTITIES: world model snapshot
pub struct EntitiesProvider {
    ci: Arc<dyn DroneCI>,
}

impl EntitiesProvider {
    /// Creates a provider reading from `ci`
    pub fn new(ci: Arc<dyn DroneCI>) -> Self {
        EntitiesProvider { ci }
    }
}

impl MessageProvider for EntitiesProvider {
    fn data_type(&self) -> DataType {
        DataType::Entities
    }

    fn payload(&self) -> InfoPayload {
        InfoPayload::Entities(EntitySnapshot::from_entities(self.ci.entities()))
    }
}

/// SENSORS: registered sensor descriptors
pub struct SensorsProvider {
    ci: Arc<dyn DroneCI>,
}

impl SensorsProvider {
    /// Creates a provider reading from `ci`
    pub fn new(ci: Arc<dyn DroneCI>) -> Self {
        SensorsProvider { ci }
    }
}

impl MessageProvider for SensorsProvider {
    fn data_type(&self) -> DataType {
        DataType::Sensors
    }

    fn payload(&self) -> InfoPayload {
        InfoPayload::Sensors(self.ci.sensors())
    }
}

/// The standard provider set for a controller
pub fn standard_providers(
    drone_id: &str,
    ci: Arc<dyn DroneCI>,
    runtime: Arc<ControllerRuntimeState>,
) -> Vec<Box<dyn MessageProvider>> {
    vec![
        Box::new(StatusProvider::new(drone_id, runtime)),
        Box::new(CompassProvider::new(ci.clone())),
        Box::new(GpsProvider::new(ci.clone())),
        Box::new(EntitiesProvider::new(ci.clone())),
        Box::new(SensorsProvider::new(ci)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{NoopLogger, SimulatedDroneCI};
    use crate::{DroneConfig, SimulationConfig};

    #[test]
    fn test_standard_providers_cover_every_type() {
        let ci: Arc<dyn DroneCI> = Arc::new(SimulatedDroneCI::new(&SimulationConfig::default()).unwrap());
        let providers = standard_providers("d", ci, Arc::new(ControllerRuntimeState::new()));
        let mut types: Vec<DataType> = providers.iter().map(|p| p.data_type()).collect();
        types.sort();
        assert_eq!(types, DataType::ALL.to_vec());
    }

    #[test]
    fn test_status_reflects_runtime() {
        let runtime = Arc::new(ControllerRuntimeState::new());
        runtime.set_motor_targets(0.25, -0.5);
        let provider = StatusProvider::new("boat-1", runtime);
        match provider.payload() {
            InfoPayload::Status(report) => {
                assert_eq!(report.drone_id, "boat-1");
                assert_eq!(report.status, "Starting");
                assert_eq!(report.motors, (0.25, -0.5));
                assert_eq!(report.active_behavior, None);
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_gps_reads_simulated_start() {
        let sim = SimulatedDroneCI::new(&SimulationConfig {
            start_latitude: 38.7,
            start_longitude: -9.1,
            start_orientation: 42.0,
            ..SimulationConfig::default()
        })
        .unwrap();
        sim.begin(&DroneConfig::default(), Arc::new(NoopLogger));
        let provider = GpsProvider::new(Arc::new(sim));
        match provider.payload() {
            InfoPayload::Gps(reading) => {
                assert!((reading.latitude.unwrap() - 38.7).abs() < 1e-9);
                assert!((reading.longitude.unwrap() + 9.1).abs() < 1e-9);
                assert!((reading.orientation.unwrap() - 42.0).abs() < 1e-9);
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }
}
