// core/simulated.rs

// Simulated capability interface. A kinematic differential-drive model stands
// in for the environment: motor speeds set a forward speed and a turn rate, and
// the pose is integrated against wall-clock time whenever the backend is touched.

use super::entities::{Entity, EntityError, LatLon, WorldModel};
use super::geo;
use super::logger::CiLogger;
use super::{clamp_motor, DroneCI, InitReport, LedState, SensorDescriptor, SensorKind};
use crate::{DroneConfig, SimulationConfig};
use log::{debug, info};
use nalgebra::Vector2;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Number of indicator lights the simulated drone exposes
pub const SIMULATED_INDICATORS: usize = 4;

// Kinematic state: offset from the origin in meters (east, north) and heading
#[derive(Debug, Clone)]
struct SimState {
    origin: LatLon,
    offset: Vector2<f64>,
    heading: f64,
    left: f64,
    right: f64,
    started: Option<Instant>,
    last_update: Instant,
    indicators: [LedState; SIMULATED_INDICATORS],
}

impl SimState {
    fn new(config: &SimulationConfig) -> Self {
        SimState {
            origin: LatLon::new(config.start_latitude, config.start_longitude),
            offset: Vector2::zeros(),
            heading: geo::normalize_degrees(config.start_orientation),
            left: 0.0,
            right: 0.0,
            started: None,
            last_update: Instant::now(),
            indicators: [LedState::Off; SIMULATED_INDICATORS],
        }
    }

    /// Integrates the pose over `dt` seconds at the current motor speeds
    fn integrate(&mut self, dt: f64, max_speed: f64, max_turn_rate: f64) {
        if dt <= 0.0 {
            return;
        }
        let forward = (self.left + self.right) / 2.0 * max_speed;
        let turn = (self.left - self.right) / 2.0 * max_turn_rate;
        // midpoint heading keeps arcs from drifting outward
        let mid_heading = self.heading + turn * dt / 2.0;
        self.offset += geo::heading_vector(mid_heading) * forward * dt;
        self.heading = geo::normalize_degrees(self.heading + turn * dt);
    }

    fn position(&self) -> LatLon {
        geo::offset(self.origin, self.offset)
    }
}

/// Capability interface backed by a kinematic environment model
pub struct SimulatedDroneCI {
    config: SimulationConfig,
    state: Mutex<SimState>,
    world: Mutex<WorldModel>,
    logger: Mutex<Option<Arc<dyn CiLogger>>>,
    shut_down: AtomicBool,
}

impl SimulatedDroneCI {
    /// Creates a simulated drone; the world model is validated here
    pub fn new(config: &SimulationConfig) -> Result<Self, EntityError> {
        let world = WorldModel::from_entities(config.entities.clone())?;
        Ok(SimulatedDroneCI {
            config: config.clone(),
            state: Mutex::new(SimState::new(config)),
            world: Mutex::new(world),
            logger: Mutex::new(None),
            shut_down: AtomicBool::new(false),
        })
    }

    /// State of indicator `index`
    pub fn indicator(&self, index: usize) -> Option<LedState> {
        self.state.lock().indicators.get(index).copied()
    }

    // Brings the model up to the current instant and hands out the state
    fn with_state<R>(&self, f: impl FnOnce(&mut SimState) -> R) -> R {
        let mut state = self.state.lock();
        let now = Instant::now();
        let dt = now.duration_since(state.last_update).as_secs_f64();
        state.integrate(dt, self.config.max_speed_mps, self.config.max_turn_rate_dps);
        state.last_update = now;
        f(&mut state)
    }
}

impl DroneCI for SimulatedDroneCI {
    fn begin(&self, _config: &DroneConfig, logger: Arc<dyn CiLogger>) -> InitReport {
        let mut report = InitReport::new();
        {
            let mut state = self.state.lock();
            *state = SimState::new(&self.config);
            let now = Instant::now();
            state.started = Some(now);
            state.last_update = now;
        }
        self.shut_down.store(false, Ordering::Release);
        report.ok("Simulated environment");
        report.ok(format!("World model ({} entities)", self.world.lock().len()));
        logger.log_message("Simulated drone started");
        *self.logger.lock() = Some(logger);
        info!(
            "Simulated drone at {:.6}, {:.6} heading {:.1}",
            self.config.start_latitude, self.config.start_longitude, self.config.start_orientation
        );
        report
    }

    fn shutdown(&self) {
        self.with_state(|s| {
            s.left = 0.0;
            s.right = 0.0;
        });
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(logger) = self.logger.lock().take() {
            logger.log_message("# Shutting down simulated drone...");
            logger.stop_logging();
        }
        info!("Simulated drone stopped");
    }

    fn set_motor_speeds(&self, left: f64, right: f64) {
        if self.shut_down.load(Ordering::Acquire) {
            debug!("Ignoring motor command after shutdown");
            return;
        }
        self.with_state(|s| {
            s.left = clamp_motor(left);
            s.right = clamp_motor(right);
        });
    }

    fn motor_speeds(&self) -> (f64, f64) {
        let state = self.state.lock();
        (state.left, state.right)
    }

    fn orientation_degrees(&self) -> Option<f64> {
        Some(self.with_state(|s| s.heading))
    }

    fn latitude(&self) -> Option<f64> {
        Some(self.with_state(|s| s.position().lat))
    }

    fn longitude(&self) -> Option<f64> {
        Some(self.with_state(|s| s.position().lon))
    }

    fn gps_orientation_degrees(&self) -> Option<f64> {
        // no sensor noise model, course over ground equals heading
        self.orientation_degrees()
    }

    fn elapsed_seconds(&self) -> f64 {
        self.state
            .lock()
            .started
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }

    fn set_indicator(&self, index: usize, state: LedState) {
        let mut sim = self.state.lock();
        match sim.indicators.get_mut(index) {
            Some(led) => *led = state,
            None => debug!("Simulated drone has no indicator {}", index),
        }
    }

    fn entities(&self) -> Vec<Entity> {
        self.world.lock().snapshot()
    }

    fn sensors(&self) -> Vec<SensorDescriptor> {
        vec![
            SensorDescriptor {
                name: "simulated-compass".to_string(),
                kind: SensorKind::Compass,
                available: true,
            },
            SensorDescriptor {
                name: "simulated-gps".to_string(),
                kind: SensorKind::Gps,
                available: true,
            },
        ]
    }

    fn position(&self) -> Option<LatLon> {
        Some(self.with_state(|s| s.position()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::logger::NoopLogger;

    fn sim_config() -> SimulationConfig {
        SimulationConfig {
            start_latitude: 38.7,
            start_longitude: -9.1,
            start_orientation: 0.0,
            max_speed_mps: 2.0,
            max_turn_rate_dps: 90.0,
            entities: Vec::new(),
        }
    }

    #[test]
    fn test_integrate_straight_north() {
        let mut state = SimState::new(&sim_config());
        state.left = 1.0;
        state.right = 1.0;
        state.integrate(5.0, 2.0, 90.0);
        assert!((state.offset.y - 10.0).abs() < 1e-9);
        assert!(state.offset.x.abs() < 1e-9);
        assert!(state.position().lat > 38.7);
    }

    #[test]
    fn test_integrate_spin_in_place() {
        let mut state = SimState::new(&sim_config());
        state.left = 1.0;
        state.right = -1.0;
        state.integrate(1.0, 2.0, 90.0);
        assert!((state.heading - 90.0).abs() < 1e-9);
        assert!(state.offset.norm() < 1e-9);
    }

    #[test]
    fn test_motor_commands_are_clamped() {
        let sim = SimulatedDroneCI::new(&sim_config()).unwrap();
        sim.begin(&DroneConfig::default(), Arc::new(NoopLogger));
        sim.set_motor_speeds(3.0, -7.5);
        assert_eq!(sim.motor_speeds(), (1.0, -1.0));
    }

    #[test]
    fn test_shutdown_is_idempotent_and_zeroes_motors() {
        let sim = SimulatedDroneCI::new(&sim_config()).unwrap();
        sim.begin(&DroneConfig::default(), Arc::new(NoopLogger));
        sim.set_motor_speeds(0.5, 0.5);
        sim.shutdown();
        sim.shutdown();
        assert_eq!(sim.motor_speeds(), (0.0, 0.0));
        sim.set_motor_speeds(1.0, 1.0);
        assert_eq!(sim.motor_speeds(), (0.0, 0.0));
    }

    #[test]
    fn test_indicators() {
        let sim = SimulatedDroneCI::new(&sim_config()).unwrap();
        sim.set_indicator(2, LedState::Blinking);
        sim.set_indicator(SIMULATED_INDICATORS, LedState::On);
        assert_eq!(sim.indicator(2), Some(LedState::Blinking));
        assert_eq!(sim.indicator(0), Some(LedState::Off));
        assert_eq!(sim.indicator(SIMULATED_INDICATORS), None);
    }

    #[test]
    fn test_elapsed_is_zero_before_begin() {
        let sim = SimulatedDroneCI::new(&sim_config()).unwrap();
        assert_eq!(sim.elapsed_seconds(), 0.0);
        sim.begin(&DroneConfig::default(), Arc::new(NoopLogger));
        assert!(sim.elapsed_seconds() >= 0.0);
    }
}
