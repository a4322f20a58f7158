// core/hardware.rs

// Real-hardware capability interface. Device drivers (compass, GPS, motor
// controller, indicator lights) are external collaborators plugged in through
// the traits below. Any of them may be missing or fail to initialize; the
// backend then runs degraded and reports the gap in its init report.

use super::entities::{Entity, EntityError, WorldModel};
use super::logger::CiLogger;
use super::{clamp_motor, geo, DroneCI, InitReport, LedState, SensorDescriptor, SensorKind};
use crate::DroneConfig;
use log::{info, warn};
use parking_lot::Mutex;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Heading source
pub trait CompassDriver: Send {
    /// Device name for diagnostics
    fn name(&self) -> &str;
    /// Opens the device
    fn init(&mut self) -> io::Result<()>;
    /// Magnetic heading in degrees
    fn heading_degrees(&mut self) -> io::Result<f64>;
}

/// One position fix
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GpsFix {
    /// Latitude in decimal degrees
    pub latitude: f64,
    /// Longitude in decimal degrees
    pub longitude: f64,
    /// Course over ground in degrees
    pub orientation: f64,
}

/// Position source
pub trait GpsDriver: Send {
    /// Device name for diagnostics
    fn name(&self) -> &str;
    /// Opens the device
    fn init(&mut self) -> io::Result<()>;
    /// Latest fix, `None` while the receiver has no fix
    fn read_fix(&mut self) -> io::Result<Option<GpsFix>>;
}

/// Propulsion
pub trait MotorDriver: Send {
    /// Device name for diagnostics
    fn name(&self) -> &str;
    /// Opens the device
    fn init(&mut self) -> io::Result<()>;
    /// Applies speeds already clamped to [-1, 1]
    fn set_speeds(&mut self, left: f64, right: f64) -> io::Result<()>;
}

/// Indicator lights
pub trait IndicatorDriver: Send {
    /// Device name for diagnostics
    fn name(&self) -> &str;
    /// Opens the device
    fn init(&mut self) -> io::Result<()>;
    /// Sets one light
    fn set(&mut self, index: usize, state: LedState) -> io::Result<()>;
}

/// Drivers available on this drone; `None` means not fitted
#[derive(Default)]
pub struct DriverSet {
    /// Compass
    pub compass: Option<Box<dyn CompassDriver>>,
    /// GPS receiver
    pub gps: Option<Box<dyn GpsDriver>>,
    /// Motor controller
    pub motors: Option<Box<dyn MotorDriver>>,
    /// Indicator lights
    pub indicators: Option<Box<dyn IndicatorDriver>>,
}

// Runs a driver's init and keeps it only on success
fn init_driver<D: ?Sized>(
    slot: &mut Option<Box<D>>,
    component: &str,
    report: &mut InitReport,
    name: impl Fn(&D) -> String,
    init: impl Fn(&mut D) -> io::Result<()>,
) -> Option<String> {
    let Some(driver) = slot.as_mut() else {
        report.unavailable(component, "no driver");
        return None;
    };
    let driver_name = name(&**driver);
    let label = format!("{} ({})", component, driver_name);
    match init(&mut **driver) {
        Ok(()) => {
            report.ok(label);
            None
        }
        Err(e) => {
            report.unavailable(label, e.to_string());
            *slot = None;
            Some(driver_name)
        }
    }
}

/// Capability interface backed by device drivers
pub struct HardwareDroneCI {
    drivers: Mutex<DriverSet>,
    world: Mutex<WorldModel>,
    motors: Mutex<(f64, f64)>,
    // sensors whose init failed, still listed as unavailable
    failed_sensors: Mutex<Vec<SensorDescriptor>>,
    started: Mutex<Option<Instant>>,
    logger: Mutex<Option<Arc<dyn CiLogger>>>,
    shut_down: AtomicBool,
}

impl HardwareDroneCI {
    /// Wraps a driver set; entities come from the operator's configuration
    pub fn new(drivers: DriverSet, entities: Vec<Entity>) -> Result<Self, EntityError> {
        Ok(HardwareDroneCI {
            drivers: Mutex::new(drivers),
            world: Mutex::new(WorldModel::from_entities(entities)?),
            motors: Mutex::new((0.0, 0.0)),
            failed_sensors: Mutex::new(Vec::new()),
            started: Mutex::new(None),
            logger: Mutex::new(None),
            shut_down: AtomicBool::new(false),
        })
    }

    fn read_fix(&self) -> Option<GpsFix> {
        let mut drivers = self.drivers.lock();
        let gps = drivers.gps.as_mut()?;
        match gps.read_fix() {
            Ok(fix) => fix,
            Err(e) => {
                warn!("GPS read failed: {}", e);
                None
            }
        }
    }

    fn apply_motors(&self, left: f64, right: f64) {
        *self.motors.lock() = (left, right);
        if let Some(motors) = self.drivers.lock().motors.as_mut() {
            if let Err(e) = motors.set_speeds(left, right) {
                warn!("Motor driver rejected ({:.2}, {:.2}): {}", left, right, e);
            }
        }
    }
}

impl DroneCI for HardwareDroneCI {
    fn begin(&self, _config: &DroneConfig, logger: Arc<dyn CiLogger>) -> InitReport {
        let mut report = InitReport::new();
        {
            let mut drivers = self.drivers.lock();
            let mut failed = Vec::new();
            let compass =
                init_driver(&mut drivers.compass, "Compass", &mut report, |d| d.name().to_string(), |d| d.init());
            let gps = init_driver(&mut drivers.gps, "GPS", &mut report, |d| d.name().to_string(), |d| d.init());
            for (name, kind) in [(compass, SensorKind::Compass), (gps, SensorKind::Gps)] {
                if let Some(name) = name {
                    failed.push(SensorDescriptor {
                        name,
                        kind,
                        available: false,
                    });
                }
            }
            *self.failed_sensors.lock() = failed;
            init_driver(&mut drivers.motors, "Motors", &mut report, |d| d.name().to_string(), |d| d.init());
            init_driver(
                &mut drivers.indicators,
                "Indicators",
                &mut report,
                |d| d.name().to_string(),
                |d| d.init(),
            );
        }
        *self.started.lock() = Some(Instant::now());
        self.shut_down.store(false, Ordering::Release);
        // start from a known-safe output
        self.apply_motors(0.0, 0.0);
        if report.is_degraded() {
            warn!("Hardware drone running in degraded mode");
        }
        logger.log_message("Hardware drone started");
        *self.logger.lock() = Some(logger);
        report
    }

    fn shutdown(&self) {
        self.apply_motors(0.0, 0.0);
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(logger) = self.logger.lock().take() {
            logger.log_message("# Shutting down hardware drone...");
            logger.stop_logging();
        }
        info!("Hardware drone stopped");
    }

    fn set_motor_speeds(&self, left: f64, right: f64) {
        if self.shut_down.load(Ordering::Acquire) {
            return;
        }
        self.apply_motors(clamp_motor(left), clamp_motor(right));
    }

    fn motor_speeds(&self) -> (f64, f64) {
        *self.motors.lock()
    }

    fn orientation_degrees(&self) -> Option<f64> {
        let mut drivers = self.drivers.lock();
        let compass = drivers.compass.as_mut()?;
        match compass.heading_degrees() {
            Ok(heading) => Some(geo::normalize_degrees(heading)),
            Err(e) => {
                warn!("Compass read failed: {}", e);
                None
            }
        }
    }

    fn latitude(&self) -> Option<f64> {
        self.read_fix().map(|f| f.latitude)
    }

    fn longitude(&self) -> Option<f64> {
        self.read_fix().map(|f| f.longitude)
    }

    fn gps_orientation_degrees(&self) -> Option<f64> {
        self.read_fix().map(|f| geo::normalize_degrees(f.orientation))
    }

    fn elapsed_seconds(&self) -> f64 {
        self.started
            .lock()
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }

    fn set_indicator(&self, index: usize, state: LedState) {
        if let Some(leds) = self.drivers.lock().indicators.as_mut() {
            if let Err(e) = leds.set(index, state) {
                warn!("Indicator {} update failed: {}", index, e);
            }
        }
    }

    fn entities(&self) -> Vec<Entity> {
        self.world.lock().snapshot()
    }

    fn sensors(&self) -> Vec<SensorDescriptor> {
        let drivers = self.drivers.lock();
        let mut sensors = Vec::new();
        if let Some(compass) = drivers.compass.as_ref() {
            sensors.push(SensorDescriptor {
                name: compass.name().to_string(),
                kind: SensorKind::Compass,
                available: true,
            });
        }
        if let Some(gps) = drivers.gps.as_ref() {
            sensors.push(SensorDescriptor {
                name: gps.name().to_string(),
                kind: SensorKind::Gps,
                available: true,
            });
        }
        sensors.extend(self.failed_sensors.lock().iter().cloned());
        sensors
    }

    fn position(&self) -> Option<crate::core::LatLon> {
        // one read keeps latitude and longitude from the same fix
        self.read_fix()
            .map(|f| crate::core::LatLon::new(f.latitude, f.longitude))
    }
}
