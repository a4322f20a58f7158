// runtime/controller.rs

// The drone controller: brings up the capability interface, the three
// listeners, the dispatcher and the broadcast layer, then runs the fixed-cadence
// control loop. Each cycle steps the active behavior, applies the motor targets,
// drives the broadcast layer and sleeps for whatever is left of the cycle.
// A slow cycle simply sleeps zero; later cycles are never shortened to catch up.
//
// Shutdown runs exactly once no matter how many triggers fire (signal handler,
// ShutdownGuard drop, explicit call).

use crate::behavior::BehaviorRegistry;
use crate::core::{CiLogger, DriverSet, DroneCI, HardwareDroneCI, InitReport, SimulatedDroneCI};
use crate::network::broadcast::{BroadcastHandler, HeartbeatBroadcast, UdpSink};
use crate::network::dispatcher::{dispatch_queue, MessageDispatcher};
use crate::network::listener::{ConnectionListener, ListenerOptions};
use crate::network::messages::MessageClass;
use crate::network::providers::standard_providers;
use crate::runtime::state::{ControllerRuntimeState, ControllerStatus};
use crate::{Backend, DroneConfig, DroneError, Result};
use crossbeam::channel::Sender;
use log::{info, warn};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Sleep for the remainder of a cycle: `cycle - spent`, never negative
pub fn cycle_sleep(cycle: Duration, spent: Duration) -> Duration {
    cycle.saturating_sub(spent)
}

struct DispatcherHandle {
    stop: Sender<()>,
    thread: JoinHandle<()>,
}

/// Drone controller
pub struct Controller {
    config: DroneConfig,
    ci: Arc<dyn DroneCI>,
    runtime: Arc<ControllerRuntimeState>,
    registry: Arc<BehaviorRegistry>,
    logger: Arc<dyn CiLogger>,
    listeners: Mutex<Vec<ConnectionListener>>,
    dispatcher: Mutex<Option<DispatcherHandle>>,
    broadcast: Mutex<BroadcastHandler>,
    last_cycle: Mutex<Option<Instant>>,
    stop_requested: Arc<AtomicBool>,
    shut_down: AtomicBool,
}

impl Controller {
    /// Creates a controller over an existing capability interface
    pub fn new(
        config: DroneConfig,
        ci: Arc<dyn DroneCI>,
        registry: BehaviorRegistry,
        logger: Arc<dyn CiLogger>,
    ) -> Self {
        Controller {
            config,
            ci,
            runtime: Arc::new(ControllerRuntimeState::new()),
            registry: Arc::new(registry),
            logger,
            listeners: Mutex::new(Vec::new()),
            dispatcher: Mutex::new(None),
            broadcast: Mutex::new(BroadcastHandler::disabled()),
            last_cycle: Mutex::new(None),
            stop_requested: Arc::new(AtomicBool::new(false)),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Creates a controller with the backend selected in `config`
    ///
    /// The hardware backend starts with an empty driver set; drivers are
    /// plugged in by embedding applications through [`Controller::new`].
    pub fn from_config(config: DroneConfig, logger: Arc<dyn CiLogger>) -> Result<Self> {
        let ci: Arc<dyn DroneCI> = match config.drone.backend {
            Backend::Simulated => Arc::new(SimulatedDroneCI::new(&config.simulation)?),
            Backend::Hardware => Arc::new(HardwareDroneCI::new(
                DriverSet::default(),
                config.simulation.entities.clone(),
            )?),
        };
        Ok(Controller::new(config, ci, BehaviorRegistry::with_builtin(), logger))
    }

    /// Shared runtime state
    pub fn runtime(&self) -> &Arc<ControllerRuntimeState> {
        &self.runtime
    }

    /// Capability interface
    pub fn ci(&self) -> &Arc<dyn DroneCI> {
        &self.ci
    }

    /// Flag that ends `run` when set; handed to signal handlers
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop_requested.clone()
    }

    /// Asks the control loop to return after the current cycle
    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
    }

    /// Bound address of the listener for `class`
    pub fn listener_addr(&self, class: MessageClass) -> Option<SocketAddr> {
        self.listeners
            .lock()
            .iter()
            .find(|l| l.class() == class)
            .map(|l| l.local_addr())
    }

    /// Starts the backend and every network component
    ///
    /// Hardware and broadcast problems are recorded in the returned report and
    /// tolerated. Failure to bind any of the three TCP endpoints is fatal and
    /// returned as [`DroneError::Bind`]; whatever was started stays owned by the
    /// controller and is released by [`Controller::shutdown`].
    pub fn begin(&self) -> Result<InitReport> {
        let mut report = self.ci.begin(&self.config, self.logger.clone());

        let (queue, inbound) = dispatch_queue();
        let (stop, stop_signal) = crossbeam::channel::bounded(1);
        let mut dispatcher =
            MessageDispatcher::new(self.runtime.clone(), self.registry.clone(), self.ci.clone());
        for provider in standard_providers(&self.config.drone.id, self.ci.clone(), self.runtime.clone()) {
            dispatcher.register_provider(provider);
        }
        let thread = dispatcher.spawn(inbound, stop_signal)?;
        *self.dispatcher.lock() = Some(DispatcherHandle {
            stop,
            thread,
        });

        let network = &self.config.network;
        let options = ListenerOptions {
            read_timeout: network.read_timeout(),
            write_timeout: network.write_timeout(),
            max_frame_bytes: network.max_frame_bytes,
        };
        for class in MessageClass::ALL {
            let port = match class {
                MessageClass::Info => network.info_port,
                MessageClass::Motor => network.motor_port,
                MessageClass::Behavior => network.command_port,
            };
            let addr = SocketAddr::new(network.bind_address, port);
            let listener = ConnectionListener::bind(class, addr, queue.clone(), options)?;
            report.ok(format!("ConnectionListener({} on {})", class.name(), listener.local_addr()));
            self.listeners.lock().push(listener);
        }

        let target = SocketAddr::new(network.broadcast_address, network.broadcast_port);
        match UdpSink::bind(target) {
            Ok(sink) => {
                let mut broadcast = BroadcastHandler::new(Box::new(sink));
                broadcast.add(Box::new(HeartbeatBroadcast::new(
                    self.config.drone.id.clone(),
                    self.listener_addr(MessageClass::Info),
                    self.config.runtime.heartbeat_interval(),
                    self.runtime.clone(),
                    self.ci.clone(),
                )));
                *self.broadcast.lock() = broadcast;
                report.ok(format!("Broadcast({})", target));
            }
            Err(e) => report.unavailable("Broadcast", e.to_string()),
        }

        // one [INIT] line per component
        self.logger.log_message(&report.to_string());
        self.runtime.set_init_report(report.clone());
        self.runtime.set_status(ControllerStatus::Running);
        info!("Controller {} running", self.config.drone.id);
        Ok(report)
    }

    /// One control cycle; returns the time it took
    pub fn run_cycle(&self) -> Duration {
        let started = Instant::now();
        if self.shut_down.load(Ordering::Acquire) {
            return started.elapsed();
        }
        // sampled at cycle start so heartbeat spacing follows the cycle period
        let uptime = Duration::from_secs_f64(self.runtime.uptime_seconds());
        let dt = {
            let mut last = self.last_cycle.lock();
            let dt = last.map_or(self.config.runtime.cycle_time(), |t| started.duration_since(t));
            *last = Some(started);
            dt
        };
        let (left, right) = self.runtime.step_behavior(self.ci.as_ref(), dt.as_secs_f64());
        self.ci.set_motor_speeds(left, right);
        self.broadcast.lock().update(uptime);
        started.elapsed()
    }

    /// Runs cycles until a stop is requested
    pub fn run(&self) {
        self.run_until(|| false);
    }

    /// Runs exactly `cycles` cycles, or fewer if a stop is requested
    pub fn run_cycles(&self, cycles: u64) {
        let mut done = 0;
        self.run_until(|| {
            done += 1;
            done > cycles
        });
    }

    fn run_until(&self, mut finished: impl FnMut() -> bool) {
        let cycle = self.config.runtime.cycle_time();
        while !self.stop_requested.load(Ordering::Acquire) && !self.shut_down.load(Ordering::Acquire) {
            if finished() {
                return;
            }
            let spent = self.run_cycle();
            let sleep = cycle_sleep(cycle, spent);
            if sleep.is_zero() {
                warn!("Control cycle overran: {:?} > {:?}", spent, cycle);
            } else {
                thread::sleep(sleep);
            }
        }
    }

    /// Stops the active behavior and zeroes the motors without shutting down
    pub fn reset(&self) {
        if let Some(id) = self.runtime.stop_behavior(self.ci.as_ref()) {
            info!("Reset stopped behavior {}", id);
        }
        self.runtime.set_motor_targets(0.0, 0.0);
        self.ci.set_motor_speeds(0.0, 0.0);
    }

    /// Whether shutdown already ran
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Releases everything. Runs once; later calls return immediately.
    ///
    /// Order: active behavior stopped, motors zeroed, listeners closed,
    /// dispatcher stopped, broadcast stopped, backend shut down.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.stop_requested.store(true, Ordering::Release);
        info!("# Shutting down Controller...");
        self.logger.log_message("# Shutting down Controller...");

        if let Some(id) = self.runtime.begin_shutdown(self.ci.as_ref()) {
            info!("Stopped behavior {}", id);
        }
        self.ci.set_motor_speeds(0.0, 0.0);

        for mut listener in self.listeners.lock().drain(..) {
            listener.stop();
        }
        if let Some(handle) = self.dispatcher.lock().take() {
            drop(handle.stop);
            if handle.thread.join().is_err() {
                warn!("Dispatcher thread panicked");
            }
        }
        self.broadcast.lock().stop();
        self.ci.shutdown();
        info!("Controller stopped");
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Runs [`Controller::shutdown`] when dropped, on every exit path
pub struct ShutdownGuard {
    controller: Arc<Controller>,
}

impl ShutdownGuard {
    /// Guards `controller`
    pub fn new(controller: Arc<Controller>) -> Self {
        ShutdownGuard { controller }
    }
}

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        self.controller.shutdown();
    }
}

/// Installs a Ctrl+C / SIGTERM handler that asks the control loop to stop
///
/// The handler only flips the stop flag; the guard around the loop then runs
/// the cleanup on the main thread.
pub fn install_signal_handler(controller: &Controller) -> Result<()> {
    let stop = controller.stop_handle();
    ctrlc::set_handler(move || {
        if !stop.swap(true, Ordering::AcqRel) {
            info!("Signal received, stopping controller");
        }
    })
    .map_err(|e| DroneError::Config(format!("cannot install signal handler: {}", e)))
}
