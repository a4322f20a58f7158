//! Aquadrone - drone control runtime and console
//!
//! This library provides the pieces that let one body of behavior code drive an
//! aquatic or ground drone against real hardware or a simulator, while a console
//! (or a peer drone) monitors and commands it over the network:
//! - the capability interface and its simulated / hardware backends
//! - the behavior engine and the fixed-cadence control loop
//! - the TCP control protocol (listeners, dispatch queue, providers)
//! - the UDP heartbeat broadcast used for peer discovery
//! - the console-side adaptive pollers

#![warn(missing_docs)]
#![warn(unused_extern_crates)]

pub mod behavior;
pub mod console;
pub mod core;
pub mod network;
pub mod runtime;

// Re-export commonly used items for easier access
pub use behavior::{Behavior, BehaviorRegistry, BehaviorState, BehaviorStep};
pub use console::{DroneClient, PeerTracker, UpdatePoller};
pub use self::core::{DroneCI, HardwareDroneCI, InitReport, LedState, SimulatedDroneCI};
pub use network::{DataType, Message, MessageDispatcher, Response};
pub use runtime::{Controller, ControllerRuntimeState, ShutdownGuard};

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use std::time::Duration;

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, DroneError>;

/// Main configuration structure for a drone controller and its console
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DroneConfig {
    /// Identity and backend selection
    pub drone: IdentityConfig,
    /// Listening endpoints and broadcast channel
    pub network: NetworkConfig,
    /// Control loop timing
    pub runtime: RuntimeConfig,
    /// Simulated backend parameters
    pub simulation: SimulationConfig,
    /// Console-side polling parameters
    pub console: ConsoleConfig,
}

/// Which capability interface variant backs the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Kinematic environment model
    Simulated,
    /// Device drivers
    Hardware,
}

/// Drone identity
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Sender id carried in heartbeats
    pub id: String,
    /// Backend variant selected at construction time
    pub backend: Backend,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        IdentityConfig {
            id: "drone-0".to_string(),
            backend: Backend::Simulated,
        }
    }
}

/// Network endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address the three TCP listeners bind to
    pub bind_address: IpAddr,
    /// InfoRequest endpoint
    pub info_port: u16,
    /// MotorCommand endpoint
    pub motor_port: u16,
    /// BehaviorCommand endpoint
    pub command_port: u16,
    /// UDP heartbeat port
    pub broadcast_port: u16,
    /// UDP heartbeat destination
    pub broadcast_address: IpAddr,
    /// Read timeout applied to every accepted connection
    pub connection_read_timeout_ms: u64,
    /// Write timeout for responses; a client that stops reading loses its answer
    pub connection_write_timeout_ms: u64,
    /// Largest accepted frame body
    pub max_frame_bytes: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            info_port: 10101,
            motor_port: 10102,
            command_port: 10103,
            broadcast_port: 8888,
            broadcast_address: IpAddr::V4(Ipv4Addr::BROADCAST),
            connection_read_timeout_ms: 2000,
            connection_write_timeout_ms: 2000,
            max_frame_bytes: network::messages::DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

impl NetworkConfig {
    /// Read timeout for accepted connections, `None` when disabled
    pub fn read_timeout(&self) -> Option<Duration> {
        (self.connection_read_timeout_ms > 0)
            .then(|| Duration::from_millis(self.connection_read_timeout_ms))
    }

    /// Write timeout for accepted connections, `None` when disabled
    pub fn write_timeout(&self) -> Option<Duration> {
        (self.connection_write_timeout_ms > 0)
            .then(|| Duration::from_millis(self.connection_write_timeout_ms))
    }
}

/// Control loop timing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Target cycle period
    pub cycle_time_ms: u64,
    /// Heartbeat producer interval
    pub heartbeat_interval_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            cycle_time_ms: 100,
            heartbeat_interval_ms: 1000,
        }
    }
}

impl RuntimeConfig {
    /// Cycle period as a `Duration`
    pub fn cycle_time(&self) -> Duration {
        Duration::from_millis(self.cycle_time_ms)
    }

    /// Heartbeat interval as a `Duration`
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }
}

/// Simulated backend parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Starting latitude (decimal degrees)
    pub start_latitude: f64,
    /// Starting longitude (decimal degrees)
    pub start_longitude: f64,
    /// Starting compass orientation (degrees)
    pub start_orientation: f64,
    /// Speed with both motors at 1.0
    pub max_speed_mps: f64,
    /// Turn rate with motors at (1.0, -1.0)
    pub max_turn_rate_dps: f64,
    /// Entities loaded into the world model at startup
    pub entities: Vec<crate::core::entities::Entity>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            start_latitude: 38.7166,
            start_longitude: -9.1399,
            start_orientation: 0.0,
            max_speed_mps: 1.5,
            max_turn_rate_dps: 45.0,
            entities: Vec::new(),
        }
    }
}

/// Console-side polling parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    /// Target refresh interval per monitored data type
    pub refresh_interval_ms: u64,
    /// Time to wait for a response, 0 waits forever
    pub response_timeout_ms: u64,
    /// Peers silent for longer than this are dropped
    pub peer_timeout_ms: u64,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        ConsoleConfig {
            refresh_interval_ms: 1000,
            response_timeout_ms: 5000,
            peer_timeout_ms: 10_000,
        }
    }
}

impl ConsoleConfig {
    /// Response timeout, `None` when waiting indefinitely
    pub fn response_timeout(&self) -> Option<Duration> {
        (self.response_timeout_ms > 0).then(|| Duration::from_millis(self.response_timeout_ms))
    }
}

impl DroneConfig {
    /// Loads a configuration from a YAML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let config: DroneConfig = serde_yaml::from_reader(file)
            .map_err(|e| DroneError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        log::info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Checks values the rest of the crate relies on
    pub fn validate(&self) -> Result<()> {
        if self.runtime.cycle_time_ms == 0 {
            return Err(DroneError::Config("runtime.cycle_time_ms must be > 0".into()));
        }
        if self.drone.id.is_empty() {
            return Err(DroneError::Config("drone.id must not be empty".into()));
        }
        let ports = [
            self.network.info_port,
            self.network.motor_port,
            self.network.command_port,
        ];
        // port 0 asks the OS for an ephemeral port, so duplicates are fine there
        for (i, port) in ports.iter().enumerate() {
            if *port != 0 && ports[i + 1..].contains(port) {
                return Err(DroneError::Config(format!(
                    "network port {} is used by more than one listener",
                    port
                )));
            }
        }
        Ok(())
    }
}

/// Aquadrone error types
#[derive(Debug, thiserror::Error)]
pub enum DroneError {
    /// Socket or file I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// A required listening endpoint could not be bound
    #[error("failed to bind {endpoint} endpoint on {addr}: {source}")]
    Bind {
        /// Endpoint name
        endpoint: &'static str,
        /// Requested address
        addr: std::net::SocketAddr,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(String),
    /// Malformed or oversized frame
    #[error("frame error: {0}")]
    Frame(#[from] network::messages::FrameError),
    /// The peer answered with an explicit error response
    #[error("protocol error: {0}")]
    Protocol(network::messages::ProtocolError),
    /// A behavior faulted
    #[error("behavior error: {0}")]
    Behavior(#[from] behavior::BehaviorError),
    /// The world model rejected an entity set
    #[error("world model error: {0}")]
    Entity(#[from] crate::core::entities::EntityError),
    /// No response within the configured timeout
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}
