// network/messages.rs

// Wire types of the control protocol and the frame codec. Every message is one
// frame: a u32 little-endian body length followed by a bincode body. The set of
// message kinds is closed; anything that does not decode into one of them is a
// transport error, never a guessed kind.

use crate::behavior::BehaviorState;
use crate::core::{
    Entity, FormationTarget, GeoFence, InitReport, LatLon, ObstacleLocation, SensorDescriptor,
    Waypoint,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{self, Read, Write};
use std::net::SocketAddr;

/// Largest frame body accepted by default
pub const DEFAULT_MAX_FRAME_BYTES: usize = 64 * 1024;

const LENGTH_PREFIX_BYTES: usize = 4;

/// Data a console can ask for
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DataType {
    /// Controller status
    Status,
    /// Compass heading
    Compass,
    /// GPS fix
    Gps,
    /// World model snapshot
    Entities,
    /// Registered sensors
    Sensors,
}

impl DataType {
    /// Every data type, in wire order
    pub const ALL: [DataType; 5] = [
        DataType::Status,
        DataType::Compass,
        DataType::Gps,
        DataType::Entities,
        DataType::Sensors,
    ];
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Status => "STATUS",
            DataType::Compass => "COMPASS",
            DataType::Gps => "GPS",
            DataType::Entities => "ENTITIES",
            DataType::Sensors => "SENSORS",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for DataType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DataType::ALL
            .into_iter()
            .find(|t| t.to_string().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown data type '{}'", s))
    }
}

/// What a behavior command does
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum BehaviorAction {
    /// Start (`true`) or stop (`false`) the behavior
    Activate(bool),
    /// Update one numbered argument of the running behavior
    SetArgument {
        /// Argument index
        index: u32,
        /// New value
        value: f64,
    },
}

/// Liveness and discovery announcement
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Heartbeat {
    /// Drone id
    pub sender_id: String,
    /// Milliseconds since the sender started
    pub timestamp_ms: u64,
    /// Address of the sender's info endpoint
    pub address: Option<SocketAddr>,
    /// Controller status string
    pub status: String,
    /// Current position, when known
    pub position: Option<LatLon>,
    /// Free-form text
    pub payload: String,
}

/// Inbound protocol message
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Message {
    /// Query for one data type
    InfoRequest {
        /// Requested data
        data_type: DataType,
    },
    /// Direct motor override
    MotorCommand {
        /// Left motor target
        left: f64,
        /// Right motor target
        right: f64,
    },
    /// Behavior activation or argument update
    BehaviorCommand {
        /// Registry id of the target behavior
        behavior_id: String,
        /// Requested action
        action: BehaviorAction,
    },
    /// Heartbeat; only valid on the broadcast channel
    Heartbeat(Heartbeat),
}

/// Listening endpoint a message belongs to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageClass {
    /// InfoRequest endpoint
    Info,
    /// MotorCommand endpoint
    Motor,
    /// BehaviorCommand endpoint
    Behavior,
}

impl MessageClass {
    /// The three TCP endpoints
    pub const ALL: [MessageClass; 3] = [MessageClass::Info, MessageClass::Motor, MessageClass::Behavior];

    /// Endpoint name used in logs and errors
    pub fn name(self) -> &'static str {
        match self {
            MessageClass::Info => "info",
            MessageClass::Motor => "motor",
            MessageClass::Behavior => "behavior",
        }
    }
}

impl Message {
    /// Endpoint this message must arrive on; heartbeats have none
    pub fn class(&self) -> Option<MessageClass> {
        match self {
            Message::InfoRequest { .. } => Some(MessageClass::Info),
            Message::MotorCommand { .. } => Some(MessageClass::Motor),
            Message::BehaviorCommand { .. } => Some(MessageClass::Behavior),
            Message::Heartbeat(_) => None,
        }
    }
}

/// STATUS payload
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    /// Drone id
    pub drone_id: String,
    /// Human-readable controller status
    pub status: String,
    /// Id of the active behavior
    pub active_behavior: Option<String>,
    /// Lifecycle state of the active behavior
    pub behavior_state: BehaviorState,
    /// Completed control cycles
    pub timestep: u64,
    /// Seconds since the controller started
    pub uptime_seconds: f64,
    /// Motor targets
    pub motors: (f64, f64),
    /// Startup diagnostic
    pub init: InitReport,
}

/// GPS payload
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GpsReading {
    /// Latitude in decimal degrees
    pub latitude: Option<f64>,
    /// Longitude in decimal degrees
    pub longitude: Option<f64>,
    /// Course over ground in degrees
    pub orientation: Option<f64>,
}

/// ENTITIES payload, grouped by kind
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    /// Waypoints in world-model order
    pub waypoints: Vec<Waypoint>,
    /// Obstacle markers
    pub obstacles: Vec<ObstacleLocation>,
    /// Fences
    pub geofences: Vec<GeoFence>,
    /// Formation slots
    pub formations: Vec<FormationTarget>,
}

impl EntitySnapshot {
    /// Groups a world-model snapshot
    pub fn from_entities(entities: Vec<Entity>) -> Self {
        let mut snapshot = EntitySnapshot::default();
        for entity in entities {
            match entity {
                Entity::Waypoint(w) => snapshot.waypoints.push(w),
                Entity::Obstacle(o) => snapshot.obstacles.push(o),
                Entity::GeoFence(g) => snapshot.geofences.push(g),
                Entity::Formation(f) => snapshot.formations.push(f),
            }
        }
        snapshot
    }

    /// Total number of entities
    pub fn len(&self) -> usize {
        self.waypoints.len() + self.obstacles.len() + self.geofences.len() + self.formations.len()
    }

    /// True if the snapshot holds nothing
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Type-specific InfoResponse payload
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum InfoPayload {
    /// STATUS
    Status(StatusReport),
    /// COMPASS heading in degrees
    Compass(Option<f64>),
    /// GPS
    Gps(GpsReading),
    /// ENTITIES
    Entities(EntitySnapshot),
    /// SENSORS
    Sensors(Vec<SensorDescriptor>),
}

/// Explicit protocol error categories
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProtocolErrorKind {
    /// No provider registered for the requested data type
    UnsupportedDataType,
    /// No behavior registered under the requested id
    UnknownBehavior,
    /// Command targeted a behavior that is not the active one
    BehaviorMismatch,
    /// Behavior rejected the argument
    InvalidArgument,
    /// Behavior could not be started
    BehaviorFault,
    /// Message arrived on the endpoint of another class
    WrongEndpoint,
    /// Motor values are not numbers
    InvalidMotorCommand,
    /// Message is not expected on a request connection
    Unexpected,
}

/// Error response payload
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind:?}: {detail}")]
pub struct ProtocolError {
    /// Category
    pub kind: ProtocolErrorKind,
    /// Human-readable detail
    pub detail: String,
}

impl ProtocolError {
    /// Creates an error response payload
    pub fn new(kind: ProtocolErrorKind, detail: impl Into<String>) -> Self {
        ProtocolError {
            kind,
            detail: detail.into(),
        }
    }
}

/// Outbound protocol message, one per request
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Response {
    /// Answer to an InfoRequest
    InfoResponse {
        /// Echo of the requested type
        data_type: DataType,
        /// Current value
        payload: InfoPayload,
    },
    /// Command applied
    Ack {
        /// What happened
        detail: String,
    },
    /// Explicit error
    Error(ProtocolError),
}

impl Response {
    /// Acknowledgement with a detail string
    pub fn ack(detail: impl Into<String>) -> Self {
        Response::Ack {
            detail: detail.into(),
        }
    }

    /// Error response
    pub fn error(kind: ProtocolErrorKind, detail: impl Into<String>) -> Self {
        Response::Error(ProtocolError::new(kind, detail))
    }
}

/// Frame codec failures
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// Socket failure, including a peer that closed mid-frame
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// Declared body length exceeds the limit
    #[error("frame of {size} bytes exceeds limit of {max}")]
    TooLarge {
        /// Declared or encoded size
        size: usize,
        /// Configured limit
        max: usize,
    },
    /// Body is not a valid message
    #[error("decode failed: {0}")]
    Decode(#[source] bincode::Error),
    /// Value could not be encoded
    #[error("encode failed: {0}")]
    Encode(#[source] bincode::Error),
}

impl FrameError {
    /// True when the peer closed or the read timed out
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            FrameError::Io(e) if matches!(
                e.kind(),
                io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::WouldBlock
                    | io::ErrorKind::TimedOut
            )
        )
    }
}

/// Encodes `value` into a standalone frame
pub fn encode_frame<T: Serialize>(value: &T, max: usize) -> Result<Vec<u8>, FrameError> {
    let body = bincode::serialize(value).map_err(FrameError::Encode)?;
    if body.len() > max || body.len() > u32::MAX as usize {
        return Err(FrameError::TooLarge {
            size: body.len(),
            max,
        });
    }
    let mut frame = Vec::with_capacity(LENGTH_PREFIX_BYTES + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Writes one frame and flushes
pub fn write_frame<W: Write, T: Serialize>(writer: &mut W, value: &T, max: usize) -> Result<(), FrameError> {
    let frame = encode_frame(value, max)?;
    writer.write_all(&frame)?;
    writer.flush()?;
    Ok(())
}

/// Reads exactly one frame
pub fn read_frame<R: Read, T: DeserializeOwned>(reader: &mut R, max: usize) -> Result<T, FrameError> {
    let mut len_buffer = [0u8; LENGTH_PREFIX_BYTES];
    reader.read_exact(&mut len_buffer)?;
    let size = u32::from_le_bytes(len_buffer) as usize;
    if size > max {
        return Err(FrameError::TooLarge { size, max });
    }
    let mut body = vec![0u8; size];
    reader.read_exact(&mut body)?;
    bincode::deserialize(&body).map_err(FrameError::Decode)
}
