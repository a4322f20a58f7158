// network/mod.rs

// Control protocol plumbing: three TCP listeners (one per message class) feed a
// shared queue drained by a single dispatcher; a UDP broadcast layer announces
// the drone to peers.

pub mod broadcast;
pub mod connection;
pub mod dispatcher;
pub mod listener;
pub mod messages;
pub mod providers;

// Re-export key types for a unified API
pub use broadcast::{BroadcastHandler, BroadcastMessage, BroadcastSink, HeartbeatBroadcast, UdpSink};
pub use connection::ConnectionHandler;
pub use dispatcher::{dispatch_queue, MessageDispatcher};
pub use listener::{ConnectionListener, ListenerOptions};
pub use messages::{
    BehaviorAction, DataType, EntitySnapshot, FrameError, GpsReading, Heartbeat, InfoPayload,
    Message, MessageClass, ProtocolError, ProtocolErrorKind, Response, StatusReport,
};
pub use providers::MessageProvider;

/// A decoded request waiting in the dispatch queue
#[derive(Debug)]
pub struct Inbound {
    /// Endpoint it arrived on
    pub class: MessageClass,
    /// Decoded message
    pub message: Message,
    /// Connection to answer on
    pub handler: ConnectionHandler,
}
