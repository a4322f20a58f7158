// network/broadcast.rs

// Connectionless announcements for peer discovery. The broadcast handler owns a
// list of producers, each with its own interval, and is driven from the control
// loop once per cycle: no thread of its own. Datagrams are bincode-encoded
// `Message`s; delivery is best-effort and nothing is acknowledged.

use super::messages::{Heartbeat, Message};
use crate::core::DroneCI;
use crate::runtime::ControllerRuntimeState;
use log::{debug, info, warn};
use std::io;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::Arc;
use std::time::Duration;

/// Datagram destination
pub trait BroadcastSink: Send {
    /// Sends one datagram
    fn send(&mut self, datagram: &[u8]) -> io::Result<()>;
}

/// UDP broadcast socket
pub struct UdpSink {
    socket: UdpSocket,
    target: SocketAddr,
}

impl UdpSink {
    /// Binds an ephemeral port with broadcast enabled
    pub fn bind(target: SocketAddr) -> io::Result<Self> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        socket.set_broadcast(true)?;
        Ok(UdpSink { socket, target })
    }

    /// Destination address
    pub fn target(&self) -> SocketAddr {
        self.target
    }
}

impl BroadcastSink for UdpSink {
    fn send(&mut self, datagram: &[u8]) -> io::Result<()> {
        self.socket.send_to(datagram, self.target).map(|_| ())
    }
}

/// Periodic announcement producer
pub trait BroadcastMessage: Send {
    /// Producer name for logs
    fn name(&self) -> &str;

    /// Time between two announcements
    fn interval(&self) -> Duration;

    /// Announcement to send now; `elapsed` is time since controller start
    fn message(&mut self, elapsed: Duration) -> Message;
}

struct Scheduled {
    producer: Box<dyn BroadcastMessage>,
    next_due: Duration,
}

/// Drives the producers from the control loop
pub struct BroadcastHandler {
    producers: Vec<Scheduled>,
    sink: Option<Box<dyn BroadcastSink>>,
    sent: u64,
}

impl BroadcastHandler {
    /// Handler sending through `sink`
    pub fn new(sink: Box<dyn BroadcastSink>) -> Self {
        BroadcastHandler {
            producers: Vec::new(),
            sink: Some(sink),
            sent: 0,
        }
    }

    /// Handler that never sends; used when the broadcast socket is unavailable
    pub fn disabled() -> Self {
        BroadcastHandler {
            producers: Vec::new(),
            sink: None,
            sent: 0,
        }
    }

    /// Adds a producer; its first announcement goes out on the next update
    pub fn add(&mut self, producer: Box<dyn BroadcastMessage>) {
        self.producers.push(Scheduled {
            producer,
            next_due: Duration::ZERO,
        });
    }

    /// Whether datagrams are being sent
    pub fn is_active(&self) -> bool {
        self.sink.is_some()
    }

    /// Datagrams sent so far
    pub fn sent(&self) -> u64 {
        self.sent
    }

    /// Called once per control cycle with the time since controller start
    ///
    /// Each producer whose interval has elapsed sends once. A handler that fell
    /// behind by more than a whole interval skips ahead instead of bursting.
    pub fn update(&mut self, elapsed: Duration) {
        let Some(sink) = self.sink.as_mut() else {
            return;
        };
        for scheduled in &mut self.producers {
            if elapsed < scheduled.next_due {
                continue;
            }
            let interval = scheduled.producer.interval();
            scheduled.next_due += interval;
            if scheduled.next_due <= elapsed {
                scheduled.next_due = elapsed + interval;
            }
            let message = scheduled.producer.message(elapsed);
            let datagram = match bincode::serialize(&message) {
                Ok(datagram) => datagram,
                Err(e) => {
                    warn!("Could not encode {} announcement: {}", scheduled.producer.name(), e);
                    continue;
                }
            };
            match sink.send(&datagram) {
                Ok(()) => self.sent += 1,
                // best-effort: a lost datagram is replaced by the next one
                Err(e) => debug!("{} announcement not sent: {}", scheduled.producer.name(), e),
            }
        }
    }

    /// Stops sending. Idempotent.
    pub fn stop(&mut self) {
        if self.sink.take().is_some() {
            info!("Broadcast stopped after {} announcements", self.sent);
        }
    }
}

/// Heartbeat carrying identity, address, status and position
pub struct HeartbeatBroadcast {
    sender_id: String,
    address: Option<SocketAddr>,
    interval: Duration,
    runtime: Arc<ControllerRuntimeState>,
    ci: Arc<dyn DroneCI>,
}

impl HeartbeatBroadcast {
    /// Creates a heartbeat producer
    pub fn new(
        sender_id: impl Into<String>,
        address: Option<SocketAddr>,
        interval: Duration,
        runtime: Arc<ControllerRuntimeState>,
        ci: Arc<dyn DroneCI>,
    ) -> Self {
        HeartbeatBroadcast {
            sender_id: sender_id.into(),
            address,
            interval,
            runtime,
            ci,
        }
    }
}

impl BroadcastMessage for HeartbeatBroadcast {
    fn name(&self) -> &str {
        "heartbeat"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    fn message(&mut self, elapsed: Duration) -> Message {
        Message::Heartbeat(Heartbeat {
            sender_id: self.sender_id.clone(),
            timestamp_ms: elapsed.as_millis() as u64,
            address: self.address,
            status: self.runtime.status().to_string(),
            position: self.ci.position(),
            payload: self.runtime.active_behavior().unwrap_or_default(),
        })
    }
}

/// Decodes a received announcement datagram
pub fn decode_announcement(datagram: &[u8]) -> Result<Message, bincode::Error> {
    bincode::deserialize(datagram)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Clone, Default)]
    struct Recorder(Arc<Mutex<Vec<Vec<u8>>>>);

    impl BroadcastSink for Recorder {
        fn send(&mut self, datagram: &[u8]) -> io::Result<()> {
            self.0.lock().push(datagram.to_vec());
            Ok(())
        }
    }

    struct Fixed(Duration);

    impl BroadcastMessage for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        fn interval(&self) -> Duration {
            self.0
        }

        fn message(&mut self, elapsed: Duration) -> Message {
            Message::Heartbeat(Heartbeat {
                sender_id: "t".into(),
                timestamp_ms: elapsed.as_millis() as u64,
                address: None,
                status: String::new(),
                position: None,
                payload: String::new(),
            })
        }
    }

    #[test]
    fn test_interval_gates_sends() {
        let recorder = Recorder::default();
        let mut handler = BroadcastHandler::new(Box::new(recorder.clone()));
        handler.add(Box::new(Fixed(Duration::from_millis(1000))));
        for cycle in 0..25u64 {
            handler.update(Duration::from_millis(cycle * 100));
        }
        // due at 0, 1000 and 2000 ms
        assert_eq!(handler.sent(), 3);
        assert_eq!(recorder.0.lock().len(), 3);
    }

    #[test]
    fn test_no_burst_after_stall() {
        let mut handler = BroadcastHandler::new(Box::new(Recorder::default()));
        handler.add(Box::new(Fixed(Duration::from_millis(100))));
        handler.update(Duration::ZERO);
        handler.update(Duration::from_millis(1000));
        handler.update(Duration::from_millis(1050));
        assert_eq!(handler.sent(), 2);
    }

    #[test]
    fn test_stopped_handler_is_silent() {
        let recorder = Recorder::default();
        let mut handler = BroadcastHandler::new(Box::new(recorder.clone()));
        handler.add(Box::new(Fixed(Duration::from_millis(100))));
        handler.stop();
        handler.stop();
        handler.update(Duration::from_millis(500));
        assert!(recorder.0.lock().is_empty());
        assert!(!handler.is_active());
    }

    #[test]
    fn test_datagram_decodes_to_heartbeat() {
        let recorder = Recorder::default();
        let mut handler = BroadcastHandler::new(Box::new(recorder.clone()));
        handler.add(Box::new(Fixed(Duration::from_millis(100))));
        handler.update(Duration::from_millis(42));
        let datagram = recorder.0.lock()[0].clone();
        match decode_announcement(&datagram).unwrap() {
            Message::Heartbeat(hb) => assert_eq!(hb.timestamp_ms, 42),
            other => panic!("unexpected {:?}", other),
        }
    }
}
