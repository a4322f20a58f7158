// console/peers.rs

// Peer discovery from heartbeats. The tracker keeps the latest heartbeat per
// sender id and forgets senders that go quiet; the listener feeds it from the
// UDP broadcast port.

use crate::network::broadcast::decode_announcement;
use crate::network::messages::{Heartbeat, Message};
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const RECV_POLL: Duration = Duration::from_millis(200);
const MAX_DATAGRAM: usize = 64 * 1024;

/// Latest knowledge about one peer
#[derive(Clone, Debug, PartialEq)]
pub struct PeerInfo {
    /// Last heartbeat received
    pub heartbeat: Heartbeat,
    /// Datagram source address
    pub source: SocketAddr,
    /// When the last heartbeat arrived
    pub last_seen: Instant,
}

/// Live peers keyed by sender id
#[derive(Debug)]
pub struct PeerTracker {
    peers: BTreeMap<String, PeerInfo>,
    timeout: Duration,
}

impl PeerTracker {
    /// Tracker dropping peers silent for longer than `timeout`
    pub fn new(timeout: Duration) -> Self {
        PeerTracker {
            peers: BTreeMap::new(),
            timeout,
        }
    }

    /// Records a heartbeat; returns true for a newly discovered peer
    pub fn observe(&mut self, heartbeat: Heartbeat, source: SocketAddr, now: Instant) -> bool {
        let id = heartbeat.sender_id.clone();
        let info = PeerInfo {
            heartbeat,
            source,
            last_seen: now,
        };
        let discovered = self.peers.insert(id.clone(), info).is_none();
        if discovered {
            info!("Discovered peer {} at {}", id, source);
        }
        discovered
    }

    /// Drops expired peers and returns their ids
    pub fn expire(&mut self, now: Instant) -> Vec<String> {
        let timeout = self.timeout;
        let expired: Vec<String> = self
            .peers
            .iter()
            .filter(|(_, p)| now.saturating_duration_since(p.last_seen) > timeout)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            self.peers.remove(id);
            info!("Peer {} timed out", id);
        }
        expired
    }

    /// Peer by sender id
    pub fn get(&self, id: &str) -> Option<&PeerInfo> {
        self.peers.get(id)
    }

    /// Known peers sorted by id
    pub fn peers(&self) -> Vec<&PeerInfo> {
        self.peers.values().collect()
    }

    /// Number of known peers
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// True if no peer is known
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

/// Receives heartbeats on a UDP port and feeds a shared tracker
pub struct PeerListener {
    local_addr: SocketAddr,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl PeerListener {
    /// Binds `addr` and starts receiving
    pub fn bind(addr: SocketAddr, tracker: Arc<Mutex<PeerTracker>>) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_read_timeout(Some(RECV_POLL))?;
        let local_addr = socket.local_addr()?;
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();
        let thread = thread::Builder::new()
            .name("peer-listener".to_string())
            .spawn(move || receive_loop(socket, tracker, flag))?;
        info!("Listening for heartbeats on {}", local_addr);
        Ok(PeerListener {
            local_addr,
            running,
            thread: Some(thread),
        })
    }

    /// Bound address
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops receiving. Idempotent.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Peer listener thread panicked");
            }
        }
    }
}

impl Drop for PeerListener {
    fn drop(&mut self) {
        self.stop();
    }
}

fn receive_loop(socket: UdpSocket, tracker: Arc<Mutex<PeerTracker>>, running: Arc<AtomicBool>) {
    let mut buffer = vec![0u8; MAX_DATAGRAM];
    while running.load(Ordering::Acquire) {
        let (len, source) = match socket.recv_from(&mut buffer) {
            Ok(received) => received,
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                tracker.lock().expire(Instant::now());
                continue;
            }
            Err(e) => {
                warn!("Heartbeat receive failed: {}", e);
                continue;
            }
        };
        match decode_announcement(&buffer[..len]) {
            Ok(Message::Heartbeat(heartbeat)) => {
                let now = Instant::now();
                let mut tracker = tracker.lock();
                tracker.observe(heartbeat, source, now);
                tracker.expire(now);
            }
            Ok(other) => debug!("Ignoring non-heartbeat datagram from {}: {:?}", source, other),
            Err(e) => debug!("Undecodable datagram from {}: {}", source, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heartbeat(id: &str) -> Heartbeat {
        Heartbeat {
            sender_id: id.to_string(),
            timestamp_ms: 0,
            address: None,
            status: "Running".into(),
            position: None,
            payload: String::new(),
        }
    }

    #[test]
    fn test_observe_and_expire() {
        let source: SocketAddr = "10.0.0.2:8888".parse().unwrap();
        let mut tracker = PeerTracker::new(Duration::from_secs(10));
        let t0 = Instant::now();
        assert!(tracker.observe(heartbeat("a"), source, t0));
        assert!(!tracker.observe(heartbeat("a"), source, t0));
        assert!(tracker.observe(heartbeat("b"), source, t0 + Duration::from_secs(8)));
        let expired = tracker.expire(t0 + Duration::from_secs(12));
        assert_eq!(expired, vec!["a".to_string()]);
        assert_eq!(tracker.len(), 1);
        assert!(tracker.get("b").is_some());
    }
}
