// network/listener.rs

// One accept loop per message class. Each accepted connection is read on a
// short-lived thread so a slow or broken client never stalls the accept loop;
// the decoded message and its handler go onto the shared dispatch queue.
// Stopping flips the running flag and pokes the socket with a local connection
// so the blocked accept returns and the loop exits as "listener closed".

use super::connection::ConnectionHandler;
use super::messages::MessageClass;
use super::Inbound;
use crate::{DroneError, Result};
use crossbeam::channel::Sender;
use log::{debug, info, warn};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

const WAKE_TIMEOUT: Duration = Duration::from_millis(500);

/// Per-connection settings
#[derive(Clone, Copy, Debug)]
pub struct ListenerOptions {
    /// Read timeout applied to accepted connections
    pub read_timeout: Option<Duration>,
    /// Write timeout applied to accepted connections
    pub write_timeout: Option<Duration>,
    /// Largest accepted frame body
    pub max_frame_bytes: usize,
}

/// Accept loop for one message class
pub struct ConnectionListener {
    class: MessageClass,
    local_addr: SocketAddr,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl ConnectionListener {
    /// Binds `addr` and starts accepting
    pub fn bind(
        class: MessageClass,
        addr: SocketAddr,
        queue: Sender<Inbound>,
        options: ListenerOptions,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr).map_err(|source| DroneError::Bind {
            endpoint: class.name(),
            addr,
            source,
        })?;
        let local_addr = listener.local_addr()?;
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();
        let thread = thread::Builder::new()
            .name(format!("listener-{}", class.name()))
            .spawn(move || accept_loop(class, listener, queue, options, flag))?;
        info!("{} listener on {}", class.name(), local_addr);
        Ok(ConnectionListener {
            class,
            local_addr,
            running,
            thread: Some(thread),
        })
    }

    /// Message class served
    pub fn class(&self) -> MessageClass {
        self.class
    }

    /// Bound address, with the OS-assigned port when bound to port 0
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Whether the accept loop is still running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire) && self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Closes the socket and joins the accept loop. Idempotent.
    pub fn stop(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        self.running.store(false, Ordering::Release);
        // unblock accept()
        if let Err(e) = TcpStream::connect_timeout(&wake_address(self.local_addr), WAKE_TIMEOUT) {
            debug!("{} listener wake-up failed: {}", self.class.name(), e);
        }
        if thread.join().is_err() {
            warn!("{} listener thread panicked", self.class.name());
        }
        info!("{} listener stopped", self.class.name());
    }
}

impl Drop for ConnectionListener {
    fn drop(&mut self) {
        self.stop();
    }
}

// Wildcard binds are reached through loopback
fn wake_address(addr: SocketAddr) -> SocketAddr {
    let ip = match addr.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
        IpAddr::V6(ip) if ip.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
        ip => ip,
    };
    SocketAddr::new(ip, addr.port())
}

fn accept_loop(
    class: MessageClass,
    listener: TcpListener,
    queue: Sender<Inbound>,
    options: ListenerOptions,
    running: Arc<AtomicBool>,
) {
    loop {
        let accepted = listener.accept();
        if !running.load(Ordering::Acquire) {
            debug!("{} listener closed", class.name());
            break;
        }
        match accepted {
            Ok((stream, peer)) => {
                debug!("{} listener accepted {}", class.name(), peer);
                let queue = queue.clone();
                let spawned = thread::Builder::new()
                    .name(format!("conn-{}", class.name()))
                    .spawn(move || handle_connection(class, stream, peer, queue, options));
                if let Err(e) = spawned {
                    warn!("{} listener could not spawn handler for {}: {}", class.name(), peer, e);
                }
            }
            Err(e) => warn!("{} listener accept failed: {}", class.name(), e),
        }
    }
}

// Reads exactly one framed message; any failure just drops the connection
fn handle_connection(
    class: MessageClass,
    stream: TcpStream,
    peer: SocketAddr,
    queue: Sender<Inbound>,
    options: ListenerOptions,
) {
    let mut handler = match ConnectionHandler::new(
        stream,
        peer,
        options.read_timeout,
        options.write_timeout,
        options.max_frame_bytes,
    ) {
        Ok(handler) => handler,
        Err(e) => {
            warn!("{} connection from {} unusable: {}", class.name(), peer, e);
            return;
        }
    };
    let message = match handler.read_message() {
        Ok(message) => message,
        Err(e) if e.is_disconnect() => {
            debug!("{} connection from {} closed before a full frame: {}", class.name(), peer, e);
            return;
        }
        Err(e) => {
            warn!("{} connection from {} sent a bad frame: {}", class.name(), peer, e);
            return;
        }
    };
    if queue.send(Inbound { class, message, handler }).is_err() {
        warn!("Dispatch queue closed, dropping request from {}", peer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wake_address_maps_wildcard_to_loopback() {
        let addr: SocketAddr = "0.0.0.0:10101".parse().unwrap();
        assert_eq!(wake_address(addr), "127.0.0.1:10101".parse().unwrap());
        let addr: SocketAddr = "192.168.1.4:10101".parse().unwrap();
        assert_eq!(wake_address(addr), addr);
    }

    #[test]
    fn test_bind_conflict_is_bind_error() {
        let (tx, _rx) = crossbeam::channel::unbounded();
        let options = ListenerOptions {
            read_timeout: Some(Duration::from_millis(200)),
            write_timeout: Some(Duration::from_millis(200)),
            max_frame_bytes: 1024,
        };
        let first = ConnectionListener::bind(
            MessageClass::Info,
            "127.0.0.1:0".parse().unwrap(),
            tx.clone(),
            options,
        )
        .unwrap();
        let second =
            ConnectionListener::bind(MessageClass::Motor, first.local_addr(), tx, options);
        assert!(matches!(second, Err(DroneError::Bind { endpoint: "motor", .. })));
    }

    #[test]
    fn test_stop_is_idempotent() {
        let (tx, _rx) = crossbeam::channel::unbounded();
        let options = ListenerOptions {
            read_timeout: None,
            write_timeout: None,
            max_frame_bytes: 1024,
        };
        let mut listener = ConnectionListener::bind(
            MessageClass::Behavior,
            "127.0.0.1:0".parse().unwrap(),
            tx,
            options,
        )
        .unwrap();
        assert!(listener.is_running());
        listener.stop();
        listener.stop();
        assert!(!listener.is_running());
    }
}
