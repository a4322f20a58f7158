// network/connection.rs

// One accepted TCP connection. The handler is the return address for exactly
// one response: `respond` consumes it, so a request can never be answered twice
// and the socket closes as soon as the answer is written.

use super::messages::{read_frame, write_frame, FrameError, Message, Response};
use log::debug;
use std::fmt;
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

/// Accepted connection awaiting its response
pub struct ConnectionHandler {
    stream: TcpStream,
    peer: SocketAddr,
    max_frame_bytes: usize,
}

impl ConnectionHandler {
    /// Wraps an accepted stream and applies both socket timeouts
    pub fn new(
        stream: TcpStream,
        peer: SocketAddr,
        read_timeout: Option<Duration>,
        write_timeout: Option<Duration>,
        max_frame_bytes: usize,
    ) -> Result<Self, FrameError> {
        stream.set_read_timeout(read_timeout)?;
        // the dispatcher answers everyone, it must not wait on one reader
        stream.set_write_timeout(write_timeout)?;
        stream.set_nodelay(true)?;
        Ok(ConnectionHandler {
            stream,
            peer,
            max_frame_bytes,
        })
    }

    /// Remote address
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Reads the single request carried by this connection
    pub fn read_message(&mut self) -> Result<Message, FrameError> {
        read_frame(&mut self.stream, self.max_frame_bytes)
    }

    /// Writes the response and closes the connection
    pub fn respond(mut self, response: &Response) -> Result<(), FrameError> {
        write_frame(&mut self.stream, response, self.max_frame_bytes)?;
        debug!("Responded to {}", self.peer);
        Ok(())
    }
}

impl fmt::Debug for ConnectionHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandler")
            .field("peer", &self.peer)
            .finish()
    }
}
