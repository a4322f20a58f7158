// console/client.rs

// One-shot requests to a drone. Every request opens its own connection to the
// endpoint of its message class, writes one frame, reads the single response
// and closes, mirroring how the drone serves connections.

use crate::network::messages::{
    read_frame, write_frame, BehaviorAction, DataType, FrameError, InfoPayload, Message,
    MessageClass, ProtocolError, ProtocolErrorKind, Response,
};
use crate::{DroneError, NetworkConfig, Result};
use log::debug;
use std::io;
use std::net::{IpAddr, SocketAddr, TcpStream};
use std::time::Duration;

/// Client for the three control endpoints of one drone
#[derive(Clone, Debug)]
pub struct DroneClient {
    info: SocketAddr,
    motor: SocketAddr,
    behavior: SocketAddr,
    timeout: Option<Duration>,
    max_frame_bytes: usize,
}

impl DroneClient {
    /// Client for a drone at `host` using the ports in `network`
    pub fn new(host: IpAddr, network: &NetworkConfig) -> Self {
        DroneClient {
            info: SocketAddr::new(host, network.info_port),
            motor: SocketAddr::new(host, network.motor_port),
            behavior: SocketAddr::new(host, network.command_port),
            timeout: None,
            max_frame_bytes: network.max_frame_bytes,
        }
    }

    /// Client with explicit endpoint addresses
    pub fn with_endpoints(info: SocketAddr, motor: SocketAddr, behavior: SocketAddr) -> Self {
        DroneClient {
            info,
            motor,
            behavior,
            timeout: None,
            max_frame_bytes: crate::network::messages::DEFAULT_MAX_FRAME_BYTES,
        }
    }

    /// Sets the connect and response timeout; `None` waits forever
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Address of the endpoint for `class`
    pub fn endpoint(&self, class: MessageClass) -> SocketAddr {
        match class {
            MessageClass::Info => self.info,
            MessageClass::Motor => self.motor,
            MessageClass::Behavior => self.behavior,
        }
    }

    /// Sends `message` to its endpoint and waits for the response
    pub fn request(&self, message: &Message) -> Result<Response> {
        let class = message.class().ok_or_else(|| {
            DroneError::Protocol(ProtocolError::new(
                ProtocolErrorKind::Unexpected,
                "heartbeats are not sent over request connections",
            ))
        })?;
        let addr = self.endpoint(class);
        let mut stream = match self.timeout {
            Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
            None => TcpStream::connect(addr),
        }
        .map_err(|e| self.map_io(e))?;
        stream.set_read_timeout(self.timeout)?;
        stream.set_write_timeout(self.timeout)?;
        stream.set_nodelay(true)?;
        write_frame(&mut stream, message, self.max_frame_bytes).map_err(|e| self.map_frame(e))?;
        let response = read_frame(&mut stream, self.max_frame_bytes).map_err(|e| self.map_frame(e))?;
        debug!("{} answered {:?}", addr, response);
        Ok(response)
    }

    /// Current value of `data_type`
    pub fn request_info(&self, data_type: DataType) -> Result<InfoPayload> {
        match self.request(&Message::InfoRequest { data_type })? {
            Response::InfoResponse {
                data_type: answered,
                payload,
            } if answered == data_type => Ok(payload),
            other => Err(unexpected(other)),
        }
    }

    /// Overrides the motor targets; returns the drone's acknowledgement
    pub fn send_motor_command(&self, left: f64, right: f64) -> Result<String> {
        acknowledged(self.request(&Message::MotorCommand { left, right })?)
    }

    /// Activates, deactivates or configures a behavior
    pub fn send_behavior_command(&self, behavior_id: &str, action: BehaviorAction) -> Result<String> {
        acknowledged(self.request(&Message::BehaviorCommand {
            behavior_id: behavior_id.to_string(),
            action,
        })?)
    }

    fn map_io(&self, e: io::Error) -> DroneError {
        match (e.kind(), self.timeout) {
            (io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut, Some(timeout)) => {
                DroneError::Timeout(timeout)
            }
            _ => DroneError::Io(e),
        }
    }

    fn map_frame(&self, e: FrameError) -> DroneError {
        match e {
            FrameError::Io(e) => self.map_io(e),
            other => DroneError::Frame(other),
        }
    }
}

fn acknowledged(response: Response) -> Result<String> {
    match response {
        Response::Ack { detail } => Ok(detail),
        other => Err(unexpected(other)),
    }
}

fn unexpected(response: Response) -> DroneError {
    match response {
        Response::Error(e) => DroneError::Protocol(e),
        other => DroneError::Protocol(ProtocolError::new(
            ProtocolErrorKind::Unexpected,
            format!("unexpected response {:?}", other),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoints_follow_config() {
        let network = NetworkConfig::default();
        let client = DroneClient::new("10.0.0.7".parse().unwrap(), &network);
        assert_eq!(client.endpoint(MessageClass::Info).port(), 10101);
        assert_eq!(client.endpoint(MessageClass::Motor).port(), 10102);
        assert_eq!(client.endpoint(MessageClass::Behavior).port(), 10103);
    }

    #[test]
    fn test_error_response_becomes_protocol_error() {
        let err = acknowledged(Response::error(ProtocolErrorKind::UnknownBehavior, "dance"));
        assert!(matches!(
            err,
            Err(DroneError::Protocol(ProtocolError { kind: ProtocolErrorKind::UnknownBehavior, .. }))
        ));
    }

    #[test]
    fn test_heartbeat_is_not_requestable() {
        let client = DroneClient::with_endpoints(
            "127.0.0.1:1".parse().unwrap(),
            "127.0.0.1:2".parse().unwrap(),
            "127.0.0.1:3".parse().unwrap(),
        );
        let heartbeat = crate::network::messages::Heartbeat {
            sender_id: "x".into(),
            timestamp_ms: 0,
            address: None,
            status: String::new(),
            position: None,
            payload: String::new(),
        };
        assert!(matches!(
            client.request(&Message::Heartbeat(heartbeat)),
            Err(DroneError::Protocol(_))
        ));
    }
}
