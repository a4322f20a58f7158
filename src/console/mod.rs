// console/mod.rs

// Console side of the protocol: one-shot commands, per-data-type adaptive
// pollers and heartbeat-based peer discovery.

pub mod client;
pub mod peers;
pub mod poller;

pub use client::DroneClient;
pub use peers::{PeerInfo, PeerListener, PeerTracker};
pub use poller::{poll_sleep, PollOutcome, PollRecord, PollSink, PollStats, PollTransport, UpdatePoller};
