// console/poller.rs

// Adaptive polling, one thread per monitored data type. A poller keeps at most
// one request in flight: it sends, waits for the answer (or the response
// timeout), then sleeps `refresh - round_trip` so a slow drone sees fewer
// requests instead of a growing backlog. A round trip longer than the refresh
// interval means the next request goes out immediately.

use super::client::DroneClient;
use crate::network::messages::{DataType, InfoPayload};
use crate::Result;
use crossbeam::channel::{self, RecvTimeoutError, Sender};
use log::{debug, warn};
use std::io;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Sleep before the next request: `target - elapsed`, never negative
pub fn poll_sleep(target: Duration, elapsed: Duration) -> Duration {
    target.saturating_sub(elapsed)
}

/// Something that answers one InfoRequest at a time
pub trait PollTransport: Send {
    /// Sends one request and blocks for its answer
    fn request(&mut self, data_type: DataType) -> Result<InfoPayload>;
}

impl PollTransport for DroneClient {
    fn request(&mut self, data_type: DataType) -> Result<InfoPayload> {
        self.request_info(data_type)
    }
}

/// Result of one poll
#[derive(Clone, Debug, PartialEq)]
pub enum PollOutcome {
    /// Fresh value
    Update(InfoPayload),
    /// No usable answer: timeout, transport failure or error response
    Missed(String),
}

/// One completed poll
#[derive(Clone, Debug, PartialEq)]
pub struct PollRecord {
    /// Polled data type
    pub data_type: DataType,
    /// What came back
    pub outcome: PollOutcome,
    /// Time from send to answer (or failure)
    pub round_trip: Duration,
    /// Pause before the next request
    pub sleep: Duration,
}

/// Consumer of poll results
pub trait PollSink: Send {
    /// Called once per poll, before the pacing sleep
    fn record(&mut self, record: PollRecord);
}

impl PollSink for Sender<PollRecord> {
    fn record(&mut self, record: PollRecord) {
        // the console may have stopped reading
        let _ = self.send(record);
    }
}

/// Counters returned when a poller stops
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PollStats {
    /// Requests sent
    pub sent: u64,
    /// Requests answered with a value
    pub answered: u64,
    /// Requests that failed or timed out
    pub missed: u64,
}

/// Background poller for one data type
pub struct UpdatePoller {
    data_type: DataType,
    stop: Option<Sender<()>>,
    thread: Option<JoinHandle<PollStats>>,
}

impl UpdatePoller {
    /// Starts polling `data_type` every `refresh`
    pub fn spawn(
        data_type: DataType,
        refresh: Duration,
        mut transport: Box<dyn PollTransport>,
        mut sink: Box<dyn PollSink>,
    ) -> io::Result<Self> {
        let (stop, stop_signal) = channel::bounded::<()>(1);
        let thread = thread::Builder::new()
            .name(format!("poller-{}", data_type))
            .spawn(move || {
                let mut stats = PollStats::default();
                loop {
                    let sent_at = Instant::now();
                    stats.sent += 1;
                    let result = transport.request(data_type);
                    let round_trip = sent_at.elapsed();
                    let outcome = match result {
                        Ok(payload) => {
                            stats.answered += 1;
                            PollOutcome::Update(payload)
                        }
                        Err(e) => {
                            stats.missed += 1;
                            warn!("{} poll failed after {:?}: {}", data_type, round_trip, e);
                            PollOutcome::Missed(e.to_string())
                        }
                    };
                    let sleep = poll_sleep(refresh, round_trip);
                    sink.record(PollRecord {
                        data_type,
                        outcome,
                        round_trip,
                        sleep,
                    });
                    match stop_signal.recv_timeout(sleep) {
                        Err(RecvTimeoutError::Timeout) => continue,
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                debug!("{} poller stopped after {} requests", data_type, stats.sent);
                stats
            })?;
        Ok(UpdatePoller {
            data_type,
            stop: Some(stop),
            thread: Some(thread),
        })
    }

    /// Polled data type
    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    /// Stops after the current wait completes and returns the counters
    pub fn stop(mut self) -> PollStats {
        self.shutdown()
    }

    fn shutdown(&mut self) -> PollStats {
        self.stop.take();
        match self.thread.take().map(JoinHandle::join) {
            Some(Ok(stats)) => stats,
            Some(Err(_)) => {
                warn!("{} poller panicked", self.data_type);
                PollStats::default()
            }
            None => PollStats::default(),
        }
    }
}

impl Drop for UpdatePoller {
    fn drop(&mut self) {
        self.shutdown();
    }
}
