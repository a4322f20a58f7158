// src/main.rs
// Entry point for the aquadrone binary: runs a drone controller or a console.

// - drone: brings up the capability interface, listeners, dispatcher and
//   broadcast, then runs the control loop until Ctrl+C / SIGTERM.
// - console: polls one or more data types from a drone and lists peers
//   discovered through heartbeats.
// - motor / behavior: one-shot commands.
use aquadrone::console::{PeerListener, PeerTracker, PollOutcome, PollRecord, UpdatePoller};
use aquadrone::core::LogFacadeLogger;
use aquadrone::network::{BehaviorAction, DataType};
use aquadrone::runtime::controller::install_signal_handler;
use aquadrone::{Backend, Controller, DroneClient, DroneConfig, DroneError, ShutdownGuard};
use clap::{Parser, Subcommand};
use env_logger::Env;
use log::{error, info, warn};
use parking_lot::Mutex;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "aquadrone")]
#[command(about = "Drone controller and console", long_about = None)]
struct Cli {
    /// YAML configuration file; built-in defaults when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a drone controller
    Drone {
        /// Override the configured backend
        #[arg(long, value_parser = parse_backend)]
        backend: Option<Backend>,
        /// Override the configured drone id
        #[arg(long)]
        id: Option<String>,
    },
    /// Poll a drone and watch for peers
    Console {
        /// Drone address
        #[arg(long, default_value = "127.0.0.1")]
        host: IpAddr,
        /// Data types to poll
        #[arg(long, value_delimiter = ',', default_value = "status,gps,compass")]
        types: Vec<DataType>,
        /// Override the refresh interval in milliseconds
        #[arg(long)]
        refresh_ms: Option<u64>,
        /// Do not listen for heartbeats
        #[arg(long)]
        no_discovery: bool,
    },
    /// Send one motor command
    Motor {
        /// Drone address
        #[arg(long, default_value = "127.0.0.1")]
        host: IpAddr,
        /// Left motor in [-1, 1]
        #[arg(allow_hyphen_values = true)]
        left: f64,
        /// Right motor in [-1, 1]
        #[arg(allow_hyphen_values = true)]
        right: f64,
    },
    /// Start, stop or configure a behavior
    Behavior {
        /// Drone address
        #[arg(long, default_value = "127.0.0.1")]
        host: IpAddr,
        /// Behavior id
        id: String,
        /// Stop instead of start
        #[arg(long, conflicts_with = "arg")]
        stop: bool,
        /// Set an argument on the running behavior, as INDEX=VALUE
        #[arg(long, value_name = "INDEX=VALUE", value_parser = parse_argument, allow_hyphen_values = true)]
        arg: Option<(u32, f64)>,
    },
}

// Index must be a non-negative whole number; "-1" or "1.5" are rejected, not cast
fn parse_argument(s: &str) -> Result<(u32, f64), String> {
    let (index, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected INDEX=VALUE, got '{}'", s))?;
    let index = index
        .trim()
        .parse::<u32>()
        .map_err(|_| format!("argument index '{}' is not a non-negative integer", index.trim()))?;
    let value = value
        .trim()
        .parse::<f64>()
        .map_err(|_| format!("argument value '{}' is not a number", value.trim()))?;
    Ok((index, value))
}

fn parse_backend(s: &str) -> Result<Backend, String> {
    match s.to_ascii_lowercase().as_str() {
        "simulated" => Ok(Backend::Simulated),
        "hardware" => Ok(Backend::Hardware),
        other => Err(format!("unknown backend '{}'", other)),
    }
}

/// Main function: parses arguments, sets up logging and runs the command.
fn main() -> ExitCode {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => match DroneConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                error!("{}", e);
                return ExitCode::FAILURE;
            }
        },
        None => DroneConfig::default(),
    };

    let result = match cli.command {
        Command::Drone { backend, id } => run_drone(config, backend, id),
        Command::Console {
            host,
            types,
            refresh_ms,
            no_discovery,
        } => run_console(config, host, types, refresh_ms, no_discovery),
        Command::Motor { host, left, right } => client(&config, host)
            .send_motor_command(left, right)
            .map(|ack| info!("{}", ack)),
        Command::Behavior { host, id, stop, arg } => {
            let action = match arg {
                Some((index, value)) => BehaviorAction::SetArgument { index, value },
                None => BehaviorAction::Activate(!stop),
            };
            client(&config, host)
                .send_behavior_command(&id, action)
                .map(|ack| info!("{}", ack))
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn client(config: &DroneConfig, host: IpAddr) -> DroneClient {
    DroneClient::new(host, &config.network).with_timeout(config.console.response_timeout())
}

fn run_drone(mut config: DroneConfig, backend: Option<Backend>, id: Option<String>) -> aquadrone::Result<()> {
    if let Some(backend) = backend {
        config.drone.backend = backend;
    }
    if let Some(id) = id {
        config.drone.id = id;
    }
    config.validate()?;
    info!("Starting drone {} ({:?} backend)", config.drone.id, config.drone.backend);

    let controller = Arc::new(Controller::from_config(config, Arc::new(LogFacadeLogger::new()))?);
    // cleanup runs on every exit path below, including a failed begin()
    let _guard = ShutdownGuard::new(controller.clone());
    install_signal_handler(&controller)?;
    if let Err(e) = controller.begin() {
        if let DroneError::Bind { .. } = e {
            error!("Required endpoint unavailable, exiting");
        }
        return Err(e);
    }
    controller.run();
    Ok(())
}

fn run_console(
    config: DroneConfig,
    host: IpAddr,
    types: Vec<DataType>,
    refresh_ms: Option<u64>,
    no_discovery: bool,
) -> aquadrone::Result<()> {
    let refresh = Duration::from_millis(refresh_ms.unwrap_or(config.console.refresh_interval_ms));
    let running = Arc::new(AtomicBool::new(true));
    let flag = running.clone();
    ctrlc::set_handler(move || flag.store(false, Ordering::Release))
        .map_err(|e| DroneError::Config(format!("cannot install signal handler: {}", e)))?;

    let tracker = Arc::new(Mutex::new(PeerTracker::new(Duration::from_millis(
        config.console.peer_timeout_ms,
    ))));
    let _peers = if no_discovery {
        None
    } else {
        let addr = SocketAddr::new(config.network.bind_address, config.network.broadcast_port);
        match PeerListener::bind(addr, tracker.clone()) {
            Ok(listener) => Some(listener),
            Err(e) => {
                warn!("Peer discovery unavailable on {}: {}", addr, e);
                None
            }
        }
    };

    let (records, updates) = crossbeam::channel::unbounded::<PollRecord>();
    let mut pollers = Vec::new();
    for data_type in types {
        let transport = Box::new(client(&config, host));
        pollers.push(UpdatePoller::spawn(data_type, refresh, transport, Box::new(records.clone()))?);
    }
    drop(records);

    let mut known_peers = 0;
    while running.load(Ordering::Acquire) {
        match updates.recv_timeout(Duration::from_millis(250)) {
            Ok(record) => match record.outcome {
                PollOutcome::Update(payload) => {
                    info!("{} ({:?}): {:?}", record.data_type, record.round_trip, payload)
                }
                PollOutcome::Missed(reason) => warn!("{} missed: {}", record.data_type, reason),
            },
            Err(crossbeam::channel::RecvTimeoutError::Timeout) => {}
            Err(crossbeam::channel::RecvTimeoutError::Disconnected) => break,
        }
        let tracker = tracker.lock();
        if tracker.len() != known_peers {
            known_peers = tracker.len();
            for peer in tracker.peers() {
                info!(
                    "Peer {} [{}] at {:?}",
                    peer.heartbeat.sender_id, peer.heartbeat.status, peer.heartbeat.address
                );
            }
        }
    }

    for poller in pollers {
        let data_type = poller.data_type();
        let stats = poller.stop();
        info!(
            "{}: {} sent, {} answered, {} missed",
            data_type, stats.sent, stats.answered, stats.missed
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("0=0.8", (0, 0.8))]
    #[case("3=-1.5", (3, -1.5))]
    #[case(" 2 = 10 ", (2, 10.0))]
    fn test_parse_argument_accepts(#[case] input: &str, #[case] expected: (u32, f64)) {
        assert_eq!(parse_argument(input), Ok(expected));
    }

    #[rstest]
    #[case("-1=0.5")]
    #[case("1.5=2")]
    #[case("x=1")]
    #[case("0=fast")]
    #[case("0.8")]
    fn test_parse_argument_rejects(#[case] input: &str) {
        assert!(parse_argument(input).is_err());
    }

    #[test]
    fn test_behavior_arg_from_command_line() {
        let cli = Cli::try_parse_from(["aquadrone", "behavior", "waypoint_navigation", "--arg", "1=-0.25"]).unwrap();
        match cli.command {
            Command::Behavior { id, arg, .. } => {
                assert_eq!(id, "waypoint_navigation");
                assert_eq!(arg, Some((1, -0.25)));
            }
            other => panic!("unexpected command {:?}", other),
        }
        assert!(Cli::try_parse_from(["aquadrone", "behavior", "b", "--arg", "-1=0.5"]).is_err());
    }
}
