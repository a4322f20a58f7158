// network/dispatcher.rs

// Single consumer of the dispatch queue. Messages from all listeners are
// handled strictly in arrival order; every request gets exactly one response
// written to the connection it came in on. Behavior commands go through the
// runtime state, whose lock makes a switch atomic for the control loop.

use super::messages::{BehaviorAction, DataType, Message, ProtocolErrorKind, Response};
use super::providers::MessageProvider;
use super::Inbound;
use crate::behavior::{BehaviorError, BehaviorRegistry};
use crate::core::DroneCI;
use crate::runtime::{ArgumentOutcome, ControllerRuntimeState};
use crossbeam::channel::{select, Receiver};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Resolves messages against providers and the runtime state
pub struct MessageDispatcher {
    providers: HashMap<DataType, Box<dyn MessageProvider>>,
    runtime: Arc<ControllerRuntimeState>,
    registry: Arc<BehaviorRegistry>,
    ci: Arc<dyn DroneCI>,
}

impl MessageDispatcher {
    /// Dispatcher without providers
    pub fn new(
        runtime: Arc<ControllerRuntimeState>,
        registry: Arc<BehaviorRegistry>,
        ci: Arc<dyn DroneCI>,
    ) -> Self {
        MessageDispatcher {
            providers: HashMap::new(),
            runtime,
            registry,
            ci,
        }
    }

    /// Registers a provider, replacing any previous one for the same type
    pub fn register_provider(&mut self, provider: Box<dyn MessageProvider>) {
        self.providers.insert(provider.data_type(), provider);
    }

    /// Data types with a registered provider
    pub fn supported_types(&self) -> Vec<DataType> {
        let mut types: Vec<DataType> = self.providers.keys().copied().collect();
        types.sort();
        types
    }

    /// Computes the response to `message`; `None` for messages that get none
    pub fn dispatch(&self, message: &Message) -> Option<Response> {
        match message {
            Message::InfoRequest { data_type } => Some(self.info(*data_type)),
            Message::MotorCommand { left, right } => Some(self.motor(*left, *right)),
            Message::BehaviorCommand { behavior_id, action } => {
                Some(self.behavior(behavior_id, *action))
            }
            Message::Heartbeat(heartbeat) => {
                debug!("Dropping heartbeat from {} on a request channel", heartbeat.sender_id);
                None
            }
        }
    }

    /// Handles one queued request and answers on its connection
    pub fn handle(&self, inbound: Inbound) {
        let Inbound {
            class,
            message,
            handler,
        } = inbound;
        let peer = handler.peer();
        let response = match message.class() {
            Some(expected) if expected != class => Some(Response::error(
                ProtocolErrorKind::WrongEndpoint,
                format!("{} message sent to the {} endpoint", expected.name(), class.name()),
            )),
            _ => self.dispatch(&message),
        };
        let Some(response) = response else {
            return;
        };
        if let Response::Error(e) = &response {
            warn!("Request from {} rejected: {}", peer, e);
        }
        if let Err(e) = handler.respond(&response) {
            warn!("Could not answer {}: {}", peer, e);
        }
    }

    /// Runs the consumer loop on its own thread
    ///
    /// The loop ends when every queue sender is gone or when `stop` fires or
    /// disconnects. Requests still queued at that point are dropped unanswered.
    pub fn spawn(self, queue: Receiver<Inbound>, stop: Receiver<()>) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("dispatcher".to_string())
            .spawn(move || loop {
                select! {
                    recv(queue) -> inbound => match inbound {
                        Ok(inbound) => self.handle(inbound),
                        Err(_) => {
                            debug!("Dispatch queue closed");
                            break;
                        }
                    },
                    recv(stop) -> _ => {
                        debug!("Dispatcher stopped");
                        break;
                    }
                }
            })
    }

    fn info(&self, data_type: DataType) -> Response {
        match self.providers.get(&data_type) {
            Some(provider) => Response::InfoResponse {
                data_type,
                payload: provider.payload(),
            },
            None => {
                let served: Vec<String> = self.supported_types().iter().map(|t| t.to_string()).collect();
                Response::error(
                    ProtocolErrorKind::UnsupportedDataType,
                    format!("no provider for {} (serving: {})", data_type, served.join(", ")),
                )
            }
        }
    }

    fn motor(&self, left: f64, right: f64) -> Response {
        if left.is_nan() || right.is_nan() {
            return Response::error(
                ProtocolErrorKind::InvalidMotorCommand,
                format!("motor values must be numbers, got ({}, {})", left, right),
            );
        }
        self.runtime.set_motor_targets(left, right);
        let (left, right) = self.runtime.motor_targets();
        Response::ack(format!("motors set to ({:.2}, {:.2})", left, right))
    }

    fn behavior(&self, id: &str, action: BehaviorAction) -> Response {
        if !self.registry.contains(id) {
            return Response::error(
                ProtocolErrorKind::UnknownBehavior,
                format!("no behavior registered as '{}'", id),
            );
        }
        match action {
            BehaviorAction::Activate(true) => {
                let Some(behavior) = self.registry.create(id) else {
                    return Response::error(ProtocolErrorKind::UnknownBehavior, id.to_string());
                };
                match self.runtime.activate(behavior, self.ci.as_ref()) {
                    Ok(Some(previous)) => {
                        info!("Behavior {} replaced by {}", previous, id);
                        Response::ack(format!("{} started, {} stopped", id, previous))
                    }
                    Ok(None) => Response::ack(format!("{} started", id)),
                    Err(e) => Response::error(error_kind(&e), e.to_string()),
                }
            }
            BehaviorAction::Activate(false) => {
                if self.runtime.deactivate(id, self.ci.as_ref()) {
                    Response::ack(format!("{} stopped", id))
                } else {
                    Response::ack(format!("{} was not running", id))
                }
            }
            BehaviorAction::SetArgument { index, value } => {
                match self.runtime.set_argument(id, index, value) {
                    Ok(ArgumentOutcome::Applied) => {
                        Response::ack(format!("{} argument {} set to {}", id, index, value))
                    }
                    Ok(ArgumentOutcome::NotActive { active }) => Response::error(
                        ProtocolErrorKind::BehaviorMismatch,
                        match active {
                            Some(active) => format!("{} is not active ({} is)", id, active),
                            None => format!("{} is not active (nothing running)", id),
                        },
                    ),
                    Err(e) => Response::error(error_kind(&e), e.to_string()),
                }
            }
        }
    }
}

fn error_kind(error: &BehaviorError) -> ProtocolErrorKind {
    match error {
        BehaviorError::UnknownArgument { .. } | BehaviorError::InvalidArgument { .. } => {
            ProtocolErrorKind::InvalidArgument
        }
        _ => ProtocolErrorKind::BehaviorFault,
    }
}

/// Builds the listener-to-dispatcher queue
pub fn dispatch_queue() -> (crossbeam::channel::Sender<Inbound>, Receiver<Inbound>) {
    crossbeam::channel::unbounded()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{NoopLogger, SimulatedDroneCI};
    use crate::network::messages::{InfoPayload, ProtocolError};
    use crate::network::providers::standard_providers;
    use crate::{DroneConfig, SimulationConfig};

    fn dispatcher() -> (MessageDispatcher, Arc<ControllerRuntimeState>) {
        let sim = SimulatedDroneCI::new(&SimulationConfig::default()).unwrap();
        sim.begin(&DroneConfig::default(), Arc::new(NoopLogger));
        let ci: Arc<dyn DroneCI> = Arc::new(sim);
        let runtime = Arc::new(ControllerRuntimeState::new());
        let mut dispatcher = MessageDispatcher::new(
            runtime.clone(),
            Arc::new(BehaviorRegistry::with_builtin()),
            ci.clone(),
        );
        for provider in standard_providers("d", ci, runtime.clone()) {
            dispatcher.register_provider(provider);
        }
        (dispatcher, runtime)
    }

    fn rejected_kind(response: Option<Response>) -> ProtocolErrorKind {
        match response {
            Some(Response::Error(ProtocolError { kind, .. })) => kind,
            other => panic!("expected error, got {:?}", other),
        }
    }

    #[test]
    fn test_info_echoes_type() {
        let (dispatcher, _) = dispatcher();
        match dispatcher.dispatch(&Message::InfoRequest { data_type: DataType::Compass }) {
            Some(Response::InfoResponse { data_type, payload }) => {
                assert_eq!(data_type, DataType::Compass);
                assert!(matches!(payload, InfoPayload::Compass(Some(_))));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_missing_provider_is_explicit_error() {
        let sim = SimulatedDroneCI::new(&SimulationConfig::default()).unwrap();
        let dispatcher = MessageDispatcher::new(
            Arc::new(ControllerRuntimeState::new()),
            Arc::new(BehaviorRegistry::new()),
            Arc::new(sim),
        );
        let response = dispatcher.dispatch(&Message::InfoRequest { data_type: DataType::Gps });
        assert_eq!(rejected_kind(response), ProtocolErrorKind::UnsupportedDataType);
    }

    #[test]
    fn test_missing_provider_lists_served_types() {
        let sim: Arc<dyn DroneCI> = Arc::new(SimulatedDroneCI::new(&SimulationConfig::default()).unwrap());
        let mut dispatcher = MessageDispatcher::new(
            Arc::new(ControllerRuntimeState::new()),
            Arc::new(BehaviorRegistry::new()),
            sim.clone(),
        );
        dispatcher.register_provider(Box::new(crate::network::providers::GpsProvider::new(sim.clone())));
        dispatcher.register_provider(Box::new(crate::network::providers::CompassProvider::new(sim)));
        assert_eq!(dispatcher.supported_types(), vec![DataType::Compass, DataType::Gps]);

        match dispatcher.dispatch(&Message::InfoRequest { data_type: DataType::Sensors }) {
            Some(Response::Error(e)) => {
                assert_eq!(e.kind, ProtocolErrorKind::UnsupportedDataType);
                assert!(e.detail.contains("serving: COMPASS, GPS"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_motor_command_clamps_and_rejects_nan() {
        let (dispatcher, runtime) = dispatcher();
        let response = dispatcher.dispatch(&Message::MotorCommand { left: 2.0, right: -0.5 });
        assert!(matches!(response, Some(Response::Ack { .. })));
        assert_eq!(runtime.motor_targets(), (1.0, -0.5));
        let response = dispatcher.dispatch(&Message::MotorCommand { left: f64::NAN, right: 0.0 });
        assert_eq!(rejected_kind(response), ProtocolErrorKind::InvalidMotorCommand);
        assert_eq!(runtime.motor_targets(), (1.0, -0.5));
    }

    #[test]
    fn test_behavior_commands() {
        let (dispatcher, runtime) = dispatcher();
        let unknown = dispatcher.dispatch(&Message::BehaviorCommand {
            behavior_id: "dance".into(),
            action: BehaviorAction::Activate(true),
        });
        assert_eq!(rejected_kind(unknown), ProtocolErrorKind::UnknownBehavior);

        dispatcher.dispatch(&Message::BehaviorCommand {
            behavior_id: "turn_to_orientation".into(),
            action: BehaviorAction::Activate(true),
        });
        assert_eq!(runtime.active_behavior().as_deref(), Some("turn_to_orientation"));

        let mismatch = dispatcher.dispatch(&Message::BehaviorCommand {
            behavior_id: "waypoint_navigation".into(),
            action: BehaviorAction::SetArgument { index: 0, value: 0.5 },
        });
        assert_eq!(rejected_kind(mismatch), ProtocolErrorKind::BehaviorMismatch);

        let applied = dispatcher.dispatch(&Message::BehaviorCommand {
            behavior_id: "turn_to_orientation".into(),
            action: BehaviorAction::SetArgument { index: 0, value: 180.0 },
        });
        assert!(matches!(applied, Some(Response::Ack { .. })));

        dispatcher.dispatch(&Message::BehaviorCommand {
            behavior_id: "waypoint_navigation".into(),
            action: BehaviorAction::Activate(false),
        });
        assert_eq!(runtime.active_behavior().as_deref(), Some("turn_to_orientation"));
    }

    #[test]
    fn test_heartbeat_gets_no_response() {
        let (dispatcher, _) = dispatcher();
        let heartbeat = crate::network::messages::Heartbeat {
            sender_id: "peer".into(),
            timestamp_ms: 0,
            address: None,
            status: "Running".into(),
            position: None,
            payload: String::new(),
        };
        assert_eq!(dispatcher.dispatch(&Message::Heartbeat(heartbeat)), None);
    }
}
