use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{broadcast, watch};

use super::{ConnectOutcome, ConnectionEvent, ConnectionState, Connector, EnvironmentConnection};
use crate::environments::{EnvironmentSource, nodes_requiring_setup};
use crate::error::{ConnectionError, EnvironmentError};
use crate::operator_log;
use crate::registry::EnvironmentEntry;

const EVENT_CAPACITY: usize = 64;

struct Slot {
    state: ConnectionState,
    entry: Option<EnvironmentEntry>,
    connection: Option<Arc<dyn EnvironmentConnection>>,
    attempt: u64,
}

/// Owns the single active environment connection.
///
/// Every `connect` or `disconnect` starts a new attempt generation. Work
/// belonging to an older generation is abandoned as soon as the generation
/// moves on, and its results never touch the slot.
pub struct ConnectionManager {
    source: Arc<dyn EnvironmentSource>,
    connector: Arc<dyn Connector>,
    slot: Mutex<Slot>,
    attempts: watch::Sender<u64>,
    events: broadcast::Sender<ConnectionEvent>,
}

impl ConnectionManager {
    pub fn new(source: Arc<dyn EnvironmentSource>, connector: Arc<dyn Connector>) -> Self {
        let (attempts, _) = watch::channel(0);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            source,
            connector,
            slot: Mutex::new(Slot {
                state: ConnectionState::Disconnected,
                entry: None,
                connection: None,
                attempt: 0,
            }),
            attempts,
            events,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.lock().state
    }

    pub fn environment_entry(&self) -> Option<EnvironmentEntry> {
        self.lock().entry.clone()
    }

    pub fn connection(&self) -> Option<Arc<dyn EnvironmentConnection>> {
        self.lock().connection.clone()
    }

    pub fn active_connection(&self) -> Result<Arc<dyn EnvironmentConnection>, ConnectionError> {
        self.connection().ok_or(ConnectionError::NotConnected)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    /// Selects `entry` and tries to connect to it, closing whatever was
    /// connected before.
    ///
    /// The entry stays selected but `Disconnected` while its nodes are read.
    /// Returns `SetupRequired` (leaving the manager in `Setup`) when some
    /// visible node has no identity yet. Handshake failures leave the manager
    /// `Disconnected`. If another `connect` or a `disconnect` happens
    /// meanwhile this attempt fails with `Superseded` and changes nothing.
    pub async fn connect(&self, entry: EnvironmentEntry) -> Result<ConnectOutcome, ConnectionError> {
        let name = entry.name.clone();
        let (attempt, previous) = {
            let mut slot = self.lock();
            slot.attempt += 1;
            slot.state = ConnectionState::Disconnected;
            slot.entry = Some(entry.clone());
            // Generations must reach the watch in the order they are taken.
            self.attempts.send_replace(slot.attempt);
            (slot.attempt, slot.connection.take())
        };
        if let Some(previous) = previous {
            previous.disconnect().await;
            self.publish(ConnectionEvent::Disconnected);
        }
        operator_log::info(
            module_path!(),
            format!("connecting to environment {name} (attempt {attempt})"),
        );

        let environment = match self.source.environment(&entry) {
            Ok(environment) => environment,
            Err(err) => return Err(self.fail(attempt, EnvironmentError::from(err).into())),
        };
        let nodes = match self.guard(attempt, &name, environment.get_nodes(false)).await? {
            Ok(nodes) => nodes,
            Err(err) => return Err(self.fail(attempt, err.into())),
        };

        let pending = nodes_requiring_setup(&nodes);
        if !pending.is_empty() {
            if !self.advance(attempt, ConnectionState::Setup) {
                return Err(ConnectionError::Superseded(name));
            }
            operator_log::info(
                module_path!(),
                format!(
                    "environment {name} needs identities for: {}",
                    pending.join(", ")
                ),
            );
            return Ok(ConnectOutcome::SetupRequired(pending));
        }
        if nodes.is_empty() {
            let err = ConnectionError::Handshake {
                environment: name,
                message: "environment has no visible nodes".to_string(),
            };
            return Err(self.fail(attempt, err));
        }

        if !self.advance(attempt, ConnectionState::Connecting) {
            return Err(ConnectionError::Superseded(name));
        }
        let connection = match self
            .guard(attempt, &name, self.connector.connect(&entry, nodes))
            .await?
        {
            Ok(connection) => connection,
            Err(err) => return Err(self.fail(attempt, err)),
        };

        let installed = {
            let mut slot = self.lock();
            if slot.attempt == attempt {
                slot.state = ConnectionState::Connected;
                slot.connection = Some(connection.clone());
                true
            } else {
                false
            }
        };
        if !installed {
            operator_log::debug(
                module_path!(),
                format!("discarding late connection to {name} from attempt {attempt}"),
            );
            connection.disconnect().await;
            return Err(ConnectionError::Superseded(name));
        }
        operator_log::info(module_path!(), format!("connected to environment {name}"));
        self.publish(ConnectionEvent::Connected);
        Ok(ConnectOutcome::Connected)
    }

    /// Drops back to `Disconnected` from any state. A pending attempt is
    /// abandoned and anything it produces later is discarded.
    pub async fn disconnect(&self) {
        let (previous_state, previous) = {
            let mut slot = self.lock();
            slot.attempt += 1;
            let previous_state = slot.state;
            slot.state = ConnectionState::Disconnected;
            slot.entry = None;
            self.attempts.send_replace(slot.attempt);
            (previous_state, slot.connection.take())
        };
        if let Some(connection) = previous {
            connection.disconnect().await;
        }
        if previous_state != ConnectionState::Disconnected {
            operator_log::info(
                module_path!(),
                format!("disconnected (was {previous_state})"),
            );
            self.publish(ConnectionEvent::Disconnected);
        }
    }

    /// Runs `work` unless attempt `attempt` is superseded first.
    async fn guard<F: Future>(
        &self,
        attempt: u64,
        name: &str,
        work: F,
    ) -> Result<F::Output, ConnectionError> {
        let mut generations = self.attempts.subscribe();
        tokio::select! {
            output = work => Ok(output),
            _ = generations.wait_for(|current| *current != attempt) => {
                operator_log::debug(
                    module_path!(),
                    format!("attempt {attempt} for {name} was superseded"),
                );
                Err(ConnectionError::Superseded(name.to_string()))
            }
        }
    }

    fn advance(&self, attempt: u64, state: ConnectionState) -> bool {
        let mut slot = self.lock();
        if slot.attempt != attempt {
            return false;
        }
        slot.state = state;
        true
    }

    /// Resets the slot if `attempt` still owns it and hands `err` back.
    fn fail(&self, attempt: u64, err: ConnectionError) -> ConnectionError {
        let previous_state = {
            let mut slot = self.lock();
            if slot.attempt == attempt {
                slot.entry = None;
                Some(std::mem::replace(
                    &mut slot.state,
                    ConnectionState::Disconnected,
                ))
            } else {
                None
            }
        };
        if let Some(previous_state) = previous_state {
            operator_log::warn(module_path!(), format!("connection attempt failed: {err}"));
            if previous_state != ConnectionState::Disconnected {
                self.publish(ConnectionEvent::Disconnected);
            }
        }
        err
    }

    fn publish(&self, event: ConnectionEvent) {
        let _ = self.events.send(event);
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
