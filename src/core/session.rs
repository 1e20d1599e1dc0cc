//! Session handle for one PowerShield board
//!
//! A [`Session`] owns a worker task that performs all transport I/O and
//! decoding. Callers issue requests over an `mpsc` channel and observe the
//! session through [`SessionEvent`]s on a `broadcast` channel, or by polling
//! short locked copies of the state, the sample window and the statistics.

use super::error::EngineError;
use super::protocol::{
    AcquisitionConfig, Command, DecodeOptions, MetadataEvent, MetadataTable, Sample, SignMode,
    BAUD_RATE,
};
use super::state_machine::{SessionState, SessionStateMachine, StateTransition};
use super::stats::{StatsAggregator, StatsSnapshot};
use super::store::{SampleStore, DEFAULT_CAPACITY};
use super::transport::Transport;
use super::worker::Worker;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Engine tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Serial bit rate
    pub baud_rate: u32,
    /// How long a command waits for its reply
    pub response_timeout_ms: u64,
    /// Consecutive timeouts that latch the `error` state
    pub timeout_escalation: u32,
    /// Sample store capacity
    pub store_capacity: usize,
    /// Consecutive undecodable bytes tolerated in a stream
    pub resync_window: usize,
    /// Longest variable-length metadata payload
    pub metadata_payload_limit: usize,
    /// Extra time after the acquisition window before giving up on `end`
    pub end_grace_ms: u64,
    /// Sleep between empty reads
    pub poll_interval_ms: u64,
    /// Mantissa sign handling
    pub sign_mode: SignMode,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            baud_rate: BAUD_RATE,
            response_timeout_ms: 1000,
            timeout_escalation: 1,
            store_capacity: DEFAULT_CAPACITY,
            resync_window: 64,
            metadata_payload_limit: 256,
            end_grace_ms: 2000,
            poll_interval_ms: 1,
            sign_mode: SignMode::Unsigned,
        }
    }
}

impl EngineSettings {
    /// Response timeout as a duration
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    /// Decoder options for these settings
    pub fn decode_options(&self, metadata: Arc<MetadataTable>) -> DecodeOptions {
        DecodeOptions {
            sign: self.sign_mode,
            resync_window: self.resync_window,
            max_payload: self.metadata_payload_limit,
            metadata,
        }
    }
}

/// Identification gathered by the connect probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    /// Reply payload to `powershield`
    pub identification: String,
    /// Reply payload to `version`
    pub firmware: String,
    /// Transport endpoint
    pub port: String,
    /// Channel description
    pub connection: String,
}

/// Successful command outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Ack {
    /// Acknowledged command name
    pub command: String,
    /// Extra words after the command name
    pub payload: Option<String>,
}

/// Direction of a console line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Host to board
    Tx,
    /// Board to host
    Rx,
}

/// One line of wire traffic
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsoleLine {
    /// Direction
    pub direction: Direction,
    /// Line without terminator
    pub text: String,
}

/// Session events
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// State changed
    StateChanged {
        /// Previous state
        from: SessionState,
        /// New state
        to: SessionState,
        /// Why
        reason: String,
    },
    /// Connect probe succeeded
    Connected(DeviceInfo),
    /// A command finished
    CommandCompleted {
        /// Command name
        command: String,
        /// Outcome
        result: Result<Ack, EngineError>,
    },
    /// Metadata seen in the stream
    Metadata(MetadataEvent),
    /// Wire traffic
    Console(ConsoleLine),
    /// Failure not tied to a caller request
    Fault(EngineError),
}

pub(crate) type Responder<T> = oneshot::Sender<Result<T, EngineError>>;

/// Requests handled by the worker
pub(crate) enum Request {
    Connect(Responder<DeviceInfo>),
    Command(Command, Responder<Ack>),
    /// Setter from a batch already validated as a whole
    BatchSetter(Command, Responder<Ack>),
    Disconnect(Responder<()>),
    Reset(Responder<()>),
}

/// State shared between the handle and the worker
pub(crate) struct Shared {
    pub(crate) machine: RwLock<SessionStateMachine>,
    pub(crate) store: SampleStore,
    pub(crate) stats: StatsAggregator,
    pub(crate) config: RwLock<AcquisitionConfig>,
    pub(crate) device: RwLock<Option<DeviceInfo>>,
}

/// Handle to a running session
pub struct Session {
    id: Uuid,
    shared: Arc<Shared>,
    requests: mpsc::Sender<Request>,
    events: broadcast::Sender<SessionEvent>,
    cancel: CancellationToken,
    interrupt: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl Session {
    /// Start a worker using the current firmware metadata layout
    pub fn spawn<T>(transport: T, settings: EngineSettings) -> Self
    where
        T: Transport + 'static,
    {
        Self::spawn_with_table(transport, settings, Arc::new(MetadataTable::firmware_v1()))
    }

    /// Start a worker with a custom metadata table
    pub fn spawn_with_table<T>(transport: T, settings: EngineSettings, metadata: Arc<MetadataTable>) -> Self
    where
        T: Transport + 'static,
    {
        let id = Uuid::new_v4();
        let shared = Arc::new(Shared {
            machine: RwLock::new(SessionStateMachine::new()),
            store: SampleStore::new(settings.store_capacity),
            stats: StatsAggregator::new(),
            config: RwLock::new(AcquisitionConfig::default()),
            device: RwLock::new(None),
        });
        let (request_tx, request_rx) = mpsc::channel(64);
        let (event_tx, _) = broadcast::channel(1024);
        let cancel = CancellationToken::new();
        let interrupt = Arc::new(AtomicBool::new(false));

        let worker = Worker::new(
            Box::new(transport),
            settings,
            metadata,
            shared.clone(),
            event_tx.clone(),
            request_rx,
            cancel.clone(),
            interrupt.clone(),
        );
        tracing::debug!("Spawning session worker {}", id);
        let handle = tokio::spawn(worker.run());

        Self {
            id,
            shared,
            requests: request_tx,
            events: event_tx,
            cancel,
            interrupt,
            worker: Some(handle),
        }
    }

    /// Get session ID
    pub fn id(&self) -> Uuid {
        self.id
    }

    async fn request<R>(&self, build: impl FnOnce(Responder<R>) -> Request) -> Result<R, EngineError> {
        let (tx, rx) = oneshot::channel();
        self.requests
            .send(build(tx))
            .await
            .map_err(|_| EngineError::Shutdown)?;
        rx.await.map_err(|_| EngineError::Shutdown)?
    }

    /// Open the channel and run the probe sequence
    pub async fn connect(&self) -> Result<DeviceInfo, EngineError> {
        self.request(Request::Connect).await
    }

    /// Send one command and wait for its reply
    pub async fn command(&self, command: Command) -> Result<Ack, EngineError> {
        command.validate()?;
        self.request(|tx| Request::Command(command, tx)).await
    }

    /// Validate `config` and send its setters in order, stopping at the first failure
    pub async fn configure(&self, config: &AcquisitionConfig) -> Result<(), EngineError> {
        config.validate()?;
        // Intermediate states of the batch may break the format coupling
        for command in config.commands() {
            self.request(|tx| Request::BatchSetter(command, tx)).await?;
        }
        Ok(())
    }

    /// Start an acquisition with the active configuration
    pub async fn start(&self) -> Result<Ack, EngineError> {
        self.command(Command::Start).await
    }

    /// Stop the running acquisition
    pub async fn stop(&self) -> Result<Ack, EngineError> {
        self.request_interrupting(|tx| Request::Command(Command::Stop, tx))
            .await
    }

    /// Leave host control and close the channel
    pub async fn disconnect(&self) -> Result<(), EngineError> {
        self.request_interrupting(Request::Disconnect).await
    }

    /// Clear a latched fault by tearing the channel down
    pub async fn reset(&self) -> Result<(), EngineError> {
        self.request_interrupting(Request::Reset).await
    }

    async fn request_interrupting<R>(
        &self,
        build: impl FnOnce(Responder<R>) -> Request,
    ) -> Result<R, EngineError> {
        let (tx, rx) = oneshot::channel();
        self.requests
            .send(build(tx))
            .await
            .map_err(|_| EngineError::Shutdown)?;
        // Let the worker leave a long decode run early
        self.interrupt.store(true, Ordering::Release);
        rx.await.map_err(|_| EngineError::Shutdown)?
    }

    /// Get current state
    pub fn state(&self) -> SessionState {
        self.shared.machine.read().state()
    }

    /// State transitions so far
    pub fn history(&self) -> Vec<StateTransition> {
        self.shared.machine.read().history().to_vec()
    }

    /// Most recent `n` samples, oldest first
    pub fn window(&self, n: usize) -> Vec<Sample> {
        self.shared.store.window(n)
    }

    /// Every retained sample
    pub fn export_all(&self) -> Vec<Sample> {
        self.shared.store.export_all()
    }

    /// Statistics of the current acquisition
    pub fn snapshot(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Sample store, for counters such as evictions
    pub fn store(&self) -> &SampleStore {
        &self.shared.store
    }

    /// Configuration acknowledged by the board
    pub fn active_config(&self) -> AcquisitionConfig {
        self.shared.config.read().clone()
    }

    /// Probe results of the current connection
    pub fn device_info(&self) -> Option<DeviceInfo> {
        self.shared.device.read().clone()
    }

    /// Subscribe to session events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Stop the worker, disconnecting first when a channel is open
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.worker.take() {
            if let Err(e) = handle.await {
                tracing::warn!("Session worker ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transport::{MockTransport, TransportError};

    #[tokio::test]
    async fn test_open_failure_keeps_session_idle() {
        let mut transport = MockTransport::new();
        transport
            .expect_open()
            .withf(|baud| *baud == BAUD_RATE)
            .times(1)
            .returning(|_| Err(TransportError::PortNotFound("COM9".to_string())));
        transport.expect_describe().return_const("COM9".to_string());

        let session = Session::spawn(transport, EngineSettings::default());
        let err = session.connect().await.unwrap_err();
        assert_eq!(err, EngineError::Connection("Port not found: COM9".to_string()));
        assert_eq!(session.state(), SessionState::Idle);
        assert!(session.device_info().is_none());
        assert!(session.history().is_empty());
        session.shutdown().await;
    }

    #[tokio::test]
    async fn test_requests_after_cancel_fail() {
        let mut transport = MockTransport::new();
        transport.expect_open().never();
        let session = Session::spawn(transport, EngineSettings::default());
        session.cancel.cancel();
        assert_eq!(session.connect().await, Err(EngineError::Shutdown));
    }

    #[test]
    fn test_settings_defaults() {
        let settings = EngineSettings::default();
        assert_eq!(settings.baud_rate, 3_686_400);
        assert_eq!(settings.response_timeout(), Duration::from_secs(1));
        assert_eq!(settings.store_capacity, 5_000_000);
        let options = settings.decode_options(Arc::new(MetadataTable::firmware_v1()));
        assert_eq!(options.resync_window, 64);
        assert_eq!(options.max_payload, 256);
    }
}
