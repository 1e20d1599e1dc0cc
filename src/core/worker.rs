//! Session worker
//!
//! The worker task is the only writer of session state, the sample store and
//! the statistics. Between requests it polls the channel: in `ready` bytes
//! are split into reply lines, in `acquiring` they go to the stream decoder.

use super::error::EngineError;
use super::protocol::{
    AcquisitionConfig, Command, DataFormat, LineAssembler, MetadataEvent, MetadataKind,
    MetadataTable, Reply, ResponseClass, Sample, StreamItem, StreamParser,
};
use super::session::{
    Ack, ConsoleLine, DeviceInfo, Direction, EngineSettings, Request, Responder, SessionEvent,
    Shared,
};
use super::state_machine::SessionState;
use super::transport::{Channel, Transport, TransportError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

/// Largest single read
const READ_CHUNK: usize = 64 * 1024;

/// Samples committed to the store per lock
const COMMIT_BATCH: usize = 4096;

/// Longest reply line kept while waiting for `\n`
const MAX_REPLY_LINE: usize = 1024;

struct Pending {
    command: Command,
    deadline: Instant,
    reply: Responder<Ack>,
}

pub(crate) struct Worker {
    transport: Box<dyn Transport>,
    settings: EngineSettings,
    metadata: Arc<MetadataTable>,
    shared: Arc<Shared>,
    events: broadcast::Sender<SessionEvent>,
    requests: mpsc::Receiver<Request>,
    cancel: CancellationToken,
    interrupt: Arc<AtomicBool>,
    channel: Option<Box<dyn Channel>>,
    lines: LineAssembler,
    parser: Option<StreamParser>,
    pending: Option<Pending>,
    acquisition_deadline: Option<Instant>,
    consecutive_timeouts: u32,
}

impl Worker {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        transport: Box<dyn Transport>,
        settings: EngineSettings,
        metadata: Arc<MetadataTable>,
        shared: Arc<Shared>,
        events: broadcast::Sender<SessionEvent>,
        requests: mpsc::Receiver<Request>,
        cancel: CancellationToken,
        interrupt: Arc<AtomicBool>,
    ) -> Self {
        Self {
            transport,
            settings,
            metadata,
            shared,
            events,
            requests,
            cancel,
            interrupt,
            channel: None,
            lines: LineAssembler::new(MAX_REPLY_LINE),
            parser: None,
            pending: None,
            acquisition_deadline: None,
            consecutive_timeouts: 0,
        }
    }

    pub(crate) async fn run(mut self) {
        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            if self.channel.is_none() {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => break,
                    request = self.requests.recv() => match request {
                        Some(request) => self.handle_request(request).await,
                        None => break,
                    },
                }
                continue;
            }

            self.interrupt.store(false, Ordering::Release);
            loop {
                match self.requests.try_recv() {
                    Ok(request) => self.handle_request(request).await,
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        self.cancel.cancel();
                        break;
                    }
                }
            }
            if self.channel.is_none() || self.cancel.is_cancelled() {
                continue;
            }

            self.check_deadlines();
            self.drain_stream();
            if self.channel.is_none() {
                continue;
            }

            match self.poll_channel().await {
                // Let handles and subscribers run between busy reads
                Ok(true) => tokio::task::yield_now().await,
                Ok(false) => {
                    let idle = Duration::from_millis(self.settings.poll_interval_ms);
                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => {}
                        _ = tokio::time::sleep(idle) => {}
                        request = self.requests.recv() => {
                            if let Some(request) = request {
                                self.handle_request(request).await;
                            }
                        }
                    }
                }
                Err(e) => self.transport_lost(e).await,
            }
        }

        if self.channel.is_some() {
            self.disconnect("session shut down").await;
        }
        tracing::debug!("Session worker stopped");
    }

    // ---- state and events ----

    fn state(&self) -> SessionState {
        self.shared.machine.read().state()
    }

    fn set_state(&self, to: SessionState, reason: &str) {
        let from = {
            let mut machine = self.shared.machine.write();
            let from = machine.state();
            if from == to {
                return;
            }
            if let Err(e) = machine.transition(to, Some(reason)) {
                tracing::warn!("{}", e);
                return;
            }
            from
        };
        tracing::info!("Session {} -> {} ({})", from, to, reason);
        self.emit(SessionEvent::StateChanged {
            from,
            to,
            reason: reason.to_string(),
        });
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn console(&self, direction: Direction, text: &str) {
        self.emit(SessionEvent::Console(ConsoleLine {
            direction,
            text: text.to_string(),
        }));
    }

    fn respond(&self, command: &Command, reply: Responder<Ack>, result: Result<Ack, EngineError>) {
        self.emit(SessionEvent::CommandCompleted {
            command: command.name().to_string(),
            result: result.clone(),
        });
        let _ = reply.send(result);
    }

    fn fault(&mut self, error: EngineError) {
        tracing::warn!("Session fault: {}", error);
        self.emit(SessionEvent::Fault(error.clone()));
        if let Some(pending) = self.pending.take() {
            self.respond(&pending.command, pending.reply, Err(error.clone()));
        }
        if error.is_fatal() {
            self.parser = None;
            self.acquisition_deadline = None;
            self.lines.clear();
            self.shared.stats.finish();
            self.set_state(SessionState::Error, &error.to_string());
        }
    }

    // ---- requests ----

    async fn handle_request(&mut self, request: Request) {
        match request {
            Request::Connect(reply) => {
                let result = self.connect().await;
                let _ = reply.send(result);
            }
            Request::Command(command, reply) => self.issue(command, reply, true).await,
            Request::BatchSetter(command, reply) => self.issue(command, reply, false).await,
            Request::Disconnect(reply) => {
                self.disconnect("disconnect requested").await;
                let _ = reply.send(Ok(()));
            }
            Request::Reset(reply) => {
                self.teardown("reset requested").await;
                let _ = reply.send(Ok(()));
            }
        }
    }

    async fn connect(&mut self) -> Result<DeviceInfo, EngineError> {
        match self.state() {
            SessionState::Idle => {}
            SessionState::Ready | SessionState::Acquiring => {
                return Err(EngineError::Connection("already connected".to_string()))
            }
            state @ SessionState::Error => {
                return Err(EngineError::CommandRejected {
                    command: "connect".to_string(),
                    state,
                })
            }
        }

        tracing::info!("Connecting to {} at {} baud", self.transport.describe(), self.settings.baud_rate);
        let channel = self.transport.open(self.settings.baud_rate).await?;
        let connection = channel.connection_info();
        self.channel = Some(channel);
        self.lines.clear();

        match self.probe().await {
            Ok((identification, firmware)) => {
                let info = DeviceInfo {
                    identification,
                    firmware,
                    port: self.transport.describe(),
                    connection,
                };
                *self.shared.device.write() = Some(info.clone());
                self.consecutive_timeouts = 0;
                self.set_state(SessionState::Ready, "probe succeeded");
                self.emit(SessionEvent::Connected(info.clone()));
                Ok(info)
            }
            Err(e) => {
                tracing::warn!("Connect probe failed: {}", e);
                self.close_channel().await;
                Err(EngineError::Connection(format!("probe failed: {e}")))
            }
        }
    }

    async fn probe(&mut self) -> Result<(String, String), EngineError> {
        let identification = self.exchange(&Command::PowerShield).await?;
        let firmware = self.exchange(&Command::Version).await?;
        self.exchange(&Command::Htc).await?;
        Ok((
            identification.payload.unwrap_or_else(|| "PowerShield".to_string()),
            firmware.payload.unwrap_or_else(|| "unknown".to_string()),
        ))
    }

    /// Send `command` and wait for its reply before doing anything else
    async fn exchange(&mut self, command: &Command) -> Result<Ack, EngineError> {
        let bytes = command.encode()?;
        self.write(&bytes).await?;
        self.console(Direction::Tx, &command.to_string());

        let deadline = Instant::now() + self.settings.response_timeout();
        loop {
            while let Some(line) = self.lines.next_line() {
                self.console(Direction::Rx, &line);
                match Reply::classify(&line) {
                    Reply::Ack { command: name, payload } if name == command.name() => {
                        return Ok(Ack { command: name, payload });
                    }
                    Reply::Ack { command: name, .. } => {
                        tracing::debug!("Ignoring stale ack for `{}` during probe", name);
                    }
                    Reply::Error { text, .. } => {
                        return Err(EngineError::Device {
                            command: command.name().to_string(),
                            code: text,
                        });
                    }
                    Reply::Text(_) => {}
                }
            }

            if self.cancel.is_cancelled() {
                return Err(EngineError::Shutdown);
            }
            if Instant::now() >= deadline {
                return Err(EngineError::CommandTimeout {
                    command: command.name().to_string(),
                    timeout_ms: self.settings.response_timeout_ms,
                });
            }

            let channel = self.channel.as_mut().ok_or(TransportError::Disconnected)?;
            let data = channel.read(READ_CHUNK).await?;
            if data.is_empty() {
                tokio::time::sleep(Duration::from_millis(self.settings.poll_interval_ms)).await;
            } else {
                self.lines.push(&data);
            }
        }
    }

    async fn issue(&mut self, command: Command, reply: Responder<Ack>, check_coupling: bool) {
        let admitted = self.shared.machine.read().admit(&command);
        let checked = admitted.and_then(|()| {
            if check_coupling {
                self.check_active_config(&command)
            } else {
                Ok(())
            }
        });
        if let Err(e) = checked {
            tracing::debug!("Rejected `{}`: {}", command, e);
            self.respond(&command, reply, Err(e));
            return;
        }
        if let Some(pending) = &self.pending {
            let error = EngineError::CommandPending {
                issued: command.name().to_string(),
                outstanding: pending.command.name().to_string(),
            };
            self.respond(&command, reply, Err(error));
            return;
        }
        let bytes = match command.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                self.respond(&command, reply, Err(e));
                return;
            }
        };

        if let Err(e) = self.write(&bytes).await {
            self.respond(&command, reply, Err(e.clone()));
            self.transport_lost_engine(e).await;
            return;
        }
        self.console(Direction::Tx, &command.to_string());
        tracing::debug!(">> {}", command);

        let fire_and_forget = command.response_class() == ResponseClass::Silent
            || (self.state() == SessionState::Acquiring
                && matches!(command, Command::TargetReset(_))
                && self.shared.config.read().format == DataFormat::Binary);

        if fire_and_forget {
            let ack = Ack {
                command: command.name().to_string(),
                payload: None,
            };
            self.respond(&command, reply, Ok(ack));
            if command == Command::Psrst {
                self.teardown("board reset").await;
            }
            return;
        }

        self.pending = Some(Pending {
            command,
            deadline: Instant::now() + self.settings.response_timeout(),
            reply,
        });
    }

    /// Reject setters that would break the active configuration, and `start` on a broken one
    fn check_active_config(&self, command: &Command) -> Result<(), EngineError> {
        if command.is_configuration() {
            let mut next = self.shared.config.read().clone();
            next.apply(command);
            next.validate()
        } else if *command == Command::Start {
            self.shared.config.read().validate()
        } else {
            Ok(())
        }
    }

    async fn disconnect(&mut self, reason: &str) {
        if self.channel.is_some() {
            if self.state() == SessionState::Acquiring {
                if let Err(e) = self.write(b"stop\n").await {
                    tracing::debug!("Best-effort stop failed: {}", e);
                }
            }
            match self.write(b"hrc\n").await {
                Ok(()) => self.console(Direction::Tx, "hrc"),
                Err(e) => tracing::debug!("Best-effort hrc failed: {}", e),
            }
        }
        self.teardown(reason).await;
    }

    /// Close the channel, drop transient state and return to `idle`
    async fn teardown(&mut self, reason: &str) {
        if let Some(pending) = self.pending.take() {
            let error = EngineError::Connection(format!("session closed: {reason}"));
            self.respond(&pending.command, pending.reply, Err(error));
        }
        if self.parser.take().is_some() {
            self.shared.stats.finish();
        }
        self.acquisition_deadline = None;
        self.consecutive_timeouts = 0;
        self.close_channel().await;
        *self.shared.device.write() = None;
        self.set_state(SessionState::Idle, reason);
    }

    async fn close_channel(&mut self) {
        self.lines.clear();
        if let Some(mut channel) = self.channel.take() {
            if let Err(e) = channel.close().await {
                tracing::debug!("Channel close failed: {}", e);
            }
        }
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<(), EngineError> {
        let channel = self.channel.as_mut().ok_or(TransportError::Disconnected)?;
        channel.write(bytes).await?;
        Ok(())
    }

    async fn transport_lost(&mut self, error: TransportError) {
        self.transport_lost_engine(EngineError::from(error)).await;
    }

    async fn transport_lost_engine(&mut self, error: EngineError) {
        tracing::warn!("Transport lost: {}", error);
        self.emit(SessionEvent::Fault(error.clone()));
        if let Some(pending) = self.pending.take() {
            self.respond(&pending.command, pending.reply, Err(error.clone()));
        }
        self.teardown("transport lost").await;
    }

    // ---- deadlines ----

    fn check_deadlines(&mut self) {
        let now = Instant::now();

        if self.pending.as_ref().is_some_and(|p| now >= p.deadline) {
            let Some(pending) = self.pending.take() else {
                return;
            };
            if pending.command == Command::Stop && self.state() == SessionState::Acquiring {
                // Binary streams never acknowledge `stop`
                self.pending = Some(pending);
                self.finish_acquisition("stop reply window elapsed");
            } else {
                self.consecutive_timeouts += 1;
                let error = EngineError::CommandTimeout {
                    command: pending.command.name().to_string(),
                    timeout_ms: self.settings.response_timeout_ms,
                };
                tracing::warn!("{}", error);
                self.respond(&pending.command, pending.reply, Err(error.clone()));
                if self.consecutive_timeouts >= self.settings.timeout_escalation.max(1) {
                    self.fault(error);
                }
            }
        }

        if self.acquisition_deadline.is_some_and(|d| now >= d) {
            tracing::warn!("No end of acquisition received, closing the acquisition");
            self.finish_acquisition("acquisition window elapsed");
        }
    }

    // ---- incoming bytes ----

    async fn poll_channel(&mut self) -> Result<bool, TransportError> {
        let channel = self.channel.as_mut().ok_or(TransportError::Disconnected)?;
        let data = channel.read(READ_CHUNK).await?;
        if data.is_empty() {
            return Ok(false);
        }

        if let Some(parser) = self.parser.as_mut() {
            parser.feed(&data);
            return Ok(true);
        }

        self.lines.push(&data);
        while let Some(line) = self.lines.next_line() {
            self.console(Direction::Rx, &line);
            self.handle_reply(Reply::classify(&line));
            if let Some(parser) = self.parser.as_mut() {
                // `ack start` and the first samples can share a read
                parser.feed(&self.lines.take_rest());
                break;
            }
        }
        Ok(true)
    }

    fn handle_reply(&mut self, reply: Reply) {
        match reply {
            Reply::Ack { .. } | Reply::Error { .. } if self.pending.is_some() => {
                if let Some(pending) = self.pending.take() {
                    self.complete(pending, reply);
                }
            }
            Reply::Text(text) => tracing::trace!("<< {}", text),
            other => tracing::debug!("Unsolicited reply: {:?}", other),
        }
    }

    fn complete(&mut self, pending: Pending, reply: Reply) {
        let name = pending.command.name();
        let result = match reply {
            Reply::Ack { command, payload } if command == name => {
                self.consecutive_timeouts = 0;
                self.acknowledged(&pending.command);
                Ok(Ack { command, payload })
            }
            Reply::Ack { command, .. } => Err(EngineError::ResponseMismatch {
                expected: name.to_string(),
                received: command,
            }),
            Reply::Error { text, .. } => Err(EngineError::Device {
                command: name.to_string(),
                code: text,
            }),
            Reply::Text(text) => Err(EngineError::ResponseMismatch {
                expected: name.to_string(),
                received: text,
            }),
        };
        if let Err(e) = &result {
            tracing::warn!("Command `{}` failed: {}", pending.command, e);
        }
        self.respond(&pending.command, pending.reply, result);
    }

    fn acknowledged(&mut self, command: &Command) {
        if command.is_configuration() {
            self.shared.config.write().apply(command);
            return;
        }
        match command {
            Command::Start => self.begin_acquisition(),
            Command::Stop => self.finish_acquisition("stop acknowledged"),
            _ => {}
        }
    }

    fn begin_acquisition(&mut self) {
        let config: AcquisitionConfig = self.shared.config.read().clone();
        self.shared.store.clear();
        self.shared.stats.reset();
        self.parser = Some(StreamParser::new(
            config.format,
            self.settings.decode_options(self.metadata.clone()),
        ));
        let grace = Duration::from_millis(self.settings.end_grace_ms);
        self.acquisition_deadline = config.window().map(|w| Instant::now() + w + grace);
        tracing::info!(
            "Acquisition started: {} Hz, {}, {}",
            config.frequency_hz,
            config.format,
            config.output
        );
        self.set_state(SessionState::Acquiring, "start acknowledged");
    }

    fn finish_acquisition(&mut self, reason: &str) {
        if self.state() != SessionState::Acquiring {
            return;
        }
        if let Some(mut parser) = self.parser.take() {
            // Text after the end of the stream is reply traffic
            self.lines.push(&parser.take_rest());
            tracing::info!("Acquisition finished after {} samples", parser.decoded());
        }
        self.acquisition_deadline = None;
        self.shared.stats.finish();
        self.set_state(SessionState::Ready, reason);

        if self.pending.as_ref().is_some_and(|p| p.command == Command::Stop) {
            if let Some(pending) = self.pending.take() {
                let ack = Ack {
                    command: pending.command.name().to_string(),
                    payload: None,
                };
                self.respond(&pending.command, pending.reply, Ok(ack));
            }
        }
    }

    fn drain_stream(&mut self) {
        let mut batch: Vec<Sample> = Vec::with_capacity(COMMIT_BATCH);
        loop {
            if self.cancel.is_cancelled() || self.interrupt.load(Ordering::Acquire) {
                break;
            }
            let Some(parser) = self.parser.as_mut() else {
                break;
            };
            let Some(item) = parser.next_item() else {
                break;
            };

            match item {
                Ok(StreamItem::Sample(sample)) => {
                    batch.push(sample);
                    if batch.len() >= COMMIT_BATCH {
                        self.commit(&mut batch);
                    }
                }
                Ok(StreamItem::Metadata(event)) => {
                    self.commit(&mut batch);
                    match self.rejection_of_pending(&event) {
                        Some(reply) => {
                            self.console(Direction::Rx, &reply.to_string());
                            self.handle_reply(reply);
                        }
                        None => self.on_metadata(event),
                    }
                }
                Ok(StreamItem::Reply(reply)) => {
                    self.commit(&mut batch);
                    self.console(Direction::Rx, &reply.to_string());
                    self.handle_reply(reply);
                }
                Err(e) => {
                    self.commit(&mut batch);
                    self.fault(EngineError::Framing(e));
                    break;
                }
            }
        }
        self.commit(&mut batch);
    }

    /// An ASCII `error <cmd>` line that rejects the outstanding command
    fn rejection_of_pending(&self, event: &MetadataEvent) -> Option<Reply> {
        if event.kind != MetadataKind::ErrorCode || event.source != DataFormat::Ascii {
            return None;
        }
        let pending = self.pending.as_ref()?;
        let reply = Reply::classify(&event.text());
        let rejects = matches!(reply, Reply::Error { .. }) && reply.answers(pending.command.name());
        rejects.then_some(reply)
    }

    fn commit(&self, batch: &mut Vec<Sample>) {
        if batch.is_empty() {
            return;
        }
        self.shared.store.extend(batch);
        self.shared.stats.observe_all(batch);
        batch.clear();
    }

    fn on_metadata(&mut self, event: MetadataEvent) {
        match event.kind {
            MetadataKind::Timestamp => {
                if let Some(timestamp) = event.timestamp() {
                    self.shared.stats.record_timestamp(timestamp);
                }
            }
            MetadataKind::ErrorCode => tracing::warn!("Board reported: {}", event.text()),
            MetadataKind::OvercurrentEvent => tracing::warn!("Overcurrent reported by the board"),
            _ => {}
        }
        let end = event.kind == MetadataKind::EndOfAcquisition;
        self.emit(SessionEvent::Metadata(event));
        if end {
            self.finish_acquisition("end of acquisition");
        }
    }
}
