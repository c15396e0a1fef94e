//! The engine task: socket reads, frame dispatch and deadline expiry

use std::collections::VecDeque;
use std::future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

use super::pending::{
    deadline_after, fail, resolve, AckWait, ActivationWait, Collection, ReceiveWait,
};
use super::{Command, EngineSettings, Shared};
use crate::codec::{
    payload_type, ActivationType, DiagnosticAck, DiagnosticMessage, DoIpFrame, FrameDecoder,
    NackCode, Payload, RoutingActivationRequest, RoutingActivationResponse,
};
use crate::error::{ClientError, Result};
use crate::uds::is_response_pending;

const READ_CHUNK: usize = 4096;

/// Why the loop stopped
#[derive(Debug)]
enum Stop {
    Shutdown,
    Eof,
    Io(String),
    Parse(String),
}

impl Stop {
    fn to_error(&self) -> ClientError {
        match self {
            Self::Shutdown => ClientError::ConnectFailed("session closed".to_string()),
            Self::Eof => ClientError::Eof,
            Self::Io(msg) => ClientError::Io(msg.clone()),
            Self::Parse(msg) => ClientError::Parse(msg.clone()),
        }
    }
}

/// Clears the shared liveness flag however the engine task ends,
/// including a panic or an abort
struct AliveGuard(Arc<AtomicBool>);

impl Drop for AliveGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

enum Event {
    Command(Option<Command>),
    Read(std::io::Result<usize>),
    Deadline,
}

pub(crate) struct Engine {
    stream: TcpStream,
    commands: mpsc::UnboundedReceiver<Command>,
    rx_buf: BytesMut,
    decoder: FrameDecoder,
    shared: Shared,
    settings: EngineSettings,
    activation: Option<ActivationWait>,
    acks: VecDeque<AckWait>,
    receives: VecDeque<ReceiveWait>,
    collections: Vec<Collection>,
    /// Diagnostic frames that arrived while nobody was waiting
    inbox: VecDeque<Vec<u8>>,
    /// Last response pending from the target seen while no receive was waiting
    pending_at: Option<Instant>,
    _alive: AliveGuard,
}

impl Engine {
    pub(crate) fn new(
        stream: TcpStream,
        commands: mpsc::UnboundedReceiver<Command>,
        shared: Shared,
        settings: EngineSettings,
    ) -> Self {
        let alive = AliveGuard(Arc::clone(&shared.alive));
        Self {
            stream,
            commands,
            rx_buf: BytesMut::with_capacity(READ_CHUNK),
            decoder: FrameDecoder::new(settings.max_payload_len),
            shared,
            settings,
            activation: None,
            acks: VecDeque::new(),
            receives: VecDeque::new(),
            collections: Vec::new(),
            inbox: VecDeque::new(),
            pending_at: None,
            _alive: alive,
        }
    }

    pub(crate) async fn run(mut self) {
        info!(
            source = %format!("0x{:04X}", self.shared.source_address),
            "DoIP engine started"
        );

        let stop = loop {
            let deadline = self.next_deadline();
            let event = tokio::select! {
                cmd = self.commands.recv() => Event::Command(cmd),
                res = self.stream.read_buf(&mut self.rx_buf) => Event::Read(res),
                _ = wait_until(deadline) => Event::Deadline,
            };

            let step = match event {
                Event::Command(None) | Event::Command(Some(Command::Shutdown)) => {
                    Err(Stop::Shutdown)
                }
                Event::Command(Some(cmd)) => self.handle_command(cmd).await,
                Event::Read(Ok(0)) => Err(Stop::Eof),
                Event::Read(Ok(n)) => {
                    debug!(len = n, "Read from gateway");
                    self.drain_frames().await
                }
                Event::Read(Err(e)) => Err(Stop::Io(e.to_string())),
                Event::Deadline => {
                    self.expire(Instant::now());
                    Ok(())
                }
            };

            if let Err(stop) = step {
                break stop;
            }
        };

        self.terminate(stop).await;
    }

    fn next_deadline(&self) -> Option<Instant> {
        let activation = self.activation.as_ref().and_then(|w| w.deadline);
        let acks = self.acks.iter().filter_map(|w| w.deadline);
        let receives = self.receives.iter().filter_map(|w| w.deadline);
        let collections = self.collections.iter().map(|c| c.deadline);
        activation
            .into_iter()
            .chain(acks)
            .chain(receives)
            .chain(collections)
            .min()
    }

    // =========================================================================
    // Commands
    // =========================================================================

    async fn handle_command(&mut self, cmd: Command) -> std::result::Result<(), Stop> {
        let now = Instant::now();
        match cmd {
            Command::Activate {
                activation_type,
                reply,
            } => self.start_activation(activation_type, reply, now).await,
            Command::Send {
                target,
                payload,
                timeout,
                reply,
            } => self.start_send(target, payload, timeout, reply, now).await,
            Command::Receive { timeout, reply } => {
                let target = self.current_target();
                let buffered = self
                    .inbox
                    .iter()
                    .position(|frame| frame_source(frame) == Some(target));
                match buffered.and_then(|i| self.inbox.remove(i)) {
                    Some(frame) => resolve(reply, Ok(frame)),
                    None => {
                        let mut wait = ReceiveWait {
                            deadline: deadline_after(now, timeout),
                            timeout,
                            reply,
                        };
                        if let Some(pending_at) = self.pending_at.take() {
                            wait.extend_from(pending_at, self.settings.p2_star);
                        }
                        self.receives.push_back(wait);
                    }
                }
                Ok(())
            }
            Command::Collect { window, reply } => {
                let deadline = window
                    .checked_add(self.settings.multi_response_grace)
                    .and_then(|t| now.checked_add(t));
                match deadline {
                    Some(deadline) => self.collections.push(Collection {
                        deadline,
                        frames: self.inbox.drain(..).collect(),
                        reply,
                    }),
                    None => fail(
                        reply,
                        &ClientError::InvalidArgument("collection window is too large".into()),
                    ),
                }
                Ok(())
            }
            Command::Shutdown => Err(Stop::Shutdown),
        }
    }

    async fn start_activation(
        &mut self,
        activation_type: ActivationType,
        reply: oneshot::Sender<Result<()>>,
        now: Instant,
    ) -> std::result::Result<(), Stop> {
        if self.activation.is_some() {
            fail(
                reply,
                &ClientError::InvalidArgument("routing activation already in progress".into()),
            );
            return Ok(());
        }

        let request = Payload::RoutingActivationRequest(RoutingActivationRequest {
            source_address: self.shared.source_address,
            activation_type,
        });
        info!(?activation_type, "Requesting routing activation");
        self.activation = Some(ActivationWait {
            deadline: deadline_after(now, Some(self.settings.activation_timeout)),
            reply,
        });
        self.write(&request).await
    }

    async fn start_send(
        &mut self,
        target: u16,
        payload: Bytes,
        timeout: Option<Duration>,
        reply: oneshot::Sender<Result<()>>,
        now: Instant,
    ) -> std::result::Result<(), Stop> {
        if !self.inbox.is_empty() {
            debug!(count = self.inbox.len(), "Discarding unclaimed responses");
            self.inbox.clear();
        }
        self.pending_at = None;

        let message = Payload::DiagnosticMessage(DiagnosticMessage {
            source_address: self.shared.source_address,
            target_address: target,
            user_data: payload,
        });
        debug!(target = %format!("0x{:04X}", target), "Sending diagnostic message");
        self.acks.push_back(AckWait {
            deadline: deadline_after(now, timeout),
            reply,
        });
        self.write(&message).await
    }

    async fn write(&mut self, payload: &Payload) -> std::result::Result<(), Stop> {
        let bytes = DoIpFrame::new(self.settings.protocol_version, payload).encode();
        self.stream
            .write_all(&bytes)
            .await
            .map_err(|e| Stop::Io(e.to_string()))
    }

    // =========================================================================
    // Incoming frames
    // =========================================================================

    async fn drain_frames(&mut self) -> std::result::Result<(), Stop> {
        loop {
            match self.decoder.decode(&mut self.rx_buf) {
                Ok(Some(frame)) => self.dispatch(frame).await?,
                Ok(None) => return Ok(()),
                Err(e) => {
                    error!(%e, "Invalid DoIP header, dropping connection");
                    return Err(Stop::Parse(e.to_string()));
                }
            }
        }
    }

    async fn dispatch(&mut self, frame: DoIpFrame) -> std::result::Result<(), Stop> {
        let payload = match frame.decode_payload() {
            Ok(payload) => payload,
            Err(e) => {
                warn!(
                    %e,
                    payload_type = %format!("0x{:04X}", frame.header.payload_type),
                    "Malformed payload"
                );
                if frame.header.payload_type == payload_type::DIAGNOSTIC_MESSAGE {
                    if let Some(wait) = self.receives.pop_front() {
                        fail(wait.reply, &ClientError::from(e));
                    }
                }
                return Ok(());
            }
        };

        match payload {
            Payload::AliveCheckRequest => {
                debug!("Answering alive check");
                let response = Payload::AliveCheckResponse {
                    source_address: self.shared.source_address,
                };
                self.write(&response).await?;
            }
            Payload::RoutingActivationResponse(resp) => self.on_activation_response(resp),
            Payload::DiagnosticAck(ack) => self.on_ack(ack, false),
            Payload::DiagnosticNack(ack) => self.on_ack(ack, true),
            Payload::DiagnosticMessage(msg) => self.on_diagnostic(&frame, msg),
            Payload::GenericNack { code } => {
                warn!(code = %format!("0x{:02X}", code), "Generic NACK from gateway");
                let err = ClientError::UnexpectedResponse(format!("generic NACK 0x{:02X}", code));
                if let Some(wait) = self.activation.take() {
                    fail(wait.reply, &err);
                } else if let Some(wait) = self.acks.pop_front() {
                    fail(wait.reply, &err);
                }
            }
            other => {
                debug!(
                    payload_type = %format!("0x{:04X}", other.payload_type()),
                    "Ignoring payload"
                );
            }
        }
        Ok(())
    }

    fn on_activation_response(&mut self, resp: RoutingActivationResponse) {
        let Some(wait) = self.activation.take() else {
            warn!(code = %resp.code, "Unsolicited routing activation response");
            return;
        };

        let result = if !resp.code.is_success() {
            warn!(code = %resp.code, "Routing activation denied");
            Err(ClientError::RoutingActivationDenied(resp.code))
        } else if resp.tester_address != self.shared.source_address {
            warn!(
                expected = %format!("0x{:04X}", self.shared.source_address),
                actual = %format!("0x{:04X}", resp.tester_address),
                "Routing activation answered for another client"
            );
            Err(ClientError::RoutingActivationWithDifferentClientAddress {
                expected: self.shared.source_address,
                actual: resp.tester_address,
            })
        } else {
            info!(
                entity = %format!("0x{:04X}", resp.entity_address),
                "Routing activated"
            );
            Ok(())
        };
        resolve(wait.reply, result);
    }

    fn on_ack(&mut self, ack: DiagnosticAck, negative: bool) {
        if ack.target_address != self.shared.source_address {
            debug!(
                target = %format!("0x{:04X}", ack.target_address),
                "Dropping acknowledge for another client"
            );
            return;
        }
        let Some(wait) = self.acks.pop_front() else {
            debug!(negative, "Acknowledge without outstanding send");
            return;
        };

        if negative {
            let code = NackCode(ack.code);
            warn!(%code, "Diagnostic message negative acknowledge");
            fail(wait.reply, &ClientError::DiagnosticMessageNegativeAck(code));
        } else {
            resolve(wait.reply, Ok(()));
        }
    }

    fn on_diagnostic(&mut self, frame: &DoIpFrame, msg: DiagnosticMessage) {
        if msg.target_address != self.shared.source_address {
            warn!(
                target = %format!("0x{:04X}", msg.target_address),
                "Dropping diagnostic message for another client"
            );
            return;
        }

        let from_target = msg.source_address == self.current_target();

        if is_response_pending(&msg.user_data) {
            debug!(
                source = %format!("0x{:04X}", msg.source_address),
                "Response pending"
            );
            if from_target {
                let now = Instant::now();
                match self.receives.front_mut() {
                    Some(wait) => wait.extend(now, self.settings.p2_star),
                    None => self.pending_at = Some(now),
                }
            }
            return;
        }

        if from_target {
            self.pending_at = None;
        }

        let bytes = frame.encode().to_vec();

        if !self.collections.is_empty() {
            for collection in &mut self.collections {
                collection.frames.push(bytes.clone());
            }
            return;
        }

        if from_target {
            if let Some(wait) = self.receives.pop_front() {
                resolve(wait.reply, Ok(bytes));
                return;
            }
        }

        if self.inbox.len() >= self.settings.rx_queue_capacity {
            warn!(
                capacity = self.settings.rx_queue_capacity,
                "Receive queue full, dropping oldest response"
            );
            self.inbox.pop_front();
        }
        self.inbox.push_back(bytes);
    }

    fn current_target(&self) -> u16 {
        self.shared.target_address.load(Ordering::SeqCst)
    }

    // =========================================================================
    // Deadlines and shutdown
    // =========================================================================

    fn expire(&mut self, now: Instant) {
        if self
            .activation
            .as_ref()
            .is_some_and(|wait| wait.deadline.is_some_and(|d| d <= now))
        {
            if let Some(wait) = self.activation.take() {
                warn!("Routing activation timed out");
                fail(wait.reply, &ClientError::Timeout);
            }
        }

        let expired = |deadline: Option<Instant>| deadline.is_some_and(|d| d <= now);

        for wait in drain_where(&mut self.acks, |w| expired(w.deadline)) {
            fail(wait.reply, &ClientError::Timeout);
        }
        for wait in drain_where(&mut self.receives, |w| expired(w.deadline)) {
            fail(wait.reply, &ClientError::Timeout);
        }

        let (done, open): (Vec<_>, Vec<_>) = self
            .collections
            .drain(..)
            .partition(|c| c.deadline <= now);
        self.collections = open;
        for collection in done {
            debug!(count = collection.frames.len(), "Collection window closed");
            resolve(collection.reply, Ok(collection.frames));
        }
    }

    async fn terminate(mut self, stop: Stop) {
        match &stop {
            Stop::Shutdown => info!("DoIP engine shutting down"),
            Stop::Eof => info!("Gateway closed the connection"),
            Stop::Io(e) => error!(%e, "Socket error"),
            Stop::Parse(e) => error!(%e, "Stream is out of sync"),
        }
        self.shared.alive.store(false, Ordering::SeqCst);
        self.commands.close();

        let err = stop.to_error();
        if let Some(wait) = self.activation.take() {
            fail(wait.reply, &err);
        }
        for wait in self.acks.drain(..) {
            fail(wait.reply, &err);
        }
        for wait in self.receives.drain(..) {
            fail(wait.reply, &err);
        }
        for collection in self.collections.drain(..) {
            fail(collection.reply, &err);
        }

        while let Ok(cmd) = self.commands.try_recv() {
            match cmd {
                Command::Activate { reply, .. } | Command::Send { reply, .. } => {
                    fail(reply, &err)
                }
                Command::Receive { reply, .. } => fail(reply, &err),
                Command::Collect { reply, .. } => fail(reply, &err),
                Command::Shutdown => {}
            }
        }

        if let Err(e) = self.stream.shutdown().await {
            debug!(%e, "Socket shutdown");
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => future::pending().await,
    }
}

/// Source address of an encoded diagnostic frame
fn frame_source(frame: &[u8]) -> Option<u16> {
    frame
        .get(8..10)
        .map(|b| u16::from_be_bytes([b[0], b[1]]))
}

/// Remove and return every element matching `pred`, keeping order
fn drain_where<T>(queue: &mut VecDeque<T>, mut pred: impl FnMut(&T) -> bool) -> Vec<T> {
    let mut taken = Vec::new();
    let mut kept = VecDeque::with_capacity(queue.len());
    for item in queue.drain(..) {
        if pred(&item) {
            taken.push(item);
        } else {
            kept.push_back(item);
        }
    }
    *queue = kept;
    taken
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_source() {
        let frame = [0x02, 0xFD, 0x80, 0x01, 0, 0, 0, 5, 0x06, 0x80, 0x0E, 0x00, 0x50];
        assert_eq!(frame_source(&frame), Some(0x0680));
        assert_eq!(frame_source(&frame[..9]), None);
    }

    #[test]
    fn test_drain_where_keeps_order() {
        let mut queue: VecDeque<u32> = (1..=6).collect();
        let taken = drain_where(&mut queue, |n| n % 2 == 0);
        assert_eq!(taken, vec![2, 4, 6]);
        assert_eq!(queue, VecDeque::from(vec![1, 3, 5]));
    }

    #[tokio::test]
    async fn test_alive_cleared_when_task_panics() {
        let alive = Arc::new(AtomicBool::new(true));
        let guard = AliveGuard(Arc::clone(&alive));

        let task = tokio::spawn(async move {
            let _guard = guard;
            panic!("engine failure");
        });
        assert!(task.await.unwrap_err().is_panic());
        assert!(!alive.load(Ordering::SeqCst));
    }

    #[test]
    fn test_stop_error_mapping() {
        assert_eq!(Stop::Eof.to_error(), ClientError::Eof);
        assert!(matches!(Stop::Io("reset".into()).to_error(), ClientError::Io(_)));
        assert!(matches!(Stop::Parse("bad".into()).to_error(), ClientError::Parse(_)));
        assert!(matches!(
            Stop::Shutdown.to_error(),
            ClientError::ConnectFailed(_)
        ));
    }
}
