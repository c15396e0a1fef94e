//! Background I/O engine
//!
//! One task per session owns the TCP stream. Client calls reach it as
//! [`Command`]s over an unbounded channel and get their outcome back on a
//! private oneshot. The task is the only code that reads or writes the socket.

mod pending;
mod worker;

use std::sync::atomic::{AtomicBool, AtomicU16};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::codec::ActivationType;
use crate::config::ClientConfig;
use crate::error::Result;

pub(crate) use worker::Engine;

/// Requests served by the engine task
#[derive(Debug)]
pub(crate) enum Command {
    Activate {
        activation_type: ActivationType,
        reply: oneshot::Sender<Result<()>>,
    },
    /// Write a diagnostic message and wait for its DoIP acknowledge
    Send {
        target: u16,
        payload: Bytes,
        timeout: Option<Duration>,
        reply: oneshot::Sender<Result<()>>,
    },
    /// Wait for the next final diagnostic frame from the current target
    Receive {
        timeout: Option<Duration>,
        reply: oneshot::Sender<Result<Vec<u8>>>,
    },
    /// Collect every diagnostic frame addressed to us during `window`
    Collect {
        window: Duration,
        reply: oneshot::Sender<Result<Vec<Vec<u8>>>>,
    },
    Shutdown,
}

/// Engine tuning taken from [`ClientConfig`]
#[derive(Debug, Clone, Copy)]
pub(crate) struct EngineSettings {
    pub protocol_version: u8,
    pub activation_timeout: Duration,
    pub p2_star: Duration,
    pub multi_response_grace: Duration,
    pub max_payload_len: u32,
    pub rx_queue_capacity: usize,
}

impl From<&ClientConfig> for EngineSettings {
    fn from(config: &ClientConfig) -> Self {
        Self {
            protocol_version: config.protocol_version,
            activation_timeout: config.activation_timeout(),
            p2_star: config.p2_star(),
            multi_response_grace: config.multi_response_grace(),
            max_payload_len: config.max_payload_len,
            rx_queue_capacity: config.rx_queue_capacity.max(1),
        }
    }
}

/// State shared between the engine task and its client
#[derive(Debug, Clone)]
pub(crate) struct Shared {
    pub source_address: u16,
    pub target_address: Arc<AtomicU16>,
    pub alive: Arc<AtomicBool>,
}

/// Spawn the engine on the current runtime
pub(crate) fn spawn(
    stream: TcpStream,
    shared: Shared,
    settings: EngineSettings,
) -> (mpsc::UnboundedSender<Command>, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let engine = Engine::new(stream, rx, shared, settings);
    let handle = tokio::spawn(engine.run());
    (tx, handle)
}
