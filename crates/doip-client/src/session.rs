//! Async DoIP client session
//!
//! A [`Session`] owns the command side of one engine task. Every operation
//! enqueues a [`Command`] and awaits the engine's answer, so concurrent
//! callers are serialised by the engine's queue.

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::codec::{ActivationType, DIAGNOSTIC_PREFIX_LEN, GENERIC_HEADER_LEN};
use crate::config::ClientConfig;
use crate::engine::{self, Command, EngineSettings, Shared};
use crate::error::{ClientError, Result};

/// An open TCP session to a DoIP gateway
pub struct Session {
    commands: mpsc::UnboundedSender<Command>,
    shared: Shared,
    activated: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
    multi_response_grace: Duration,
    caller_margin: Duration,
    close_timeout: Duration,
    max_payload_len: u32,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("source_address", &self.source_address())
            .field("target_address", &self.target_address())
            .field("open", &self.is_open())
            .finish()
    }
}

impl Session {
    /// Connect to the gateway at `target_ip` and start the engine.
    ///
    /// Arguments are validated before any I/O. Routing is not activated yet.
    pub async fn connect(
        source_address: u16,
        target_ip: &str,
        target_address: u16,
        config: &ClientConfig,
    ) -> Result<Self> {
        let ip: IpAddr = target_ip.trim().parse().map_err(|_| {
            ClientError::InvalidArgument(format!("'{}' is not an IP address", target_ip))
        })?;
        if source_address == 0 {
            return Err(ClientError::InvalidArgument(
                "source logical address must be non-zero".to_string(),
            ));
        }

        if tokio::runtime::Handle::try_current().is_err() {
            return Err(ClientError::ConnectFailed(
                "no runtime to run the engine on".to_string(),
            ));
        }

        let addr = SocketAddr::new(ip, config.gateway_port);
        info!(%addr, "Connecting to DoIP gateway");

        let stream = tokio::time::timeout(config.connect_timeout(), TcpStream::connect(addr))
            .await
            .map_err(|_| ClientError::ConnectFailed(format!("{}: connection timeout", addr)))?
            .map_err(|e| ClientError::ConnectFailed(format!("{}: {}", addr, e)))?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!(%e, "Could not disable Nagle");
        }

        let shared = Shared {
            source_address,
            target_address: Arc::new(AtomicU16::new(target_address)),
            alive: Arc::new(AtomicBool::new(true)),
        };
        let (commands, handle) = engine::spawn(stream, shared.clone(), EngineSettings::from(config));

        info!(
            %addr,
            source = %format!("0x{:04X}", source_address),
            target = %format!("0x{:04X}", target_address),
            "DoIP session connected"
        );

        Ok(Self {
            commands,
            shared,
            activated: AtomicBool::new(false),
            worker: Mutex::new(Some(handle)),
            multi_response_grace: config.multi_response_grace(),
            caller_margin: config.caller_margin(),
            close_timeout: config.close_timeout(),
            max_payload_len: config.max_payload_len,
        })
    }

    pub fn source_address(&self) -> u16 {
        self.shared.source_address
    }

    pub fn target_address(&self) -> u16 {
        self.shared.target_address.load(Ordering::SeqCst)
    }

    /// True after a successful routing activation while the engine is running
    pub fn is_open(&self) -> bool {
        self.activated.load(Ordering::SeqCst) && self.shared.alive.load(Ordering::SeqCst)
    }

    /// Change the target used by subsequent sends and receives
    pub fn set_target_address(&self, target_address: u16) -> Result<()> {
        if !self.shared.alive.load(Ordering::SeqCst) {
            return Err(ClientError::engine_stopped());
        }
        self.shared
            .target_address
            .store(target_address, Ordering::SeqCst);
        debug!(target = %format!("0x{:04X}", target_address), "Target address changed");
        Ok(())
    }

    pub async fn request_activation(&self, activation_type: ActivationType) -> Result<()> {
        self.request(|reply| Command::Activate {
            activation_type,
            reply,
        })
        .await?;
        self.activated.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Send `payload` to the current target and wait for the DoIP acknowledge.
    ///
    /// `None` waits without a bound.
    pub async fn send_diagnostic(&self, payload: &[u8], timeout: Option<Duration>) -> Result<()> {
        let addressed_len =
            payload.len() as u64 + (DIAGNOSTIC_PREFIX_LEN - GENERIC_HEADER_LEN) as u64;
        if addressed_len > u64::from(self.max_payload_len) {
            return Err(ClientError::InvalidArgument(format!(
                "diagnostic payload of {} bytes exceeds the maximum of {}",
                payload.len(),
                self.max_payload_len
            )));
        }

        let target = self.target_address();
        let payload = Bytes::copy_from_slice(payload);
        self.request(|reply| Command::Send {
            target,
            payload,
            timeout,
            reply,
        })
        .await
    }

    /// Wait for the next final response from the current target.
    ///
    /// Response pending answers are absorbed and restart the timer. Returns the
    /// whole frame, DoIP prefix included.
    pub async fn receive_diagnostic(&self, timeout: Option<Duration>) -> Result<Vec<u8>> {
        self.request(|reply| Command::Receive { timeout, reply })
            .await
    }

    /// Collect every response addressed to this client during `timeout`,
    /// in arrival order.
    pub async fn receive_multiple_diagnostic_responses(
        &self,
        timeout: Option<Duration>,
    ) -> Result<Vec<Vec<u8>>> {
        let window = timeout.ok_or_else(|| {
            ClientError::InvalidArgument(
                "a finite, non-negative timeout is required to collect responses".to_string(),
            )
        })?;

        let bound = window
            .checked_add(self.multi_response_grace)
            .and_then(|t| t.checked_add(self.caller_margin))
            .ok_or_else(|| {
                ClientError::InvalidArgument("collection window is too large".to_string())
            })?;
        tokio::time::timeout(bound, self.request(|reply| Command::Collect { window, reply }))
            .await
            .map_err(|_| ClientError::Timeout)?
    }

    /// Stop the engine and release the socket. Safe to call more than once.
    pub async fn close(&self) {
        let Some(mut handle) = self.worker.lock().take() else {
            return;
        };
        self.activated.store(false, Ordering::SeqCst);

        let _ = self.commands.send(Command::Shutdown);
        if tokio::time::timeout(self.close_timeout, &mut handle)
            .await
            .is_err()
        {
            warn!("DoIP engine did not stop in time, aborting");
            handle.abort();
        }
        self.shared.alive.store(false, Ordering::SeqCst);
        info!("DoIP session closed");
    }

    /// Ask the engine to stop without waiting for it
    pub fn shutdown(&self) {
        self.activated.store(false, Ordering::SeqCst);
        let _ = self.commands.send(Command::Shutdown);
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T>>) -> Command,
    ) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(build(reply))
            .map_err(|_| ClientError::engine_stopped())?;
        rx.await.map_err(|_| ClientError::engine_stopped())?
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown();
    }
}
