//! Blocking DoIP client
//!
//! [`DoIpClient`] owns a private single-worker runtime that hosts the engine
//! task. Every call blocks the calling thread until the engine answers or the
//! call's own timeout fires. The client is `Send + Sync` and may be shared
//! between threads; `close` from any thread releases everything exactly once.
//!
//! ```no_run
//! use doip_client::{ActivationType, ClientConfig, DoIpClient};
//! use std::time::Duration;
//!
//! let client = DoIpClient::connect(0x0E00, "192.168.200.1", 0x0680, &ClientConfig::default())?;
//! client.request_activation(ActivationType::Default)?;
//! client.send_diagnostic(&[0x22, 0xF1, 0x90], Some(Duration::from_secs(2)))?;
//! let frame = client.receive_diagnostic(Some(Duration::from_secs(2)))?;
//! println!("{:02X?}", doip_client::uds_payload(&frame));
//! client.close();
//! # Ok::<(), doip_client::ClientError>(())
//! ```

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::runtime::{Builder, Handle, Runtime};

use crate::codec::ActivationType;
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::session::Session;

// Field order matters: the session is dropped before its runtime.
struct Inner {
    session: Session,
    runtime: Runtime,
}

/// Synchronous handle to one DoIP session
pub struct DoIpClient {
    inner: RwLock<Option<Arc<Inner>>>,
}

impl std::fmt::Debug for DoIpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.inner.read().as_ref() {
            Some(inner) => f
                .debug_struct("DoIpClient")
                .field("session", &inner.session)
                .finish(),
            None => f.write_str("DoIpClient(closed)"),
        }
    }
}

impl DoIpClient {
    /// Connect to `target_ip` and start the engine on a dedicated thread
    pub fn connect(
        source_address: u16,
        target_ip: &str,
        target_address: u16,
        config: &ClientConfig,
    ) -> Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("doip-engine")
            .enable_all()
            .build()
            .map_err(|e| ClientError::ConnectFailed(format!("engine runtime: {}", e)))?;

        let session = runtime.block_on(Session::connect(
            source_address,
            target_ip,
            target_address,
            config,
        ))?;

        Ok(Self {
            inner: RwLock::new(Some(Arc::new(Inner { session, runtime }))),
        })
    }

    fn inner(&self) -> Result<Arc<Inner>> {
        self.inner
            .read()
            .clone()
            .ok_or_else(|| ClientError::ConnectFailed("client is closed".to_string()))
    }

    pub fn source_address(&self) -> Result<u16> {
        Ok(self.inner()?.session.source_address())
    }

    pub fn target_address(&self) -> Result<u16> {
        Ok(self.inner()?.session.target_address())
    }

    /// Never blocks
    pub fn is_open(&self) -> bool {
        self.inner
            .read()
            .as_ref()
            .is_some_and(|inner| inner.session.is_open())
    }

    pub fn set_target_address(&self, target_address: u16) -> Result<()> {
        self.inner()?.session.set_target_address(target_address)
    }

    pub fn request_activation(&self, activation_type: ActivationType) -> Result<()> {
        let inner = self.inner()?;
        inner
            .runtime
            .block_on(inner.session.request_activation(activation_type))
    }

    pub fn send_diagnostic(&self, payload: &[u8], timeout: Option<Duration>) -> Result<()> {
        let inner = self.inner()?;
        inner
            .runtime
            .block_on(inner.session.send_diagnostic(payload, timeout))
    }

    pub fn receive_diagnostic(&self, timeout: Option<Duration>) -> Result<Vec<u8>> {
        let inner = self.inner()?;
        inner
            .runtime
            .block_on(inner.session.receive_diagnostic(timeout))
    }

    pub fn receive_multiple_diagnostic_responses(
        &self,
        timeout: Option<Duration>,
    ) -> Result<Vec<Vec<u8>>> {
        let inner = self.inner()?;
        inner
            .runtime
            .block_on(inner.session.receive_multiple_diagnostic_responses(timeout))
    }

    /// Stop the engine and release the socket. Later calls are no-ops.
    ///
    /// Called from inside an async runtime (including by `Drop`), the engine is
    /// told to stop but not waited for, since blocking there would panic.
    pub fn close(&self) {
        let Some(inner) = self.inner.write().take() else {
            return;
        };

        if Handle::try_current().is_err() {
            inner.runtime.block_on(inner.session.close());
            // Calls still in flight hold their own Arc; the runtime goes with the last one.
            return;
        }

        inner.session.shutdown();
        if let Ok(Inner { session, runtime }) = Arc::try_unwrap(inner) {
            drop(session);
            runtime.shutdown_background();
        }
    }
}

impl Drop for DoIpClient {
    fn drop(&mut self) {
        self.close();
    }
}

/// Convert a timeout in seconds.
///
/// NaN, infinite, negative and unrepresentably large values mean "no bound".
pub fn timeout_from_secs(secs: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(secs).ok()
}
