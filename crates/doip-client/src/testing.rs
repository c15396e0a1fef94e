//! Test utilities for doip-client
//!
//! A scripted in-process DoIP gateway. Tests drive one accepted connection
//! frame by frame, so every timing and ordering case can be reproduced.
//!
//! ```rust,ignore
//! use doip_client::testing::spawn_gateway;
//!
//! let (port, gateway) = spawn_gateway(|mut conn| async move {
//!     conn.accept_activation(None, ActivationCode::SUCCESS).await?;
//!     let request = conn.expect_diagnostic().await?;
//!     conn.ack(&request).await?;
//!     conn.respond(0x0680, 0x0E00, &[0x62, 0xF1, 0x90, 0x41]).await
//! });
//! ```

use std::future::Future;
use std::io;
use std::thread::JoinHandle;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::codec::{
    ActivationCode, DiagnosticAck, DiagnosticMessage, DoIpFrame, FrameDecoder, Payload,
    RoutingActivationRequest, RoutingActivationResponse, DEFAULT_PROTOCOL_VERSION,
};
use crate::config::ClientConfig;

/// Logical address the mock gateway reports for itself
pub const GATEWAY_ADDRESS: u16 = 0x1000;

fn invalid_data(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

/// A listening mock gateway on an ephemeral localhost port
pub struct MockGateway {
    listener: TcpListener,
}

impl MockGateway {
    pub async fn bind() -> io::Result<Self> {
        Ok(Self {
            listener: TcpListener::bind("127.0.0.1:0").await?,
        })
    }

    /// Wrap a non-blocking std listener
    pub fn from_std(listener: std::net::TcpListener) -> io::Result<Self> {
        Ok(Self {
            listener: TcpListener::from_std(listener)?,
        })
    }

    pub fn port(&self) -> io::Result<u16> {
        Ok(self.listener.local_addr()?.port())
    }

    /// Client configuration pointing at this gateway with short timeouts
    pub fn client_config(&self) -> io::Result<ClientConfig> {
        Ok(config_for_port(self.port()?))
    }

    pub async fn accept(&self) -> io::Result<GatewayConnection> {
        let (stream, _) = self.listener.accept().await?;
        Ok(GatewayConnection::new(stream))
    }
}

/// Client configuration for a mock gateway on `port`
pub fn config_for_port(port: u16) -> ClientConfig {
    ClientConfig {
        gateway_port: port,
        connect_timeout_ms: 1000,
        activation_timeout_ms: 1000,
        close_timeout_ms: 1000,
        ..ClientConfig::default()
    }
}

/// The gateway side of one client connection
pub struct GatewayConnection {
    stream: TcpStream,
    buf: BytesMut,
    decoder: FrameDecoder,
}

impl GatewayConnection {
    fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            buf: BytesMut::with_capacity(1024),
            decoder: FrameDecoder::default(),
        }
    }

    /// Next frame from the client; `UnexpectedEof` once the client hung up
    pub async fn read_frame(&mut self) -> io::Result<DoIpFrame> {
        loop {
            if let Some(frame) = self
                .decoder
                .decode(&mut self.buf)
                .map_err(|e| invalid_data(e.to_string()))?
            {
                return Ok(frame);
            }
            if self.stream.read_buf(&mut self.buf).await? == 0 {
                return Err(io::ErrorKind::UnexpectedEof.into());
            }
        }
    }

    pub async fn read_payload(&mut self) -> io::Result<Payload> {
        self.read_frame()
            .await?
            .decode_payload()
            .map_err(|e| invalid_data(e.to_string()))
    }

    pub async fn write_payload(&mut self, payload: &Payload) -> io::Result<()> {
        let bytes = DoIpFrame::new(DEFAULT_PROTOCOL_VERSION, payload).encode();
        self.write_raw(&bytes).await
    }

    pub async fn write_raw(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.stream.write_all(bytes).await
    }

    /// Answer a routing activation request.
    ///
    /// `tester_address` overrides the echoed client address.
    pub async fn accept_activation(
        &mut self,
        tester_address: Option<u16>,
        code: ActivationCode,
    ) -> io::Result<RoutingActivationRequest> {
        let request = match self.read_payload().await? {
            Payload::RoutingActivationRequest(req) => req,
            other => return Err(invalid_data(format!("expected activation, got {:?}", other))),
        };
        let response = Payload::RoutingActivationResponse(RoutingActivationResponse {
            tester_address: tester_address.unwrap_or(request.source_address),
            entity_address: GATEWAY_ADDRESS,
            code,
            oem_specific: None,
        });
        self.write_payload(&response).await?;
        Ok(request)
    }

    /// Read the next diagnostic message, answering alive-check responses silently
    pub async fn expect_diagnostic(&mut self) -> io::Result<DiagnosticMessage> {
        loop {
            match self.read_payload().await? {
                Payload::DiagnosticMessage(msg) => return Ok(msg),
                Payload::AliveCheckResponse { .. } => continue,
                other => {
                    return Err(invalid_data(format!(
                        "expected diagnostic message, got {:?}",
                        other
                    )))
                }
            }
        }
    }

    pub async fn ack(&mut self, msg: &DiagnosticMessage) -> io::Result<()> {
        self.write_payload(&Payload::DiagnosticAck(Self::ack_for(msg, 0x00)))
            .await
    }

    pub async fn nack(&mut self, msg: &DiagnosticMessage, code: u8) -> io::Result<()> {
        self.write_payload(&Payload::DiagnosticNack(Self::ack_for(msg, code)))
            .await
    }

    fn ack_for(msg: &DiagnosticMessage, code: u8) -> DiagnosticAck {
        DiagnosticAck {
            source_address: msg.target_address,
            target_address: msg.source_address,
            code,
            previous: Bytes::new(),
        }
    }

    /// Send a diagnostic message from `ecu` to `tester`
    pub async fn respond(&mut self, ecu: u16, tester: u16, uds: &[u8]) -> io::Result<()> {
        let msg = Payload::DiagnosticMessage(DiagnosticMessage {
            source_address: ecu,
            target_address: tester,
            user_data: Bytes::copy_from_slice(uds),
        });
        self.write_payload(&msg).await
    }

    /// Close the connection from the gateway side
    pub async fn close(mut self) -> io::Result<()> {
        self.stream.shutdown().await
    }

    /// Keep the connection up, discarding frames, until the client hangs up
    pub async fn wait_closed(mut self) -> io::Result<()> {
        loop {
            match self.read_frame().await {
                Ok(_) => continue,
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::UnexpectedEof | io::ErrorKind::ConnectionReset
                    ) =>
                {
                    return Ok(())
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Run `script` against the first connection on a fresh gateway thread.
///
/// Returns the port to connect to and the thread running the script. The
/// gateway has its own runtime so blocking clients can be tested from a plain
/// `#[test]`.
pub fn spawn_gateway<F, Fut>(script: F) -> io::Result<(u16, JoinHandle<io::Result<()>>)>
where
    F: FnOnce(GatewayConnection) -> Fut + Send + 'static,
    Fut: Future<Output = io::Result<()>>,
{
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    listener.set_nonblocking(true)?;
    let port = listener.local_addr()?.port();

    let handle = std::thread::Builder::new()
        .name("mock-gateway".to_string())
        .spawn(move || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?;
            runtime.block_on(async move {
                let gateway = MockGateway::from_std(listener)?;
                let conn = gateway.accept().await?;
                script(conn).await
            })
        })?;

    Ok((port, handle))
}
