//! DoIP Diagnostic Client
//!
//! Client for vehicle ECUs speaking Diagnostics over IP (ISO 13400-2) with
//! UDS (ISO 14229) payloads. A background engine task owns the TCP session to
//! the gateway. It performs routing activation, answers alive checks, absorbs
//! "response pending" replies and collects functional responses.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use doip_client::{ActivationType, ClientConfig, Session};
//!
//! #[tokio::main]
//! async fn main() -> doip_client::Result<()> {
//!     doip_client::init();
//!
//!     let session = Session::connect(0x0E00, "192.168.200.1", 0x0680, &ClientConfig::default()).await?;
//!     session.request_activation(ActivationType::Default).await?;
//!
//!     // ReadDataByIdentifier VIN
//!     session.send_diagnostic(&[0x22, 0xF1, 0x90], Some(Duration::from_secs(2))).await?;
//!     let frame = session.receive_diagnostic(Some(Duration::from_secs(5))).await?;
//!     println!("{:02X?}", doip_client::uds_payload(&frame));
//!
//!     session.close().await;
//!     Ok(())
//! }
//! ```
//!
//! Callers without a runtime use [`DoIpClient`], which hosts the engine on a
//! dedicated thread and exposes the same operations as blocking calls.

mod client;
pub mod codec;
mod config;
pub mod did;
mod engine;
mod error;
mod logging;
pub mod seed_key;
mod session;
pub mod testing;
pub mod uds;

pub use client::{timeout_from_secs, DoIpClient};
pub use codec::{ActivationCode, ActivationType, NackCode};
pub use config::{ClientConfig, ConfigError, KeyAlgorithm, SecretKeyConfig, SecurityConfig};
pub use did::{lookup_by_category, AppCategory, DidEntry};
pub use error::{ClientError, ErrorCode, Result};
pub use logging::init;
pub use seed_key::{decrypt_seed, EcuModel, SeedKeyRegistry};
pub use session::Session;
pub use uds::{is_response_pending, uds_payload};
