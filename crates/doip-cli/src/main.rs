//! DoIP CLI - Command-line tool for DoIP/UDS vehicle diagnostics

mod model;

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use doip_client::did::{category_of, lookup_by_category};
use doip_client::uds::NegativeResponse;
use doip_client::{
    uds_payload, ActivationType, AppCategory, ClientConfig, SeedKeyRegistry, Session,
};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "doip-cli")]
#[command(author, version, about = "DoIP Vehicle Diagnostics CLI")]
#[command(propagate_version = true)]
struct Cli {
    /// Gateway IP address
    #[arg(short, long, env = "DOIP_SERVER_IP", default_value = "192.168.200.1")]
    server: String,

    /// Target ECU logical address (hex)
    #[arg(
        short,
        long,
        env = "DOIP_LOGICAL_ADDRESS",
        default_value = "0x0680",
        value_parser = parse_address
    )]
    target: u16,

    /// Tester logical address (hex)
    #[arg(long, default_value = "0x0E00", value_parser = parse_address)]
    source: u16,

    /// Routing activation type
    #[arg(long, value_enum, default_value = "default")]
    activation: Activation,

    /// Response timeout in seconds
    #[arg(long, default_value_t = 2.0)]
    timeout: f64,

    /// Configuration file path
    #[arg(short, long, env = "DOIP_CONFIG")]
    config: Option<PathBuf>,

    /// Car model short name (D31L, D31F25, ...)
    #[arg(short, long, env = "CAR_MODEL")]
    model: Option<String>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read a data identifier (UDS 0x22)
    ReadDid {
        /// DID (hex), e.g. F190
        #[arg(value_parser = parse_address)]
        did: u16,
    },

    /// Send a raw UDS request and print the response
    Send {
        /// Request bytes as hex, e.g. 1003
        payload: String,
    },

    /// Send a request to a functional address and list every response
    Functional {
        /// Request bytes as hex, e.g. 3E00
        payload: String,

        /// Functional logical address (hex)
        #[arg(long, default_value = "0xE400", value_parser = parse_address)]
        address: u16,

        /// Collection window in seconds
        #[arg(long, default_value_t = 1.0)]
        window: f64,
    },

    /// Derive a security access key from a seed
    SeedKey {
        /// Security level (requestSeed sub-function)
        #[arg(long, value_parser = parse_level)]
        level: u8,

        /// Seed as hex (16 bytes)
        #[arg(long)]
        seed: String,
    },

    /// List the DIDs of an application category
    Dids {
        /// Category name (e.g. Bcm) or number
        category: String,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Activation {
    Default,
    Regulation,
    CentralSecurity,
    Ota,
}

impl From<Activation> for ActivationType {
    fn from(activation: Activation) -> Self {
        match activation {
            Activation::Default => ActivationType::Default,
            Activation::Regulation => ActivationType::DiagnosticRequiredByRegulation,
            Activation::CentralSecurity => ActivationType::CentralSecurity,
            Activation::Ota => ActivationType::OtaMode,
        }
    }
}

fn parse_address(s: &str) -> Result<u16, String> {
    let digits = s
        .trim()
        .trim_start_matches("0x")
        .trim_start_matches("0X");
    u16::from_str_radix(digits, 16).map_err(|e| format!("invalid hex address '{}': {}", s, e))
}

fn parse_level(s: &str) -> Result<u8, String> {
    let s = s.trim();
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid security level '{}': {}", s, e))
}

fn parse_hex(s: &str) -> Result<Vec<u8>> {
    let cleaned: String = s.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = hex::decode(&cleaned).with_context(|| format!("Invalid hex payload '{}'", s))?;
    if bytes.is_empty() {
        bail!("Payload must not be empty");
    }
    Ok(bytes)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();

    // Load config file
    let config = match &cli.config {
        Some(path) => ClientConfig::load(path)
            .with_context(|| format!("Failed to load config: {}", path.display()))?,
        None => ClientConfig::default(),
    };

    match &cli.command {
        Commands::ReadDid { did } => {
            let request = [0x22, (did >> 8) as u8, *did as u8];
            let response = exchange(&cli, &config, cli.target, &request).await?;
            print_response(&response);
        }

        Commands::Send { payload } => {
            let request = parse_hex(payload)?;
            let response = exchange(&cli, &config, cli.target, &request).await?;
            print_response(&response);
        }

        Commands::Functional {
            payload,
            address,
            window,
        } => {
            let request = parse_hex(payload)?;
            functional(&cli, &config, *address, &request, *window).await?;
        }

        Commands::SeedKey { level, seed } => {
            let seed = hex::decode(seed.trim()).context("Seed must be hex")?;
            let model = model::resolve(cli.model.as_deref())?;
            let registry = SeedKeyRegistry::from_config(&config.security)
                .context("Invalid security configuration")?;
            doip_client::seed_key::install(registry);
            let key = doip_client::decrypt_seed(*level, model as u8, &seed)
                .with_context(|| format!("Cannot derive key for {}", model))?;
            println!("{}", hex::encode_upper(key));
        }

        Commands::Dids { category } => {
            let category: AppCategory = category.parse()?;
            let entries = lookup_by_category(category);
            if entries.is_empty() {
                println!("No DIDs in category {}", category);
            }
            for entry in entries {
                println!("0x{:04X}  {}", entry.did, entry.category);
            }
        }
    }

    Ok(())
}

async fn open_session(cli: &Cli, config: &ClientConfig, target: u16) -> Result<Session> {
    let session = Session::connect(cli.source, &cli.server, target, config)
        .await
        .with_context(|| format!("Failed to connect to {}", cli.server))?;
    session
        .request_activation(cli.activation.into())
        .await
        .context("Routing activation failed")?;
    info!(server = %cli.server, "Routing activated");
    Ok(session)
}

/// Send one request and wait for its final response
async fn exchange(cli: &Cli, config: &ClientConfig, target: u16, request: &[u8]) -> Result<Vec<u8>> {
    let timeout = doip_client::timeout_from_secs(cli.timeout);
    let session = open_session(cli, config, target).await?;

    let result = async {
        session
            .send_diagnostic(request, timeout)
            .await
            .context("Request was not acknowledged")?;
        session
            .receive_diagnostic(timeout)
            .await
            .context("No response")
    }
    .await;

    session.close().await;
    result
}

async fn functional(
    cli: &Cli,
    config: &ClientConfig,
    address: u16,
    request: &[u8],
    window: f64,
) -> Result<()> {
    let Some(window) = doip_client::timeout_from_secs(window) else {
        bail!("Window must be a finite, non-negative number of seconds");
    };
    let session = open_session(cli, config, address).await?;

    let result = async {
        session
            .send_diagnostic(request, doip_client::timeout_from_secs(cli.timeout))
            .await
            .context("Request was not acknowledged")?;
        session
            .receive_multiple_diagnostic_responses(Some(window))
            .await
            .context("Collecting responses failed")
    }
    .await;
    session.close().await;

    let frames = result?;
    if frames.is_empty() {
        println!("No responses");
    }
    for frame in &frames {
        let source = frame
            .get(8..10)
            .map(|b| u16::from_be_bytes([b[0], b[1]]))
            .unwrap_or_default();
        println!("0x{:04X}: {}", source, hex::encode_upper(uds_payload(frame)));
    }
    Ok(())
}

fn print_response(frame: &[u8]) {
    let uds = uds_payload(frame);
    match NegativeResponse::parse(uds) {
        Some(nr) => println!(
            "Negative response to 0x{:02X}: {} (0x{:02X})",
            nr.service_id,
            nr.nrc,
            u8::from(nr.nrc)
        ),
        None => {
            println!("{}", hex::encode_upper(uds));
            if let [0x62, hi, lo, ..] = uds {
                let did = u16::from_be_bytes([*hi, *lo]);
                if let Some(category) = category_of(did) {
                    println!("DID 0x{:04X} ({})", did, category);
                }
            }
        }
    }
}
