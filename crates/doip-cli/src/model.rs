//! Car model selection
//!
//! The model comes from `--model` / `CAR_MODEL`. When it is missing or not a
//! known model the user is asked to pick one on stdin.

use std::io::{self, BufRead, Write};

use anyhow::{bail, Context, Result};
use doip_client::EcuModel;
use tracing::warn;

/// Resolve the car model, prompting on stdin if needed
pub fn resolve(configured: Option<&str>) -> Result<EcuModel> {
    let stdin = io::stdin();
    let stdout = io::stdout();
    resolve_with(configured, &mut stdin.lock(), &mut stdout.lock())
}

fn resolve_with(
    configured: Option<&str>,
    input: &mut impl BufRead,
    output: &mut impl Write,
) -> Result<EcuModel> {
    if let Some(name) = configured {
        match name.parse::<EcuModel>() {
            Ok(model) => return Ok(model),
            Err(e) => warn!(model = %name, error = %e, "Unknown car model"),
        }
    }

    let choices = EcuModel::ALL
        .iter()
        .map(|m| format!("{} for {}", *m as u8, m))
        .collect::<Vec<_>>()
        .join(", ");

    loop {
        write!(output, "Select car model ({}): ", choices)?;
        output.flush()?;

        let mut line = String::new();
        if input.read_line(&mut line).context("Failed to read model")? == 0 {
            bail!("No car model selected");
        }

        let answer = line.trim();
        let picked = answer
            .parse::<u8>()
            .ok()
            .and_then(|n| EcuModel::try_from(n).ok())
            .or_else(|| answer.parse().ok());
        match picked {
            Some(model) => return Ok(model),
            None => writeln!(output, "'{}' is not a valid choice", answer)?,
        }
    }
}
