// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Submit sensor readings to a running hub

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use std::path::{Path, PathBuf};

use qnms_core::application::IngestOutcome;
use qnms_core::domain::coordinate::{CorrelationId, SensorReading};

use crate::daemon::server::SensorDataRequest;

#[derive(Args)]
pub struct IngestArgs {
    /// JSON file holding one reading, an array of readings, or `{"coordinates": [...]}`
    #[arg(value_name = "FILE")]
    pub file: PathBuf,

    /// Correlation id stamped on readings that carry none
    #[arg(long)]
    pub correlation_id: Option<String>,
}

pub async fn handle_command(args: IngestArgs, host: &str, port: u16) -> Result<()> {
    let readings = load_readings(&args.file)?;
    if readings.is_empty() {
        println!("{}", "No readings in file".yellow());
        return Ok(());
    }

    let Some(client) = super::require_daemon(host, port).await? else {
        return Ok(());
    };

    let request = SensorDataRequest::Batch {
        coordinates: readings,
        correlation_id: args.correlation_id.map(CorrelationId),
    };
    let response = client.ingest(&request).await?;

    println!(
        "Accepted {}, rejected {}",
        response.accepted.to_string().green(),
        response.rejected.to_string().red()
    );
    for outcome in response.results {
        match outcome {
            IngestOutcome::Accepted {
                defect_id,
                correlation_id,
                merged,
            } => {
                let note = if merged { " (merged)" } else { "" };
                println!("  {} {} [{}]{}", "✓".green(), defect_id, correlation_id, note);
            }
            IngestOutcome::Rejected {
                correlation_id,
                violations,
            } => {
                println!("  {} [{}] {}", "✗".red(), correlation_id, violations);
            }
        }
    }

    Ok(())
}

fn load_readings(path: &Path) -> Result<Vec<SensorReading>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    parse_readings(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

fn parse_readings(content: &str) -> Result<Vec<SensorReading>> {
    if let Ok(readings) = serde_json::from_str::<Vec<SensorReading>>(content) {
        return Ok(readings);
    }
    Ok(match serde_json::from_str::<SensorDataRequest>(content)? {
        SensorDataRequest::Batch { coordinates, .. } => coordinates,
        SensorDataRequest::Single(reading) => vec![reading],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const READING: &str =
        r#"{"x": 1.5, "y": 2.0, "z": 0.5, "defect_type": "vacancy", "severity": 4}"#;

    #[test]
    fn test_parse_single_array_and_envelope() {
        assert_eq!(parse_readings(READING).unwrap().len(), 1);
        assert_eq!(parse_readings(&format!("[{READING}, {READING}]")).unwrap().len(), 2);

        let envelope = format!(r#"{{"coordinates": [{READING}], "correlation_id": "run-7"}}"#);
        let readings = parse_readings(&envelope).unwrap();
        assert_eq!(readings[0].severity, 4);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_readings(r#"{"hello": "world"}"#).is_err());
    }
}
