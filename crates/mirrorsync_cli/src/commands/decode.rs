//! Decode command implementation.

use super::read_payloads;
use mirrorsync_events::{decode, ChannelKind, DecodedEvent};
use serde::Serialize;
use serde_json::Value;
use std::path::Path;

/// Result of decoding one payload line.
#[derive(Debug, Serialize)]
pub struct DecodedLine {
    /// Line number in the input file.
    pub line: usize,
    /// Decoded event, if the payload was valid.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<Value>,
    /// Decode error, if it was not.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// One-line summary for text output.
    #[serde(skip)]
    pub summary: String,
}

/// Runs the decode command.
pub fn run(channel: ChannelKind, file: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let payloads = read_payloads(file)?;

    let mut lines = Vec::with_capacity(payloads.len());
    for (line, payload) in payloads {
        match decode(channel, payload.as_bytes()) {
            Ok(event) => lines.push(DecodedLine {
                line,
                event: Some(to_value(&event)?),
                error: None,
                summary: describe(&event),
            }),
            Err(e) => lines.push(DecodedLine {
                line,
                event: None,
                summary: format!("error: {}", e),
                error: Some(e.to_string()),
            }),
        }
    }

    let failed = lines.iter().filter(|l| l.error.is_some()).count();

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&lines)?);
        }
        _ => {
            for decoded in &lines {
                println!("{:>5}  {}", decoded.line, decoded.summary);
            }
            println!();
            println!(
                "{} {} payloads: {} decoded, {} failed",
                lines.len(),
                channel,
                lines.len() - failed,
                failed
            );
        }
    }

    Ok(())
}

fn to_value(event: &DecodedEvent) -> serde_json::Result<Value> {
    match event {
        DecodedEvent::Action(e) => serde_json::to_value(e),
        DecodedEvent::ResourceState(e) => serde_json::to_value(e),
        DecodedEvent::Usage(e) => serde_json::to_value(e),
        DecodedEvent::Alert(e) => serde_json::to_value(e),
    }
}

fn describe(event: &DecodedEvent) -> String {
    match event {
        DecodedEvent::Action(e) => format!(
            "{} [{}] {}",
            e.event_name(),
            e.category(),
            e.target_uuid().unwrap_or("-")
        ),
        DecodedEvent::ResourceState(e) => format!(
            "{} {} -> {} ({})",
            e.resource.as_deref().unwrap_or("resource"),
            e.old_state.as_deref().unwrap_or("?"),
            e.new_state,
            e.id
        ),
        _ => event.label().to_string(),
    }
}
