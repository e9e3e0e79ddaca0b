//! Classify command implementation.

use mirrorsync_events::{classify, is_session_event, mentions_offering};
use serde::Serialize;

/// Classification of one event name.
#[derive(Debug, Serialize)]
pub struct Classification {
    /// Event name as given.
    pub name: String,
    /// Dispatch category.
    pub category: String,
    /// True for login/logout events.
    pub session: bool,
    /// True if the name mentions an offering.
    pub offering: bool,
}

/// Runs the classify command.
pub fn run(names: &[String], format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let rows: Vec<Classification> = names
        .iter()
        .map(|name| Classification {
            name: name.clone(),
            category: classify(name).as_str().to_string(),
            session: is_session_event(name),
            offering: mentions_offering(name),
        })
        .collect();

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
        _ => {
            for row in &rows {
                println!("{} -> {}", row.name, row.category);
            }
        }
    }

    Ok(())
}
