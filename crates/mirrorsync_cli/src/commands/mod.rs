//! CLI command implementations.

pub mod classify;
pub mod decode;
pub mod replay;

use std::fs;
use std::path::Path;

/// Reads a payload file, one payload per non-blank line.
///
/// Returns `(line number, payload)` pairs, numbered from 1.
pub fn read_payloads(path: &Path) -> Result<Vec<(usize, String)>, Box<dyn std::error::Error>> {
    let text = fs::read_to_string(path)
        .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    Ok(text
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| (index + 1, line.trim().to_string()))
        .collect())
}
