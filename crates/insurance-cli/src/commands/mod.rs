//! Command handler modules for insurance-cli.
//!
//! Shared utilities used by multiple command paths live here.
//! Command-specific logic lives in the submodules.

pub mod db;
pub mod request;

use anyhow::{Context, Result};
use serde_json::Value;
use std::fs;

/// Load a request payload from either an inline JSON string or a file path.
pub fn load_payload(payload: Option<String>, payload_file: Option<String>) -> Result<Option<Value>> {
    if let Some(p) = payload_file {
        let bytes = fs::read(&p).with_context(|| format!("read payload-file failed: {}", p))?;
        let bytes = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(&bytes);
        let raw = String::from_utf8(bytes.to_vec()).context("payload-file must be UTF-8 text")?;
        let v: Value = serde_json::from_str(raw.trim()).context("payload-file must contain valid JSON")?;
        return Ok(Some(v));
    }

    match payload {
        Some(raw) => {
            let v: Value = serde_json::from_str(raw.trim()).context("--payload must be valid JSON")?;
            Ok(Some(v))
        }
        None => Ok(None),
    }
}
