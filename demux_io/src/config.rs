//! Run parameters from an optional TOML file.
use anyhow::{Context, Result};
use genetic_demux::DemuxParams;
use log::warn;
use std::path::Path;

/// Read parameters from `path`, or the defaults when no file is given.
/// Keys absent from the file keep their default.
pub fn load_params(path: Option<&Path>) -> Result<DemuxParams> {
    let Some(path) = path else {
        return Ok(DemuxParams::default());
    };
    let s = std::fs::read_to_string(path).with_context(|| path.display().to_string())?;
    toml::from_str(&s).with_context(|| path.display().to_string())
}

/// `(name, value)` of every parameter that differs from its default.
pub fn non_default_values(params: &DemuxParams) -> Vec<(String, String)> {
    let (serde_json::Value::Object(values), serde_json::Value::Object(defaults)) = (
        serde_json::to_value(params).unwrap_or_default(),
        serde_json::to_value(DemuxParams::default()).unwrap_or_default(),
    ) else {
        return Vec::new();
    };
    values
        .into_iter()
        .filter(|(name, value)| defaults.get(name) != Some(value))
        .map(|(name, value)| (name, value.to_string()))
        .collect()
}

/// Warn about every non-default parameter.
pub fn warn_non_defaults(params: &DemuxParams) {
    for (name, value) in non_default_values(params) {
        warn!("using non-default {name} = {value}");
    }
}
