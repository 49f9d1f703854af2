use anyhow::Context;
use serde::de::DeserializeOwned;
use std::fs;
use std::path::Path;

pub mod cli;
pub mod flows;
pub mod snapshot;

fn read_json<T: DeserializeOwned>(path: &Path, what: &str) -> anyhow::Result<T> {
    let json = fs::read_to_string(path)
        .with_context(|| format!("failed to read {what} from `{}`", path.display()))?;
    serde_json::from_str(&json)
        .with_context(|| format!("failed to parse {what} at `{}`", path.display()))
}
