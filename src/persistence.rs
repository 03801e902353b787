//! Shared atomic file-backed JSON persistence.
//!
//! Every component snapshot (bus history, context checkpoints, breaker
//! state, dispatcher queue, flaky-test registry, optimizer parameters,
//! metrics) is written the same way: serialize, write to a sibling temp
//! file, then rename over the target. This avoids truncated snapshots if
//! the process is killed mid-write, matching the functional-core /
//! imperative-shell split the teacher uses for its SQLite writer.

use serde::{Serialize, de::DeserializeOwned};
use std::path::Path;

use crate::error::PersistenceError;

/// Serializes `value` as pretty JSON and atomically writes it to `path`.
pub fn save_json<T: Serialize>(path: &Path, value: &T) -> Result<(), PersistenceError> {
    let body = serde_json::to_vec_pretty(value)?;
    let tmp_path = tmp_path_for(path);
    std::fs::write(&tmp_path, &body)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Reads and deserializes a JSON snapshot from `path`.
pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T, PersistenceError> {
    let body = std::fs::read(path)?;
    Ok(serde_json::from_slice(&body)?)
}

fn tmp_path_for(path: &Path) -> std::path::PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Sample {
        value: u32,
    }

    #[test]
    fn round_trips_through_atomic_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.json");
        let sample = Sample { value: 42 };

        save_json(&path, &sample).unwrap();
        let loaded: Sample = load_json(&path).unwrap();

        assert_eq!(loaded, sample);
        assert!(!tmp_path_for(&path).exists());
    }

    #[test]
    fn load_missing_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.json");
        let result: Result<Sample, _> = load_json(&path);
        assert!(result.is_err());
    }
}
