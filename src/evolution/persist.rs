//! Recovery snapshots: one JSON document per population.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::schema::{PopulationSnapshot, SNAPSHOT_VERSION};

/// Failure to write or read a recovery snapshot.
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("Snapshot I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Snapshot (de)serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("Unsupported snapshot version {found} (expected {expected})")]
    Version { found: u32, expected: u32 },
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> PersistError + '_ {
    move |source| PersistError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Snapshot file of `population` under `dir`.
pub fn snapshot_path(dir: &Path, population: &str) -> PathBuf {
    dir.join(format!("{population}.json"))
}

/// Write a snapshot atomically: a temporary file in the same directory is
/// renamed over the previous snapshot.
pub fn save_snapshot<G: Serialize>(
    dir: &Path,
    snapshot: &PopulationSnapshot<G>,
) -> Result<PathBuf, PersistError> {
    fs::create_dir_all(dir).map_err(io_error(dir))?;

    let path = snapshot_path(dir, &snapshot.name);
    let tmp = dir.join(format!(".{}.json.tmp", snapshot.name));
    let json = serde_json::to_string_pretty(snapshot)?;
    fs::write(&tmp, json).map_err(io_error(&tmp))?;
    fs::rename(&tmp, &path).map_err(io_error(&path))?;

    log::debug!(
        "Saved generation {} of {} to {}",
        snapshot.generation,
        snapshot.name,
        path.display()
    );
    Ok(path)
}

/// Read a snapshot written by [`save_snapshot`].
pub fn load_snapshot<G: DeserializeOwned>(path: &Path) -> Result<PopulationSnapshot<G>, PersistError> {
    let json = fs::read_to_string(path).map_err(io_error(path))?;
    let snapshot: PopulationSnapshot<G> = serde_json::from_str(&json)?;
    if snapshot.version != SNAPSHOT_VERSION {
        return Err(PersistError::Version {
            found: snapshot.version,
            expected: SNAPSHOT_VERSION,
        });
    }
    Ok(snapshot)
}

/// Load the snapshot of `population` from `dir`, if one exists.
pub fn load_if_present<G: DeserializeOwned>(
    dir: &Path,
    population: &str,
) -> Result<Option<PopulationSnapshot<G>>, PersistError> {
    let path = snapshot_path(dir, population);
    if !path.exists() {
        return Ok(None);
    }
    load_snapshot(&path).map(Some)
}
