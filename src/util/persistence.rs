use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Error as SerdeError;

const APP_QUALIFIER: &str = "com";
const APP_ORG: &str = "RateSpread";
const APP_NAME: &str = "RateSpreadEngine";
const CACHE_DIR_NAME: &str = "rate-spread-engine";

/// Default location of the engine config file.
pub fn default_config_file() -> Option<PathBuf> {
    ProjectDirs::from(APP_QUALIFIER, APP_ORG, APP_NAME)
        .map(|dirs| dirs.config_dir().join("engine.json"))
}

/// Default cache directory (app data directory).
pub fn default_cache_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CACHE_DIR_NAME)
}

/// Read and decode a JSON file. `Ok(None)` when the file does not exist.
pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, CacheError> {
    let data = match fs::read_to_string(path) {
        Ok(data) => data,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    Ok(Some(serde_json::from_str(&data)?))
}

/// Write JSON to `path` through a sibling temp file and a rename, so a
/// reader sees either the old file or the new one, never a partial write.
pub fn save_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), CacheError> {
    let parent = path.parent().ok_or(CacheError::StorageUnavailable)?;
    fs::create_dir_all(parent)?;

    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or(CacheError::StorageUnavailable)?;
    let temp = parent.join(format!(".{file_name}.{}.tmp", uuid::Uuid::new_v4()));

    let json = serde_json::to_vec(value)?;
    if let Err(err) = fs::write(&temp, json).and_then(|_| fs::rename(&temp, path)) {
        let _ = fs::remove_file(&temp);
        return Err(err.into());
    }
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("storage directory unavailable")]
    StorageUnavailable,
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serde(#[from] SerdeError),
}
