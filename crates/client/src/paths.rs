//! Central path resolution for Boardbank data files.
//!
//! Resolved once at startup from: CLI `--data-dir` > `BOARDBANK_DATA_DIR` env > `~/.boardbank`.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

static DATA_DIR: RwLock<Option<PathBuf>> = RwLock::new(None);

/// Initialize the global data directory. Returns the resolved path.
///
/// Priority: `explicit` arg > `BOARDBANK_DATA_DIR` env > `~/.boardbank` default.
/// Falls back to the working directory when no home directory exists.
pub fn init_data_dir(explicit: Option<&Path>) -> PathBuf {
    let dir = if let Some(p) = explicit {
        p.to_path_buf()
    } else if let Ok(env_val) = std::env::var("BOARDBANK_DATA_DIR") {
        PathBuf::from(env_val)
    } else {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".boardbank")
    };

    if let Ok(mut guard) = DATA_DIR.write() {
        *guard = Some(dir.clone());
    }
    dir
}

/// Return the current data directory, resolving defaults if `init_data_dir`
/// hasn't been called.
pub fn data_dir() -> PathBuf {
    let current = DATA_DIR.read().ok().and_then(|guard| guard.clone());
    match current {
        Some(dir) => dir,
        None => init_data_dir(None),
    }
}

pub fn db_path() -> PathBuf {
    data_dir().join("cache.db")
}

pub fn log_dir() -> PathBuf {
    data_dir().join("logs")
}

pub fn config_path() -> PathBuf {
    data_dir().join("config.toml")
}

/// Create all required subdirectories under the data dir.
pub fn ensure_dirs() -> io::Result<()> {
    let base = data_dir();
    std::fs::create_dir_all(&base)?;
    std::fs::create_dir_all(base.join("logs"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_dir_wins_and_derives_file_paths() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let dir = init_data_dir(Some(tmp.path()));
        assert_eq!(dir, tmp.path());
        assert_eq!(db_path(), tmp.path().join("cache.db"));
        assert_eq!(config_path(), tmp.path().join("config.toml"));

        ensure_dirs().expect("ensure dirs");
        assert!(log_dir().is_dir());
    }
}
