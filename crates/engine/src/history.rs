//! Server-info history files
//!
//! One file per connection, `<directory>/<name>.history`, holding one JSON
//! [`ServerInfoSnapshot`] per line. Lines that fail to parse are skipped on
//! read so a torn final write loses one sample, not the file.

use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use kvbridge_core::{Error, Result, ServerInfoSnapshot};
use tracing::{debug, warn};

/// File extension of history files.
pub const HISTORY_EXTENSION: &str = "history";

/// The history file of one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerHistory {
    path: PathBuf,
}

impl ServerHistory {
    /// History of connection `name` under `directory`.
    ///
    /// Path separators in `name` are replaced so the file always lands
    /// directly in `directory`.
    pub fn new(directory: &Path, name: &str) -> Self {
        let file: String = name
            .chars()
            .map(|c| if c == '/' || c == '\\' || c == ':' { '_' } else { c })
            .collect();
        let file = if file.is_empty() { "connection".to_string() } else { file };
        Self {
            path: directory.join(format!("{}.{}", file, HISTORY_EXTENSION)),
        }
    }

    /// Location of the file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one snapshot, creating the directory and file as needed.
    pub fn append(&self, snapshot: &ServerInfoSnapshot) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }
        let line = serde_json::to_string(snapshot).map_err(|e| Error::Io {
            reason: format!("Failed to encode history sample: {}", e),
        })?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", line)?;
        file.flush()?;
        debug!(target: "kvbridge::history", path = %self.path.display(), "sample appended");
        Ok(())
    }

    /// Every stored snapshot in file order.
    ///
    /// # Errors
    ///
    /// `Io` when the file does not exist or cannot be read.
    pub fn load(&self) -> Result<Vec<ServerInfoSnapshot>> {
        let file = fs::File::open(&self.path).map_err(|e| Error::Io {
            reason: format!("History file not found: {} ({})", self.path.display(), e),
        })?;
        let mut snapshots = Vec::new();
        for (number, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<ServerInfoSnapshot>(&line) {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(e) => {
                    warn!(target: "kvbridge::history", line = number + 1, error = %e, "skipping malformed sample");
                }
            }
        }
        Ok(snapshots)
    }

    /// Remove the file. A missing file counts as cleared.
    pub fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Io {
                reason: format!("Clear file error! {}: {}", self.path.display(), e),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use kvbridge_core::{ErrorKind, ServerInfo};
    use tempfile::TempDir;

    fn snapshot(secs: i64, uptime: &str) -> ServerInfoSnapshot {
        let mut info = ServerInfo::default();
        info.push("Server", "uptime_in_seconds", uptime);
        ServerInfoSnapshot {
            timestamp: Utc.timestamp_opt(secs, 0).unwrap(),
            info,
        }
    }

    #[test]
    fn test_append_then_load() {
        let dir = TempDir::new().unwrap();
        let history = ServerHistory::new(&dir.path().join("nested"), "local redis");
        history.append(&snapshot(1_700_000_000, "10")).unwrap();
        history.append(&snapshot(1_700_000_010, "20")).unwrap();

        let loaded = history.load().unwrap();
        assert_eq!(loaded, vec![snapshot(1_700_000_000, "10"), snapshot(1_700_000_010, "20")]);
        assert!(history.path().ends_with("local redis.history"));
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        let dir = TempDir::new().unwrap();
        let history = ServerHistory::new(dir.path(), "c");
        history.append(&snapshot(1, "1")).unwrap();
        let mut file = OpenOptions::new().append(true).open(history.path()).unwrap();
        writeln!(file, "{{\"timestamp\": broken").unwrap();
        drop(file);
        history.append(&snapshot(2, "2")).unwrap();

        assert_eq!(history.load().unwrap().len(), 2);
    }

    #[test]
    fn test_missing_file() {
        let dir = TempDir::new().unwrap();
        let history = ServerHistory::new(dir.path(), "never");
        assert_eq!(history.load().unwrap_err().kind(), ErrorKind::Io);
        assert!(history.clear().is_ok());
    }

    #[test]
    fn test_clear_removes_file() {
        let dir = TempDir::new().unwrap();
        let history = ServerHistory::new(dir.path(), "c");
        history.append(&snapshot(1, "1")).unwrap();
        history.clear().unwrap();
        assert!(!history.path().exists());
    }

    #[test]
    fn test_separators_do_not_escape_directory() {
        let dir = TempDir::new().unwrap();
        let history = ServerHistory::new(dir.path(), "../a/b");
        assert_eq!(history.path().parent(), Some(dir.path()));
    }
}
