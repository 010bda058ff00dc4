//! Interleaved stdout/stderr journal, persisted as newline-delimited JSON
//! records, one record per line:
//! `{"log": "...", "stream": "stdout"|"stderr", "time": "<rfc3339>"}`.
//!
//! Rotation follows the same size-threshold-then-rename shape as
//! `tracing_appender`'s rolling writer (already used in `logging.rs`):
//! once the active file exceeds [`JOURNAL_ROTATE_BYTES`], it is renamed
//! with a `.1` suffix and a fresh file is opened. Only one backup is kept;
//! older backups are simply truncated on the next rotation.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use keel_shared::constants::JOURNAL_ROTATE_BYTES;
use keel_shared::errors::EngineResult;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stream {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalRecord {
    pub log: String,
    pub stream: Stream,
    pub time: chrono::DateTime<Utc>,
}

pub struct Journal {
    path: PathBuf,
    file: Mutex<File>,
}

impl Journal {
    pub fn open(path: impl Into<PathBuf>) -> EngineResult<Self> {
        let path = path.into();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    /// Append one line, rotating first if the active file has grown past
    /// [`JOURNAL_ROTATE_BYTES`].
    pub fn append(&self, stream: Stream, line: &str) -> EngineResult<()> {
        let mut file = self.file.lock().unwrap();
        if file.metadata()?.len() >= JOURNAL_ROTATE_BYTES {
            self.rotate(&mut file)?;
        }
        let record = JournalRecord {
            log: line.to_string(),
            stream,
            time: Utc::now(),
        };
        let mut bytes = serde_json::to_vec(&record)?;
        bytes.push(b'\n');
        file.write_all(&bytes)?;
        Ok(())
    }

    fn rotate(&self, file: &mut File) -> EngineResult<()> {
        file.flush()?;
        let backup = self.path.with_extension("log.1");
        let _ = std::fs::remove_file(&backup);
        std::fs::rename(&self.path, &backup)?;
        *file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        Ok(())
    }

    /// Replay every record, oldest first, including the rotated backup if
    /// present. Used when `Attach(logs=true)` asks to see history before
    /// the live stream begins.
    pub fn replay(&self) -> EngineResult<Vec<JournalRecord>> {
        let mut records = Vec::new();
        let backup = self.path.with_extension("log.1");
        if backup.exists() {
            read_records(&backup, &mut records)?;
        }
        read_records(&self.path, &mut records)?;
        Ok(records)
    }
}

fn read_records(path: &Path, out: &mut Vec<JournalRecord>) -> EngineResult<()> {
    if !path.exists() {
        return Ok(());
    }
    let file = File::open(path)?;
    for line in BufReader::new(file).lines() {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        if let Ok(record) = serde_json::from_str::<JournalRecord>(&line) {
            out.push(record);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn append_then_replay_round_trips() {
        let tmp = TempDir::new().unwrap();
        let journal = Journal::open(tmp.path().join("c1-json.log")).unwrap();
        journal.append(Stream::Stdout, "hello").unwrap();
        journal.append(Stream::Stderr, "uh oh").unwrap();

        let records = journal.replay().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].log, "hello");
        assert_eq!(records[1].stream, Stream::Stderr);
    }

    #[test]
    fn rotation_preserves_one_backup() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("c1-json.log");
        let journal = Journal::open(&path).unwrap();
        journal.append(Stream::Stdout, "first-batch").unwrap();

        // Force rotation on the next append by shrinking the threshold's
        // effect: write enough bytes directly to cross it.
        {
            let mut file = journal.file.lock().unwrap();
            let padding = vec![b'x'; JOURNAL_ROTATE_BYTES as usize];
            file.write_all(&padding).unwrap();
        }
        journal.append(Stream::Stdout, "second-batch").unwrap();

        assert!(path.with_extension("log.1").exists());
        let records = journal.replay().unwrap();
        assert!(records.iter().any(|r| r.log == "second-batch"));
    }
}
