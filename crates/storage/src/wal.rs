// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Append-only write-ahead log of events.
//!
//! One JSON object per line, each carrying a monotone sequence number.
//! Appends are buffered and group-committed; `flush` makes them durable.
//! A corrupt tail (torn write, binary garbage) is detected on open: the
//! valid prefix is preserved, the damaged file rotated to `.bak`.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use ink_core::Event;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::snapshot::rotate_bak_path;

/// Buffered appends before `needs_flush` trips.
const FLUSH_THRESHOLD: usize = 100;

/// Group-commit window.
const FLUSH_INTERVAL: Duration = Duration::from_millis(10);

/// One durable WAL record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalEntry {
    pub seq: u64,
    pub event: Event,
}

/// Errors from WAL operations
#[derive(Debug, Error)]
pub enum WalError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// The write-ahead log. Not internally synchronized; callers wrap it in a
/// mutex.
pub struct Wal {
    path: PathBuf,
    writer: BufWriter<File>,
    /// Sequence of the last appended entry.
    write_seq: u64,
    /// Sequence of the last entry the engine has fully processed.
    processed_seq: u64,
    /// Byte offset where `next_unprocessed` resumes reading.
    read_offset: u64,
    /// Appends since the last flush.
    pending: usize,
    last_flush: Instant,
}

impl Wal {
    /// Open (or create) the WAL at `path`.
    ///
    /// `processed_seq` comes from the snapshot the caller recovered from;
    /// entries at or below it are skipped by `next_unprocessed`. Corruption
    /// anywhere in the file rotates the damaged original to a `.bak` and
    /// rewrites the valid prefix in place.
    pub fn open(path: &Path, processed_seq: u64) -> Result<Self, WalError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let (entries, corrupt) = match File::open(path) {
            Ok(file) => scan_entries(file),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => (Vec::new(), false),
            Err(e) => return Err(e.into()),
        };

        if corrupt {
            let bak = rotate_bak_path(path);
            warn!(path = %path.display(), bak = %bak.display(), "corrupt WAL tail, rotating");
            std::fs::rename(path, &bak)?;
            let mut clean = BufWriter::new(
                OpenOptions::new().create(true).write(true).truncate(true).open(path)?,
            );
            for entry in &entries {
                serde_json::to_writer(&mut clean, entry)?;
                clean.write_all(b"\n")?;
            }
            clean.flush()?;
            clean.get_ref().sync_data()?;
        }

        let write_seq = entries.last().map(|e| e.seq).unwrap_or(0);

        // Resume reading after the last entry already processed.
        let read_offset = {
            let mut offset = 0u64;
            if let Ok(file) = File::open(path) {
                let mut reader = BufReader::new(file);
                let mut line = String::new();
                loop {
                    line.clear();
                    let n = match reader.read_line(&mut line) {
                        Ok(0) | Err(_) => break,
                        Ok(n) => n,
                    };
                    match serde_json::from_str::<WalEntry>(line.trim_end()) {
                        Ok(entry) if entry.seq <= processed_seq => offset += n as u64,
                        _ => break,
                    }
                }
            }
            offset
        };

        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            write_seq,
            processed_seq,
            read_offset,
            pending: 0,
            last_flush: Instant::now(),
        })
    }

    /// Append an event, assigning it the next sequence number.
    ///
    /// The entry is buffered; call [`flush`](Self::flush) to make it durable.
    pub fn append(&mut self, event: &Event) -> Result<u64, WalError> {
        let seq = self.write_seq + 1;
        let entry = WalEntry { seq, event: event.clone() };
        serde_json::to_writer(&mut self.writer, &entry)?;
        self.writer.write_all(b"\n")?;
        self.write_seq = seq;
        self.pending += 1;
        Ok(seq)
    }

    /// Flush buffered entries to disk (fsync).
    pub fn flush(&mut self) -> Result<(), WalError> {
        self.writer.flush()?;
        self.writer.get_ref().sync_data()?;
        self.pending = 0;
        self.last_flush = Instant::now();
        Ok(())
    }

    /// Whether the group-commit policy calls for a flush.
    pub fn needs_flush(&self) -> bool {
        self.pending >= FLUSH_THRESHOLD
            || (self.pending > 0 && self.last_flush.elapsed() >= FLUSH_INTERVAL)
    }

    pub fn write_seq(&self) -> u64 {
        self.write_seq
    }

    pub fn processed_seq(&self) -> u64 {
        self.processed_seq
    }

    /// Mark an entry as processed by the engine loop.
    pub fn mark_processed(&mut self, seq: u64) {
        self.processed_seq = self.processed_seq.max(seq);
    }

    /// Read the next entry past the processed cursor, advancing the cursor's
    /// byte offset. Returns `None` at end of log or at a corrupt line (the
    /// corrupt line is skipped so a later valid append is still readable).
    pub fn next_unprocessed(&mut self) -> Result<Option<WalEntry>, WalError> {
        // Buffered appends must hit the OS before we can read them back.
        self.writer.flush()?;

        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(self.read_offset))?;
        let mut reader = BufReader::new(file);
        let mut buf = Vec::new();

        loop {
            buf.clear();
            let n = reader.read_until(b'\n', &mut buf)?;
            if n == 0 {
                return Ok(None);
            }
            self.read_offset += n as u64;

            let Ok(line) = std::str::from_utf8(&buf) else {
                return Ok(None);
            };
            match serde_json::from_str::<WalEntry>(line.trim_end()) {
                Ok(entry) => {
                    if entry.seq <= self.processed_seq {
                        continue;
                    }
                    return Ok(Some(entry));
                }
                Err(_) => return Ok(None),
            }
        }
    }

    /// All valid entries with `seq > after`, stopping at the first corrupt
    /// line.
    pub fn entries_after(&self, after: u64) -> Result<Vec<WalEntry>, WalError> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let (entries, _) = scan_entries(file);
        Ok(entries.into_iter().filter(|e| e.seq > after).collect())
    }

    /// Drop entries with `seq < before`, rewriting the log in place.
    /// Called after a checkpoint so the log does not grow without bound.
    pub fn truncate_before(&mut self, before: u64) -> Result<(), WalError> {
        self.writer.flush()?;

        let keep: Vec<WalEntry> = self
            .entries_after(0)?
            .into_iter()
            .filter(|e| e.seq >= before)
            .collect();

        let tmp = self.path.with_extension("wal.tmp");
        {
            let mut out = BufWriter::new(File::create(&tmp)?);
            for entry in &keep {
                serde_json::to_writer(&mut out, entry)?;
                out.write_all(b"\n")?;
            }
            out.flush()?;
            out.get_ref().sync_data()?;
        }
        std::fs::rename(&tmp, &self.path)?;

        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.pending = 0;

        // The rewritten file starts at the first kept entry; re-derive the
        // read cursor from the processed sequence.
        self.read_offset = 0;
        let processed = self.processed_seq;
        if processed > 0 {
            let mut reader = BufReader::new(File::open(&self.path)?);
            let mut line = String::new();
            loop {
                line.clear();
                let n = match reader.read_line(&mut line) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => n,
                };
                match serde_json::from_str::<WalEntry>(line.trim_end()) {
                    Ok(entry) if entry.seq <= processed => self.read_offset += n as u64,
                    _ => break,
                }
            }
        }
        Ok(())
    }
}

/// Parse every valid leading entry; report whether trailing garbage was seen.
fn scan_entries(file: File) -> (Vec<WalEntry>, bool) {
    let mut reader = BufReader::new(file);
    let mut entries = Vec::new();
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => return (entries, false),
            Ok(_) => {}
            Err(_) => return (entries, true),
        }
        let Ok(line) = std::str::from_utf8(&buf) else {
            return (entries, true);
        };
        let trimmed = line.trim_end();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<WalEntry>(trimmed) {
            Ok(entry) => entries.push(entry),
            Err(_) => return (entries, true),
        }
    }
}

#[cfg(test)]
#[path = "wal_tests.rs"]
mod tests;
