//! File-backed implementation of `RecordStore`.
//!
//! Layout under the data directory:
//!
//! ```text
//! <dir>/network.jsonl      one record per line; line N is sequence N
//! <dir>/certificate.jsonl
//! <dir>/...
//! <dir>/markers.json       export marker per stream
//! ```
//!
//! Each append is a single `write_all` followed by `sync_data`.  A failed
//! write truncates the file back to its previous length so no partial line
//! is ever counted as committed; if even that truncation fails, the stream
//! refuses further writes until the store is reopened.
//!
//! Readers work from a snapshot of the line offsets taken under a short read
//! lock, so they only ever see lines whose write and sync have finished.
//! The snapshot is only trusted while the file still agrees with it: when
//! the file is shorter than the snapshot, or a cached line boundary no
//! longer falls on a newline, the read rescans the file line by line.  A
//! stream cut short on disk therefore reads back with its lost tail missing
//! rather than failing the read.

use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, RwLock};

use tracing::{debug, error, warn};

use vigil_contracts::{
    error::{VigilError, VigilResult},
    stream::StreamId,
};
use vigil_core::traits::{RecordStore, StoredRecord};

const MARKERS_FILE: &str = "markers.json";
const TORN_SUFFIX: &str = "torn";

#[derive(Debug, Default)]
struct LineIndex {
    /// Byte offset at which each line starts; `offsets[n - 1]` is sequence n.
    offsets: Vec<u64>,
    /// Byte length of the committed part of the file.
    end: u64,
}

#[derive(Debug)]
struct FileStream {
    path: PathBuf,
    writer: Mutex<File>,
    index: RwLock<LineIndex>,
    /// Set when a failed write could not be rolled back.  The file length
    /// no longer matches `index.end`, so no further line can be placed.
    disabled: AtomicBool,
}

/// Durable JSONL store, one file per stream.
#[derive(Debug)]
pub struct FileRecordStore {
    dir: PathBuf,
    streams: HashMap<StreamId, FileStream>,
    markers: Mutex<BTreeMap<StreamId, u64>>,
}

fn unavailable(context: &str, e: impl std::fmt::Display) -> VigilError {
    VigilError::StorageUnavailable {
        reason: format!("{}: {}", context, e),
    }
}

impl FileRecordStore {
    /// Open (creating if needed) a store rooted at `dir`.
    ///
    /// A file whose last line has no terminating newline was cut off by a
    /// crash mid-write.  That line's `put` never returned, so it was never
    /// committed: its bytes are moved to `<stream>.jsonl.torn` and the file
    /// is cut back to the last complete line.
    pub fn open(dir: impl AsRef<Path>) -> VigilResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)
            .map_err(|e| unavailable(&format!("cannot create '{}'", dir.display()), e))?;

        let mut streams = HashMap::new();
        for stream in StreamId::ALL {
            let path = dir.join(format!("{}.jsonl", stream));
            streams.insert(stream, Self::open_stream(path)?);
        }

        let markers = Self::load_markers(&dir.join(MARKERS_FILE))?;

        Ok(Self {
            dir,
            streams,
            markers: Mutex::new(markers),
        })
    }

    /// Directory the store was opened on.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file backing `stream`.
    pub fn stream_path(&self, stream: StreamId) -> PathBuf {
        self.dir.join(format!("{}.jsonl", stream))
    }

    fn open_stream(path: PathBuf) -> VigilResult<FileStream> {
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)
            .map_err(|e| unavailable(&format!("cannot open '{}'", path.display()), e))?;

        let mut contents = Vec::new();
        file.read_to_end(&mut contents)
            .map_err(|e| unavailable(&format!("cannot read '{}'", path.display()), e))?;

        if !contents.is_empty() && contents.last() != Some(&b'\n') {
            let keep = contents
                .iter()
                .rposition(|b| *b == b'\n')
                .map_or(0, |pos| pos + 1);
            Self::quarantine_tail(&path, &contents[keep..])?;
            file.set_len(keep as u64)
                .and_then(|_| file.sync_data())
                .map_err(|e| unavailable(&format!("cannot repair '{}'", path.display()), e))?;
            contents.truncate(keep);
        }

        let mut offsets = Vec::new();
        let mut start = 0u64;
        for (pos, byte) in contents.iter().enumerate() {
            if *byte == b'\n' {
                offsets.push(start);
                start = pos as u64 + 1;
            }
        }

        debug!(path = %path.display(), records = offsets.len(), "stream file indexed");

        Ok(FileStream {
            path,
            writer: Mutex::new(file),
            index: RwLock::new(LineIndex {
                offsets,
                end: contents.len() as u64,
            }),
            disabled: AtomicBool::new(false),
        })
    }

    /// Append an uncommitted tail to the stream's quarantine file.
    fn quarantine_tail(path: &Path, tail: &[u8]) -> VigilResult<()> {
        let torn_path = torn_path(path);
        let mut torn = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&torn_path)
            .map_err(|e| unavailable(&format!("cannot open '{}'", torn_path.display()), e))?;
        torn.write_all(tail)
            .and_then(|_| torn.write_all(b"\n"))
            .and_then(|_| torn.sync_data())
            .map_err(|e| unavailable(&format!("cannot write '{}'", torn_path.display()), e))?;
        warn!(
            path = %path.display(),
            quarantine = %torn_path.display(),
            bytes = tail.len(),
            "torn final line moved out of the stream"
        );
        Ok(())
    }

    fn load_markers(path: &Path) -> VigilResult<BTreeMap<StreamId, u64>> {
        if !path.exists() {
            return Ok(BTreeMap::new());
        }
        let raw = fs::read(path)
            .map_err(|e| unavailable(&format!("cannot read '{}'", path.display()), e))?;
        serde_json::from_slice(&raw).map_err(|e| VigilError::Serialization {
            reason: format!("markers file '{}': {}", path.display(), e),
        })
    }

    fn save_markers(&self, markers: &BTreeMap<StreamId, u64>) -> VigilResult<()> {
        let path = self.dir.join(MARKERS_FILE);
        let tmp = self.dir.join(format!("{}.tmp", MARKERS_FILE));
        let raw = serde_json::to_vec_pretty(markers)?;
        fs::write(&tmp, raw)
            .and_then(|_| fs::rename(&tmp, &path))
            .map_err(|e| unavailable(&format!("cannot write '{}'", path.display()), e))
    }

    /// Quarantine file for torn lines cut from `stream`.
    pub fn torn_path(&self, stream: StreamId) -> PathBuf {
        torn_path(&self.stream_path(stream))
    }

    fn stream(&self, stream: StreamId) -> VigilResult<&FileStream> {
        self.streams
            .get(&stream)
            .ok_or_else(|| unavailable("unknown stream", stream))
    }
}

impl RecordStore for FileRecordStore {
    fn put(&self, stream: StreamId, sequence: u64, bytes: &[u8]) -> VigilResult<()> {
        let fs_stream = self.stream(stream)?;
        let write_err = |reason: String| VigilError::StorageWrite { stream, reason };

        if bytes.contains(&b'\n') {
            return Err(write_err("record bytes contain a newline".to_string()));
        }

        let mut file = fs_stream
            .writer
            .lock()
            .map_err(|e| write_err(format!("writer lock poisoned: {}", e)))?;
        if fs_stream.disabled.load(Ordering::Acquire) {
            return Err(write_err(
                "stream disabled after a failed rollback; reopen the store".to_string(),
            ));
        }

        let (head, end) = {
            let index = fs_stream
                .index
                .read()
                .map_err(|e| write_err(format!("index lock poisoned: {}", e)))?;
            (index.offsets.len() as u64, index.end)
        };
        if sequence != head + 1 {
            return Err(VigilError::SequenceConflict {
                stream,
                expected: sequence,
                found: head,
            });
        }

        let mut line = Vec::with_capacity(bytes.len() + 1);
        line.extend_from_slice(bytes);
        line.push(b'\n');

        if let Err(e) = file.write_all(&line).and_then(|_| file.sync_data()) {
            // Roll the file back so the torn bytes never become a record.
            if let Err(trunc) = file.set_len(end) {
                fs_stream.disabled.store(true, Ordering::Release);
                error!(
                    path = %fs_stream.path.display(),
                    error = %trunc,
                    "failed to truncate after write error; stream disabled"
                );
            }
            return Err(write_err(e.to_string()));
        }

        let mut index = fs_stream
            .index
            .write()
            .map_err(|e| write_err(format!("index lock poisoned: {}", e)))?;
        index.offsets.push(end);
        index.end = end + line.len() as u64;
        Ok(())
    }

    fn head(&self, stream: StreamId) -> VigilResult<u64> {
        let index = self
            .stream(stream)?
            .index
            .read()
            .map_err(|e| unavailable("index lock poisoned", e))?;
        Ok(index.offsets.len() as u64)
    }

    fn range(&self, stream: StreamId, from: u64, to: u64) -> VigilResult<Vec<StoredRecord>> {
        let fs_stream = self.stream(stream)?;
        let from = from.max(1);

        // Snapshot the committed line boundaries, then read without the lock.
        let (starts, window_end, to) = {
            let index = fs_stream
                .index
                .read()
                .map_err(|e| unavailable("index lock poisoned", e))?;
            let head = index.offsets.len() as u64;
            let to = to.min(head);
            if from > to {
                return Ok(Vec::new());
            }
            let starts = index.offsets[(from - 1) as usize..to as usize].to_vec();
            let window_end = if (to as usize) < index.offsets.len() {
                index.offsets[to as usize]
            } else {
                index.end
            };
            (starts, window_end, to)
        };

        let mut file = match File::open(&fs_stream.path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(path = %fs_stream.path.display(), "stream file is gone");
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(unavailable(
                    &format!("cannot open '{}'", fs_stream.path.display()),
                    e,
                ))
            }
        };
        if let Some(out) = read_window(&mut file, &starts, window_end, from)? {
            return Ok(out);
        }

        warn!(
            path = %fs_stream.path.display(),
            from,
            to,
            "stream file no longer matches its line index; rescanning"
        );
        rescan(file, from, to)
    }

    fn export_marker(&self, stream: StreamId) -> VigilResult<u64> {
        let markers = self
            .markers
            .lock()
            .map_err(|e| unavailable("markers lock poisoned", e))?;
        Ok(markers.get(&stream).copied().unwrap_or(0))
    }

    fn set_export_marker(&self, stream: StreamId, sequence: u64) -> VigilResult<()> {
        let mut markers = self
            .markers
            .lock()
            .map_err(|e| unavailable("markers lock poisoned", e))?;
        let mut next = markers.clone();
        next.insert(stream, sequence);
        self.save_markers(&next)?;
        *markers = next;
        Ok(())
    }

    fn flush(&self) -> VigilResult<()> {
        for (stream, fs_stream) in &self.streams {
            let file = fs_stream.writer.lock().map_err(|e| VigilError::StorageWrite {
                stream: *stream,
                reason: format!("writer lock poisoned: {}", e),
            })?;
            file.sync_all().map_err(|e| VigilError::StorageWrite {
                stream: *stream,
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }
}

// ── Line reading ──────────────────────────────────────────────────────────────

fn torn_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(TORN_SUFFIX);
    PathBuf::from(name)
}

/// Read lines at the cached offsets.  `None` when the bytes on disk no
/// longer fall on those boundaries.
fn read_window(
    file: &mut File,
    starts: &[u64],
    window_end: u64,
    from: u64,
) -> VigilResult<Option<Vec<StoredRecord>>> {
    let first = starts[0];
    // One byte of lead-in so the boundary before `first` is checked too.
    let lead = first.saturating_sub(1);
    file.seek(SeekFrom::Start(lead))
        .map_err(|e| unavailable("seek failed", e))?;
    let mut buf = vec![0u8; (window_end - lead) as usize];
    if let Err(e) = file.read_exact(&mut buf) {
        return match e.kind() {
            ErrorKind::UnexpectedEof => Ok(None),
            _ => Err(unavailable("read failed", e)),
        };
    }
    let body = if first > 0 {
        if buf[0] != b'\n' {
            return Ok(None);
        }
        &buf[1..]
    } else {
        &buf[..]
    };

    let mut out = Vec::with_capacity(starts.len());
    for (i, start) in starts.iter().enumerate() {
        let line_start = (start - first) as usize;
        let line_end = match starts.get(i + 1) {
            Some(next) => (next - first) as usize,
            None => body.len(),
        };
        if line_end <= line_start {
            return Ok(None);
        }
        let line = &body[line_start..line_end - 1];
        if body[line_end - 1] != b'\n' || line.contains(&b'\n') {
            return Ok(None);
        }
        out.push(StoredRecord {
            sequence: from + i as u64,
            bytes: line.to_vec(),
        });
    }
    Ok(Some(out))
}

/// Number lines from the start of the file and keep `from..=to`.  An
/// unterminated final line is not a record.
fn rescan(mut file: File, from: u64, to: u64) -> VigilResult<Vec<StoredRecord>> {
    file.seek(SeekFrom::Start(0))
        .map_err(|e| unavailable("seek failed", e))?;
    let mut reader = BufReader::new(file);
    let mut out = Vec::new();
    let mut sequence = 0u64;
    let mut line = Vec::new();
    loop {
        line.clear();
        let n = reader
            .read_until(b'\n', &mut line)
            .map_err(|e| unavailable("read failed", e))?;
        if n == 0 || line.last() != Some(&b'\n') {
            break;
        }
        sequence += 1;
        if sequence > to {
            break;
        }
        if sequence >= from {
            line.pop();
            out.push(StoredRecord {
                sequence,
                bytes: line.clone(),
            });
        }
    }
    Ok(out)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    /// A stream whose rollback failed refuses writes until the store is
    /// reopened; other streams are unaffected.
    #[test]
    fn test_disabled_stream_refuses_puts_until_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileRecordStore::open(dir.path()).unwrap();
        store.put(StreamId::History, 1, b"{}").unwrap();

        store.streams[&StreamId::History]
            .disabled
            .store(true, Ordering::Release);

        let err = store.put(StreamId::History, 2, b"{}").unwrap_err();
        assert!(matches!(
            err,
            VigilError::StorageWrite {
                stream: StreamId::History,
                ..
            }
        ));
        assert!(err.to_string().contains("reopen"));
        assert_eq!(store.head(StreamId::History).unwrap(), 1);
        store.put(StreamId::Network, 1, b"{}").unwrap();
        drop(store);

        let store = FileRecordStore::open(dir.path()).unwrap();
        assert_eq!(store.head(StreamId::History).unwrap(), 1);
        store.put(StreamId::History, 2, b"{}").unwrap();
        assert_eq!(store.range(StreamId::History, 1, 2).unwrap().len(), 2);
    }

    /// A torn final line is split off into the quarantine file on open.
    #[test]
    fn test_open_quarantines_torn_tail() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.jsonl");
        fs::write(&path, b"{\"a\":1}\n{\"b\":").unwrap();

        let store = FileRecordStore::open(dir.path()).unwrap();
        assert_eq!(store.head(StreamId::History).unwrap(), 1);
        assert_eq!(fs::read(&path).unwrap(), b"{\"a\":1}\n");
        assert_eq!(
            fs::read(store.torn_path(StreamId::History)).unwrap(),
            b"{\"b\":\n"
        );
    }
}
