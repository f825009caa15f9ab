//! File-backed prediction store.
//!
//! Records are appended to a JSON-lines file, one record per line. On open
//! the file is scanned once to build a per-owner index of line offsets;
//! history reads go back to the file through that index.

use crate::store::{clamp_timestamp, PredictionStore, StoreError};
use crate::types::prediction::{Prediction, RecordId, StoredPrediction, UserRef};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Location of one record in the file, newline excluded
#[derive(Debug, Clone, Copy)]
struct LineSpan {
    offset: u64,
    len: usize,
}

struct JsonlState {
    file: File,
    /// Length of the file up to the last complete record
    end: u64,
    last_id: u64,
    latest: Option<DateTime<Utc>>,
    by_owner: HashMap<UserRef, Vec<LineSpan>>,
    /// Set when a failed append could not be undone; the store stops writing
    broken: Option<String>,
    /// Bytes to write before the next append fails
    #[cfg(test)]
    fail_after: Option<usize>,
}

impl JsonlState {
    fn new(file: File) -> Self {
        Self {
            file,
            end: 0,
            last_id: 0,
            latest: None,
            by_owner: HashMap::new(),
            broken: None,
            #[cfg(test)]
            fail_after: None,
        }
    }

    fn index(&mut self, record: &StoredPrediction, span: LineSpan) {
        self.last_id = self.last_id.max(record.id.0);
        self.latest = self.latest.max(Some(record.prediction.timestamp));
        self.by_owner
            .entry(record.prediction.owner)
            .or_default()
            .push(span);
    }

    /// Write one complete line in a single call and force it to disk
    fn write_line(&mut self, line: &[u8]) -> io::Result<()> {
        #[cfg(test)]
        let fail_after = self.fail_after.take();
        #[cfg(not(test))]
        let fail_after: Option<usize> = None;
        if let Some(limit) = fail_after {
            self.file.write_all(&line[..limit.min(line.len())])?;
            return Err(io::Error::new(io::ErrorKind::Other, "device full"));
        }

        self.file.write_all(line)?;
        self.file.flush()?;
        self.file.sync_data()
    }

    /// Cut the file back to `len` after a failed write
    fn roll_back(&mut self, len: u64) {
        match self.file.set_len(len).and_then(|_| self.file.sync_data()) {
            Ok(()) => warn!(len = len, "Partial prediction record removed"),
            Err(e) => {
                error!(
                    error = %e,
                    "Failed to remove partial prediction record; store is now read-only"
                );
                self.broken = Some(e.to_string());
            }
        }
    }

    fn read_record(&mut self, span: LineSpan) -> Result<StoredPrediction, StoreError> {
        let mut buf = vec![0; span.len];
        self.file
            .seek(SeekFrom::Start(span.offset))
            .and_then(|_| self.file.read_exact(&mut buf))
            .map_err(|e| StoreError::ReadFailed(e.to_string()))?;
        serde_json::from_slice(&buf).map_err(|e| StoreError::ReadFailed(e.to_string()))
    }
}

/// Append-only JSON-lines prediction store
pub struct JsonlPredictionStore {
    path: PathBuf,
    state: Mutex<JsonlState>,
}

impl JsonlPredictionStore {
    /// Open (or create) the store at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let open_error = |e: io::Error| StoreError::Open {
            path: path.display().to_string(),
            message: e.to_string(),
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(open_error)?;
            }
        }

        // Writes always land at the end of the file; reads seek freely
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)
            .map_err(open_error)?;
        let mut contents = Vec::new();
        file.read_to_end(&mut contents).map_err(open_error)?;

        let mut state = JsonlState::new(file);
        let mut offset = 0u64;
        let mut torn_tail = false;

        for (line_no, line) in contents.split_inclusive(|b| *b == b'\n').enumerate() {
            let start = offset;
            let Some(body) = line.strip_suffix(b"\n") else {
                // An interrupted write left a final line without newline
                warn!(
                    path = %path.display(),
                    line = line_no + 1,
                    "Discarding torn prediction record"
                );
                torn_tail = true;
                break;
            };
            offset += line.len() as u64;

            if body.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            match serde_json::from_slice::<StoredPrediction>(body) {
                Ok(record) => state.index(
                    &record,
                    LineSpan {
                        offset: start,
                        len: body.len(),
                    },
                ),
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        line = line_no + 1,
                        error = %e,
                        "Skipping unreadable prediction record"
                    );
                }
            }
        }

        if torn_tail {
            state
                .file
                .set_len(offset)
                .and_then(|_| state.file.sync_data())
                .map_err(open_error)?;
        }
        state.end = offset;

        info!(
            path = %path.display(),
            records = state.by_owner.values().map(Vec::len).sum::<usize>(),
            owners = state.by_owner.len(),
            "Prediction store opened"
        );

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    /// Location of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PredictionStore for JsonlPredictionStore {
    fn append(&self, mut prediction: Prediction) -> Result<RecordId, StoreError> {
        let mut state = self
            .state
            .lock()
            .map_err(|e| StoreError::WriteFailed(format!("Lock error: {}", e)))?;

        if let Some(reason) = &state.broken {
            return Err(StoreError::WriteFailed(format!(
                "store is read-only after an unrecoverable write failure: {}",
                reason
            )));
        }

        clamp_timestamp(&mut prediction, state.latest);
        let record = StoredPrediction {
            id: RecordId(state.last_id + 1),
            prediction,
        };

        let mut line =
            serde_json::to_vec(&record).map_err(|e| StoreError::WriteFailed(e.to_string()))?;
        let span = LineSpan {
            offset: state.end,
            len: line.len(),
        };
        line.push(b'\n');

        if let Err(e) = state.write_line(&line) {
            state.roll_back(span.offset);
            return Err(StoreError::WriteFailed(e.to_string()));
        }

        state.end += line.len() as u64;
        state.index(&record, span);
        debug!(record_id = %record.id, owner = %record.prediction.owner, "Prediction recorded");

        Ok(record.id)
    }

    fn history_for(&self, owner: UserRef) -> Result<Vec<StoredPrediction>, StoreError> {
        let mut state = self
            .state
            .lock()
            .map_err(|e| StoreError::ReadFailed(format!("Lock error: {}", e)))?;

        let Some(spans) = state.by_owner.get(&owner).cloned() else {
            return Ok(Vec::new());
        };
        spans.into_iter().map(|span| state.read_record(span)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::prediction::{LightStatus, PredictionResult};
    use crate::types::request::PredictionRequest;
    use std::sync::Arc;
    use std::thread;

    fn prediction(owner: u64, light: LightStatus) -> Prediction {
        let req = PredictionRequest::new(31.5, 26.0, 4, 15, 3);
        let result = PredictionResult {
            predicted_ac_temp: 22.75,
            predicted_light_status: light,
        };
        Prediction::new(&req, &result, UserRef(owner))
    }

    fn ids(history: &[StoredPrediction]) -> Vec<u64> {
        history.iter().map(|r| r.id.0).collect()
    }

    #[test]
    fn test_records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("predictions.jsonl");

        {
            let store = JsonlPredictionStore::open(&path).unwrap();
            assert_eq!(store.append(prediction(1, LightStatus::On)).unwrap(), RecordId(1));
            assert_eq!(store.append(prediction(2, LightStatus::Off)).unwrap(), RecordId(2));
        }

        let store = JsonlPredictionStore::open(&path).unwrap();
        let history = store.history_for(UserRef(1)).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, RecordId(1));
        assert_eq!(history[0].prediction.predicted_light_status, LightStatus::On);
        assert_eq!(history[0].prediction.predicted_ac_temp, 22.75);

        // Identifiers continue after the last persisted record
        assert_eq!(store.append(prediction(1, LightStatus::Off)).unwrap(), RecordId(3));
        assert_eq!(ids(&store.history_for(UserRef(1)).unwrap()), vec![1, 3]);
        assert!(store.history_for(UserRef(7)).unwrap().is_empty());
    }

    #[test]
    fn test_torn_line_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("predictions.jsonl");

        {
            let store = JsonlPredictionStore::open(&path).unwrap();
            store.append(prediction(5, LightStatus::On)).unwrap();
        }
        let intact = std::fs::read(&path).unwrap();
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"{\"id\":2,\"owner\":5,\"outside").unwrap();
        drop(file);

        let store = JsonlPredictionStore::open(&path).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), intact);
        assert_eq!(store.history_for(UserRef(5)).unwrap().len(), 1);

        // The next record lands on a fresh line and is readable after reopen
        assert_eq!(store.append(prediction(5, LightStatus::Off)).unwrap(), RecordId(2));
        drop(store);
        let store = JsonlPredictionStore::open(&path).unwrap();
        assert_eq!(ids(&store.history_for(UserRef(5)).unwrap()), vec![1, 2]);
    }

    #[test]
    fn test_one_line_per_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("predictions.jsonl");

        let store = JsonlPredictionStore::open(&path).unwrap();
        for _ in 0..3 {
            store.append(prediction(9, LightStatus::Off)).unwrap();
        }

        let contents = std::fs::read_to_string(store.path()).unwrap();
        assert_eq!(contents.lines().count(), 3);
        assert!(contents.lines().all(|l| l.contains("\"owner\":9")));
    }

    #[test]
    fn test_partial_write_is_rolled_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("predictions.jsonl");
        let store = JsonlPredictionStore::open(&path).unwrap();
        store.append(prediction(3, LightStatus::On)).unwrap();
        let before = std::fs::read(&path).unwrap();

        store.state.lock().unwrap().fail_after = Some(10);
        assert!(matches!(
            store.append(prediction(3, LightStatus::Off)),
            Err(StoreError::WriteFailed(_))
        ));
        assert_eq!(std::fs::read(&path).unwrap(), before);

        // The failed record never existed; the next one reuses nothing
        assert_eq!(store.append(prediction(3, LightStatus::Off)).unwrap(), RecordId(2));
        drop(store);

        let store = JsonlPredictionStore::open(&path).unwrap();
        let history = store.history_for(UserRef(3)).unwrap();
        assert_eq!(ids(&history), vec![1, 2]);
        assert_eq!(history[1].prediction.predicted_light_status, LightStatus::Off);
    }

    #[test]
    fn test_unsynced_full_line_is_rolled_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("predictions.jsonl");
        let store = JsonlPredictionStore::open(&path).unwrap();
        store.append(prediction(3, LightStatus::On)).unwrap();

        // The whole line is written before the failure is reported
        store.state.lock().unwrap().fail_after = Some(usize::MAX);
        assert!(store.append(prediction(3, LightStatus::Off)).is_err());
        assert_eq!(ids(&store.history_for(UserRef(3)).unwrap()), vec![1]);

        assert_eq!(store.append(prediction(3, LightStatus::On)).unwrap(), RecordId(2));
        drop(store);

        let store = JsonlPredictionStore::open(&path).unwrap();
        assert_eq!(ids(&store.history_for(UserRef(3)).unwrap()), vec![1, 2]);
        assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 2);
    }

    #[test]
    fn test_broken_store_refuses_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("predictions.jsonl");
        let store = JsonlPredictionStore::open(&path).unwrap();
        store.append(prediction(4, LightStatus::On)).unwrap();

        store.state.lock().unwrap().broken = Some("truncate failed".to_string());

        assert!(matches!(
            store.append(prediction(4, LightStatus::On)),
            Err(StoreError::WriteFailed(_))
        ));
        assert_eq!(store.history_for(UserRef(4)).unwrap().len(), 1);
    }

    #[test]
    fn test_concurrent_appends_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("predictions.jsonl");
        let store = Arc::new(JsonlPredictionStore::open(&path).unwrap());

        let handles: Vec<_> = (0..8u64)
            .map(|worker| {
                let store = store.clone();
                thread::spawn(move || {
                    for _ in 0..25 {
                        store.append(prediction(worker, LightStatus::On)).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        drop(store);

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 200);
        assert!(contents
            .lines()
            .all(|l| serde_json::from_str::<StoredPrediction>(l).is_ok()));

        let store = JsonlPredictionStore::open(&path).unwrap();
        let mut all = Vec::new();
        for worker in 0..8 {
            let history = ids(&store.history_for(UserRef(worker)).unwrap());
            assert_eq!(history.len(), 25);
            assert!(history.windows(2).all(|w| w[0] < w[1]));
            all.extend(history);
        }
        all.sort_unstable();
        all.dedup();
        assert_eq!(all, (1..=200).collect::<Vec<u64>>());
    }

    #[test]
    fn test_timestamps_follow_append_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("predictions.jsonl");
        let store = JsonlPredictionStore::open(&path).unwrap();

        let late = prediction(6, LightStatus::On);
        let mut early = prediction(6, LightStatus::Off);
        early.timestamp = late.timestamp - chrono::Duration::seconds(5);

        store.append(late.clone()).unwrap();
        store.append(early.clone()).unwrap();
        drop(store);

        // The latest timestamp is restored on reopen as well
        let store = JsonlPredictionStore::open(&path).unwrap();
        store.append(early).unwrap();

        let history = store.history_for(UserRef(6)).unwrap();
        assert!(history
            .iter()
            .all(|r| r.prediction.timestamp == late.timestamp));
        assert_eq!(history[1].prediction.predicted_light_status, LightStatus::Off);
    }
}
