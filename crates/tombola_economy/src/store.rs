//! # Record Store
//!
//! **Crash-Safe Per-Participant Persistence**
//!
//! The ledger reads and writes exactly one record per participant. A store only
//! needs two operations: load a record, and replace a record atomically.
//!
//! ## Guarantees
//!
//! 1. **Durability**: once `store()` returns `Ok`, the record is on disk
//! 2. **Atomicity**: a failed `store()` leaves the previous record readable
//! 3. **Integrity**: a torn or corrupted record is reported, never reset to zero
//!
//! ## File Format
//!
//! ```text
//! [4 bytes: magic "TREC"]
//! [4 bytes: version]
//! [4 bytes: payload length]
//! [N bytes: payload (JSON-encoded ParticipantRecord)]
//! [4 bytes: CRC32 of everything above]
//! ```
//!
//! Writes go to `<id>.rec.tmp`, are fsynced, then renamed over `<id>.rec`.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::error::{StoreError, StoreResult};
use crate::record::{ParticipantId, ParticipantRecord};

/// Magic bytes identifying a record file.
const RECORD_MAGIC: &[u8; 4] = b"TREC";

/// Current record format version.
const RECORD_VERSION: u32 = 1;

/// Header: magic + version + payload length.
const HEADER_LEN: usize = 12;

/// Durable home of participant records.
pub trait RecordStore: Send + Sync {
    /// Loads a record. `Ok(None)` means the participant has never been written.
    fn load(&self, id: ParticipantId) -> StoreResult<Option<ParticipantRecord>>;

    /// Atomically replaces a record.
    fn store(&self, id: ParticipantId, record: &ParticipantRecord) -> StoreResult<()>;
}

/// Encodes a record into its framed on-disk form.
pub fn encode_record(record: &ParticipantRecord) -> StoreResult<Vec<u8>> {
    let payload = serde_json::to_vec(record).map_err(|e| StoreError::Encode(e.to_string()))?;
    let payload_len =
        u32::try_from(payload.len()).map_err(|_| StoreError::Encode("record too large".to_string()))?;

    let mut buf = Vec::with_capacity(HEADER_LEN + payload.len() + 4);
    buf.extend_from_slice(RECORD_MAGIC);
    buf.extend_from_slice(&RECORD_VERSION.to_le_bytes());
    buf.extend_from_slice(&payload_len.to_le_bytes());
    buf.extend_from_slice(&payload);

    let crc = crc32fast::hash(&buf);
    buf.extend_from_slice(&crc.to_le_bytes());
    Ok(buf)
}

/// Decodes a framed record, verifying magic, version, length and CRC.
pub fn decode_record(id: ParticipantId, data: &[u8]) -> StoreResult<ParticipantRecord> {
    let corrupt = |reason: &str| StoreError::Corrupt {
        participant: id,
        reason: reason.to_string(),
    };

    if data.len() < HEADER_LEN + 4 {
        return Err(corrupt("truncated header"));
    }
    if &data[0..4] != RECORD_MAGIC {
        return Err(corrupt("bad magic"));
    }

    let version = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
    if version != RECORD_VERSION {
        return Err(corrupt(&format!("unsupported version {version}")));
    }

    let payload_len = u32::from_le_bytes([data[8], data[9], data[10], data[11]]) as usize;
    if data.len() != HEADER_LEN + payload_len + 4 {
        return Err(corrupt("length mismatch"));
    }

    let body_end = HEADER_LEN + payload_len;
    let stored_crc = u32::from_le_bytes([
        data[body_end],
        data[body_end + 1],
        data[body_end + 2],
        data[body_end + 3],
    ]);
    if crc32fast::hash(&data[..body_end]) != stored_crc {
        return Err(corrupt("CRC mismatch"));
    }

    serde_json::from_slice(&data[HEADER_LEN..body_end]).map_err(|e| corrupt(&e.to_string()))
}

/// One framed file per participant inside a directory.
#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Opens (creating if needed) a store rooted at `dir`.
    pub fn open(dir: impl AsRef<Path>) -> StoreResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| {
            StoreError::Unavailable(format!("failed to create {}: {e}", dir.display()))
        })?;
        Ok(Self { dir })
    }

    /// Directory holding the record files.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, id: ParticipantId) -> PathBuf {
        self.dir.join(format!("{id}.rec"))
    }

    fn write_atomic(&self, id: ParticipantId, bytes: &[u8]) -> std::io::Result<()> {
        let path = self.record_path(id);
        let tmp = self.dir.join(format!("{id}.rec.tmp"));

        {
            let mut file = File::create(&tmp)?;
            file.write_all(bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &path)?;

        // The rename is already visible, so a sync failure is logged rather than returned.
        if let Err(e) = sync_dir(&self.dir) {
            tracing::warn!(
                participant = %id,
                dir = %self.dir.display(),
                error = %e,
                "record directory sync failed"
            );
        }
        Ok(())
    }
}

/// Flushes a directory entry table so a completed rename survives a crash.
fn sync_dir(dir: &Path) -> std::io::Result<()> {
    File::open(dir)?.sync_all()
}

impl RecordStore for FileStore {
    fn load(&self, id: ParticipantId) -> StoreResult<Option<ParticipantRecord>> {
        match fs::read(self.record_path(id)) {
            Ok(bytes) => decode_record(id, &bytes).map(Some),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Unavailable(format!("read failed for {id}: {e}"))),
        }
    }

    fn store(&self, id: ParticipantId, record: &ParticipantRecord) -> StoreResult<()> {
        let bytes = encode_record(record)?;
        self.write_atomic(id, &bytes)
            .map_err(|e| StoreError::Unavailable(format!("write failed for {id}: {e}")))
    }
}

/// In-process store for tests and ephemeral deployments.
///
/// Can be switched offline to simulate an unavailable storage medium.
#[derive(Debug)]
pub struct MemoryStore {
    records: RwLock<HashMap<ParticipantId, ParticipantRecord>>,
    online: AtomicBool,
    writes: AtomicU64,
}

impl MemoryStore {
    /// Creates an empty, online store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            online: AtomicBool::new(true),
            writes: AtomicU64::new(0),
        }
    }

    /// Switches the store on or off. Offline stores fail every read and write.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Successful writes so far.
    #[must_use]
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    fn check_online(&self) -> StoreResult<()> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory store offline".to_string()))
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordStore for MemoryStore {
    fn load(&self, id: ParticipantId) -> StoreResult<Option<ParticipantRecord>> {
        self.check_online()?;
        Ok(self.records.read().get(&id).cloned())
    }

    fn store(&self, id: ParticipantId, record: &ParticipantRecord) -> StoreResult<()> {
        self.check_online()?;
        self.records.write().insert(id, record.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> ParticipantRecord {
        let mut record = ParticipantRecord::new_default();
        record.credit(250).unwrap();
        record.add_items(&[100, 100, 200]);
        record.add_packs(1, 2);
        record
    }

    #[test]
    fn test_file_store_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        assert_eq!(store.load(ParticipantId(1)).unwrap(), None);
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let record = sample_record();
        {
            let store = FileStore::open(dir.path()).unwrap();
            store.store(ParticipantId(42), &record).unwrap();
        }

        let store = FileStore::open(dir.path()).unwrap();
        let loaded = store.load(ParticipantId(42)).unwrap().unwrap();
        assert_eq!(loaded, record);
        assert!(!dir.path().join("42.rec.tmp").exists());
    }

    #[test]
    fn test_corrupt_record_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        store.store(ParticipantId(7), &sample_record()).unwrap();

        let path = dir.path().join("7.rec");
        let mut bytes = fs::read(&path).unwrap();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0xFF;
        fs::write(&path, &bytes).unwrap();

        let err = store.load(ParticipantId(7)).unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { reason, .. } if reason == "CRC mismatch"));
    }

    #[test]
    fn test_decode_rejects_bad_frames() {
        let id = ParticipantId(1);
        let good = encode_record(&sample_record()).unwrap();

        assert!(decode_record(id, &good[..8]).is_err());

        let mut bad_magic = good.clone();
        bad_magic[0] = b'X';
        assert!(matches!(
            decode_record(id, &bad_magic),
            Err(StoreError::Corrupt { reason, .. }) if reason == "bad magic"
        ));

        let mut truncated = good.clone();
        truncated.pop();
        assert!(matches!(
            decode_record(id, &truncated),
            Err(StoreError::Corrupt { reason, .. }) if reason == "length mismatch"
        ));
    }

    #[test]
    fn test_failed_write_keeps_previous_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let original = sample_record();
        store.store(ParticipantId(7), &original).unwrap();

        // A directory squatting on the temp path makes the next write fail.
        fs::create_dir(dir.path().join("7.rec.tmp")).unwrap();
        let err = store.store(ParticipantId(7), &ParticipantRecord::new_default()).unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(reason) if reason.starts_with("write failed for 7")));

        assert_eq!(store.load(ParticipantId(7)).unwrap(), Some(original));
    }

    #[test]
    fn test_sync_dir_reports_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert!(sync_dir(dir.path()).is_ok());
        assert!(sync_dir(&dir.path().join("gone")).is_err());
    }

    #[test]
    fn test_memory_store_offline() {
        let store = MemoryStore::new();
        store.store(ParticipantId(1), &sample_record()).unwrap();
        store.set_online(false);

        assert!(matches!(store.load(ParticipantId(1)), Err(StoreError::Unavailable(_))));
        assert!(store.store(ParticipantId(1), &ParticipantRecord::new_default()).is_err());

        store.set_online(true);
        assert_eq!(store.load(ParticipantId(1)).unwrap(), Some(sample_record()));
        assert_eq!(store.write_count(), 1);
    }
}
