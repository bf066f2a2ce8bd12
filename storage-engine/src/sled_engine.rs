use crate::backup::{BackupEntry, BackupReader, BackupWriter};
use crate::options::EngineOptions;
use crate::record::Record;
use crate::{Compaction, Compactor, StorageEngine};
use shared::ttl::{is_expired, now_unix};
use shared::{EngineError, Error, Result};
use sled::transaction::{ConflictableTransactionError, TransactionError, TransactionResult};
use std::fmt::Debug;
use std::io::{Read, Write};
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, TryLockError};
use tracing::{debug, info};

/// Keys examined per compaction region.
const COMPACTION_BATCH: usize = 256;
/// Entries applied per sled batch while loading a backup.
const LOAD_BATCH: usize = 1024;

/// sled-backed storage engine.
///
/// Values are wrapped in a [`Record`] envelope carrying a version and an
/// optional expiry. Expired records are invisible to readers and are
/// physically removed by [`Compactor::run_compaction`].
pub struct SledEngine {
    db: sled::Db,
    path: PathBuf,
    // Key after which the next compaction pass resumes.
    gc_cursor: Mutex<Option<Vec<u8>>>,
}

impl SledEngine {
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn next_version(&self) -> Result<u64> {
        // generate_id starts at zero; versions start at one so `since = 0` covers everything.
        Ok(self.db.generate_id()? + 1)
    }
}

fn from_tx(err: TransactionError<Error>) -> Error {
    match err {
        TransactionError::Abort(e) => e,
        TransactionError::Storage(e) => e.into(),
    }
}

fn abort(err: Error) -> ConflictableTransactionError<Error> {
    ConflictableTransactionError::Abort(err)
}

impl StorageEngine for SledEngine {
    type Options = EngineOptions;

    fn open(path: &Path, options: &EngineOptions) -> Result<Self> {
        let db = options.to_sled_config(path).open()?;

        info!(
            path = %path.display(),
            recovered = db.was_recovered(),
            "Opened sled database"
        );

        Ok(Self {
            db,
            path: path.to_path_buf(),
            gc_cursor: Mutex::new(None),
        })
    }

    fn close(&self) -> Result<()> {
        let flushed = self.db.flush()?;
        debug!(path = %self.path.display(), flushed, "Flushed sled database on close");
        Ok(())
    }

    fn set(&self, key: &[u8], value: &[u8], expires_at: Option<u64>) -> Result<()> {
        let result: TransactionResult<(), Error> = self.db.transaction(|tx| {
            let version = tx.generate_id()? + 1;
            tx.insert(key, Record::new(version, expires_at, value).encode())?;
            Ok(())
        });
        result.map_err(from_tx)
    }

    fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        let Some(raw) = self.db.get(key)? else {
            return Err(Error::NotFound);
        };

        let record = Record::decode(&raw)?;
        if record.is_expired(now_unix()) {
            return Err(Error::NotFound);
        }

        Ok(record.value)
    }

    fn delete(&self, key: &[u8]) -> Result<bool> {
        let result: TransactionResult<bool, Error> = self.db.transaction(|tx| {
            match tx.remove(key)? {
                Some(raw) => {
                    let record = Record::decode(&raw).map_err(abort)?;
                    Ok(!record.is_expired(now_unix()))
                }
                None => Ok(false),
            }
        });
        result.map_err(from_tx)
    }

    fn update(
        &self,
        key: &[u8],
        expires_at: Option<u64>,
        f: &dyn Fn(Option<&[u8]>) -> Result<Vec<u8>>,
    ) -> Result<Vec<u8>> {
        let result: TransactionResult<Vec<u8>, Error> = self.db.transaction(|tx| {
            let current = match tx.get(key)? {
                Some(raw) => {
                    let record = Record::decode(&raw).map_err(abort)?;
                    if record.is_expired(now_unix()) {
                        None
                    } else {
                        Some(record.value)
                    }
                }
                None => None,
            };

            let next = f(current.as_deref()).map_err(abort)?;
            let version = tx.generate_id()? + 1;
            tx.insert(key, Record::new(version, expires_at, next.clone()).encode())?;
            Ok(next)
        });
        result.map_err(from_tx)
    }

    fn size(&self) -> Result<(u64, u64)> {
        let mut index_bytes = 0;
        let mut log_bytes = 0;

        for entry in std::fs::read_dir(&self.path)? {
            let entry = entry?;
            let bytes = disk_usage(&entry.path())?;
            // `db` is sled's append-only segment log and `blobs` holds oversized
            // values; `conf` and `snap.*` make up the index snapshot.
            let name = entry.file_name();
            if name == "db" || name == "blobs" {
                log_bytes += bytes;
            } else {
                index_bytes += bytes;
            }
        }

        Ok((index_bytes, log_bytes))
    }

    fn backup(&self, writer: &mut dyn Write, since: u64) -> Result<u64> {
        let now = now_unix();
        // The scan is not a snapshot. Every version at or below the mark was
        // assigned before it started; anything above is left for the next
        // incremental backup.
        let mark = self.db.generate_id()?;
        let mut out = BackupWriter::new(writer)?;

        for item in self.db.iter() {
            let (key, raw) = item?;
            let record = Record::decode(&raw)?;
            if record.version <= since || record.version > mark || record.is_expired(now) {
                continue;
            }

            out.write_entry(&BackupEntry {
                key: key.to_vec(),
                value: record.value,
                expires_at: record.expires_at,
                version: record.version,
            })?;
        }

        let upto = if out.entries() == 0 { since } else { mark };
        let entries = out.finish(upto)?;
        debug!(path = %self.path.display(), entries, since, upto, "Backup written");
        Ok(upto)
    }

    fn load(&self, reader: &mut dyn Read) -> Result<()> {
        let mut input = BackupReader::new(reader)?;
        let now = now_unix();

        let mut batch = sled::Batch::default();
        let mut pending = 0;
        let mut loaded = 0u64;
        let mut skipped = 0u64;

        while let Some(entry) = input.next_entry()? {
            if is_expired(entry.expires_at, now) {
                skipped += 1;
                continue;
            }

            // Versions are local to this database, so loaded entries are re-stamped.
            let version = self.next_version()?;
            batch.insert(entry.key, Record::new(version, entry.expires_at, entry.value).encode());
            pending += 1;
            loaded += 1;

            if pending == LOAD_BATCH {
                self.db.apply_batch(std::mem::take(&mut batch))?;
                pending = 0;
            }
        }

        if pending > 0 {
            self.db.apply_batch(batch)?;
        }
        self.db.flush()?;

        debug!(
            path = %self.path.display(),
            loaded,
            skipped,
            source_upto = ?input.upto(),
            "Backup loaded"
        );
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

impl Compactor for SledEngine {
    fn run_compaction(&self, discard_ratio: f64) -> Result<Compaction> {
        let mut cursor = match self.gc_cursor.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => return Err(EngineError::CompactionInProgress.into()),
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
        };
        let now = now_unix();

        loop {
            let lower = match cursor.as_ref() {
                Some(after) => Bound::Excluded(after.clone()),
                None => Bound::Unbounded,
            };

            let mut scanned = 0usize;
            let mut stale = Vec::new();
            let mut last_key = None;

            for item in self
                .db
                .range::<Vec<u8>, _>((lower, Bound::Unbounded))
                .take(COMPACTION_BATCH)
            {
                let (key, raw) = item?;
                scanned += 1;
                if Record::decode(&raw)?.is_expired(now) {
                    stale.push((key.clone(), raw));
                }
                last_key = Some(key);
            }

            let Some(last_key) = last_key else {
                *cursor = None;
                return Ok(Compaction::NothingToReclaim);
            };
            *cursor = Some(last_key.to_vec());

            if !stale.is_empty() && stale.len() as f64 / scanned as f64 >= discard_ratio {
                let mut entries = 0;
                let mut bytes = 0;

                for (key, raw) in stale {
                    // Only the exact expired record is removed; a concurrent rewrite wins.
                    if self
                        .db
                        .compare_and_swap(&key, Some(&raw), None::<sled::IVec>)?
                        .is_ok()
                    {
                        entries += 1;
                        bytes += (key.len() + raw.len()) as u64;
                    }
                }

                if entries > 0 {
                    debug!(entries, bytes, "Compaction pass reclaimed expired entries");
                    return Ok(Compaction::Reclaimed { entries, bytes });
                }
            }

            if scanned < COMPACTION_BATCH {
                *cursor = None;
                return Ok(Compaction::NothingToReclaim);
            }
        }
    }
}

impl Debug for SledEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledEngine")
            .field("path", &self.path)
            .field("entries", &self.db.len())
            .finish()
    }
}

// Files can disappear while sled rotates snapshots; those count as zero.
fn disk_usage(path: &Path) -> Result<u64> {
    let metadata = match std::fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };

    if !metadata.is_dir() {
        return Ok(metadata.len());
    }

    let mut total = 0;
    for entry in std::fs::read_dir(path)? {
        total += disk_usage(&entry?.path())?;
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_temp() -> (tempfile::TempDir, SledEngine) {
        let temp_dir = tempfile::tempdir().unwrap();
        let engine = SledEngine::open(temp_dir.path(), &EngineOptions::default()).unwrap();
        (temp_dir, engine)
    }

    #[test]
    fn test_set_and_get() {
        let (_dir, engine) = open_temp();

        engine.set(b"key", &[1, 2, 3], None).unwrap();
        assert_eq!(engine.get(b"key").unwrap(), vec![1, 2, 3]);

        engine.set(b"key", &[9], None).unwrap();
        assert_eq!(engine.get(b"key").unwrap(), vec![9]);
    }

    #[test]
    fn test_get_missing_and_expired() {
        let (_dir, engine) = open_temp();

        assert!(matches!(engine.get(b"missing"), Err(Error::NotFound)));

        engine.set(b"old", b"value", Some(1)).unwrap();
        assert!(matches!(engine.get(b"old"), Err(Error::NotFound)));

        engine
            .set(b"fresh", b"value", Some(now_unix() + 3600))
            .unwrap();
        assert_eq!(engine.get(b"fresh").unwrap(), b"value".to_vec());
    }

    #[test]
    fn test_versions_increase() {
        let (_dir, engine) = open_temp();

        engine.set(b"a", b"1", None).unwrap();
        engine.set(b"b", b"2", None).unwrap();

        let a = Record::decode(&engine.db.get(b"a").unwrap().unwrap()).unwrap();
        let b = Record::decode(&engine.db.get(b"b").unwrap().unwrap()).unwrap();
        assert!(a.version >= 1);
        assert!(b.version > a.version);
    }

    #[test]
    fn test_delete() {
        let (_dir, engine) = open_temp();

        engine.set(b"key", b"value", None).unwrap();
        assert!(engine.delete(b"key").unwrap());
        assert!(!engine.delete(b"key").unwrap());
        assert!(matches!(engine.get(b"key"), Err(Error::NotFound)));

        // An expired entry is removed but was not live.
        engine.set(b"expired", b"value", Some(1)).unwrap();
        assert!(!engine.delete(b"expired").unwrap());
        assert!(!engine.db.contains_key(b"expired").unwrap());
    }

    #[test]
    fn test_update_sees_current_value() {
        let (_dir, engine) = open_temp();

        let append = |current: Option<&[u8]>| -> Result<Vec<u8>> {
            let mut next = current.map(<[u8]>::to_vec).unwrap_or_default();
            next.push(b'x');
            Ok(next)
        };

        assert_eq!(engine.update(b"key", None, &append).unwrap(), b"x".to_vec());
        assert_eq!(engine.update(b"key", None, &append).unwrap(), b"xx".to_vec());
        assert_eq!(engine.get(b"key").unwrap(), b"xx".to_vec());
    }

    #[test]
    fn test_update_abort_leaves_value_untouched() {
        let (_dir, engine) = open_temp();
        engine.set(b"key", b"keep", None).unwrap();

        let result = engine.update(b"key", None, &|_| Err(Error::InvalidCounter(4)));
        assert!(matches!(result, Err(Error::InvalidCounter(4))));
        assert_eq!(engine.get(b"key").unwrap(), b"keep".to_vec());
    }

    #[test]
    fn test_compaction_reclaims_expired_entries() {
        let (_dir, engine) = open_temp();

        for i in 0..10u8 {
            engine.set(&[b'e', i], b"stale", Some(1)).unwrap();
        }

        match engine.run_compaction(0.5).unwrap() {
            Compaction::Reclaimed { entries, bytes } => {
                assert_eq!(entries, 10);
                assert!(bytes > 0);
            }
            other => panic!("expected reclaimed, got {:?}", other),
        }
        assert_eq!(engine.run_compaction(0.5).unwrap(), Compaction::NothingToReclaim);
        assert_eq!(engine.db.len(), 0);
    }

    #[test]
    fn test_compaction_respects_discard_ratio() {
        let (_dir, engine) = open_temp();

        engine.set(b"a-expired", b"stale", Some(1)).unwrap();
        for i in 0..9u8 {
            engine.set(&[b'b', i], b"live", None).unwrap();
        }

        assert_eq!(engine.run_compaction(0.5).unwrap(), Compaction::NothingToReclaim);
        assert!(engine.db.contains_key(b"a-expired").unwrap());

        assert_eq!(
            engine.run_compaction(0.1).unwrap(),
            Compaction::Reclaimed { entries: 1, bytes: (9 + 16 + 5) as u64 }
        );
        assert!(!engine.db.contains_key(b"a-expired").unwrap());
        assert_eq!(engine.db.len(), 9);
    }

    #[test]
    fn test_compaction_walks_past_clean_regions() {
        let (_dir, engine) = open_temp();

        // First region is entirely live, the second entirely stale.
        for i in 0..COMPACTION_BATCH as u16 {
            engine.set(&[b'a', (i >> 8) as u8, i as u8], b"live", None).unwrap();
        }
        for i in 0..8u8 {
            engine.set(&[b'z', i], b"stale", Some(1)).unwrap();
        }

        assert!(matches!(
            engine.run_compaction(0.5).unwrap(),
            Compaction::Reclaimed { entries: 8, .. }
        ));
        assert_eq!(engine.run_compaction(0.5).unwrap(), Compaction::NothingToReclaim);
        assert_eq!(engine.db.len(), COMPACTION_BATCH);
    }

    #[test]
    fn test_compaction_on_empty_database() {
        let (_dir, engine) = open_temp();
        assert_eq!(engine.run_compaction(0.0).unwrap(), Compaction::NothingToReclaim);
    }

    #[test]
    fn test_backup_and_load_into_fresh_database() {
        let (_src_dir, source) = open_temp();
        source.set(&[1, 2, 3], &[4, 5, 6], None).unwrap();
        source.set(b"ttl", b"later", Some(now_unix() + 3600)).unwrap();
        source.set(b"gone", b"stale", Some(1)).unwrap();

        let mut stream = Vec::new();
        let upto = source.backup(&mut stream, 0).unwrap();
        assert!(upto > 0);

        let (_dst_dir, target) = open_temp();
        target.load(&mut stream.as_slice()).unwrap();

        assert_eq!(target.get(&[1, 2, 3]).unwrap(), vec![4, 5, 6]);
        assert_eq!(target.get(b"ttl").unwrap(), b"later".to_vec());
        assert!(matches!(target.get(b"gone"), Err(Error::NotFound)));
        assert!(!target.db.contains_key(b"gone").unwrap());
    }

    #[test]
    fn test_incremental_backup() {
        let (_dir, engine) = open_temp();
        engine.set(b"first", b"1", None).unwrap();

        let mut full = Vec::new();
        let since = engine.backup(&mut full, 0).unwrap();

        engine.set(b"second", b"2", None).unwrap();
        let mut incremental = Vec::new();
        let upto = engine.backup(&mut incremental, since).unwrap();
        assert!(upto > since);

        let mut reader = BackupReader::new(incremental.as_slice()).unwrap();
        let entry = reader.next_entry().unwrap().unwrap();
        assert_eq!(entry.key, b"second".to_vec());
        assert_eq!(reader.next_entry().unwrap(), None);
        assert_eq!(reader.upto(), Some(upto));

        // Nothing new: the marker is returned unchanged.
        let mut empty = Vec::new();
        assert_eq!(engine.backup(&mut empty, upto).unwrap(), upto);
    }

    /// Rewrites keys behind and ahead of the scan once the first entry arrives.
    struct RewritingWriter<'a> {
        engine: &'a SledEngine,
        bytes: Vec<u8>,
        rewritten: bool,
    }

    impl std::io::Write for RewritingWriter<'_> {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            // The first call carries the stream header.
            if !self.rewritten && !self.bytes.is_empty() {
                self.rewritten = true;
                self.engine.set(b"a", b"a-new", None).unwrap();
                self.engine.set(b"zzzz", b"z-new", None).unwrap();
            }
            self.bytes.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn read_entries(stream: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
        let mut reader = BackupReader::new(stream).unwrap();
        let mut entries = Vec::new();
        while let Some(entry) = reader.next_entry().unwrap() {
            entries.push((entry.key, entry.value));
        }
        entries
    }

    #[test]
    fn test_writes_during_backup_reach_next_incremental() {
        let (_dir, engine) = open_temp();
        engine.set(b"a", b"a-old", None).unwrap();
        for i in 0..2000u32 {
            engine.set(format!("m{i:05}").as_bytes(), b"filler", None).unwrap();
        }
        engine.set(b"zzzz", b"z-old", None).unwrap();

        let mut writer = RewritingWriter {
            engine: &engine,
            bytes: Vec::new(),
            rewritten: false,
        };
        let upto = engine.backup(&mut writer, 0).unwrap();
        assert!(writer.rewritten);

        let full = read_entries(&writer.bytes);
        assert!(full.contains(&(b"a".to_vec(), b"a-old".to_vec())));
        assert!(!full.iter().any(|(_, value)| value == b"a-new"));

        let mut incremental = Vec::new();
        engine.backup(&mut incremental, upto).unwrap();
        let incremental = read_entries(&incremental);

        assert!(incremental.contains(&(b"a".to_vec(), b"a-new".to_vec())));
        assert!(incremental.contains(&(b"zzzz".to_vec(), b"z-new".to_vec())));
        assert_eq!(incremental.len(), 2);
    }

    #[test]
    fn test_backup_does_not_mutate() {
        let (_dir, engine) = open_temp();
        engine.set(b"key", b"value", None).unwrap();
        let before = engine.db.get(b"key").unwrap();

        let mut stream = Vec::new();
        engine.backup(&mut stream, 0).unwrap();

        assert_eq!(engine.db.get(b"key").unwrap(), before);
        assert_eq!(engine.db.len(), 1);
    }

    #[test]
    fn test_load_rejects_garbage() {
        let (_dir, engine) = open_temp();
        let result = engine.load(&mut &b"definitely not a backup"[..]);
        assert!(matches!(
            result,
            Err(Error::Engine(EngineError::Corrupted(_)))
        ));
    }

    #[test]
    fn test_size_grows_with_writes() {
        let (_dir, engine) = open_temp();
        let (index_before, log_before) = engine.size().unwrap();

        let value = vec![7u8; 1024];
        for i in 0..2048u32 {
            engine.set(&i.to_be_bytes(), &value, None).unwrap();
        }
        engine.flush().unwrap();

        let (index_after, log_after) = engine.size().unwrap();
        assert!(index_after + log_after > index_before + log_before);
        assert!(log_after > log_before);
    }
}
