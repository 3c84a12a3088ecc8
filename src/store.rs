// Copyright (c) 2021, Qualcomm Innovation Center, Inc. All rights reserved.
//
// SPDX-License-Identifier: BSD-3-Clause
//! The crash store
//!
//! Every crash input ever discovered is recorded exactly once, keyed by its path. Each triage
//! run that finds at least one new input closes a new bucket, so "what did the last run find"
//! stays answerable forever. Reports produced while reproducing crashes hang off the crash
//! records.
//!
//! The store is a single SQLite file. Paths are saved relative to the directory holding it,
//! which lets the store move together with the crash inputs it references.
use rusqlite::{params, params_from_iter, Connection, ErrorCode, OptionalExtension, Row};
use serde::Serialize;
use std::collections::BTreeSet;
use std::env;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

use crate::report::{ExploitableReport, Report, ReportKind};
use crate::util::relative_path;

pub const CURRENT_SCHEMA_VERSION: i64 = 2;

/// Ordered migrations. Applying entry `i` moves a store from version `i` to `i + 1`
const MIGRATIONS: &[&str] = &[
    // 0 -> 1
    "CREATE TABLE metadata (
        id INTEGER PRIMARY KEY CHECK (id = 0),
        command TEXT,
        current_bucket INTEGER NOT NULL,
        collector TEXT,
        schema_version INTEGER NOT NULL
    );
    INSERT INTO metadata (id, command, current_bucket, collector, schema_version)
        VALUES (0, NULL, -1, NULL, 0);
    CREATE TABLE crashes (
        id INTEGER PRIMARY KEY,
        path TEXT NOT NULL UNIQUE,
        bucket INTEGER NOT NULL
    );
    CREATE INDEX crashes_bucket ON crashes (bucket);
    CREATE TABLE asan (
        crash_id INTEGER PRIMARY KEY REFERENCES crashes (id),
        asan_output TEXT NOT NULL
    );",
    // 1 -> 2
    "ALTER TABLE crashes ADD COLUMN discovered_at INTEGER NOT NULL DEFAULT 0;
    CREATE TABLE exploitable (
        crash_id INTEGER PRIMARY KEY REFERENCES crashes (id),
        signal_info TEXT,
        disassembly TEXT,
        stack_trace TEXT,
        faulting_frame TEXT,
        description TEXT,
        short_description TEXT,
        hash TEXT,
        exploitability TEXT,
        explanation TEXT,
        register_info TEXT
    );",
];

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Index {0} is invalid. Use atriage info to view available indexes.")]
    InvalidIndex(i64),
    #[error("Database is empty.")]
    EmptyStore,
    #[error("No crash store at {0}. Run atriage triage first.")]
    MissingStore(PathBuf),
    #[error("Corrupt crash store: {0}")]
    CorruptStore(String),
    #[error("No crash with id {0}")]
    UnknownCrash(i64),
    #[error("Path {0} is not valid UTF-8")]
    NonUtf8Path(PathBuf),
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct CrashRecord {
    pub id: i64,
    /// Absolute path of the crash input
    pub path: PathBuf,
    pub bucket: i64,
    /// Seconds since the epoch. Zero for crashes recorded before this was tracked
    pub discovered_at: i64,
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Fold `..` and `.` lexically. Only sound when the path has no symlinks above the `..`
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();

    for component in path.components() {
        match component {
            Component::CurDir => (),
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }

    out
}

fn is_corruption(e: &rusqlite::Error) -> bool {
    matches!(
        e.sqlite_error_code(),
        Some(ErrorCode::NotADatabase) | Some(ErrorCode::DatabaseCorrupt)
    )
}

pub struct CrashStore {
    conn: Connection,
    location: PathBuf,
    /// Canonical directory containing the store file. Stored paths are relative to it
    base_dir: PathBuf,
}

impl CrashStore {
    /// Open the store at `location`, creating and initializing it if it does not exist
    pub fn open<P: AsRef<Path>>(location: P) -> StoreResult<CrashStore> {
        let location = location.as_ref();

        let parent = match location.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let base_dir = parent.canonicalize()?;

        let conn = Connection::open(location)?;

        let mut store = CrashStore {
            conn,
            location: location.to_path_buf(),
            base_dir,
        };

        store.prepare().map_err(|e| match e {
            StoreError::Sqlite(ref inner) if is_corruption(inner) => {
                StoreError::CorruptStore(inner.to_string())
            }
            e => e,
        })?;

        Ok(store)
    }

    /// Like [CrashStore::open], but never creates a new store file
    pub fn open_existing<P: AsRef<Path>>(location: P) -> StoreResult<CrashStore> {
        let location = location.as_ref();

        if !location.is_file() {
            return Err(StoreError::MissingStore(location.to_path_buf()));
        }

        CrashStore::open(location)
    }

    pub fn location(&self) -> &Path {
        &self.location
    }

    fn table_names(&self) -> StoreResult<BTreeSet<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table'")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<BTreeSet<_>, _>>()?;
        Ok(names)
    }

    fn prepare(&mut self) -> StoreResult<()> {
        let tables = self.table_names()?;

        if tables.is_empty() {
            log::debug!("Initializing crash store {}", self.location.display());
            self.migrate(0)?;
            self.conn.execute_batch("PRAGMA foreign_keys = ON;")?;
            return Ok(());
        }

        if !tables.contains("metadata") || !tables.contains("crashes") {
            return Err(StoreError::CorruptStore(format!(
                "{} is not a crash store (tables: {})",
                self.location.display(),
                tables.into_iter().collect::<Vec<_>>().join(", ")
            )));
        }

        let version: i64 = self
            .conn
            .query_row("SELECT schema_version FROM metadata WHERE id = 0", [], |row| row.get(0))
            .optional()?
            .ok_or_else(|| StoreError::CorruptStore("missing metadata".into()))?;

        if version < 1 || version > CURRENT_SCHEMA_VERSION {
            return Err(StoreError::CorruptStore(format!(
                "unsupported schema version {} (this build understands up to {})",
                version, CURRENT_SCHEMA_VERSION
            )));
        }

        if version < CURRENT_SCHEMA_VERSION {
            log::info!(
                "Upgrading crash store from schema version {} to {}",
                version,
                CURRENT_SCHEMA_VERSION
            );
            self.migrate(version)?;
        }

        self.conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        Ok(())
    }

    fn migrate(&mut self, from: i64) -> StoreResult<()> {
        let tx = self.conn.transaction()?;

        for (version, sql) in MIGRATIONS.iter().enumerate().skip(from as usize) {
            tx.execute_batch(sql)?;
            tx.execute(
                "UPDATE metadata SET schema_version = ?1",
                params![version as i64 + 1],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    pub fn schema_version(&self) -> StoreResult<i64> {
        Ok(self
            .conn
            .query_row("SELECT schema_version FROM metadata", [], |row| row.get(0))?)
    }

    fn to_stored_path(&self, path: &Path) -> StoreResult<String> {
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            env::current_dir()?.join(path)
        };

        let relative = relative_path(&self.base_dir, &normalize(&absolute));

        relative
            .to_str()
            .map(str::to_string)
            .ok_or_else(|| StoreError::NonUtf8Path(path.to_path_buf()))
    }

    /// `join(dirname(store), relative)`
    pub fn resolve(&self, stored: &str) -> PathBuf {
        normalize(&self.base_dir.join(stored))
    }

    fn record_from_row(&self, row: &Row) -> rusqlite::Result<CrashRecord> {
        let path: String = row.get(1)?;

        Ok(CrashRecord {
            id: row.get(0)?,
            path: self.resolve(&path),
            bucket: row.get(2)?,
            discovered_at: row.get(3)?,
        })
    }

    fn query_crashes(&self, sql: &str, bucket: Option<i64>) -> StoreResult<Vec<CrashRecord>> {
        let mut stmt = self.conn.prepare(sql)?;

        let rows = stmt.query_map(params_from_iter(bucket), |row| self.record_from_row(row))?;

        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn current_bucket(&self) -> StoreResult<i64> {
        Ok(self
            .conn
            .query_row("SELECT current_bucket FROM metadata", [], |row| row.get(0))?)
    }

    /// Every crash in every bucket, in discovery order
    pub fn all_crashes(&self) -> StoreResult<Vec<CrashRecord>> {
        self.query_crashes(
            "SELECT id, path, bucket, discovered_at FROM crashes ORDER BY id",
            None,
        )
    }

    /// The crashes found by the most recent triage run that found any
    pub fn new_crashes(&self) -> StoreResult<Vec<CrashRecord>> {
        let current = self.current_bucket()?;

        if current < 0 {
            return Err(StoreError::EmptyStore);
        }

        self.bucket_records(current)
    }

    /// A historical bucket. `-1` selects the newest one
    pub fn get_bucket(&self, index: i64) -> StoreResult<Vec<CrashRecord>> {
        if index == -1 {
            return self.new_crashes();
        }

        if index < -1 || index > self.current_bucket()? {
            return Err(StoreError::InvalidIndex(index));
        }

        self.bucket_records(index)
    }

    fn bucket_records(&self, bucket: i64) -> StoreResult<Vec<CrashRecord>> {
        self.query_crashes(
            "SELECT id, path, bucket, discovered_at FROM crashes WHERE bucket = ?1 ORDER BY id",
            Some(bucket),
        )
    }

    pub fn find_crash(&self, path: &Path) -> StoreResult<Option<CrashRecord>> {
        let stored = self.to_stored_path(path)?;

        Ok(self
            .conn
            .query_row(
                "SELECT id, path, bucket, discovered_at FROM crashes WHERE path = ?1",
                params![stored],
                |row| self.record_from_row(row),
            )
            .optional()?)
    }

    /// Number of crashes in each bucket, oldest first
    pub fn bucket_sizes(&self) -> StoreResult<Vec<(i64, usize)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT bucket, COUNT(*) FROM crashes GROUP BY bucket ORDER BY bucket")?;

        let sizes = stmt
            .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)? as usize)))?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(sizes)
    }

    /// Record every path not already in the store as a new bucket.
    ///
    /// Returns how many crashes were added. When nothing is new no bucket is created.
    pub fn save_new<I, P>(&mut self, paths: I) -> StoreResult<usize>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let stored_paths = paths
            .into_iter()
            .map(|p| self.to_stored_path(p.as_ref()))
            .collect::<StoreResult<BTreeSet<String>>>()?;

        let tx = self.conn.transaction()?;

        let current: i64 = tx.query_row("SELECT current_bucket FROM metadata", [], |row| row.get(0))?;

        let mut new_paths = vec![];
        {
            let mut exists = tx.prepare("SELECT 1 FROM crashes WHERE path = ?1")?;

            for path in &stored_paths {
                if !exists.exists(params![path])? {
                    new_paths.push(path);
                }
            }
        }

        if new_paths.is_empty() {
            return Ok(0);
        }

        let bucket = current + 1;
        let now = unix_now();
        {
            let mut insert =
                tx.prepare("INSERT INTO crashes (path, bucket, discovered_at) VALUES (?1, ?2, ?3)")?;

            for path in &new_paths {
                insert.execute(params![path, bucket, now])?;
            }
        }

        tx.execute("UPDATE metadata SET current_bucket = ?1", params![bucket])?;
        tx.commit()?;

        log::debug!("Closed bucket {} with {} crashes", bucket, new_paths.len());

        Ok(new_paths.len())
    }

    pub fn get_command(&self) -> StoreResult<Option<String>> {
        Ok(self
            .conn
            .query_row("SELECT command FROM metadata", [], |row| row.get(0))?)
    }

    pub fn set_command(&self, command: &str) -> StoreResult<()> {
        self.conn
            .execute("UPDATE metadata SET command = ?1", params![command])?;
        Ok(())
    }

    pub fn get_collector(&self) -> StoreResult<Option<String>> {
        Ok(self
            .conn
            .query_row("SELECT collector FROM metadata", [], |row| row.get(0))?)
    }

    pub fn set_collector(&self, name: &str) -> StoreResult<()> {
        self.conn
            .execute("UPDATE metadata SET collector = ?1", params![name])?;
        Ok(())
    }

    fn crash_exists(&self, crash_id: i64) -> StoreResult<bool> {
        let mut stmt = self.conn.prepare("SELECT 1 FROM crashes WHERE id = ?1")?;
        Ok(stmt.exists(params![crash_id])?)
    }

    /// Store a report for a crash unless one of the same kind is already there.
    ///
    /// Returns whether the report was stored. The first report of a kind always wins.
    pub fn attach_report(&self, crash_id: i64, report: &Report) -> StoreResult<bool> {
        if !self.crash_exists(crash_id)? {
            return Err(StoreError::UnknownCrash(crash_id));
        }

        let inserted = match report {
            Report::Sanitizer { text } => self.conn.execute(
                "INSERT OR IGNORE INTO asan (crash_id, asan_output) VALUES (?1, ?2)",
                params![crash_id, text],
            )?,
            Report::Exploitable(r) => self.conn.execute(
                "INSERT OR IGNORE INTO exploitable (
                    crash_id, signal_info, disassembly, stack_trace, faulting_frame,
                    description, short_description, hash, exploitability, explanation,
                    register_info
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    crash_id,
                    r.signal_info,
                    r.disassembly,
                    r.stack_trace,
                    r.faulting_frame,
                    r.description,
                    r.short_description,
                    r.hash,
                    r.exploitability,
                    r.explanation,
                    r.register_info
                ],
            )?,
        };

        Ok(inserted == 1)
    }

    pub fn report(&self, crash_id: i64, kind: ReportKind) -> StoreResult<Option<Report>> {
        let report = match kind {
            ReportKind::Sanitizer => self
                .conn
                .query_row(
                    "SELECT asan_output FROM asan WHERE crash_id = ?1",
                    params![crash_id],
                    |row| Ok(Report::Sanitizer { text: row.get(0)? }),
                )
                .optional()?,
            ReportKind::Exploitable => self
                .conn
                .query_row(
                    "SELECT signal_info, disassembly, stack_trace, faulting_frame, description,
                        short_description, hash, exploitability, explanation, register_info
                    FROM exploitable WHERE crash_id = ?1",
                    params![crash_id],
                    |row| {
                        Ok(Report::Exploitable(ExploitableReport {
                            signal_info: row.get(0)?,
                            disassembly: row.get(1)?,
                            stack_trace: row.get(2)?,
                            faulting_frame: row.get(3)?,
                            description: row.get(4)?,
                            short_description: row.get(5)?,
                            hash: row.get(6)?,
                            exploitability: row.get(7)?,
                            explanation: row.get(8)?,
                            register_info: row.get(9)?,
                        }))
                    },
                )
                .optional()?,
        };

        Ok(report)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::fs;

    struct Fixture {
        dir: tempfile::TempDir,
        store: CrashStore,
    }

    impl Fixture {
        fn new() -> Fixture {
            let dir = tempfile::tempdir().unwrap();
            let store = CrashStore::open(dir.path().join("atriage.db")).unwrap();
            Fixture { dir, store }
        }

        fn path(&self, name: &str) -> PathBuf {
            self.dir.path().canonicalize().unwrap().join("out/crashes").join(name)
        }

        fn paths(&self, names: &[&str]) -> BTreeSet<PathBuf> {
            names.iter().map(|n| self.path(n)).collect()
        }
    }

    fn path_set(records: &[CrashRecord]) -> BTreeSet<PathBuf> {
        records.iter().map(|r| r.path.clone()).collect()
    }

    #[test]
    fn test_fresh_store() {
        let f = Fixture::new();

        assert_eq!(f.store.current_bucket().unwrap(), -1);
        assert_eq!(f.store.get_command().unwrap(), None);
        assert_eq!(f.store.get_collector().unwrap(), None);
        assert_eq!(f.store.schema_version().unwrap(), CURRENT_SCHEMA_VERSION);
        assert!(f.store.all_crashes().unwrap().is_empty());
        assert!(matches!(f.store.new_crashes(), Err(StoreError::EmptyStore)));
        assert!(matches!(f.store.get_bucket(-1), Err(StoreError::EmptyStore)));
        assert!(matches!(f.store.get_bucket(0), Err(StoreError::InvalidIndex(0))));
    }

    #[test]
    fn test_open_existing() {
        let dir = tempfile::tempdir().unwrap();
        let location = dir.path().join("atriage.db");

        match CrashStore::open_existing(&location) {
            Err(StoreError::MissingStore(p)) => assert_eq!(p, location),
            other => panic!("unexpected {:?}", other.map(|s| s.location().to_path_buf())),
        }
        assert!(!location.exists());

        let mut store = CrashStore::open(&location).unwrap();
        store.save_new(vec![dir.path().join("crash0")]).unwrap();
        drop(store);

        let store = CrashStore::open_existing(&location).unwrap();
        assert_eq!(store.all_crashes().unwrap().len(), 1);
    }

    #[test]
    fn test_bucket_history() {
        let mut f = Fixture::new();

        assert_eq!(f.store.save_new(f.paths(&["a", "b"])).unwrap(), 2);
        assert_eq!(f.store.save_new(f.paths(&["a", "b", "c"])).unwrap(), 1);
        assert_eq!(f.store.save_new(f.paths(&["a", "b", "c"])).unwrap(), 0);

        assert_eq!(f.store.current_bucket().unwrap(), 1);
        assert_eq!(path_set(&f.store.get_bucket(0).unwrap()), f.paths(&["a", "b"]));
        assert_eq!(path_set(&f.store.get_bucket(1).unwrap()), f.paths(&["c"]));
        assert_eq!(path_set(&f.store.new_crashes().unwrap()), f.paths(&["c"]));
        assert_eq!(f.store.get_bucket(-1).unwrap(), f.store.new_crashes().unwrap());
        assert_eq!(f.store.bucket_sizes().unwrap(), vec![(0, 2), (1, 1)]);

        assert!(matches!(f.store.get_bucket(2), Err(StoreError::InvalidIndex(2))));
        assert!(matches!(f.store.get_bucket(-2), Err(StoreError::InvalidIndex(-2))));
    }

    #[test]
    fn test_incremental_discovery_converges() {
        let d1 = ["id:000000", "id:000001"];
        let d2 = ["id:000000", "id:000001", "id:000002", "id:000003"];

        let mut incremental = Fixture::new();
        incremental.store.save_new(incremental.paths(&d1)).unwrap();
        incremental.store.save_new(incremental.paths(&d2)).unwrap();

        let mut direct = Fixture::new();
        direct.store.save_new(direct.paths(&d2)).unwrap();

        let all = incremental.store.all_crashes().unwrap();
        assert_eq!(path_set(&all), incremental.paths(&d2));
        assert_eq!(
            path_set(&incremental.store.new_crashes().unwrap()),
            incremental.paths(&["id:000002", "id:000003"])
        );
        assert_eq!(direct.store.all_crashes().unwrap().len(), all.len());

        // buckets partition the store
        let mut union = vec![];
        for i in 0..=incremental.store.current_bucket().unwrap() {
            union.extend(incremental.store.get_bucket(i).unwrap());
        }
        union.sort();
        let mut all_sorted = all.clone();
        all_sorted.sort();
        assert_eq!(union, all_sorted);
    }

    #[test]
    fn test_path_uniqueness() {
        let mut f = Fixture::new();
        let a = f.path("a");

        f.store.save_new(vec![a.clone()]).unwrap();
        // same file spelled differently
        let dotted = a.parent().unwrap().join(".").join("a");
        assert_eq!(f.store.save_new(vec![dotted]).unwrap(), 0);

        assert_eq!(f.store.all_crashes().unwrap().len(), 1);
        assert_eq!(f.store.current_bucket().unwrap(), 0);
        assert_eq!(f.store.find_crash(&a).unwrap().unwrap().bucket, 0);
        assert_eq!(f.store.find_crash(&f.path("zzz")).unwrap(), None);
    }

    #[test]
    fn test_store_relocation() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let old = root.join("old");
        fs::create_dir_all(&old).unwrap();

        {
            let mut store = CrashStore::open(old.join("atriage.db")).unwrap();
            store.save_new(vec![old.join("out/crashes/id:000000")]).unwrap();
            store.set_command("./harness @@").unwrap();
        }

        let new = root.join("new");
        fs::rename(&old, &new).unwrap();

        let store = CrashStore::open(new.join("atriage.db")).unwrap();
        let crashes = store.all_crashes().unwrap();
        assert_eq!(crashes[0].path, new.join("out/crashes/id:000000"));
        assert_eq!(store.get_command().unwrap().as_deref(), Some("./harness @@"));
    }

    #[test]
    fn test_paths_outside_store_dir() {
        let f = Fixture::new();
        let outside = tempfile::tempdir().unwrap();
        let crash = outside.path().canonicalize().unwrap().join("crash");

        let mut store = f.store;
        store.save_new(vec![crash.clone()]).unwrap();
        assert_eq!(store.all_crashes().unwrap()[0].path, crash);
    }

    #[test]
    fn test_metadata() {
        let f = Fixture::new();

        f.store.set_command("./harness -f @@").unwrap();
        f.store.set_collector("afl-collector").unwrap();
        f.store.set_command("./harness -g @@").unwrap();

        assert_eq!(f.store.get_command().unwrap().as_deref(), Some("./harness -g @@"));
        assert_eq!(f.store.get_collector().unwrap().as_deref(), Some("afl-collector"));
    }

    #[test]
    fn test_attach_report_first_wins() {
        let mut f = Fixture::new();
        f.store.save_new(f.paths(&["a"])).unwrap();
        let id = f.store.all_crashes().unwrap()[0].id;

        let first = Report::Sanitizer { text: "first".into() };
        let second = Report::Sanitizer { text: "second".into() };

        assert!(f.store.attach_report(id, &first).unwrap());
        assert!(!f.store.attach_report(id, &second).unwrap());
        assert_eq!(f.store.report(id, ReportKind::Sanitizer).unwrap(), Some(first));

        let exploitable = Report::Exploitable(ExploitableReport {
            exploitability: Some("EXPLOITABLE".into()),
            hash: Some("abc.def".into()),
            ..Default::default()
        });
        assert_eq!(f.store.report(id, ReportKind::Exploitable).unwrap(), None);
        assert!(f.store.attach_report(id, &exploitable).unwrap());
        assert_eq!(
            f.store.report(id, ReportKind::Exploitable).unwrap(),
            Some(exploitable)
        );

        assert!(matches!(
            f.store.attach_report(id + 100, &second),
            Err(StoreError::UnknownCrash(_))
        ));
    }

    #[test]
    fn test_corrupt_store() {
        let dir = tempfile::tempdir().unwrap();

        let garbage = dir.path().join("garbage.db");
        fs::write(&garbage, vec![b'A'; 4096]).unwrap();
        assert!(matches!(CrashStore::open(&garbage), Err(StoreError::CorruptStore(_))));

        let foreign = dir.path().join("foreign.db");
        Connection::open(&foreign)
            .unwrap()
            .execute_batch("CREATE TABLE events (id INTEGER PRIMARY KEY);")
            .unwrap();
        assert!(matches!(CrashStore::open(&foreign), Err(StoreError::CorruptStore(_))));

        let no_meta = dir.path().join("no_meta.db");
        drop(CrashStore::open(&no_meta).unwrap());
        Connection::open(&no_meta)
            .unwrap()
            .execute_batch("DELETE FROM metadata;")
            .unwrap();
        assert!(matches!(CrashStore::open(&no_meta), Err(StoreError::CorruptStore(_))));

        let future = dir.path().join("future.db");
        drop(CrashStore::open(&future).unwrap());
        Connection::open(&future)
            .unwrap()
            .execute_batch("UPDATE metadata SET schema_version = 99;")
            .unwrap();
        assert!(matches!(CrashStore::open(&future), Err(StoreError::CorruptStore(_))));
    }

    #[test]
    fn test_upgrade_from_v1() {
        let dir = tempfile::tempdir().unwrap();
        let location = dir.path().join("atriage.db");

        {
            let conn = Connection::open(&location).unwrap();
            conn.execute_batch(MIGRATIONS[0]).unwrap();
            conn.execute_batch(
                "UPDATE metadata SET schema_version = 1, current_bucket = 0, command = './t @@';
                INSERT INTO crashes (path, bucket) VALUES ('out/crashes/id:000000', 0);
                INSERT INTO asan (crash_id, asan_output) VALUES (1, 'old report');",
            )
            .unwrap();
        }

        let mut store = CrashStore::open(&location).unwrap();
        assert_eq!(store.schema_version().unwrap(), CURRENT_SCHEMA_VERSION);

        let crashes = store.all_crashes().unwrap();
        assert_eq!(crashes.len(), 1);
        assert_eq!(crashes[0].discovered_at, 0);
        assert_eq!(
            store.report(crashes[0].id, ReportKind::Sanitizer).unwrap(),
            Some(Report::Sanitizer { text: "old report".into() })
        );

        store.save_new(vec![dir.path().join("out/crashes/id:000001")]).unwrap();
        assert_eq!(store.current_bucket().unwrap(), 1);
        assert!(store.new_crashes().unwrap()[0].discovered_at > 0);

        let exploitable = Report::Exploitable(ExploitableReport::default());
        assert!(store.attach_report(crashes[0].id, &exploitable).unwrap());
    }
}
