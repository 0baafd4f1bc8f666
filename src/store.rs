//! Durable CSV tables.
//!
//! Every write replaces the whole file through a temp file in the same
//! directory followed by a rename, so a reader sees either the old table
//! or the new one.
//!
//! There is no cross-process coordination beyond [`RunLock`]: the pipeline
//! assumes a single writer per data directory.

use crate::error::{ExpertsError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Result of merging a batch into a keyed table
#[derive(Debug, Clone)]
pub struct UpsertOutcome<T> {
    /// Full table after the merge, existing rows first
    pub table: Vec<T>,
    /// Incoming rows whose key was not present before
    pub inserted: Vec<T>,
}

/// Replace `path` with `bytes` via temp file + rename.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&parent)?;

    let mut tmp = tempfile::NamedTempFile::new_in(&parent)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)?;
    Ok(())
}

/// Load every row of a table. A missing file is an empty table.
pub fn load_rows<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let mut rdr = csv::ReaderBuilder::new().has_headers(true).from_path(path)?;
    let rows = rdr.deserialize().collect::<std::result::Result<Vec<T>, _>>()?;
    debug!(path = %path.display(), rows = rows.len(), "Loaded table");
    Ok(rows)
}

/// Count data rows without deserializing them.
pub fn count_rows(path: &Path) -> Result<usize> {
    if !path.exists() {
        return Ok(0);
    }
    let mut rdr = csv::ReaderBuilder::new().has_headers(true).from_path(path)?;
    let mut count = 0;
    for record in rdr.records() {
        record?;
        count += 1;
    }
    Ok(count)
}

/// Serialize rows and atomically replace the table.
///
/// An empty slice is never written: it would wipe the table.
pub fn write_rows<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    if rows.is_empty() {
        warn!(path = %path.display(), "Refusing to write empty table");
        return Ok(());
    }

    let mut wtr = csv::WriterBuilder::new()
        .has_headers(true)
        .from_writer(Vec::new());
    for row in rows {
        wtr.serialize(row)?;
    }
    let bytes = wtr
        .into_inner()
        .map_err(|e| ExpertsError::Io(e.into_error()))?;

    write_atomic(path, &bytes)?;
    info!(path = %path.display(), rows = rows.len(), "Saved table");
    Ok(())
}

/// Merge a batch into a keyed table, keeping the first row per key.
///
/// Existing rows come first, so a stored row always wins over a fetched
/// row with the same key; upstream edits to stored keys are not picked up.
/// Duplicate keys inside the batch also collapse to the first one. The
/// file is only rewritten when at least one row was inserted.
pub fn upsert_batch<T, F>(path: &Path, new_records: Vec<T>, key: F) -> Result<UpsertOutcome<T>>
where
    T: Serialize + DeserializeOwned + Clone,
    F: Fn(&T) -> String,
{
    let existing: Vec<T> = load_rows(path)?;
    let mut seen: HashSet<String> = existing.iter().map(&key).collect();

    let incoming = new_records.len();
    let inserted: Vec<T> = new_records
        .into_iter()
        .filter(|row| seen.insert(key(row)))
        .collect();

    info!(
        path = %path.display(),
        existing = existing.len(),
        incoming = incoming,
        inserted = inserted.len(),
        "Upserted batch"
    );

    let mut table = existing;
    table.extend(inserted.iter().cloned());

    if !inserted.is_empty() {
        write_rows(path, &table)?;
    }

    Ok(UpsertOutcome { table, inserted })
}

/// Append rows to an unkeyed table, creating it when absent.
///
/// Returns the table size after the append.
pub fn append_rows<T>(path: &Path, rows: &[T]) -> Result<usize>
where
    T: Serialize + DeserializeOwned + Clone,
{
    let mut table: Vec<T> = load_rows(path)?;
    if rows.is_empty() {
        return Ok(table.len());
    }
    table.extend_from_slice(rows);
    write_rows(path, &table)?;
    Ok(table.len())
}

/// Exclusive lock on a data directory, released on drop.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    pub fn acquire(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                writeln!(file, "{}", std::process::id())?;
                debug!(path = %path.display(), "Acquired run lock");
                Ok(Self { path })
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(ExpertsError::Locked(path))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "Failed to release run lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Row {
        key: String,
        name: String,
    }

    fn row(key: &str, name: &str) -> Row {
        Row {
            key: key.to_string(),
            name: name.to_string(),
        }
    }

    fn by_key(r: &Row) -> String {
        r.key.clone()
    }

    #[test]
    fn test_upsert_creates_table() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("people.csv");

        let outcome = upsert_batch(&path, vec![row("a", "A"), row("b", "B")], by_key)?;
        assert_eq!(outcome.inserted.len(), 2);
        assert_eq!(load_rows::<Row>(&path)?, vec![row("a", "A"), row("b", "B")]);
        Ok(())
    }

    #[test]
    fn test_existing_row_wins() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("people.csv");

        upsert_batch(&path, vec![row("x@example.com", "Alice")], by_key)?;
        let outcome = upsert_batch(
            &path,
            vec![row("x@example.com", "Alicia"), row("y@example.com", "Bob")],
            by_key,
        )?;

        assert_eq!(outcome.inserted, vec![row("y@example.com", "Bob")]);
        assert_eq!(
            load_rows::<Row>(&path)?,
            vec![row("x@example.com", "Alice"), row("y@example.com", "Bob")]
        );
        Ok(())
    }

    #[test]
    fn test_duplicates_within_batch_collapse() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("t.csv");

        let outcome = upsert_batch(&path, vec![row("k", "first"), row("k", "second")], by_key)?;
        assert_eq!(outcome.table, vec![row("k", "first")]);
        Ok(())
    }

    #[test]
    fn test_no_insert_leaves_file_untouched() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("t.csv");

        upsert_batch(&path, vec![row("k", "v")], by_key)?;
        let before = std::fs::read(&path)?;
        let modified = std::fs::metadata(&path)?.modified()?;

        let outcome = upsert_batch(&path, vec![row("k", "changed")], by_key)?;
        assert!(outcome.inserted.is_empty());
        assert_eq!(std::fs::read(&path)?, before);
        assert_eq!(std::fs::metadata(&path)?.modified()?, modified);

        let outcome = upsert_batch::<Row, _>(&path, Vec::new(), by_key)?;
        assert_eq!(outcome.table.len(), 1);
        assert_eq!(std::fs::read(&path)?, before);
        Ok(())
    }

    #[test]
    fn test_empty_batch_on_missing_table_creates_nothing() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("t.csv");
        upsert_batch::<Row, _>(&path, Vec::new(), by_key)?;
        assert!(!path.exists());
        Ok(())
    }

    #[test]
    fn test_append_keeps_duplicates() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("merged.csv");

        assert_eq!(append_rows(&path, &[row("a", "1")])?, 1);
        assert_eq!(append_rows(&path, &[row("a", "1"), row("b", "2")])?, 3);
        assert_eq!(append_rows::<Row>(&path, &[])?, 3);
        assert_eq!(count_rows(&path)?, 3);
        Ok(())
    }

    #[test]
    fn test_write_atomic_leaves_no_temp_files() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("t.csv");
        write_rows(&path, &[row("a", "1")])?;
        write_rows(&path, &[row("b", "2")])?;

        let entries: Vec<_> = std::fs::read_dir(dir.path())?.collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(load_rows::<Row>(&path)?, vec![row("b", "2")]);
        Ok(())
    }

    #[test]
    fn test_run_lock_is_exclusive() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join(".pipeline.lock");

        let lock = RunLock::acquire(&path)?;
        assert!(matches!(RunLock::acquire(&path), Err(ExpertsError::Locked(_))));
        drop(lock);

        assert!(!path.exists());
        let _again = RunLock::acquire(&path)?;
        Ok(())
    }
}
