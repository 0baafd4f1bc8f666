//! Offset ledger: how many items of each stream are already stored.
//!
//! One plain-integer text file per stream under `offsets/`. A missing file
//! reads as 0. Values never go down.

use crate::error::{ExpertsError, Result};
use crate::experts::StreamKind;
use crate::store::write_atomic;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// File-backed offset ledger
#[derive(Debug, Clone)]
pub struct OffsetLedger {
    dir: PathBuf,
}

impl OffsetLedger {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the offset file for a stream
    pub fn path(&self, stream: StreamKind) -> PathBuf {
        self.dir.join(format!("{}.txt", stream.name()))
    }

    /// Read the persisted offset, 0 if none was ever written.
    pub fn read(&self, stream: StreamKind) -> Result<u64> {
        let path = self.path(stream);
        if !path.exists() {
            debug!(stream = stream.name(), "No offset file, starting at 0");
            return Ok(0);
        }

        let content = std::fs::read_to_string(&path)?;
        let trimmed = content.trim();
        if trimmed.is_empty() {
            return Ok(0);
        }
        trimmed.parse::<u64>().map_err(|e| {
            ExpertsError::Parse(format!("Offset file {} is not an integer: {}", path.display(), e))
        })
    }

    /// Persist a new offset.
    ///
    /// A value lower than the stored one is ignored and the stored value is
    /// returned, so the ledger stays monotonic.
    pub fn write(&self, stream: StreamKind, value: u64) -> Result<u64> {
        let current = self.read(stream)?;
        if value < current {
            warn!(
                stream = stream.name(),
                current = current,
                requested = value,
                "Refusing to move offset backwards"
            );
            return Ok(current);
        }
        if value == current && self.path(stream).exists() {
            return Ok(current);
        }

        std::fs::create_dir_all(&self.dir)?;
        write_atomic(&self.path(stream), value.to_string().as_bytes())?;
        info!(stream = stream.name(), offset = value, "Offset saved");
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_reads_zero() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let ledger = OffsetLedger::new(dir.path().join("offsets"));
        assert_eq!(ledger.read(StreamKind::Persons)?, 0);
        Ok(())
    }

    #[test]
    fn test_write_then_read_per_stream() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let ledger = OffsetLedger::new(dir.path().join("offsets"));

        ledger.write(StreamKind::Persons, 250)?;
        ledger.write(StreamKind::ResearchOutputs, 1200)?;

        assert_eq!(ledger.read(StreamKind::Persons)?, 250);
        assert_eq!(ledger.read(StreamKind::ResearchOutputs)?, 1200);
        assert_eq!(ledger.read(StreamKind::OrganisationalUnits)?, 0);
        assert_eq!(std::fs::read_to_string(ledger.path(StreamKind::Persons))?, "250");
        Ok(())
    }

    #[test]
    fn test_never_decreases() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let ledger = OffsetLedger::new(dir.path());

        ledger.write(StreamKind::Persons, 40)?;
        assert_eq!(ledger.write(StreamKind::Persons, 10)?, 40);
        assert_eq!(ledger.read(StreamKind::Persons)?, 40);
        Ok(())
    }

    #[test]
    fn test_rejects_garbage() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let ledger = OffsetLedger::new(dir.path());
        std::fs::write(ledger.path(StreamKind::Persons), "twelve")?;
        assert!(matches!(ledger.read(StreamKind::Persons), Err(ExpertsError::Parse(_))));

        std::fs::write(ledger.path(StreamKind::Persons), " 12\n")?;
        assert_eq!(ledger.read(StreamKind::Persons)?, 12);
        Ok(())
    }
}
