use crate::{
    metric::Measurement,
    storage::{Storage, StorageError},
};
use log::{debug, info};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WriteError {
    #[error("storage readiness check failed")]
    NotReady(#[source] StorageError),
    #[error("error writing points")]
    Write(#[source] StorageError),
}

/// Turns measurements into points and writes them, one batch per
/// measurement.
pub struct MetricsWriter<S> {
    storage: S,
}

impl<S: Storage> MetricsWriter<S> {
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Checks that storage is reachable, so no measurement is taken that
    /// could not be written.
    pub fn ready(&self) -> Result<(), WriteError> {
        self.storage.ready().map_err(WriteError::NotReady)
    }

    /// Writes every point derived from `measurement` and returns how many
    /// were written. Nothing is written unless the readiness check passes.
    pub fn write(&self, measurement: &Measurement) -> Result<usize, WriteError> {
        self.ready()?;

        let points = measurement.points();
        if points.is_empty() {
            debug!("measurement at {} has no points", measurement.timestamp);
            return Ok(0);
        }

        info!(
            "writing {} points for measurement at {}",
            points.len(),
            measurement.timestamp
        );
        self.storage.write(&points).map_err(WriteError::Write)?;
        Ok(points.len())
    }
}

#[cfg(test)]
pub mod tests {
    use super::{MetricsWriter, WriteError};
    use crate::{metric::tests::sample_measurement, storage::fake::FakeStorage};
    use serde_json::Map;

    #[test]
    fn test_write_sample() {
        let writer = MetricsWriter::new(FakeStorage::default());
        let measurement = sample_measurement();

        assert_eq!(writer.write(&measurement).unwrap(), 6);

        let storage = writer.storage();
        assert_eq!(storage.ready_checks.get(), 1);
        assert_eq!(storage.batches.borrow().len(), 1);
        assert!(storage
            .points()
            .iter()
            .all(|p| p.timestamp == measurement.timestamp));
    }

    #[test]
    fn test_not_ready_writes_nothing() {
        let storage = FakeStorage::default();
        storage.down.set(true);
        let writer = MetricsWriter::new(storage);

        let err = writer.write(&sample_measurement()).unwrap_err();
        assert!(matches!(err, WriteError::NotReady(_)));
        assert!(writer.storage().points().is_empty());
    }

    #[test]
    fn test_ready() {
        let writer = MetricsWriter::new(FakeStorage::scripted(&[true, false]));
        assert!(writer.ready().is_ok());
        assert!(matches!(writer.ready(), Err(WriteError::NotReady(_))));
        assert_eq!(writer.storage().ready_checks.get(), 2);
    }

    #[test]
    fn test_rejected_write() {
        let storage = FakeStorage::default();
        storage.reject_writes.set(true);
        let writer = MetricsWriter::new(storage);

        let err = writer.write(&sample_measurement()).unwrap_err();
        assert!(matches!(err, WriteError::Write(_)));
    }

    #[test]
    fn test_empty_measurement_skips_write() {
        let mut measurement = sample_measurement();
        measurement.ping = Map::new();
        measurement.download = Map::new();
        measurement.upload = Map::new();
        measurement.server = Map::new();

        let writer = MetricsWriter::new(FakeStorage::default());
        assert_eq!(writer.write(&measurement).unwrap(), 0);
        assert_eq!(writer.storage().ready_checks.get(), 1);
        assert!(writer.storage().batches.borrow().is_empty());
    }
}
