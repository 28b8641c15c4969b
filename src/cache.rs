//! On-disk parquet cache of cleansed history.

use crate::dataset::error::DatasetError;
use crate::dataset::historical::HistoricalDataset;
use crate::types::location::Location;
use crate::types::prediction::Granularity;
use crate::utils::{ensure_cache_dir_exists, get_cache_dir};
use chrono::NaiveDate;
use log::{info, warn};
use polars::prelude::*;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;
use tokio::{fs, task};

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Failed to determine cache directory")]
    CacheDirResolution(#[source] std::io::Error),

    #[error("Failed to create cache directory '{0}'")]
    CacheDirCreation(PathBuf, #[source] std::io::Error),

    #[error("I/O error writing parquet cache file '{0}'")]
    ParquetWriteIo(PathBuf, #[source] std::io::Error),

    #[error("Encoding error writing parquet cache file '{0}'")]
    ParquetWritePolars(PathBuf, #[source] PolarsError),

    #[error("Failed to scan parquet cache file '{0}'")]
    ParquetScan(PathBuf, #[source] PolarsError),

    #[error(transparent)]
    Dataset(#[from] DatasetError),

    #[error("Background task failed to complete")]
    TaskJoin(#[from] tokio::task::JoinError),
}

/// Parquet files of daily history, one per (location, window end, years back).
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryCache {
    dir: PathBuf,
}

impl HistoryCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Cache under the platform cache directory.
    pub fn in_default_dir() -> Result<Self, CacheError> {
        get_cache_dir()
            .map(Self::new)
            .map_err(CacheError::CacheDirResolution)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, location: Location, end: NaiveDate, years_back: u32) -> PathBuf {
        self.dir.join(format!(
            "history_{:.3}_{:.3}_{}_{}y.parquet",
            location.latitude(),
            location.longitude(),
            end.format("%Y%m%d"),
            years_back
        ))
    }

    /// Returns the cached dataset, or `None` on a miss.
    pub async fn load(
        &self,
        location: Location,
        end: NaiveDate,
        years_back: u32,
    ) -> Result<Option<HistoricalDataset>, CacheError> {
        let path = self.path_for(location, end, years_back);
        if fs::metadata(&path).await.is_err() {
            info!("History cache miss for {} at {:?}", location, path);
            return Ok(None);
        }
        info!("History cache hit for {} at {:?}", location, path);

        let dataset = task::spawn_blocking(move || {
            let frame = LazyFrame::scan_parquet(&path, Default::default())
                .and_then(|lf| lf.collect())
                .map_err(|e| CacheError::ParquetScan(path.clone(), e))?;
            Ok::<_, CacheError>(HistoricalDataset::from_frame(
                location,
                Granularity::Daily,
                &frame,
            )?)
        })
        .await??;
        Ok(Some(dataset))
    }

    /// Writes `dataset` atomically: a temp file in the cache directory, then a rename.
    pub async fn store(
        &self,
        dataset: &HistoricalDataset,
        end: NaiveDate,
        years_back: u32,
    ) -> Result<(), CacheError> {
        ensure_cache_dir_exists(&self.dir)
            .await
            .map_err(|e| CacheError::CacheDirCreation(self.dir.clone(), e))?;

        let mut frame = dataset.to_frame()?;
        let path = self.path_for(dataset.location(), end, years_back);
        let dir = self.dir.clone();
        task::spawn_blocking(move || {
            let mut temp = NamedTempFile::new_in(&dir)
                .map_err(|e| CacheError::ParquetWriteIo(path.clone(), e))?;
            ParquetWriter::new(temp.as_file_mut())
                .with_compression(ParquetCompression::Snappy)
                .finish(&mut frame)
                .map_err(|e| CacheError::ParquetWritePolars(path.clone(), e))?;
            temp.persist(&path)
                .map_err(|e| CacheError::ParquetWriteIo(path.clone(), e.error))?;
            info!("Cached {} history rows to {:?}", frame.height(), path);
            Ok::<(), CacheError>(())
        })
        .await??;
        Ok(())
    }

    /// Removes one cached window. Missing files are not an error.
    pub async fn invalidate(
        &self,
        location: Location,
        end: NaiveDate,
        years_back: u32,
    ) -> Result<(), CacheError> {
        let path = self.path_for(location, end, years_back);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                warn!("Failed to delete cache file {:?}: {}", path, e);
                Err(CacheError::ParquetWriteIo(path, e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::observation_source::RawObservations;
    use crate::synthetic::SyntheticClimatology;

    fn dataset(location: Location) -> Result<HistoricalDataset, DatasetError> {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2024, 3, 31).unwrap();
        let rows = SyntheticClimatology::new(location).history(start, end);
        HistoricalDataset::from_observations(
            location,
            Granularity::Daily,
            &[RawObservations {
                meta: Default::default(),
                rows,
            }],
        )
    }

    #[tokio::test]
    async fn test_store_then_load_round_trip() -> Result<(), Box<dyn std::error::Error>> {
        let tmp = tempfile::tempdir()?;
        let cache = HistoryCache::new(tmp.path().join("nested"));
        let location = Location::new(-7.12, -34.88)?;
        let end = NaiveDate::from_ymd_opt(2024, 3, 31).unwrap();

        assert!(cache.load(location, end, 1).await?.is_none());

        let original = dataset(location)?;
        cache.store(&original, end, 1).await?;
        assert!(cache.path_for(location, end, 1).exists());

        let restored = cache.load(location, end, 1).await?.expect("cache hit");
        assert_eq!(restored, original);

        // Different window is a different entry.
        assert!(cache.load(location, end, 2).await?.is_none());

        cache.invalidate(location, end, 1).await?;
        assert!(cache.load(location, end, 1).await?.is_none());
        cache.invalidate(location, end, 1).await?;
        Ok(())
    }

    #[test]
    fn test_path_uses_rounded_location() {
        let cache = HistoryCache::new("/tmp/x");
        let path = cache.path_for(
            Location::new(-7.1234, -34.88).unwrap(),
            NaiveDate::from_ymd_opt(2025, 10, 3).unwrap(),
            6,
        );
        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            "history_-7.123_-34.880_20251003_6y.parquet"
        );
    }
}
