//! Shared tile cache.
//!
//! Decoded tile payloads are cached by `(index, z, x, y)` in a bounded
//! [`moka`] cache. Concurrent requests for the same key share one fetch,
//! and a failed fetch inserts nothing, so the next caller retries.

use std::io::Read as _;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use flate2::read::{GzDecoder, ZlibDecoder};
use moka::future::Cache;

use crate::error::SourceError;
use crate::source::TileSource;

/// `(index ordinal, z, x, y)`.
pub type TileKey = (usize, u8, u32, u32);

/// A decoded tile, `None` when the source has no tile there.
pub type CachedTile = Option<Arc<Vec<u8>>>;

/// Bounded cache of decoded tiles with request coalescing.
#[derive(Debug)]
pub struct TileCache {
    tiles: Cache<TileKey, CachedTile>,
    fetches: AtomicUsize,
}

impl TileCache {
    /// A cache holding at most `capacity` tiles.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            tiles: Cache::builder()
                .max_capacity(u64::try_from(capacity.max(1)).unwrap_or(u64::MAX))
                .build(),
            fetches: AtomicUsize::new(0),
        }
    }

    /// The decoded tile for `key`, fetching it from `source` on a miss.
    ///
    /// # Errors
    ///
    /// Returns the fetch error, or [`SourceError::Decode`] if the payload
    /// is compressed and does not inflate. Callers waiting on the same
    /// fetch all see its error. Errors are not cached.
    pub async fn get_or_fetch(
        &self,
        key: TileKey,
        source: &dyn TileSource,
    ) -> Result<CachedTile, SourceError> {
        let (idx, z, x, y) = key;
        self.tiles
            .try_get_with(key, async {
                self.fetches.fetch_add(1, Ordering::Relaxed);
                log::trace!("Fetching tile {z}/{x}/{y} of index {idx}");
                let raw = source.get_tile(z, x, y).await?;
                let tile = raw.map(|bytes| decompress(&bytes).map(Arc::new)).transpose()?;
                Ok::<_, SourceError>(tile)
            })
            .await
            .map_err(SourceError::Shared)
    }

    /// Drops every cached tile.
    pub async fn reset(&self) {
        self.tiles.invalidate_all();
        self.tiles.run_pending_tasks().await;
    }

    /// Number of cached tiles, after pending evictions are applied.
    pub async fn len(&self) -> u64 {
        self.tiles.run_pending_tasks().await;
        self.tiles.entry_count()
    }

    /// Whether nothing is cached.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Number of fetches issued to sources since creation.
    #[must_use]
    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::Relaxed)
    }
}

/// Inflates zlib (`78 9c`) or gzip (`1f 8b`) payloads. Anything else is
/// returned as is.
///
/// # Errors
///
/// Returns [`SourceError::Decode`] if a compressed payload is corrupt.
pub fn decompress(bytes: &[u8]) -> Result<Vec<u8>, SourceError> {
    let mut out = Vec::new();
    let inflated = match bytes {
        [0x78, 0x9c, ..] => ZlibDecoder::new(bytes).read_to_end(&mut out),
        [0x1f, 0x8b, ..] => GzDecoder::new(bytes).read_to_end(&mut out),
        _ => return Ok(bytes.to_vec()),
    };
    inflated.map_err(|e| SourceError::Decode {
        message: format!("Could not decompress tile: {e}"),
    })?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use async_trait::async_trait;
    use flate2::Compression;
    use flate2::write::{GzEncoder, ZlibEncoder};

    use super::*;

    #[derive(Default)]
    struct CountingSource {
        calls: AtomicUsize,
        fail_first: bool,
    }

    #[async_trait]
    impl TileSource for CountingSource {
        async fn get_tile(&self, z: u8, x: u32, y: u32) -> Result<Option<Vec<u8>>, SourceError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            if self.fail_first && call == 0 {
                return Err(SourceError::Other("unavailable".into()));
            }
            if x == 99 {
                return Ok(None);
            }
            Ok(Some(format!("{z}/{x}/{y}").into_bytes()))
        }
    }

    #[tokio::test]
    async fn concurrent_requests_share_one_fetch() {
        let cache = TileCache::new(16);
        let source = CountingSource::default();
        let requests = (0..8).map(|_| cache.get_or_fetch((0, 6, 1, 2), &source));
        let tiles = futures::future::try_join_all(requests).await.unwrap();

        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.fetches(), 1);
        for tile in tiles {
            assert_eq!(tile.unwrap().as_slice(), b"6/1/2");
        }
    }

    #[tokio::test]
    async fn distinct_indexes_do_not_share_tiles() {
        let cache = TileCache::new(16);
        let source = CountingSource::default();
        cache.get_or_fetch((0, 6, 1, 2), &source).await.unwrap();
        cache.get_or_fetch((1, 6, 1, 2), &source).await.unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.len().await, 2);
    }

    #[tokio::test]
    async fn hits_do_not_refetch() {
        let cache = TileCache::new(16);
        let source = CountingSource::default();
        cache.get_or_fetch((0, 6, 1, 1), &source).await.unwrap();
        cache.get_or_fetch((0, 6, 2, 2), &source).await.unwrap();
        cache.get_or_fetch((0, 6, 1, 1), &source).await.unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn stays_within_capacity() {
        let cache = TileCache::new(2);
        let source = CountingSource::default();
        for x in 0..10 {
            cache.get_or_fetch((0, 6, x, x), &source).await.unwrap();
        }
        assert_eq!(source.calls.load(Ordering::SeqCst), 10);
        assert!(cache.len().await <= 2);
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let cache = TileCache::new(4);
        let source = CountingSource {
            fail_first: true,
            ..CountingSource::default()
        };
        let err = cache.get_or_fetch((0, 6, 1, 1), &source).await.unwrap_err();
        assert_eq!(err.to_string(), "unavailable");
        assert!(cache.is_empty().await);
        let tile = cache.get_or_fetch((0, 6, 1, 1), &source).await.unwrap();
        assert!(tile.is_some());
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn missing_tiles_are_cached_as_none() {
        let cache = TileCache::new(4);
        let source = CountingSource::default();
        assert!(cache.get_or_fetch((0, 6, 99, 1), &source).await.unwrap().is_none());
        assert!(cache.get_or_fetch((0, 6, 99, 1), &source).await.unwrap().is_none());
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn reset_clears_entries() {
        let cache = TileCache::new(4);
        let source = CountingSource::default();
        cache.get_or_fetch((0, 6, 1, 1), &source).await.unwrap();
        cache.reset().await;
        assert!(cache.is_empty().await);
        cache.get_or_fetch((0, 6, 1, 1), &source).await.unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn sniffs_compression() {
        let payload = b"tile payload".to_vec();

        let mut gz = GzEncoder::new(Vec::new(), Compression::default());
        gz.write_all(&payload).unwrap();
        assert_eq!(decompress(&gz.finish().unwrap()).unwrap(), payload);

        let mut zlib = ZlibEncoder::new(Vec::new(), Compression::default());
        zlib.write_all(&payload).unwrap();
        let compressed = zlib.finish().unwrap();
        assert_eq!(&compressed[..2], &[0x78, 0x9c]);
        assert_eq!(decompress(&compressed).unwrap(), payload);

        assert_eq!(decompress(&payload).unwrap(), payload);
    }

    #[test]
    fn corrupt_payload_is_a_decode_error() {
        let err = decompress(&[0x1f, 0x8b, 0x00, 0x01]).unwrap_err();
        assert!(matches!(err, SourceError::Decode { .. }));
    }
}
