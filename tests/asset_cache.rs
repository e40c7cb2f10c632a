use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use image::{Rgba, RgbaImage};
use phi_card::AssetError;
use phi_card::features::image::{
    AssetCache, AssetCacheOptions, IllustrationDecoder, IllustrationRequest, IllustrationState,
    ImageDecoder,
};
use phi_card::features::score::AssetKey;

/// 记录解码次数的解码器，可注入固定延迟
struct CountingDecoder {
    inner: ImageDecoder,
    calls: AtomicUsize,
    delay: Duration,
}

impl CountingDecoder {
    fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            inner: ImageDecoder::default(),
            calls: AtomicUsize::new(0),
            delay,
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl IllustrationDecoder for CountingDecoder {
    fn decode(&self, source: &Path, width: u32, height: u32) -> Result<RgbaImage, AssetError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        self.inner.decode(source, width, height)
    }
}

fn fixture(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    RgbaImage::from_fn(96, 51, |x, y| Rgba([(x * 2) as u8, (y * 5) as u8, (x ^ y) as u8, 255]))
        .save(&path)
        .unwrap();
    path
}

fn request(title: &str, source: PathBuf) -> IllustrationRequest {
    IllustrationRequest {
        key: AssetKey::new(title, "Composer"),
        source,
        width: 48,
        height: 25,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_acquires_share_one_load() {
    let dir = tempfile::tempdir().unwrap();
    let req = request("Stasis", fixture(dir.path(), "Stasis.Composer.png"));
    let decoder = CountingDecoder::new(Duration::from_millis(150));
    let cache = Arc::new(AssetCache::with_decoder(
        AssetCacheOptions::default(),
        decoder.clone(),
    ));

    let mut handles = Vec::new();
    for _ in 0..16 {
        let cache = Arc::clone(&cache);
        let req = req.clone();
        handles.push(tokio::spawn(async move { cache.acquire(req).await }));
    }

    let mut results = Vec::new();
    for h in handles {
        results.push(h.await.unwrap().unwrap());
    }

    assert_eq!(decoder.calls(), 1);
    assert_eq!(cache.stats().decodes, 1);
    assert!(results.iter().all(|r| Arc::ptr_eq(r, &results[0])));
}

#[tokio::test]
async fn loaded_key_is_never_read_again() {
    let dir = tempfile::tempdir().unwrap();
    let req = request("Cthugha", fixture(dir.path(), "Cthugha.Composer.png"));
    let decoder = CountingDecoder::new(Duration::ZERO);
    let cache = AssetCache::with_decoder(AssetCacheOptions::default(), decoder.clone());

    assert_eq!(cache.state(&req.cache_key()), IllustrationState::Unloaded);
    cache.acquire(req.clone()).await.unwrap();
    assert_eq!(cache.state(&req.cache_key()), IllustrationState::Loaded);
    let reads = cache.stats().disk_reads;

    for _ in 0..5 {
        cache.acquire(req.clone()).await.unwrap();
    }
    assert_eq!(cache.stats().disk_reads, reads);
    assert_eq!(cache.stats().memory_hits, 5);
    assert_eq!(decoder.calls(), 1);
}

#[tokio::test]
async fn evict_then_reacquire_is_bit_identical() {
    let dir = tempfile::tempdir().unwrap();
    let req = request("Chronostasis", fixture(dir.path(), "Chronostasis.Composer.png"));
    let cache = AssetCache::new(AssetCacheOptions::default());

    let first = cache.acquire(req.clone()).await.unwrap();
    assert!(cache.evict(&req.cache_key()));
    assert_eq!(cache.state(&req.cache_key()), IllustrationState::Unloaded);
    assert!(!cache.evict(&req.cache_key()));

    let second = cache.acquire(req).await.unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(first.bitmap.as_raw(), second.bitmap.as_raw());
    assert_eq!(cache.stats().decodes, 2);
}

#[tokio::test]
async fn failed_load_is_negative_cached() {
    let dir = tempfile::tempdir().unwrap();
    let req = request("Missing", dir.path().join("Missing.Composer.png"));
    let decoder = CountingDecoder::new(Duration::ZERO);
    let cache = AssetCache::with_decoder(AssetCacheOptions::default(), decoder.clone());

    let err = cache.acquire(req.clone()).await.unwrap_err();
    assert!(matches!(err, AssetError::LoadFailed(_)));
    assert_eq!(cache.state(&req.cache_key()), IllustrationState::Failed);

    let again = cache.acquire(req).await.unwrap_err();
    assert_eq!(again, err);
    assert_eq!(decoder.calls(), 1);
    let stats = cache.stats();
    assert_eq!(stats.negative_hits, 1);
    assert_eq!(stats.loads_failed, 1);
}

#[tokio::test]
async fn negative_entries_expire_after_ttl() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("Late.Composer.png");
    let req = request("Late", source.clone());
    let decoder = CountingDecoder::new(Duration::ZERO);
    let cache = AssetCache::with_decoder(
        AssetCacheOptions {
            negative_ttl: Some(Duration::from_millis(200)),
            ..Default::default()
        },
        decoder.clone(),
    );

    assert!(cache.acquire(req.clone()).await.is_err());
    assert!(cache.acquire(req.clone()).await.is_err());
    assert_eq!(decoder.calls(), 1);

    // 资源补齐且 TTL 过期后重新加载成功
    fixture(dir.path(), "Late.Composer.png");
    tokio::time::sleep(Duration::from_millis(400)).await;
    let ill = cache.acquire(req).await.unwrap();
    assert!(!ill.is_placeholder());
    assert_eq!(decoder.calls(), 2);
}

#[tokio::test]
async fn clear_memory_drops_negative_entries_too() {
    let dir = tempfile::tempdir().unwrap();
    let req = request("Gone", dir.path().join("Gone.Composer.png"));
    let cache = AssetCache::new(AssetCacheOptions::default());

    assert!(cache.acquire(req.clone()).await.is_err());
    cache.clear_memory();
    assert_eq!(cache.memory_len(), 0);
    assert_eq!(cache.state(&req.cache_key()), IllustrationState::Unloaded);
}

#[tokio::test]
async fn memory_tier_is_bounded_lru() {
    let dir = tempfile::tempdir().unwrap();
    let cache = AssetCache::new(AssetCacheOptions {
        memory_capacity: 2,
        ..Default::default()
    });
    let a = request("A", fixture(dir.path(), "A.Composer.png"));
    let b = request("B", fixture(dir.path(), "B.Composer.png"));
    let c = request("C", fixture(dir.path(), "C.Composer.png"));

    cache.acquire(a.clone()).await.unwrap();
    cache.acquire(b.clone()).await.unwrap();
    // 访问 A 使 B 成为最久未使用
    cache.acquire(a.clone()).await.unwrap();
    cache.acquire(c.clone()).await.unwrap();

    assert_eq!(cache.memory_len(), 2);
    assert_eq!(cache.state(&a.cache_key()), IllustrationState::Loaded);
    assert_eq!(cache.state(&b.cache_key()), IllustrationState::Unloaded);
    assert_eq!(cache.state(&c.cache_key()), IllustrationState::Loaded);
}

#[tokio::test]
async fn purge_disk_removes_entries() {
    let src = tempfile::tempdir().unwrap();
    let cache_dir = tempfile::tempdir().unwrap();
    let req = request("Purge", fixture(src.path(), "Purge.Composer.png"));
    let options = AssetCacheOptions {
        disk_dir: Some(cache_dir.path().to_path_buf()),
        ..Default::default()
    };
    let cache = AssetCache::new(options.clone());
    cache.acquire(req.clone()).await.unwrap();
    assert!(cache_dir.path().join("illustrations").exists());

    cache.purge_disk().await.unwrap();
    assert!(!cache_dir.path().join("illustrations").exists());

    let cold = AssetCache::new(options);
    cold.acquire(req).await.unwrap();
    assert_eq!(cold.stats().disk_hits, 0);
    assert_eq!(cold.stats().decodes, 1);
}
