use std::collections::HashMap;
use std::fs;
use std::io::Cursor;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, UNIX_EPOCH};

use image::imageops::FilterType;
use image::{Rgba, RgbaImage};
use lru::LruCache;
use sha2::{Digest, Sha256};
use tokio::sync::OnceCell;
use tokio::task::spawn_blocking;

use crate::error::AssetError;
use crate::features::score::AssetKey;

/// 占位图底色 #333333
const PLACEHOLDER_RGB: [u8; 3] = [0x33, 0x33, 0x33];
const NEGATIVE_CACHE_CAPACITY: u64 = 4096;
const DISK_SUBDIR: &str = "illustrations";

/// 曲绘解码器：读取源文件并缩放裁剪到目标尺寸（等比填充，居中裁剪）。
///
/// 在阻塞线程池中调用。
pub trait IllustrationDecoder: Send + Sync {
    fn decode(&self, source: &Path, width: u32, height: u32) -> Result<RgbaImage, AssetError>;
}

/// 基于 `image` crate 的默认解码器
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageDecoder {
    /// 优先速度时使用 Triangle 滤波，否则 Lanczos3
    pub optimize_speed: bool,
}

impl IllustrationDecoder for ImageDecoder {
    fn decode(&self, source: &Path, width: u32, height: u32) -> Result<RgbaImage, AssetError> {
        let filter = if self.optimize_speed {
            FilterType::Triangle
        } else {
            FilterType::Lanczos3
        };
        let img = image::open(source)
            .map_err(|e| AssetError::LoadFailed(format!("{}: {e}", source.display())))?;
        Ok(img.resize_to_fill(width, height, filter).to_rgba8())
    }
}

/// 缓存键：曲绘键 + 解析到的源文件 + 目标尺寸。
///
/// 索引重建后同一曲绘键可能指向新的文件，源路径不同即视为不同条目。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub asset: AssetKey,
    pub source: PathBuf,
    pub width: u32,
    pub height: u32,
}

/// 一次曲绘获取请求
#[derive(Debug, Clone)]
pub struct IllustrationRequest {
    pub key: AssetKey,
    pub source: PathBuf,
    pub width: u32,
    pub height: u32,
}

impl IllustrationRequest {
    pub fn cache_key(&self) -> CacheKey {
        CacheKey {
            asset: self.key.clone(),
            source: self.source.clone(),
            width: self.width,
            height: self.height,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IllustrationKind {
    Cover,
    Placeholder,
}

/// 已解码的曲绘（缩放后），加载完成后在所有使用者之间共享
#[derive(Debug)]
pub struct Illustration {
    pub source: Option<PathBuf>,
    pub bitmap: Arc<RgbaImage>,
    pub kind: IllustrationKind,
}

impl Illustration {
    pub fn is_placeholder(&self) -> bool {
        self.kind == IllustrationKind::Placeholder
    }
}

/// 单个键的加载状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IllustrationState {
    Unloaded,
    Loading,
    Loaded,
    Failed,
}

/// 缓存计数器快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub memory_hits: u64,
    pub disk_hits: u64,
    /// 源文件读取次数（每次解码一次）
    pub disk_reads: u64,
    pub decodes: u64,
    pub negative_hits: u64,
    pub corrupt_entries: u64,
    pub loads_failed: u64,
}

#[derive(Default)]
struct Counters {
    memory_hits: AtomicU64,
    disk_hits: AtomicU64,
    disk_reads: AtomicU64,
    decodes: AtomicU64,
    negative_hits: AtomicU64,
    corrupt_entries: AtomicU64,
    loads_failed: AtomicU64,
}

type LoadResult = Result<Arc<Illustration>, AssetError>;
type InFlight = Arc<OnceCell<LoadResult>>;

/// 缓存构建参数
#[derive(Debug, Clone)]
pub struct AssetCacheOptions {
    pub memory_capacity: usize,
    /// 磁盘层目录（None 表示禁用磁盘层）
    pub disk_dir: Option<PathBuf>,
    /// 失败结果负缓存 TTL（None 表示进程生命周期）
    pub negative_ttl: Option<Duration>,
    /// 自定义占位图
    pub placeholder_image: Option<PathBuf>,
}

impl Default for AssetCacheOptions {
    fn default() -> Self {
        Self {
            memory_capacity: 256,
            disk_dir: None,
            negative_ttl: None,
            placeholder_image: None,
        }
    }
}

/// 两级曲绘缓存（内存 LRU + 磁盘预缩放 PNG），同一键同一时刻只有一次加载。
pub struct AssetCache {
    memory: Mutex<LruCache<CacheKey, Arc<Illustration>>>,
    in_flight: Mutex<HashMap<CacheKey, InFlight>>,
    negative: moka::future::Cache<CacheKey, AssetError>,
    disk_dir: Option<PathBuf>,
    placeholder_image: Option<PathBuf>,
    placeholders: Mutex<HashMap<(u32, u32), Arc<Illustration>>>,
    decoder: Arc<dyn IllustrationDecoder>,
    counters: Counters,
}

impl AssetCache {
    pub fn new(options: AssetCacheOptions) -> Self {
        Self::with_decoder(options, Arc::new(ImageDecoder::default()))
    }

    pub fn with_decoder(options: AssetCacheOptions, decoder: Arc<dyn IllustrationDecoder>) -> Self {
        let capacity =
            NonZeroUsize::new(options.memory_capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        let mut negative = moka::future::Cache::<CacheKey, AssetError>::builder()
            .max_capacity(NEGATIVE_CACHE_CAPACITY);
        if let Some(ttl) = options.negative_ttl {
            negative = negative.time_to_live(ttl);
        }
        Self {
            memory: Mutex::new(LruCache::new(capacity)),
            in_flight: Mutex::new(HashMap::new()),
            negative: negative.build(),
            disk_dir: options.disk_dir.map(|d| d.join(DISK_SUBDIR)),
            placeholder_image: options.placeholder_image,
            placeholders: Mutex::new(HashMap::new()),
            decoder,
            counters: Counters::default(),
        }
    }

    /// 获取曲绘。并发调用同一键时只有一个调用者执行加载，其余等待并共享结果。
    pub async fn acquire(&self, request: IllustrationRequest) -> LoadResult {
        let key = request.cache_key();

        if let Some(hit) = self.memory_get(&key) {
            self.counters.memory_hits.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("曲绘内存命中: {}", key.asset);
            return Ok(hit);
        }
        if let Some(err) = self.negative.get(&key).await {
            self.counters.negative_hits.fetch_add(1, Ordering::Relaxed);
            return Err(err);
        }

        let (flight, _leader) = self.join_inflight(&key);
        let result = flight
            .get_or_init(|| self.load_once(&key, &request))
            .await
            .clone();
        self.finish_inflight(&key, &flight);
        result
    }

    /// 在飞行单元内执行的加载。
    ///
    /// 上一个加载者可能刚结束并移除了飞行单元，此时它的结果已在内存层或负缓存中，
    /// 两者都要重新检查。
    async fn load_once(&self, key: &CacheKey, request: &IllustrationRequest) -> LoadResult {
        if let Some(hit) = self.memory_get(key) {
            self.counters.memory_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(hit);
        }
        if let Some(err) = self.negative.get(key).await {
            self.counters.negative_hits.fetch_add(1, Ordering::Relaxed);
            return Err(err);
        }
        let loaded = self.load(request).await;
        match &loaded {
            Ok(ill) => self.memory_put(key.clone(), Arc::clone(ill)),
            Err(err) => {
                self.counters.loads_failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("曲绘加载失败，写入负缓存: {}", err);
                self.negative.insert(key.clone(), err.clone()).await;
            }
        }
        loaded
    }

    /// 当前键的状态
    pub fn state(&self, key: &CacheKey) -> IllustrationState {
        if self
            .memory
            .lock()
            .map(|m| m.contains(key))
            .unwrap_or(false)
        {
            return IllustrationState::Loaded;
        }
        if self
            .in_flight
            .lock()
            .map(|m| m.contains_key(key))
            .unwrap_or(false)
        {
            return IllustrationState::Loading;
        }
        if self.negative.contains_key(key) {
            return IllustrationState::Failed;
        }
        IllustrationState::Unloaded
    }

    /// 从内存层移除（磁盘层保留），返回是否存在
    pub fn evict(&self, key: &CacheKey) -> bool {
        self.memory
            .lock()
            .map(|mut m| m.pop(key).is_some())
            .unwrap_or(false)
    }

    pub fn clear_memory(&self) {
        if let Ok(mut m) = self.memory.lock() {
            m.clear();
        }
        self.negative.invalidate_all();
    }

    /// 清空磁盘层目录
    pub async fn purge_disk(&self) -> std::io::Result<()> {
        let Some(dir) = self.disk_dir.clone() else {
            return Ok(());
        };
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        tracing::info!("磁盘缓存已清空: {}", dir.display());
        Ok(())
    }

    pub fn stats(&self) -> CacheStats {
        let c = &self.counters;
        CacheStats {
            memory_hits: c.memory_hits.load(Ordering::Relaxed),
            disk_hits: c.disk_hits.load(Ordering::Relaxed),
            disk_reads: c.disk_reads.load(Ordering::Relaxed),
            decodes: c.decodes.load(Ordering::Relaxed),
            negative_hits: c.negative_hits.load(Ordering::Relaxed),
            corrupt_entries: c.corrupt_entries.load(Ordering::Relaxed),
            loads_failed: c.loads_failed.load(Ordering::Relaxed),
        }
    }

    pub fn memory_len(&self) -> usize {
        self.memory.lock().map(|m| m.len()).unwrap_or(0)
    }

    /// 指定尺寸的占位图：优先使用配置的占位图片，否则生成纯色图
    pub async fn placeholder(&self, width: u32, height: u32) -> Arc<Illustration> {
        if let Some(p) = self
            .placeholders
            .lock()
            .ok()
            .and_then(|m| m.get(&(width, height)).cloned())
        {
            return p;
        }

        let configured = match self.placeholder_image.clone() {
            Some(path) => {
                let decoder = Arc::clone(&self.decoder);
                let src = path.clone();
                match spawn_blocking(move || decoder.decode(&src, width, height)).await {
                    Ok(Ok(img)) => Some((path, img)),
                    Ok(Err(e)) => {
                        tracing::warn!("自定义占位图加载失败，改用纯色占位: {}", e);
                        None
                    }
                    Err(e) => {
                        tracing::warn!("占位图解码任务失败: {}", e);
                        None
                    }
                }
            }
            None => None,
        };
        let (source, bitmap) = match configured {
            Some((path, img)) => (Some(path), img),
            None => (
                None,
                RgbaImage::from_pixel(
                    width.max(1),
                    height.max(1),
                    Rgba([PLACEHOLDER_RGB[0], PLACEHOLDER_RGB[1], PLACEHOLDER_RGB[2], 255]),
                ),
            ),
        };
        let ill = Arc::new(Illustration {
            source,
            bitmap: Arc::new(bitmap),
            kind: IllustrationKind::Placeholder,
        });
        if let Ok(mut m) = self.placeholders.lock() {
            m.entry((width, height)).or_insert_with(|| Arc::clone(&ill));
        }
        ill
    }

    fn memory_get(&self, key: &CacheKey) -> Option<Arc<Illustration>> {
        self.memory.lock().ok().and_then(|mut m| m.get(key).cloned())
    }

    fn memory_put(&self, key: CacheKey, ill: Arc<Illustration>) {
        if let Ok(mut m) = self.memory.lock() {
            m.put(key, ill);
        }
    }

    fn join_inflight(&self, key: &CacheKey) -> (InFlight, bool) {
        let Ok(mut map) = self.in_flight.lock() else {
            return (Arc::new(OnceCell::new()), true);
        };
        if let Some(existing) = map.get(key) {
            return (Arc::clone(existing), false);
        }
        let flight = Arc::new(OnceCell::new());
        map.insert(key.clone(), Arc::clone(&flight));
        (flight, true)
    }

    fn finish_inflight(&self, key: &CacheKey, flight: &InFlight) {
        if let Ok(mut map) = self.in_flight.lock() {
            if map.get(key).is_some_and(|f| Arc::ptr_eq(f, flight)) {
                map.remove(key);
            }
        }
    }

    /// 磁盘层 -> 源文件解码；在阻塞线程池中执行
    async fn load(&self, request: &IllustrationRequest) -> LoadResult {
        let disk_dir = self.disk_dir.clone();
        let req = request.clone();
        let (disk_path, read) = spawn_blocking(move || {
            let path = disk_dir.as_deref().and_then(|dir| disk_entry_path(dir, &req));
            let read = match &path {
                Some(p) => read_disk_entry(p, req.width, req.height),
                None => Ok(None),
            };
            (path, read)
        })
        .await
        .map_err(|e| AssetError::LoadFailed(format!("磁盘缓存读取任务失败: {e}")))?;

        if disk_path.is_some() {
            match read {
                Ok(Some(bitmap)) => {
                    self.counters.disk_hits.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!("曲绘磁盘命中: {}", request.key);
                    return Ok(Arc::new(Illustration {
                        source: Some(request.source.clone()),
                        bitmap: Arc::new(bitmap),
                        kind: IllustrationKind::Cover,
                    }));
                }
                Ok(None) => {}
                Err(err) => {
                    self.counters.corrupt_entries.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!("{}，按未命中处理并从源文件重建", err);
                }
            }
        }

        self.counters.disk_reads.fetch_add(1, Ordering::Relaxed);
        self.counters.decodes.fetch_add(1, Ordering::Relaxed);
        let decoder = Arc::clone(&self.decoder);
        let req = request.clone();
        let bitmap = spawn_blocking(move || -> Result<RgbaImage, AssetError> {
            let img = decoder.decode(&req.source, req.width, req.height)?;
            if let Some(path) = disk_path {
                if let Err(e) = write_disk_entry(&path, &img) {
                    tracing::warn!("写入磁盘缓存失败 '{}': {}", path.display(), e);
                }
            }
            Ok(img)
        })
        .await
        .map_err(|e| AssetError::LoadFailed(format!("解码任务失败: {e}")))??;

        Ok(Arc::new(Illustration {
            source: Some(request.source.clone()),
            bitmap: Arc::new(bitmap),
            kind: IllustrationKind::Cover,
        }))
    }
}

/// 磁盘条目文件名：对 (键, 尺寸, 源路径, 源大小, 源修改时间) 取 SHA-256，
/// 源文件变化后自动失效。
fn disk_entry_path(dir: &Path, request: &IllustrationRequest) -> Option<PathBuf> {
    let meta = fs::metadata(&request.source).ok()?;
    let mtime = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let mut hasher = Sha256::new();
    hasher.update(request.key.exact_stem().as_bytes());
    hasher.update(request.width.to_le_bytes());
    hasher.update(request.height.to_le_bytes());
    hasher.update(request.source.to_string_lossy().as_bytes());
    hasher.update(meta.len().to_le_bytes());
    hasher.update(mtime.to_le_bytes());
    Some(dir.join(format!("{}.png", hex::encode(hasher.finalize()))))
}

/// 读取磁盘条目；不存在返回 Ok(None)，损坏时删除并返回 CacheCorruption
fn read_disk_entry(path: &Path, width: u32, height: u32) -> Result<Option<RgbaImage>, AssetError> {
    if !path.exists() {
        return Ok(None);
    }
    let decoded = image::open(path).map(|img| img.to_rgba8());
    match decoded {
        Ok(img) if img.dimensions() == (width, height) => Ok(Some(img)),
        Ok(img) => {
            let _ = fs::remove_file(path);
            Err(AssetError::CacheCorruption(format!(
                "{} 尺寸不符: {:?} != {:?}",
                path.display(),
                img.dimensions(),
                (width, height)
            )))
        }
        Err(e) => {
            let _ = fs::remove_file(path);
            Err(AssetError::CacheCorruption(format!("{}: {e}", path.display())))
        }
    }
}

/// 先写临时文件再重命名，避免并发读到半截文件
fn write_disk_entry(path: &Path, img: &RgbaImage) -> Result<(), AssetError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, image::ImageFormat::Png)?;
    let tmp = path.with_extension(format!("png.tmp{}", std::process::id()));
    fs::write(&tmp, buf.into_inner())?;
    fs::rename(&tmp, path)?;
    Ok(())
}
