use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use image::imageops::FilterType;
use image::{Rgba, RgbaImage};
use lru::LruCache;
use sha2::{Digest, Sha256};
use tokio::task::spawn_blocking;

use super::filters;
use crate::error::AppError;

/// 内置渐变背景的“内容哈希”
const BUILTIN_SOURCE_HASH: &str = "builtin-gradient";
const GRADIENT_FROM: [u8; 3] = [0x14, 0x18, 0x26];
const GRADIENT_TO: [u8; 3] = [0x25, 0x2E, 0x48];

/// 背景变体缓存键：(源内容哈希, 模糊半径, 压暗程度, 画布尺寸)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BackgroundKey {
    pub source_hash: String,
    pub blur_radius: u32,
    /// 压暗程度 * 1000，避免浮点作为键
    pub darken_milli: u32,
    pub width: u32,
    pub height: u32,
}

/// 背景处理器：模糊 + 压暗，按键缓存处理结果
pub struct BackgroundProcessor {
    variants: Mutex<LruCache<BackgroundKey, Arc<RgbaImage>>>,
    computed: AtomicU64,
}

impl BackgroundProcessor {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            variants: Mutex::new(LruCache::new(capacity)),
            computed: AtomicU64::new(0),
        }
    }

    /// 生成（或取缓存的）背景变体。
    ///
    /// 源图读取或解码失败时记录警告并回退到内置渐变。
    pub async fn prepare(
        &self,
        source: Option<&Path>,
        blur_radius: u32,
        darken_level: f32,
        width: u32,
        height: u32,
    ) -> Result<Arc<RgbaImage>, AppError> {
        let source_owned: Option<PathBuf> = source.map(Path::to_path_buf);
        let loaded = spawn_blocking(move || read_source(source_owned.as_deref())).await?;

        let (source_hash, bytes) = match loaded {
            Some((hash, bytes)) => (hash, Some(bytes)),
            None => (BUILTIN_SOURCE_HASH.to_string(), None),
        };
        let darken = darken_level.clamp(0.0, 1.0);
        let key = BackgroundKey {
            source_hash,
            blur_radius,
            darken_milli: (darken * 1000.0).round() as u32,
            width,
            height,
        };

        if let Some(hit) = self.variants.lock().ok().and_then(|mut c| c.get(&key).cloned()) {
            tracing::debug!("背景变体命中: {}", key.source_hash);
            return Ok(hit);
        }

        self.computed.fetch_add(1, Ordering::Relaxed);
        let variant = spawn_blocking(move || {
            let mut canvas = match bytes.as_deref().map(image::load_from_memory) {
                Some(Ok(img)) => img.resize_to_fill(width, height, FilterType::Triangle).to_rgba8(),
                Some(Err(e)) => {
                    tracing::warn!("背景图解码失败，使用内置渐变: {}", e);
                    gradient(width, height)
                }
                None => gradient(width, height),
            };
            filters::blur_image(&mut canvas, blur_radius);
            filters::darken(&mut canvas, darken);
            canvas
        })
        .await?;

        let variant = Arc::new(variant);
        if let Ok(mut cache) = self.variants.lock() {
            cache.put(key, Arc::clone(&variant));
        }
        Ok(variant)
    }

    /// 累计生成的变体数（缓存未命中次数）
    pub fn computed(&self) -> u64 {
        self.computed.load(Ordering::Relaxed)
    }
}

/// 读取源文件并计算内容哈希；无源或读取失败返回 None
fn read_source(source: Option<&Path>) -> Option<(String, Vec<u8>)> {
    let path = source?;
    match std::fs::read(path) {
        Ok(bytes) => {
            let hash = hex::encode(Sha256::digest(&bytes));
            Some((hash, bytes))
        }
        Err(e) => {
            tracing::warn!("读取背景图失败 '{}': {}，使用内置渐变", path.display(), e);
            None
        }
    }
}

/// 对角线渐变（左上 -> 右下）
fn gradient(width: u32, height: u32) -> RgbaImage {
    let span = (width + height).max(2) as f32 - 2.0;
    RgbaImage::from_fn(width.max(1), height.max(1), |x, y| {
        let t = if span > 0.0 { (x + y) as f32 / span } else { 0.0 };
        let lerp = |a: u8, b: u8| (a as f32 + (b as f32 - a as f32) * t).round() as u8;
        Rgba([
            lerp(GRADIENT_FROM[0], GRADIENT_TO[0]),
            lerp(GRADIENT_FROM[1], GRADIENT_TO[1]),
            lerp(GRADIENT_FROM[2], GRADIENT_TO[2]),
            255,
        ])
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn variants_are_cached_by_parameters() {
        let bg = BackgroundProcessor::new(4);
        let a = bg.prepare(None, 4, 0.5, 80, 60).await.unwrap();
        let b = bg.prepare(None, 4, 0.5, 80, 60).await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(bg.computed(), 1);

        bg.prepare(None, 8, 0.5, 80, 60).await.unwrap();
        bg.prepare(None, 4, 0.25, 80, 60).await.unwrap();
        assert_eq!(bg.computed(), 3);
    }

    #[tokio::test]
    async fn source_content_drives_the_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bg.png");
        RgbaImage::from_fn(40, 30, |x, y| {
            if (x + y) % 2 == 0 {
                Rgba([250, 250, 250, 255])
            } else {
                Rgba([5, 5, 5, 255])
            }
        })
        .save(&path)
        .unwrap();

        let bg = BackgroundProcessor::new(4);
        let out = bg.prepare(Some(&path), 3, 0.0, 40, 30).await.unwrap();
        assert_eq!(out.dimensions(), (40, 30));
        // 同名文件内容变化后重新计算
        RgbaImage::from_pixel(40, 30, Rgba([9, 9, 9, 255]))
            .save(&path)
            .unwrap();
        bg.prepare(Some(&path), 3, 0.0, 40, 30).await.unwrap();
        assert_eq!(bg.computed(), 2);
    }

    #[tokio::test]
    async fn darkening_reduces_brightness() {
        let bg = BackgroundProcessor::new(4);
        let light = bg.prepare(None, 0, 0.0, 20, 20).await.unwrap();
        let dark = bg.prepare(None, 0, 0.8, 20, 20).await.unwrap();
        let sum = |img: &RgbaImage| img.pixels().map(|p| p.0[0] as u64).sum::<u64>();
        assert!(sum(&dark) < sum(&light));
    }

    #[tokio::test]
    async fn missing_source_falls_back_to_gradient() {
        let bg = BackgroundProcessor::new(2);
        let out = bg
            .prepare(Some(Path::new("/nonexistent/bg.jpg")), 2, 0.3, 16, 9)
            .await
            .unwrap();
        assert_eq!(out.dimensions(), (16, 9));
    }
}
