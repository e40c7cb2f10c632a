use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use once_cell::sync::OnceCell;
use tokio::task::spawn_blocking;

use super::background::BackgroundProcessor;
use super::cache::{AssetCache, AssetCacheOptions, CacheStats, Illustration, IllustrationRequest};
use super::cover_loader::load_covers;
use super::encode::{EMBED_JPEG_QUALITY, encode_pixmap, jpeg_data_uri};
use super::layout::{AVATAR_SIZE, compute_layout, compute_song_layout};
use super::matcher::{IllustrationIndex, MatchResolver, Resolved, index_for};
use super::renderer::compose_raster;
use super::scene::{build_scene, build_song_scene};
use super::types::{
    Card, CardContent, CardHeader, OutputKind, RenderJob, RenderOutcome, RenderReport,
    StageTimings,
};
use super::vector::{Backdrop, emit_svg};
use crate::config::AppConfig;
use crate::error::AppError;
use crate::features::score::{AssetKey, ScoreRecord};

static SHARED_SERVICE: OnceCell<ImageService> = OnceCell::new();

/// 渲染服务：持有进程级共享的曲绘缓存与背景缓存，任务之间复用
pub struct ImageService {
    cache: Arc<AssetCache>,
    backgrounds: BackgroundProcessor,
    resolver: MatchResolver,
    workers: usize,
}

impl ImageService {
    pub fn new(
        cache: Arc<AssetCache>,
        backgrounds: BackgroundProcessor,
        resolver: MatchResolver,
        workers: usize,
    ) -> Self {
        Self {
            cache,
            backgrounds,
            resolver,
            workers: workers.max(1),
        }
    }

    /// 按应用配置构建
    pub fn from_config(config: &AppConfig) -> Self {
        let placeholder = config
            .resources
            .placeholder_image
            .as_ref()
            .map(PathBuf::from);
        let cache = AssetCache::new(AssetCacheOptions {
            memory_capacity: config.cache.memory_capacity,
            disk_dir: config.cache_path(),
            negative_ttl: config.cache.negative_ttl(),
            placeholder_image: placeholder.clone(),
        });
        Self::new(
            Arc::new(cache),
            BackgroundProcessor::new(config.cache.background_capacity),
            MatchResolver::new(placeholder),
            config.cache.effective_workers(),
        )
    }

    /// 进程级共享实例（基于全局配置）
    pub fn shared() -> &'static ImageService {
        SHARED_SERVICE.get_or_init(|| Self::from_config(AppConfig::global()))
    }

    pub fn cache(&self) -> &Arc<AssetCache> {
        &self.cache
    }

    pub fn backgrounds(&self) -> &BackgroundProcessor {
        &self.backgrounds
    }

    /// 执行一次渲染任务。
    ///
    /// 只有布局无法成立（无记录、画布尺寸为 0）时返回错误；缺失或损坏的曲绘以占位图代替。
    pub async fn render(&self, job: RenderJob) -> Result<RenderOutcome, AppError> {
        let t_start = Instant::now();
        let RenderJob {
            content,
            config,
            header,
        } = job;
        let (config, clamped) = config.clamped(&content);
        for note in &clamped {
            tracing::warn!("渲染参数越界已钳制: {}", note);
        }

        let now = chrono::Utc::now();
        let (scene, keys, (cover_w, cover_h)) = match &content {
            CardContent::BestN(records) => {
                let layout =
                    compute_layout(config.width, config.height, config.columns, records.len())?;
                let scene = build_scene(records, &layout, header.as_ref(), &config, now);
                let keys: Vec<AssetKey> = records.iter().map(ScoreRecord::asset_key).collect();
                (scene, keys, layout.cover_size())
            }
            CardContent::Song(song) => {
                let layout = compute_song_layout(config.width)?;
                let scene = build_song_scene(song, &layout, header.as_ref(), &config, now);
                (scene, vec![song.asset_key()], layout.cover_size())
            }
        };

        let index = scan_index(config.illustration_dir.clone()).await?;
        let resolved: Vec<Resolved> = keys
            .iter()
            .map(|key| self.resolver.resolve(key, &index))
            .collect();
        let avatar = match (&content, header.as_ref().and_then(CardHeader::avatar_key)) {
            (CardContent::BestN(_), Some(key)) => {
                let avatars = scan_index(config.avatar_dir.clone()).await?;
                Some(self.resolver.resolve(&key, &avatars))
            }
            _ => None,
        };

        let backdrop_plan = match &content {
            CardContent::BestN(_) => BackdropPlan {
                source: config.background_image.clone(),
                blur_radius: config.blur_radius,
                darken_level: config.darken_level,
            },
            // 单曲卡以曲绘本身作为背景
            CardContent::Song(_) => BackdropPlan {
                source: resolved
                    .first()
                    .and_then(|r| r.source().ok())
                    .map(Path::to_path_buf)
                    .or_else(|| config.background_image.clone()),
                blur_radius: SONG_BACKDROP_BLUR,
                darken_level: SONG_BACKDROP_DARKEN,
            },
        };

        let stats_before = self.cache.stats();
        let vector = config.output == OutputKind::Vector;
        let decode_covers = !vector || config.embed_images;

        let t_load = Instant::now();
        let (covers, distinct, placeholders) = if decode_covers {
            let loaded = load_covers(
                Arc::clone(&self.cache),
                &resolved,
                cover_w,
                cover_h,
                self.workers,
            )
            .await;
            let mut items = loaded.items;
            if let Some(avatar) = &avatar {
                items.push(self.load_avatar(avatar).await);
            }
            (items, loaded.distinct, loaded.placeholders)
        } else {
            let distinct = resolved.iter().map(|r| &r.key).collect::<HashSet<_>>().len();
            let placeholders = resolved.iter().filter(|r| r.is_placeholder()).count();
            (Vec::new(), distinct, placeholders)
        };
        let load_elapsed = t_load.elapsed();

        let t_bg = Instant::now();
        let backdrop = if decode_covers {
            Some(
                self.backgrounds
                    .prepare(
                        backdrop_plan.source.as_deref(),
                        backdrop_plan.blur_radius,
                        backdrop_plan.darken_level,
                        scene.width,
                        scene.height,
                    )
                    .await?,
            )
        } else {
            None
        };
        let background_elapsed = t_bg.elapsed();

        let t_compose = Instant::now();
        let card = match (config.output, backdrop) {
            (OutputKind::Raster, Some(backdrop)) => {
                let format = config.format;
                let quality = config.encode_quality();
                let optimize_speed = config.optimize_speed;
                let bytes = spawn_blocking(move || {
                    let pixmap = compose_raster(&scene, &backdrop, &covers, optimize_speed)?;
                    encode_pixmap(&pixmap, format, quality)
                })
                .await??;
                Card::Raster { bytes, format }
            }
            (_, backdrop) => {
                let base_url = config.public_base_url.clone();
                let document = spawn_blocking(move || {
                    let (hrefs, backdrop) = match backdrop {
                        Some(bg) => (
                            embedded_cover_hrefs(&covers)?,
                            Backdrop::Embedded(jpeg_data_uri(&bg, EMBED_JPEG_QUALITY)?),
                        ),
                        None => {
                            let base = base_url.as_deref();
                            let hrefs = resolved
                                .iter()
                                .chain(avatar.as_ref())
                                .map(|r| r.source().ok().map(|p| asset_href(p, base)))
                                .collect();
                            (hrefs, referenced_backdrop(&backdrop_plan, base))
                        }
                    };
                    emit_svg(&scene, &hrefs, &backdrop)
                })
                .await??;
                Card::Vector { document }
            }
        };
        let compose_elapsed = t_compose.elapsed();

        let stats_after = self.cache.stats();
        let entries = keys.len();
        let report = RenderReport {
            entries,
            covers: entries - placeholders,
            placeholders,
            distinct_keys: distinct,
            cache_hits: cache_hits(&stats_after) - cache_hits(&stats_before),
            decodes: stats_after.decodes - stats_before.decodes,
            clamped,
            timings: StageTimings {
                load: load_elapsed,
                background: background_elapsed,
                compose: compose_elapsed,
                total: t_start.elapsed(),
            },
        };

        tracing::info!(
            "成绩卡渲染完成: 条目={}, 曲绘={}, 占位={}, 去重键={}, 命中={}, 解码={}, 大小={} 字节, 耗时 加载={:?} 背景={:?} 合成={:?} 总计={:?}",
            report.entries,
            report.covers,
            report.placeholders,
            report.distinct_keys,
            report.cache_hits,
            report.decodes,
            card.len(),
            report.timings.load,
            report.timings.background,
            report.timings.compose,
            report.timings.total
        );

        Ok(RenderOutcome { card, report })
    }

    /// 头像与曲绘共用缓存，缺失时使用同尺寸占位图
    async fn load_avatar(&self, resolved: &Resolved) -> Arc<Illustration> {
        let size = AVATAR_SIZE as u32;
        let source = match resolved.source() {
            Ok(path) => path.to_path_buf(),
            Err(err) => {
                tracing::warn!("头像{}，使用占位图", err);
                return self.cache.placeholder(size, size).await;
            }
        };
        let request = IllustrationRequest {
            key: resolved.key.clone(),
            source,
            width: size,
            height: size,
        };
        match self.cache.acquire(request).await {
            Ok(avatar) => avatar,
            Err(err) => {
                tracing::warn!("头像加载失败，使用占位图: {}", err);
                self.cache.placeholder(size, size).await
            }
        }
    }
}

/// 单曲卡背景：曲绘大半径模糊后压暗
const SONG_BACKDROP_BLUR: u32 = 30;
const SONG_BACKDROP_DARKEN: f32 = 0.7;

/// 背景来源与处理参数
struct BackdropPlan {
    source: Option<PathBuf>,
    blur_radius: u32,
    darken_level: f32,
}

/// 目录扫描是阻塞 I/O，放到阻塞线程池
async fn scan_index(dir: PathBuf) -> Result<Arc<IllustrationIndex>, AppError> {
    Ok(spawn_blocking(move || index_for(&dir)).await?)
}

fn cache_hits(stats: &CacheStats) -> u64 {
    stats.memory_hits + stats.disk_hits
}

/// 内嵌曲绘：同一位图只编码一次，生成的纯色占位图以灰色矩形绘制
fn embedded_cover_hrefs(covers: &[Arc<Illustration>]) -> Result<Vec<Option<String>>, AppError> {
    let mut encoded: HashMap<*const Illustration, String> = HashMap::new();
    let mut hrefs = Vec::with_capacity(covers.len());
    for cover in covers {
        if cover.is_placeholder() && cover.source.is_none() {
            hrefs.push(None);
            continue;
        }
        let ptr = Arc::as_ptr(cover);
        let uri = match encoded.get(&ptr) {
            Some(uri) => uri.clone(),
            None => {
                let uri = jpeg_data_uri(&cover.bitmap, EMBED_JPEG_QUALITY)?;
                encoded.insert(ptr, uri.clone());
                uri
            }
        };
        hrefs.push(Some(uri));
    }
    Ok(hrefs)
}

/// 外链资源地址：配置了公开地址时使用 `<base>/<文件名>`，否则使用本地路径
fn asset_href(path: &Path, public_base_url: Option<&str>) -> String {
    let file_name = path.file_name().map(|n| n.to_string_lossy());
    match (public_base_url, file_name) {
        (Some(base), Some(name)) => format!("{}/{}", base.trim_end_matches('/'), name),
        _ => path.to_string_lossy().replace('\\', "/"),
    }
}

fn referenced_backdrop(plan: &BackdropPlan, public_base_url: Option<&str>) -> Backdrop {
    match plan.source.as_deref() {
        Some(path) => Backdrop::Reference {
            href: asset_href(path, public_base_url),
            blur_radius: plan.blur_radius,
            darken_level: plan.darken_level,
        },
        None => Backdrop::Gradient {
            darken_level: plan.darken_level,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hrefs_prefer_public_base_url() {
        let p = Path::new("/data/ILLUSTRATION/Rrhar'il.Team Grimoire.png");
        assert_eq!(
            asset_href(p, Some("https://cdn.example.com/ill/")),
            "https://cdn.example.com/ill/Rrhar'il.Team Grimoire.png"
        );
        assert_eq!(
            asset_href(p, None),
            "/data/ILLUSTRATION/Rrhar'il.Team Grimoire.png"
        );
    }

    #[tokio::test(flavor = "current_thread")]
    async fn index_scan_shares_the_registry_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        image::RgbaImage::from_pixel(4, 4, image::Rgba([1, 2, 3, 255]))
            .save(dir.path().join("Aleph-0.Orangestar.png"))
            .unwrap();

        let scanned = scan_index(dir.path().to_path_buf()).await.unwrap();
        assert_eq!(scanned.len(), 1);
        assert!(Arc::ptr_eq(&scanned, &index_for(dir.path())));
    }
}
