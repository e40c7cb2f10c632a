mod background;
mod cache;
mod cover_loader;
mod encode;
mod filters;
mod fonts;
mod layout;
mod matcher;
mod renderer;
mod scene;
mod service;
mod types;
mod vector;

use crate::config::AppConfig;

/// 启动期预热：字体数据库与曲绘目录索引。
///
/// 只用于降低首个任务的延迟，不影响渲染结果。
pub fn prewarm(config: &AppConfig) {
    let fonts = fonts::get_global_font_db();
    let index = matcher::index_for(&config.illustration_path());
    tracing::info!(
        "渲染资源预热完成: 字体 {} 个, 曲绘 {} 张",
        fonts.len(),
        index.len()
    );
}

pub use background::{BackgroundKey, BackgroundProcessor};
pub use cache::{
    AssetCache, AssetCacheOptions, CacheKey, CacheStats, Illustration, IllustrationDecoder,
    IllustrationKind, IllustrationRequest, IllustrationState, ImageDecoder,
};
pub use cover_loader::{LoadedCovers, load_covers};
pub use filters::{GlowPass, box_blur, glow_passes};
pub use layout::{
    Layout, SongLayout, compute_layout, compute_song_layout, min_canvas_height, min_canvas_width,
};
pub use matcher::{
    IllustrationIndex, MatchResolver, MatchTier, Matcher, Resolved, index_for, normalize_title,
    rebuild_index,
};
pub use service::ImageService;
pub use types::{
    Card, CardContent, CardHeader, ImageFormat, OutputKind, RenderConfig, RenderJob,
    RenderOutcome, RenderReport, SongCard, StageTimings,
};
