use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::layout::{SONG_MIN_WIDTH, min_canvas_height, min_canvas_width};
use crate::config::AppConfig;
use crate::features::score::{AssetKey, Difficulty, ScoreRecord};

/// 栅格输出格式
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    /// PNG（默认，无损）
    #[default]
    Png,
    /// JPEG（有损压缩，透明通道压到黑底）
    #[serde(alias = "jpg")]
    Jpeg,
    /// WebP（质量 100 时使用无损模式）
    Webp,
}

impl ImageFormat {
    pub fn content_type(self) -> &'static str {
        match self {
            ImageFormat::Png => "image/png",
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Webp => "image/webp",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Jpeg => "jpg",
            ImageFormat::Webp => "webp",
        }
    }
}

/// 输出类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    /// 栅格合成后编码
    #[default]
    Raster,
    /// 直接输出 SVG 文档
    Vector,
}

/// 单次渲染参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderConfig {
    /// 编码质量 1-100（越界值在任务开始时钳制）
    pub quality: u32,
    pub width: u32,
    /// 画布高度（None 表示按行数自动计算）
    pub height: Option<u32>,
    pub columns: u32,
    pub blur_radius: u32,
    pub darken_level: f32,
    pub glow_enabled: bool,
    pub glow_passes: u32,
    pub glow_radius: u32,
    pub glow_color: String,
    pub output: OutputKind,
    pub format: ImageFormat,
    pub embed_images: bool,
    pub optimize_speed: bool,
    pub illustration_dir: PathBuf,
    /// 头像目录（文件名主干即头像名）
    pub avatar_dir: PathBuf,
    pub background_image: Option<PathBuf>,
    pub public_base_url: Option<String>,
    pub footer_text: String,
}

pub const MAX_CANVAS_WIDTH: u32 = 8192;
pub const MAX_CANVAS_HEIGHT: u32 = 16384;
pub const MAX_COLUMNS: u32 = 6;
pub const MAX_BLUR_RADIUS: u32 = 64;
pub const MAX_GLOW_PASSES: u32 = 8;
pub const MAX_GLOW_RADIUS: u32 = 32;

impl RenderConfig {
    /// 由应用配置构建默认渲染参数
    pub fn from_app_config(config: &AppConfig) -> Self {
        let r = &config.render;
        Self {
            quality: r.quality,
            width: r.width,
            height: r.height,
            columns: r.columns,
            blur_radius: r.blur_radius,
            darken_level: r.darken_level,
            glow_enabled: r.glow_enabled,
            glow_passes: r.glow_passes,
            glow_radius: r.glow_radius,
            glow_color: r.glow_color.clone(),
            output: r.output,
            format: r.format,
            embed_images: r.embed_images,
            optimize_speed: r.optimize_speed,
            illustration_dir: config.illustration_path(),
            avatar_dir: config.avatar_path(),
            background_image: config.resources.background_image.as_ref().map(PathBuf::from),
            public_base_url: r.public_base_url.clone(),
            footer_text: config.branding.footer_text.clone(),
        }
    }

    /// 编码器使用的质量值
    pub fn encode_quality(&self) -> u8 {
        u8::try_from(self.quality.clamp(1, 100)).unwrap_or(100)
    }

    /// 将越界参数钳制到合法范围，返回钳制后的配置与调整说明。
    ///
    /// 画布过窄或过矮时抬高到该内容所需的最小尺寸。
    /// 宽高为 0 不在此处修正，由布局阶段作为校验错误返回。
    pub fn clamped(&self, content: &CardContent) -> (Self, Vec<String>) {
        let mut c = self.clone();
        let mut notes = Vec::new();

        let quality = self.quality.clamp(1, 100);
        if quality != self.quality {
            notes.push(format!("quality {} -> {}", self.quality, quality));
            c.quality = quality;
        }
        let columns = self.columns.clamp(1, MAX_COLUMNS);
        if columns != self.columns {
            notes.push(format!("columns {} -> {}", self.columns, columns));
            c.columns = columns;
        }

        let (min_width, min_height) = match content {
            CardContent::BestN(records) => {
                let rows = (records.len().max(1) as u32).div_ceil(columns);
                (min_canvas_width(columns), Some(min_canvas_height(rows)))
            }
            CardContent::Song(_) => (SONG_MIN_WIDTH, None),
        };
        let width = match self.width {
            0 => 0,
            w if w > MAX_CANVAS_WIDTH => MAX_CANVAS_WIDTH,
            w => w.max(min_width),
        };
        if width != self.width {
            notes.push(format!("width {} -> {}", self.width, width));
            c.width = width;
        }
        if let (Some(h), Some(min_h)) = (self.height, min_height) {
            let height = match h {
                0 => 0,
                h => h.min(MAX_CANVAS_HEIGHT).max(min_h),
            };
            if height != h {
                notes.push(format!("height {h} -> {height}"));
                c.height = Some(height);
            }
        }
        if self.blur_radius > MAX_BLUR_RADIUS {
            notes.push(format!("blur_radius {} -> {}", self.blur_radius, MAX_BLUR_RADIUS));
            c.blur_radius = MAX_BLUR_RADIUS;
        }
        let darken = if self.darken_level.is_nan() {
            0.0
        } else {
            self.darken_level.clamp(0.0, 1.0)
        };
        if darken != self.darken_level {
            notes.push(format!("darken_level {} -> {}", self.darken_level, darken));
            c.darken_level = darken;
        }
        let passes = self.glow_passes.clamp(1, MAX_GLOW_PASSES);
        if passes != self.glow_passes {
            notes.push(format!("glow_passes {} -> {}", self.glow_passes, passes));
            c.glow_passes = passes;
        }
        let radius = self.glow_radius.clamp(1, MAX_GLOW_RADIUS);
        if radius != self.glow_radius {
            notes.push(format!("glow_radius {} -> {}", self.glow_radius, radius));
            c.glow_radius = radius;
        }
        (c, notes)
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self::from_app_config(&AppConfig::default())
    }
}

/// 头部信息（玩家名、头像、课题段位、RKS、更新时间、页脚）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CardHeader {
    #[serde(default, alias = "nickname")]
    pub player_name: String,
    /// 头像名（头像目录中的文件名主干）
    #[serde(default)]
    pub avatar: Option<String>,
    /// 课题模式段位原始值：百位为颜色（1-6），其余为等级；小于 100 时只有颜色
    #[serde(default, alias = "challengeModeRank")]
    pub challenge_rank: Option<u32>,
    #[serde(default)]
    pub rks: Option<f64>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    /// 覆盖配置中的右下角文字
    #[serde(default)]
    pub footer: Option<String>,
}

impl CardHeader {
    /// 头像查找键（曲师为空，仅按文件名主干匹配）
    pub fn avatar_key(&self) -> Option<AssetKey> {
        self.avatar
            .as_deref()
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(|a| AssetKey::new(a, ""))
    }
}

/// 单曲详情
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SongCard {
    #[serde(alias = "name")]
    pub title: String,
    #[serde(default)]
    pub composer: String,
    #[serde(default)]
    pub illustrator: String,
    /// 各难度定数
    #[serde(default, alias = "chartConstants")]
    pub constants: BTreeMap<Difficulty, f64>,
}

impl SongCard {
    pub fn asset_key(&self) -> AssetKey {
        AssetKey::new(&self.title, &self.composer)
    }
}

/// 渲染内容
#[derive(Debug, Clone)]
pub enum CardContent {
    /// BestN 成绩网格（已排序）
    BestN(Vec<ScoreRecord>),
    /// 单曲详情卡
    Song(SongCard),
}

/// 一次渲染任务
#[derive(Debug, Clone)]
pub struct RenderJob {
    pub content: CardContent,
    pub config: RenderConfig,
    pub header: Option<CardHeader>,
}

impl RenderJob {
    pub fn new(records: Vec<ScoreRecord>, config: RenderConfig) -> Self {
        Self {
            content: CardContent::BestN(records),
            config,
            header: None,
        }
    }

    pub fn song(song: SongCard, config: RenderConfig) -> Self {
        Self {
            content: CardContent::Song(song),
            config,
            header: None,
        }
    }

    pub fn with_header(mut self, header: CardHeader) -> Self {
        self.header = Some(header);
        self
    }
}

/// 渲染产物，所有权转移给调用方
#[derive(Debug, Clone)]
pub enum Card {
    Raster { bytes: Vec<u8>, format: ImageFormat },
    Vector { document: String },
}

impl Card {
    pub fn content_type(&self) -> &'static str {
        match self {
            Card::Raster { format, .. } => format.content_type(),
            Card::Vector { .. } => "image/svg+xml; charset=utf-8",
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Card::Raster { bytes, .. } => bytes,
            Card::Vector { document } => document.as_bytes(),
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Card::Raster { bytes, .. } => bytes,
            Card::Vector { document } => document.into_bytes(),
        }
    }
}

/// 各阶段耗时
#[derive(Debug, Clone, Default)]
pub struct StageTimings {
    pub load: Duration,
    pub background: Duration,
    pub compose: Duration,
    pub total: Duration,
}

/// 渲染任务摘要
#[derive(Debug, Clone, Default)]
pub struct RenderReport {
    pub entries: usize,
    pub covers: usize,
    pub placeholders: usize,
    pub distinct_keys: usize,
    /// 本次任务中内存层命中次数
    pub cache_hits: u64,
    /// 本次任务中触发的解码次数
    pub decodes: u64,
    /// 被钳制的参数说明
    pub clamped: Vec<String>,
    pub timings: StageTimings,
}

#[derive(Debug, Clone)]
pub struct RenderOutcome {
    pub card: Card,
    pub report: RenderReport,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn best(n: usize) -> CardContent {
        let records = (0..n)
            .map(|i| ScoreRecord::new(format!("Song{i}"), "Artist", Difficulty::IN, 990_000, 0.99, false))
            .collect();
        CardContent::BestN(records)
    }

    #[test]
    fn out_of_range_values_are_clamped_not_rejected() {
        let cfg = RenderConfig {
            quality: 0,
            columns: 40,
            blur_radius: 1000,
            darken_level: 3.5,
            glow_passes: 0,
            width: 100_000,
            ..RenderConfig::default()
        };
        let (c, notes) = cfg.clamped(&best(3));
        assert_eq!(c.quality, 1);
        assert_eq!(c.columns, MAX_COLUMNS);
        assert_eq!(c.blur_radius, MAX_BLUR_RADIUS);
        assert_eq!(c.darken_level, 1.0);
        assert_eq!(c.glow_passes, 1);
        assert_eq!(c.width, MAX_CANVAS_WIDTH);
        assert_eq!(notes.len(), 6);
    }

    #[test]
    fn valid_config_is_untouched() {
        let (c, notes) = RenderConfig::default().clamped(&best(30));
        assert!(notes.is_empty());
        assert_eq!(c.quality, 95);
        assert_eq!(c.encode_quality(), 95);
    }

    #[test]
    fn quality_above_byte_range_is_clamped() {
        let cfg = RenderConfig {
            quality: 300,
            ..RenderConfig::default()
        };
        let (c, notes) = cfg.clamped(&best(1));
        assert_eq!(c.quality, 100);
        assert_eq!(c.encode_quality(), 100);
        assert_eq!(notes, vec!["quality 300 -> 100".to_string()]);
    }

    #[test]
    fn narrow_or_short_canvas_is_raised_to_minimum() {
        let cfg = RenderConfig {
            width: 400,
            height: Some(100),
            ..RenderConfig::default()
        };
        let (c, notes) = cfg.clamped(&best(7));
        assert_eq!(c.width, min_canvas_width(3));
        assert_eq!(c.height, Some(min_canvas_height(3)));
        assert_eq!(notes.len(), 2);

        // 宽高为 0 留给布局阶段报错
        let zero = RenderConfig {
            width: 0,
            height: Some(0),
            ..RenderConfig::default()
        };
        let (c, notes) = zero.clamped(&best(7));
        assert_eq!((c.width, c.height), (0, Some(0)));
        assert!(notes.is_empty());
    }

    #[test]
    fn song_card_uses_its_own_minimum_width() {
        let cfg = RenderConfig {
            width: 200,
            height: Some(10),
            ..RenderConfig::default()
        };
        let (c, notes) = cfg.clamped(&CardContent::Song(SongCard::default()));
        assert_eq!(c.width, SONG_MIN_WIDTH);
        assert_eq!(c.height, Some(10));
        assert_eq!(notes.len(), 1);
    }

    #[test]
    fn header_accepts_upstream_field_names() {
        let json = r#"{"nickname":"Mivik","avatar":" Glaciaxion ","challengeModeRank":548,"rks":15.2}"#;
        let header: CardHeader = serde_json::from_str(json).unwrap();
        assert_eq!(header.player_name, "Mivik");
        assert_eq!(header.challenge_rank, Some(548));
        assert_eq!(header.avatar_key(), Some(AssetKey::new("Glaciaxion", "")));
    }

    #[test]
    fn song_card_parses_constant_table() {
        let json = r#"{"name":"Rrhar'il","composer":"Team Grimoire","illustrator":"Catrong","chartConstants":{"ez":4.0,"IN":15.8,"at":16.4}}"#;
        let song: SongCard = serde_json::from_str(json).unwrap();
        assert_eq!(song.title, "Rrhar'il");
        let order: Vec<Difficulty> = song.constants.keys().copied().collect();
        assert_eq!(order, vec![Difficulty::EZ, Difficulty::IN, Difficulty::AT]);
        assert_eq!(song.asset_key(), AssetKey::new("Rrhar'il", "Team Grimoire"));
    }

    #[test]
    fn card_reports_content_type() {
        let card = Card::Vector {
            document: "<svg/>".into(),
        };
        assert!(card.content_type().starts_with("image/svg+xml"));
        assert_eq!(card.len(), 6);
    }
}
