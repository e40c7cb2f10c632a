use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::features::image::{ImageFormat, OutputKind};

/// 全局配置单例
static CONFIG: OnceCell<AppConfig> = OnceCell::new();

/// 未初始化全局配置时使用的默认配置
static DEFAULT_CONFIG: OnceCell<AppConfig> = OnceCell::new();

/// 资源配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourcesConfig {
    /// 曲绘目录（文件名约定：`<曲名>.<曲师>.<ext>` 或 `<曲名>.<ext>`）
    #[serde(default = "ResourcesConfig::default_illustration_dir")]
    pub illustration_dir: String,
    /// 自定义背景图（缺省使用内置渐变背景）
    #[serde(default)]
    pub background_image: Option<String>,
    /// 磁盘缓存目录（预缩放曲绘）
    #[serde(default = "ResourcesConfig::default_cache_dir")]
    pub cache_dir: String,
    /// 额外字体目录（ttf/otf）
    #[serde(default = "ResourcesConfig::default_fonts_dir")]
    pub fonts_dir: String,
    /// 占位曲绘（缺省生成纯色占位图）
    #[serde(default)]
    pub placeholder_image: Option<String>,
    /// 头像目录（文件名主干即头像名）
    #[serde(default = "ResourcesConfig::default_avatar_dir")]
    pub avatar_dir: String,
}

impl ResourcesConfig {
    fn default_illustration_dir() -> String {
        "./resources/ILLUSTRATION".to_string()
    }
    fn default_cache_dir() -> String {
        "./resources/cache".to_string()
    }
    fn default_fonts_dir() -> String {
        "./resources/fonts".to_string()
    }
    fn default_avatar_dir() -> String {
        "./resources/AVATAR".to_string()
    }
}

impl Default for ResourcesConfig {
    fn default() -> Self {
        Self {
            illustration_dir: Self::default_illustration_dir(),
            background_image: None,
            cache_dir: Self::default_cache_dir(),
            fonts_dir: Self::default_fonts_dir(),
            placeholder_image: None,
            avatar_dir: Self::default_avatar_dir(),
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// 日志级别
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,
    /// 日志格式（full / compact）
    #[serde(default = "LoggingConfig::default_format")]
    pub format: String,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_string()
    }
    fn default_format() -> String {
        "full".to_string()
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            format: Self::default_format(),
        }
    }
}

/// 图片渲染默认参数（每个渲染任务可覆盖）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderDefaults {
    /// 编码质量 1-100（越界值在渲染时钳制）
    #[serde(default = "RenderDefaults::default_quality")]
    pub quality: u32,
    /// 画布宽度
    #[serde(default = "RenderDefaults::default_width")]
    pub width: u32,
    /// 画布高度（缺省按行数自动计算）
    #[serde(default)]
    pub height: Option<u32>,
    /// 列数
    #[serde(default = "RenderDefaults::default_columns")]
    pub columns: u32,
    /// 背景模糊半径（像素）
    #[serde(default = "RenderDefaults::default_blur_radius")]
    pub blur_radius: u32,
    /// 背景压暗程度 0.0-1.0
    #[serde(default = "RenderDefaults::default_darken_level")]
    pub darken_level: f32,
    /// 是否启用文字发光
    #[serde(default = "RenderDefaults::default_glow_enabled")]
    pub glow_enabled: bool,
    /// 发光模糊层数
    #[serde(default = "RenderDefaults::default_glow_passes")]
    pub glow_passes: u32,
    /// 发光最大半径
    #[serde(default = "RenderDefaults::default_glow_radius")]
    pub glow_radius: u32,
    /// 发光颜色（#RRGGBB）
    #[serde(default = "RenderDefaults::default_glow_color")]
    pub glow_color: String,
    /// 输出类型：raster / vector
    #[serde(default)]
    pub output: OutputKind,
    /// 栅格输出格式：png / jpeg / webp
    #[serde(default)]
    pub format: ImageFormat,
    /// 矢量输出是否内嵌图片
    #[serde(default = "RenderDefaults::default_embed_images")]
    pub embed_images: bool,
    /// 是否优先速度（降低缩放与文字渲染质量）
    #[serde(default)]
    pub optimize_speed: bool,
    /// 矢量输出不内嵌时，曲绘 href 的公共前缀（缺省使用本地路径）
    #[serde(default)]
    pub public_base_url: Option<String>,
}

impl RenderDefaults {
    fn default_quality() -> u32 {
        95
    }
    fn default_width() -> u32 {
        1200
    }
    fn default_columns() -> u32 {
        3
    }
    fn default_blur_radius() -> u32 {
        12
    }
    fn default_darken_level() -> f32 {
        0.55
    }
    fn default_glow_enabled() -> bool {
        true
    }
    fn default_glow_passes() -> u32 {
        3
    }
    fn default_glow_radius() -> u32 {
        4
    }
    fn default_glow_color() -> String {
        "#64C8FF".to_string()
    }
    fn default_embed_images() -> bool {
        true
    }
}

impl Default for RenderDefaults {
    fn default() -> Self {
        Self {
            quality: Self::default_quality(),
            width: Self::default_width(),
            height: None,
            columns: Self::default_columns(),
            blur_radius: Self::default_blur_radius(),
            darken_level: Self::default_darken_level(),
            glow_enabled: Self::default_glow_enabled(),
            glow_passes: Self::default_glow_passes(),
            glow_radius: Self::default_glow_radius(),
            glow_color: Self::default_glow_color(),
            output: OutputKind::default(),
            format: ImageFormat::default(),
            embed_images: Self::default_embed_images(),
            optimize_speed: false,
            public_base_url: None,
        }
    }
}

/// 缓存配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// 内存层容量（条目数，LRU 淘汰）
    #[serde(default = "CacheConfig::default_memory_capacity")]
    pub memory_capacity: usize,
    /// 背景变体缓存容量
    #[serde(default = "CacheConfig::default_background_capacity")]
    pub background_capacity: usize,
    /// 加载失败负缓存 TTL（秒）；缺省为进程生命周期
    #[serde(default)]
    pub negative_ttl_secs: Option<u64>,
    /// 并发加载宽度（0=自动，取 CPU 核心数）
    #[serde(default = "CacheConfig::default_workers")]
    pub workers: usize,
    /// 是否启用磁盘层
    #[serde(default = "CacheConfig::default_disk_enabled")]
    pub disk_enabled: bool,
}

impl CacheConfig {
    fn default_memory_capacity() -> usize {
        256
    }
    fn default_background_capacity() -> usize {
        10
    }
    fn default_workers() -> usize {
        4
    }
    fn default_disk_enabled() -> bool {
        true
    }

    /// 解析并发宽度（0 表示按 CPU 核心数）
    pub fn effective_workers(&self) -> usize {
        let n = if self.workers == 0 {
            num_cpus::get()
        } else {
            self.workers
        };
        n.clamp(1, 32)
    }

    /// 负缓存 TTL
    pub fn negative_ttl(&self) -> Option<std::time::Duration> {
        self.negative_ttl_secs.map(std::time::Duration::from_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory_capacity: Self::default_memory_capacity(),
            background_capacity: Self::default_background_capacity(),
            negative_ttl_secs: None,
            workers: Self::default_workers(),
            disk_enabled: Self::default_disk_enabled(),
        }
    }
}

/// 品牌/展示配置
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BrandingConfig {
    /// 右下角自定义文字（留空则不显示）
    #[serde(default)]
    pub footer_text: String,
}

/// 应用配置
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub resources: ResourcesConfig,
    /// 渲染默认参数
    #[serde(default)]
    pub render: RenderDefaults,
    /// 缓存配置
    #[serde(default)]
    pub cache: CacheConfig,
    /// 品牌/展示配置
    #[serde(default)]
    pub branding: BrandingConfig,
}

impl AppConfig {
    /// 从配置文件加载配置，支持环境变量覆盖
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(Self::get_config_path())
    }

    /// 从指定路径加载配置（文件可不存在，此时仅使用默认值与环境变量）
    pub fn load_from(config_path: PathBuf) -> Result<Self, ConfigError> {
        tracing::info!("正在从 {:?} 加载配置文件", config_path);

        let path_str = config_path
            .to_str()
            .ok_or_else(|| ConfigError::Message(format!("配置路径无效: {config_path:?}")))?;

        let builder = ConfigBuilder::builder()
            .add_source(File::with_name(path_str).required(false))
            // 支持环境变量覆盖，例如：PHICARD__RENDER__QUALITY=80
            .add_source(
                Environment::with_prefix("PHICARD")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        builder.try_deserialize()
    }

    /// 获取全局配置（未初始化时返回默认配置）
    pub fn global() -> &'static AppConfig {
        CONFIG
            .get()
            .unwrap_or_else(|| DEFAULT_CONFIG.get_or_init(AppConfig::default))
    }

    /// 初始化全局配置
    pub fn init_global() -> Result<(), ConfigError> {
        let config = Self::load()?;
        CONFIG
            .set(config)
            .map_err(|_| ConfigError::Message("配置已经被初始化".to_string()))?;
        Ok(())
    }

    /// 获取配置文件路径
    fn get_config_path() -> PathBuf {
        PathBuf::from("config.toml")
    }

    /// 获取曲绘目录
    pub fn illustration_path(&self) -> PathBuf {
        PathBuf::from(&self.resources.illustration_dir)
    }

    /// 获取头像目录
    pub fn avatar_path(&self) -> PathBuf {
        PathBuf::from(&self.resources.avatar_dir)
    }

    /// 获取磁盘缓存目录（禁用磁盘层时返回 None）
    pub fn cache_path(&self) -> Option<PathBuf> {
        self.cache
            .disk_enabled
            .then(|| PathBuf::from(&self.resources.cache_dir))
    }

    /// 获取字体目录
    pub fn fonts_path(&self) -> PathBuf {
        PathBuf::from(&self.resources.fonts_dir)
    }
}
