use std::fs;
use std::path::Path;
use std::sync::{Arc, OnceLock};

use resvg::usvg::{self, fontdb};

use crate::config::AppConfig;

pub const MAIN_FONT_NAME: &str = "思源黑体 CN";

// 全局字体数据库单例
static GLOBAL_FONT_DB: OnceLock<Arc<fontdb::Database>> = OnceLock::new();

/// 初始化全局字体数据库：系统字体 + 配置目录下的 ttf/otf
fn init_global_font_db() -> Arc<fontdb::Database> {
    let mut font_db = fontdb::Database::new();
    font_db.load_system_fonts();

    let fonts_dir = AppConfig::global().fonts_path();
    load_font_dir(&mut font_db, &fonts_dir);
    tracing::info!("字体数据库初始化完成，共 {} 个字体", font_db.len());

    Arc::new(font_db)
}

fn load_font_dir(font_db: &mut fontdb::Database, dir: &Path) {
    let Ok(entries) = fs::read_dir(dir) else {
        tracing::debug!("字体目录不存在或不可读: {}", dir.display());
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let is_font = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("ttf") || e.eq_ignore_ascii_case("otf"));
        if path.is_file() && is_font {
            if let Err(e) = font_db.load_font_file(&path) {
                tracing::error!("加载字体文件失败 '{}': {}", path.display(), e);
            }
        }
    }
}

/// 获取全局字体数据库
pub fn get_global_font_db() -> Arc<fontdb::Database> {
    GLOBAL_FONT_DB.get_or_init(init_global_font_db).clone()
}

/// 文字图层解析参数
pub fn usvg_options(optimize_speed: bool) -> usvg::Options<'static> {
    usvg::Options {
        fontdb: get_global_font_db(),
        font_family: MAIN_FONT_NAME.to_string(),
        font_size: 16.0,
        languages: vec!["zh-CN".to_string(), "en".to_string()],
        shape_rendering: if optimize_speed {
            usvg::ShapeRendering::OptimizeSpeed
        } else {
            usvg::ShapeRendering::GeometricPrecision
        },
        text_rendering: if optimize_speed {
            usvg::TextRendering::OptimizeSpeed
        } else {
            usvg::TextRendering::OptimizeLegibility
        },
        ..Default::default()
    }
}
