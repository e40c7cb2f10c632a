use std::fmt::Write;
use std::sync::Arc;

use image::RgbaImage;
use image::imageops::FilterType;
use resvg::usvg;
use tiny_skia::{
    FillRule, FilterQuality, IntSize, Paint, Path, PathBuilder, Pattern, Pixmap, PixmapPaint,
    SpreadMode, Stroke, Transform,
};

use super::cache::Illustration;
use super::filters;
use super::fonts;
use super::layout::Rect;
use super::scene::{Color, Element, Scene, TextItem, write_text};
use crate::error::AppError;

/// 发光层每次模糊的盒式迭代次数
const GLOW_BLUR_ITERATIONS: u32 = 2;

/// 栅格合成：背景 -> 卡片与徽章 -> 曲绘 -> 发光层 -> 清晰文字。
///
/// 返回预乘格式的画布，由调用方编码。
pub fn compose_raster(
    scene: &Scene,
    backdrop: &RgbaImage,
    covers: &[Arc<Illustration>],
    optimize_speed: bool,
) -> Result<Pixmap, AppError> {
    let t0 = std::time::Instant::now();
    let (w, h) = (scene.width, scene.height);

    let mut canvas = if backdrop.dimensions() == (w, h) {
        pixmap_from_rgba(backdrop)?
    } else {
        let resized = image::imageops::resize(backdrop, w, h, FilterType::Triangle);
        pixmap_from_rgba(&resized)?
    };

    let quality = if optimize_speed {
        FilterQuality::Bilinear
    } else {
        FilterQuality::Bicubic
    };
    for element in &scene.elements {
        match element {
            Element::Rect {
                rect,
                radius,
                fill,
                stroke,
            } => draw_rect(&mut canvas, rect, *radius, *fill, *stroke),
            Element::Cover {
                index,
                rect,
                radius,
            } => {
                let Some(ill) = covers.get(*index) else {
                    continue;
                };
                draw_cover(&mut canvas, &ill.bitmap, rect, *radius, quality)?;
            }
            Element::Text(_) => {}
        }
    }
    let t_shapes = t0.elapsed();

    if let Some(glow) = scene.glow.as_ref().filter(|_| scene.has_glow_text()) {
        if let Some(layer) =
            render_text_layer(scene, |t| t.glow, Some(glow.color), optimize_speed)?
        {
            // 从最大、最淡的一层开始绘制
            for pass in glow.passes.iter().rev() {
                let mut blurred = layer.clone();
                filters::box_blur(blurred.data_mut(), w, h, pass.radius, GLOW_BLUR_ITERATIONS);
                let paint = PixmapPaint {
                    opacity: pass.opacity,
                    ..Default::default()
                };
                canvas.draw_pixmap(0, 0, blurred.as_ref(), &paint, Transform::identity(), None);
            }
        }
    }
    let t_glow = t0.elapsed();

    if let Some(layer) = render_text_layer(scene, |_| true, None, optimize_speed)? {
        canvas.draw_pixmap(
            0,
            0,
            layer.as_ref(),
            &PixmapPaint::default(),
            Transform::identity(),
            None,
        );
    }

    tracing::debug!(
        "栅格合成分段: 图形={:?}, 发光={:?}, 文字={:?}",
        t_shapes,
        t_glow - t_shapes,
        t0.elapsed() - t_glow
    );
    Ok(canvas)
}

/// 直通 RGBA -> 预乘 Pixmap
fn pixmap_from_rgba(img: &RgbaImage) -> Result<Pixmap, AppError> {
    let size = IntSize::from_wh(img.width(), img.height())
        .ok_or_else(|| AppError::ImageRendererError("Invalid pixmap size".to_string()))?;
    let mut data = img.as_raw().clone();
    for px in data.chunks_exact_mut(4) {
        let a = px[3] as u16;
        if a < 255 {
            for c in &mut px[..3] {
                *c = ((*c as u16 * a + 127) / 255) as u8;
            }
        }
    }
    Pixmap::from_vec(data, size)
        .ok_or_else(|| AppError::ImageRendererError("Failed to create pixmap".to_string()))
}

fn rounded_rect_path(rect: &Rect, radius: f32) -> Option<Path> {
    let r = radius.clamp(0.0, rect.w.min(rect.h) / 2.0);
    let (x, y, w, h) = (rect.x, rect.y, rect.w, rect.h);
    let mut pb = PathBuilder::new();
    pb.move_to(x + r, y);
    pb.line_to(x + w - r, y);
    pb.quad_to(x + w, y, x + w, y + r);
    pb.line_to(x + w, y + h - r);
    pb.quad_to(x + w, y + h, x + w - r, y + h);
    pb.line_to(x + r, y + h);
    pb.quad_to(x, y + h, x, y + h - r);
    pb.line_to(x, y + r);
    pb.quad_to(x, y, x + r, y);
    pb.close();
    pb.finish()
}

fn solid_paint(color: Color) -> Paint<'static> {
    let mut paint = Paint::default();
    let alpha = (color.a.clamp(0.0, 1.0) * 255.0).round() as u8;
    paint.set_color_rgba8(color.r, color.g, color.b, alpha);
    paint.anti_alias = true;
    paint
}

fn draw_rect(
    canvas: &mut Pixmap,
    rect: &Rect,
    radius: f32,
    fill: Color,
    stroke: Option<(Color, f32)>,
) {
    let Some(path) = rounded_rect_path(rect, radius) else {
        return;
    };
    canvas.fill_path(
        &path,
        &solid_paint(fill),
        FillRule::Winding,
        Transform::identity(),
        None,
    );
    if let Some((color, width)) = stroke {
        let stroke = Stroke {
            width,
            ..Default::default()
        };
        canvas.stroke_path(&path, &solid_paint(color), &stroke, Transform::identity(), None);
    }
}

/// 以圆角矩形为裁剪区域铺满曲绘（尺寸不符时按比例拉伸到目标区域）
fn draw_cover(
    canvas: &mut Pixmap,
    bitmap: &RgbaImage,
    rect: &Rect,
    radius: f32,
    quality: FilterQuality,
) -> Result<(), AppError> {
    let Some(path) = rounded_rect_path(rect, radius) else {
        return Ok(());
    };
    let cover = pixmap_from_rgba(bitmap)?;
    let sx = rect.w / cover.width() as f32;
    let sy = rect.h / cover.height() as f32;
    let mut paint = Paint::default();
    paint.anti_alias = true;
    paint.shader = Pattern::new(
        cover.as_ref(),
        SpreadMode::Pad,
        quality,
        1.0,
        Transform::from_row(sx, 0.0, 0.0, sy, rect.x, rect.y),
    );
    canvas.fill_path(&path, &paint, FillRule::Winding, Transform::identity(), None);
    Ok(())
}

/// 将筛选出的文字渲染到透明图层；没有文字时返回 None
fn render_text_layer(
    scene: &Scene,
    select: impl Fn(&TextItem) -> bool,
    fill: Option<Color>,
    optimize_speed: bool,
) -> Result<Option<Pixmap>, AppError> {
    let fmt_err = |e: std::fmt::Error| AppError::ImageRendererError(format!("SVG formatting error: {e}"));
    let (w, h) = (scene.width, scene.height);

    let mut svg = String::with_capacity(16_384);
    writeln!(
        svg,
        r#"<svg width="{w}" height="{h}" viewBox="0 0 {w} {h}" xmlns="http://www.w3.org/2000/svg">"#
    )
    .map_err(fmt_err)?;
    let mut any = false;
    for item in scene.texts().filter(|t| select(t)) {
        write_text(&mut svg, item, fill).map_err(fmt_err)?;
        any = true;
    }
    if !any {
        return Ok(None);
    }
    writeln!(svg, "</svg>").map_err(fmt_err)?;

    let opts = fonts::usvg_options(optimize_speed);
    let tree = usvg::Tree::from_data(svg.as_bytes(), &opts)
        .map_err(|e| AppError::ImageRendererError(format!("Failed to parse SVG: {e}")))?;
    let mut layer = Pixmap::new(w, h)
        .ok_or_else(|| AppError::ImageRendererError("Failed to create pixmap".to_string()))?;
    resvg::render(&tree, Transform::default(), &mut layer.as_mut());
    Ok(Some(layer))
}
