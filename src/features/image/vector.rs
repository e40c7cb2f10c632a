use std::fmt::Write;

use super::fonts::MAIN_FONT_NAME;
use super::layout::Rect;
use super::scene::{Color, Element, Scene, escape_xml, write_text};
use crate::error::AppError;

/// 占位曲绘底色
const PLACEHOLDER_FILL: &str = "#333333";
const GRADIENT_FROM: &str = "#141826";
const GRADIENT_TO: &str = "#252E48";

/// 矢量文档的背景来源
#[derive(Debug, Clone)]
pub enum Backdrop {
    /// 已模糊压暗的背景，内嵌为 Data URI
    Embedded(String),
    /// 外部引用的原图，模糊与压暗由 SVG 滤镜完成
    Reference {
        href: String,
        blur_radius: u32,
        darken_level: f32,
    },
    /// 内置渐变
    Gradient { darken_level: f32 },
}

/// 输出 SVG 文档。
///
/// `cover_hrefs[i]` 为第 i 条记录的曲绘引用（Data URI 或路径），None 表示占位图。
pub fn emit_svg(
    scene: &Scene,
    cover_hrefs: &[Option<String>],
    backdrop: &Backdrop,
) -> Result<String, AppError> {
    let fmt_err = |e: std::fmt::Error| AppError::ImageRendererError(format!("SVG formatting error: {e}"));
    let (w, h) = (scene.width, scene.height);
    let mut svg = String::with_capacity(32_768 + scene.elements.len() * 160);

    writeln!(
        svg,
        r#"<svg width="{w}" height="{h}" viewBox="0 0 {w} {h}" xmlns="http://www.w3.org/2000/svg" xmlns:xlink="http://www.w3.org/1999/xlink">"#
    )
    .map_err(fmt_err)?;
    write_defs(&mut svg, scene, backdrop).map_err(fmt_err)?;
    write_backdrop(&mut svg, w, h, backdrop).map_err(fmt_err)?;

    // 形状与曲绘
    for element in &scene.elements {
        match element {
            Element::Rect {
                rect,
                radius,
                fill,
                stroke,
            } => write_rect(&mut svg, rect, *radius, *fill, *stroke).map_err(fmt_err)?,
            Element::Cover {
                index,
                rect,
                radius,
            } => {
                let href = cover_hrefs.get(*index).and_then(|h| h.as_deref());
                write_cover(&mut svg, *index, rect, *radius, href).map_err(fmt_err)?;
            }
            Element::Text(_) => {}
        }
    }

    // 发光层在清晰文字之下
    if let Some(glow) = scene.glow.as_ref().filter(|_| scene.has_glow_text()) {
        for (k, pass) in glow.passes.iter().enumerate().rev() {
            writeln!(
                svg,
                r#"<g filter="url(#glow-{k})" opacity="{:.3}">"#,
                pass.opacity
            )
            .map_err(fmt_err)?;
            for item in scene.texts().filter(|t| t.glow) {
                write_text(&mut svg, item, Some(glow.color)).map_err(fmt_err)?;
            }
            writeln!(svg, "</g>").map_err(fmt_err)?;
        }
    }

    writeln!(svg, "<g>").map_err(fmt_err)?;
    for item in scene.texts() {
        write_text(&mut svg, item, None).map_err(fmt_err)?;
    }
    writeln!(svg, "</g>").map_err(fmt_err)?;
    writeln!(svg, "</svg>").map_err(fmt_err)?;
    Ok(svg)
}

fn write_defs(svg: &mut String, scene: &Scene, backdrop: &Backdrop) -> std::fmt::Result {
    writeln!(svg, "<defs>")?;
    writeln!(
        svg,
        "<style>text {{ font-family: \"{MAIN_FONT_NAME}\", \"Noto Sans CJK SC\", sans-serif; }}</style>"
    )?;
    writeln!(
        svg,
        r#"<linearGradient id="bg-gradient" x1="0" y1="0" x2="1" y2="1"><stop offset="0" stop-color="{GRADIENT_FROM}"/><stop offset="1" stop-color="{GRADIENT_TO}"/></linearGradient>"#
    )?;
    if let Backdrop::Reference { blur_radius, .. } = backdrop {
        writeln!(
            svg,
            r#"<filter id="bg-blur" x="-5%" y="-5%" width="110%" height="110%"><feGaussianBlur stdDeviation="{blur_radius}"/></filter>"#
        )?;
    }
    if let Some(glow) = scene.glow.as_ref() {
        for (k, pass) in glow.passes.iter().enumerate() {
            writeln!(
                svg,
                r#"<filter id="glow-{k}" x="-50%" y="-50%" width="200%" height="200%"><feGaussianBlur stdDeviation="{}"/></filter>"#,
                pass.radius
            )?;
        }
    }
    for element in &scene.elements {
        if let Element::Cover { index, rect, radius } = element {
            write!(svg, r#"<clipPath id="cover-clip-{index}">"#)?;
            rect_tag(svg, rect, *radius)?;
            writeln!(svg, "/></clipPath>")?;
        }
    }
    writeln!(svg, "</defs>")
}

fn write_backdrop(svg: &mut String, w: u32, h: u32, backdrop: &Backdrop) -> std::fmt::Result {
    match backdrop {
        Backdrop::Embedded(uri) => writeln!(
            svg,
            r#"<image x="0" y="0" width="{w}" height="{h}" href="{}" preserveAspectRatio="xMidYMid slice"/>"#,
            escape_xml(uri)
        ),
        Backdrop::Reference {
            href,
            darken_level,
            ..
        } => {
            writeln!(
                svg,
                r#"<image x="0" y="0" width="{w}" height="{h}" href="{}" preserveAspectRatio="xMidYMid slice" filter="url(#bg-blur)"/>"#,
                escape_xml(href)
            )?;
            write_darken(svg, w, h, *darken_level)
        }
        Backdrop::Gradient { darken_level } => {
            writeln!(
                svg,
                r#"<rect x="0" y="0" width="{w}" height="{h}" fill="url(#bg-gradient)"/>"#
            )?;
            write_darken(svg, w, h, *darken_level)
        }
    }
}

fn write_darken(svg: &mut String, w: u32, h: u32, level: f32) -> std::fmt::Result {
    let level = level.clamp(0.0, 1.0);
    if level <= 0.0 {
        return Ok(());
    }
    writeln!(
        svg,
        r##"<rect x="0" y="0" width="{w}" height="{h}" fill="#000000" fill-opacity="{level:.3}"/>"##
    )
}

fn rect_tag(svg: &mut String, rect: &Rect, radius: f32) -> std::fmt::Result {
    write!(
        svg,
        r#"<rect x="{:.1}" y="{:.1}" width="{:.1}" height="{:.1}" rx="{:.1}""#,
        rect.x, rect.y, rect.w, rect.h, radius
    )
}

fn write_rect(
    svg: &mut String,
    rect: &Rect,
    radius: f32,
    fill: Color,
    stroke: Option<(Color, f32)>,
) -> std::fmt::Result {
    rect_tag(svg, rect, radius)?;
    write!(svg, r#" fill="{}""#, fill.hex())?;
    if fill.a < 1.0 {
        write!(svg, r#" fill-opacity="{:.3}""#, fill.a)?;
    }
    if let Some((color, width)) = stroke {
        write!(svg, r#" stroke="{}" stroke-width="{width:.1}""#, color.hex())?;
    }
    writeln!(svg, "/>")
}

fn write_cover(
    svg: &mut String,
    index: usize,
    rect: &Rect,
    radius: f32,
    href: Option<&str>,
) -> std::fmt::Result {
    match href {
        Some(href) => writeln!(
            svg,
            r#"<image x="{:.1}" y="{:.1}" width="{:.1}" height="{:.1}" href="{}" preserveAspectRatio="xMidYMid slice" clip-path="url(#cover-clip-{index})"/>"#,
            rect.x,
            rect.y,
            rect.w,
            rect.h,
            escape_xml(href)
        ),
        None => {
            rect_tag(svg, rect, radius)?;
            writeln!(svg, r#" fill="{PLACEHOLDER_FILL}"/>"#)
        }
    }
}
