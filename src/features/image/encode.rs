use base64::{Engine as _, engine::general_purpose::STANDARD as base64_engine};
use image::ColorType;
use image::RgbaImage;
use image::codecs::jpeg::JpegEncoder;
use tiny_skia::Pixmap;

use super::types::ImageFormat;
use crate::error::AppError;

/// 内嵌曲绘/背景使用的 JPEG 质量
pub const EMBED_JPEG_QUALITY: u8 = 85;

/// 按格式与质量编码画布
pub fn encode_pixmap(pixmap: &Pixmap, format: ImageFormat, quality: u8) -> Result<Vec<u8>, AppError> {
    let (w, h) = (pixmap.width(), pixmap.height());
    let rgba = demultiplied_rgba(pixmap);
    let quality = quality.clamp(1, 100);
    match format {
        ImageFormat::Png => encode_png(&rgba, w, h, quality),
        ImageFormat::Jpeg => encode_jpeg(&rgba, w, h, quality),
        ImageFormat::Webp => Ok(encode_webp(&rgba, w, h, quality)),
    }
}

/// tiny-skia 像素为预乘格式，编码前还原
fn demultiplied_rgba(pixmap: &Pixmap) -> Vec<u8> {
    let mut out = Vec::with_capacity(pixmap.data().len());
    for px in pixmap.pixels() {
        let c = px.demultiply();
        out.extend_from_slice(&[c.red(), c.green(), c.blue(), c.alpha()]);
    }
    out
}

/// PNG 无损：质量越高越偏向速度（更大的文件），否则使用自适应过滤压缩体积
fn encode_png(rgba: &[u8], w: u32, h: u32, quality: u8) -> Result<Vec<u8>, AppError> {
    let mut out = Vec::with_capacity(rgba.len() / 2);
    {
        let mut encoder = png::Encoder::new(&mut out, w, h);
        encoder.set_color(png::ColorType::Rgba);
        encoder.set_depth(png::BitDepth::Eight);
        if quality >= 90 {
            encoder.set_compression(png::Compression::Fast);
            encoder.set_filter(png::FilterType::NoFilter);
        } else {
            encoder.set_compression(png::Compression::Default);
            encoder.set_filter(png::FilterType::Paeth);
            encoder.set_adaptive_filter(png::AdaptiveFilterType::Adaptive);
        }
        let mut writer = encoder
            .write_header()
            .map_err(|e| AppError::ImageRendererError(format!("PNG write_header error: {e}")))?;
        writer.write_image_data(rgba).map_err(|e| {
            AppError::ImageRendererError(format!("PNG write_image_data error: {e}"))
        })?;
        writer
            .finish()
            .map_err(|e| AppError::ImageRendererError(format!("PNG finish error: {e}")))?;
    }
    Ok(out)
}

/// 将 RGBA 扁平化到黑底（JPEG 无透明通道）
fn flatten_to_rgb(rgba: &[u8]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(rgba.len() / 4 * 3);
    for px in rgba.chunks_exact(4) {
        let a = px[3] as u16;
        for c in &px[..3] {
            rgb.push(((*c as u16 * a) / 255) as u8);
        }
    }
    rgb
}

fn encode_jpeg(rgba: &[u8], w: u32, h: u32, quality: u8) -> Result<Vec<u8>, AppError> {
    let rgb = flatten_to_rgb(rgba);
    let mut out = Vec::new();
    let mut enc = JpegEncoder::new_with_quality(&mut out, quality);
    enc.encode(&rgb, w, h, ColorType::Rgb8.into())
        .map_err(|e| AppError::ImageRendererError(format!("JPEG encode error: {e}")))?;
    Ok(out)
}

/// WebP：质量 100 使用无损模式
fn encode_webp(rgba: &[u8], w: u32, h: u32, quality: u8) -> Vec<u8> {
    let encoder = webp::Encoder::from_rgba(rgba, w, h);
    let data = if quality >= 100 {
        encoder.encode_lossless()
    } else {
        encoder.encode(quality as f32)
    };
    data.to_vec()
}

/// 将位图编码为 JPEG Data URI（矢量输出内嵌用）
pub fn jpeg_data_uri(img: &RgbaImage, quality: u8) -> Result<String, AppError> {
    let out = encode_jpeg(img.as_raw(), img.width(), img.height(), quality)?;
    Ok(format!("data:image/jpeg;base64,{}", base64_engine.encode(out)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tiny_skia::Color;

    fn canvas() -> Pixmap {
        let mut p = Pixmap::new(32, 20).unwrap();
        p.fill(Color::from_rgba8(40, 90, 160, 255));
        p
    }

    #[test]
    fn png_signature() {
        let bytes = encode_pixmap(&canvas(), ImageFormat::Png, 95).unwrap();
        assert_eq!(&bytes[..8], b"\x89PNG\r\n\x1a\n");
        let decoded = image::load_from_memory(&bytes).unwrap().to_rgba8();
        assert_eq!(decoded.get_pixel(3, 3).0, [40, 90, 160, 255]);
    }

    #[test]
    fn jpeg_signature_and_quality_affects_size() {
        let mut p = Pixmap::new(64, 64).unwrap();
        for (i, px) in p.data_mut().chunks_exact_mut(4).enumerate() {
            px.copy_from_slice(&[(i * 7) as u8, (i * 13) as u8, (i * 3) as u8, 255]);
        }
        let hi = encode_pixmap(&p, ImageFormat::Jpeg, 100).unwrap();
        let lo = encode_pixmap(&p, ImageFormat::Jpeg, 10).unwrap();
        assert_eq!(&hi[..2], &[0xFF, 0xD8]);
        assert!(hi.len() > lo.len());
    }

    #[test]
    fn webp_signature() {
        for q in [80, 100] {
            let bytes = encode_pixmap(&canvas(), ImageFormat::Webp, q).unwrap();
            assert_eq!(&bytes[0..4], b"RIFF");
            assert_eq!(&bytes[8..12], b"WEBP");
        }
    }

    #[test]
    fn flatten_uses_black_matte() {
        assert_eq!(flatten_to_rgb(&[200, 100, 50, 0, 10, 20, 30, 255]), vec![0, 0, 0, 10, 20, 30]);
    }
}
