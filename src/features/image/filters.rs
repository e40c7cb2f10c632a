use image::RgbaImage;

/// 盒式模糊迭代次数（三次近似高斯）
pub const BOX_BLUR_ITERATIONS: u32 = 3;

/// 对 RGBA 缓冲做可分离盒式模糊（先水平后垂直，边缘像素延伸）。
///
/// 对预乘与非预乘数据都适用；`radius == 0` 时不做任何处理。
pub fn box_blur(data: &mut [u8], width: u32, height: u32, radius: u32, iterations: u32) {
    let (w, h) = (width as usize, height as usize);
    if radius == 0 || w == 0 || h == 0 || data.len() < w * h * 4 {
        return;
    }
    let mut scratch = vec![0u8; w * h * 4];
    for _ in 0..iterations {
        blur_pass(data, &mut scratch, w, h, radius as usize, true);
        blur_pass(&scratch, data, w, h, radius as usize, false);
    }
}

fn blur_pass(src: &[u8], dst: &mut [u8], w: usize, h: usize, r: usize, horizontal: bool) {
    let (lines, len) = if horizontal { (h, w) } else { (w, h) };
    let window = (2 * r + 1) as u32;
    let idx = |line: usize, pos: usize| -> usize {
        if horizontal {
            (line * w + pos) * 4
        } else {
            (pos * w + line) * 4
        }
    };

    for line in 0..lines {
        let mut sum = [0u32; 4];
        // 初始窗口 [-r, r]，越界位置取边缘像素
        for k in 0..=2 * r {
            let pos = k.saturating_sub(r).min(len - 1);
            let i = idx(line, pos);
            for c in 0..4 {
                sum[c] += src[i + c] as u32;
            }
        }
        for pos in 0..len {
            let o = idx(line, pos);
            for c in 0..4 {
                dst[o + c] = ((sum[c] + window / 2) / window) as u8;
            }
            let out_pos = pos.saturating_sub(r);
            let in_pos = (pos + r + 1).min(len - 1);
            // 左侧越界时移出的是边缘像素
            let out_i = if pos < r { idx(line, 0) } else { idx(line, out_pos) };
            let in_i = idx(line, in_pos);
            for c in 0..4 {
                sum[c] = sum[c] + src[in_i + c] as u32 - src[out_i + c] as u32;
            }
        }
    }
}

/// 模糊整张图片
pub fn blur_image(img: &mut RgbaImage, radius: u32) {
    let (w, h) = img.dimensions();
    box_blur(img, w, h, radius, BOX_BLUR_ITERATIONS);
}

/// 叠加一层均匀黑色（alpha = level）
pub fn darken(img: &mut RgbaImage, level: f32) {
    let keep = 1.0 - level.clamp(0.0, 1.0);
    if keep >= 1.0 {
        return;
    }
    for px in img.pixels_mut() {
        for c in 0..3 {
            px.0[c] = (px.0[c] as f32 * keep).round() as u8;
        }
    }
}

/// 一层发光模糊
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GlowPass {
    pub radius: u32,
    pub opacity: f32,
}

/// 发光层序列：半径逐层增大、不透明度严格递减。
///
/// 绘制时应从最后一层（最大、最淡）开始，清晰文字最后绘制。
pub fn glow_passes(passes: u32, radius: u32) -> Vec<GlowPass> {
    let n = passes.max(1);
    let radius = radius.max(1);
    (1..=n)
        .map(|k| GlowPass {
            radius: ((radius * k) as f32 / n as f32).ceil().max(1.0) as u32,
            opacity: 0.6 * (n - k + 1) as f32 / n as f32,
        })
        .collect()
}

#[cfg(test)]
pub(crate) fn luma_variance(img: &RgbaImage) -> f64 {
    let n = (img.width() * img.height()) as f64;
    let lumas: Vec<f64> = img
        .pixels()
        .map(|p| 0.299 * p.0[0] as f64 + 0.587 * p.0[1] as f64 + 0.114 * p.0[2] as f64)
        .collect();
    let mean = lumas.iter().sum::<f64>() / n;
    lumas.iter().map(|l| (l - mean).powi(2)).sum::<f64>() / n
}
