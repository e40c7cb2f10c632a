use crate::error::AppError;

pub const COVER_ASPECT_RATIO: f32 = 512.0 / 270.0;
pub const HEADER_HEIGHT: f32 = 120.0;
pub const FOOTER_HEIGHT: f32 = 50.0;
pub const OUTER_PADDING: f32 = 12.0;
pub const CARD_PADDING: f32 = 10.0;
/// 标准卡片高度（文字块 100 + 上下内边距）
pub const NOMINAL_CARD_HEIGHT: f32 = 120.0;
pub const MIN_CARD_HEIGHT: f32 = 40.0;
pub const MIN_CARD_WIDTH: f32 = 120.0;
/// 曲绘最多占卡片宽度的比例
const MAX_COVER_WIDTH_RATIO: f32 = 0.55;
const COVER_TEXT_GAP: f32 = 15.0;
/// 头像边长（头部高度内垂直居中）
pub const AVATAR_SIZE: f32 = 80.0;

/// 单曲卡设计尺寸，实际尺寸按宽度等比缩放
pub const SONG_BASE_WIDTH: f32 = 1200.0;
pub const SONG_BASE_HEIGHT: f32 = 800.0;
pub const SONG_MIN_WIDTH: u32 = 480;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self { x, y, w, h }
    }

    pub fn right(&self) -> f32 {
        self.x + self.w
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.h
    }
}

/// 单张成绩卡片的几何信息
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CardSlot {
    pub card: Rect,
    pub cover: Rect,
    pub text_x: f32,
    pub text_width: f32,
}

#[derive(Debug, Clone)]
pub struct Layout {
    pub width: u32,
    pub height: u32,
    pub columns: u32,
    pub rows: u32,
    pub header: Rect,
    pub footer: Rect,
    pub card_width: f32,
    pub card_height: f32,
    pub cards: Vec<CardSlot>,
}

impl Layout {
    /// 相对标准卡片高度的缩放比例（字号与内部偏移按此缩放）
    pub fn scale(&self) -> f32 {
        self.card_height / NOMINAL_CARD_HEIGHT
    }

    /// 曲绘像素尺寸（所有卡片相同）
    pub fn cover_size(&self) -> (u32, u32) {
        self.cards.first().map_or((1, 1), |slot| {
            (
                slot.cover.w.round().max(1.0) as u32,
                slot.cover.h.round().max(1.0) as u32,
            )
        })
    }
}

/// 容纳 `columns` 列最小卡片所需的画布宽度
pub fn min_canvas_width(columns: u32) -> u32 {
    let c = columns.max(1) as f32;
    (c * MIN_CARD_WIDTH + (c + 1.0) * OUTER_PADDING).ceil() as u32
}

/// 容纳 `rows` 行最小卡片所需的画布高度
pub fn min_canvas_height(rows: u32) -> u32 {
    (HEADER_HEIGHT
        + FOOTER_HEIGHT
        + OUTER_PADDING
        + rows.max(1) as f32 * (MIN_CARD_HEIGHT + OUTER_PADDING))
        .ceil() as u32
}

/// 计算网格布局。位置只由序号决定：第 i 条位于第 i / columns 行、第 i % columns 列。
///
/// 指定高度不足以容纳标准卡片时按比例压缩卡片；压缩后低于最小高度则报错。
pub fn compute_layout(
    width: u32,
    height: Option<u32>,
    columns: u32,
    count: usize,
) -> Result<Layout, AppError> {
    if count == 0 {
        return Err(AppError::Validation("没有可渲染的成绩记录".to_string()));
    }
    if width == 0 || height == Some(0) {
        return Err(AppError::Validation(format!(
            "画布尺寸无效: {width}x{}",
            height.unwrap_or(0)
        )));
    }

    let columns = columns.max(1);
    let rows = (count as u32).div_ceil(columns);
    let card_width = (width as f32 - OUTER_PADDING * (columns + 1) as f32) / columns as f32;
    if card_width + 1e-3 < MIN_CARD_WIDTH {
        return Err(AppError::Validation(format!(
            "画布宽度 {width} 无法容纳 {columns} 列卡片"
        )));
    }

    let (card_height, total_height) = match height {
        Some(h) => {
            let available = h as f32 - HEADER_HEIGHT - FOOTER_HEIGHT - OUTER_PADDING;
            let card_h = (available / rows as f32 - OUTER_PADDING).min(NOMINAL_CARD_HEIGHT);
            (card_h, h)
        }
        None => {
            let total = HEADER_HEIGHT
                + rows as f32 * (NOMINAL_CARD_HEIGHT + OUTER_PADDING)
                + OUTER_PADDING
                + FOOTER_HEIGHT;
            (NOMINAL_CARD_HEIGHT, total.ceil() as u32)
        }
    };
    if card_height + 1e-3 < MIN_CARD_HEIGHT {
        return Err(AppError::Validation(format!(
            "画布高度 {total_height} 不足以容纳 {rows} 行卡片"
        )));
    }

    // 曲绘按 512:270 比例，过宽时按宽度上限收缩并垂直居中
    let mut cover_h = card_height - CARD_PADDING * 2.0;
    let mut cover_w = cover_h * COVER_ASPECT_RATIO;
    if cover_w > card_width * MAX_COVER_WIDTH_RATIO {
        cover_w = card_width * MAX_COVER_WIDTH_RATIO;
        cover_h = cover_w / COVER_ASPECT_RATIO;
    }

    let cards = (0..count)
        .map(|i| {
            let row = i as u32 / columns;
            let col = i as u32 % columns;
            let x = OUTER_PADDING + col as f32 * (card_width + OUTER_PADDING);
            let y = HEADER_HEIGHT + OUTER_PADDING + row as f32 * (card_height + OUTER_PADDING);
            let card = Rect::new(x, y, card_width, card_height);
            let cover = Rect::new(
                x + CARD_PADDING,
                y + (card_height - cover_h) / 2.0,
                cover_w,
                cover_h,
            );
            let text_x = cover.right() + COVER_TEXT_GAP;
            CardSlot {
                card,
                cover,
                text_x,
                text_width: (card.right() - CARD_PADDING - text_x).max(0.0),
            }
        })
        .collect();

    Ok(Layout {
        width,
        height: total_height,
        columns,
        rows,
        header: Rect::new(0.0, 0.0, width as f32, HEADER_HEIGHT),
        footer: Rect::new(
            0.0,
            total_height as f32 - FOOTER_HEIGHT,
            width as f32,
            FOOTER_HEIGHT,
        ),
        card_width,
        card_height,
        cards,
    })
}

/// 单曲卡几何信息
#[derive(Debug, Clone)]
pub struct SongLayout {
    pub width: u32,
    pub height: u32,
    /// 相对设计尺寸的缩放比例
    pub scale: f32,
    pub panel: Rect,
    pub cover: Rect,
    pub info_x: f32,
    pub info_y: f32,
    pub footer_y: f32,
}

impl SongLayout {
    pub fn cover_size(&self) -> (u32, u32) {
        (
            self.cover.w.round().max(1.0) as u32,
            self.cover.h.round().max(1.0) as u32,
        )
    }
}

/// 单曲卡布局：高度由宽度按 3:2 推导，不使用配置的画布高度。
pub fn compute_song_layout(width: u32) -> Result<SongLayout, AppError> {
    if width == 0 {
        return Err(AppError::Validation(format!("画布尺寸无效: {width}x0")));
    }
    let s = width as f32 / SONG_BASE_WIDTH;
    let height = (SONG_BASE_HEIGHT * s).round().max(1.0) as u32;
    let cover_w = 400.0 * s;
    let cover = Rect::new(100.0 * s, 110.0 * s, cover_w, cover_w / COVER_ASPECT_RATIO);
    Ok(SongLayout {
        width,
        height,
        scale: s,
        panel: Rect::new(50.0 * s, 50.0 * s, 1100.0 * s, 700.0 * s),
        cover,
        info_x: 540.0 * s,
        info_y: 150.0 * s,
        footer_y: 725.0 * s,
    })
}
