//! 与输出形式无关的场景描述：栅格合成与矢量输出共用同一份布局与元素列表。

use std::fmt::Write;

use chrono::{DateTime, FixedOffset, Utc};
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use super::filters::{GlowPass, glow_passes};
use super::layout::{
    AVATAR_SIZE, CARD_PADDING, HEADER_HEIGHT, Layout, OUTER_PADDING, Rect, SongLayout,
};
use super::types::{CardHeader, RenderConfig, SongCard};
use crate::features::rating::Grade;
use crate::features::score::{Difficulty, ScoreRecord};

const DEFAULT_GLOW_COLOR: Color = Color::rgb(100, 200, 255);
const TEXT_PRIMARY: Color = Color::rgb(255, 255, 255);
const TEXT_SECONDARY: Color = Color::rgb(0xBB, 0xBB, 0xBB);
const CARD_FILL: Color = Color::rgba(0x1A, 0x1E, 0x2A, 0.78);
const CARD_STROKE: Color = Color::rgb(0x33, 0x38, 0x48);
const AP_COLOR: Color = Color::rgb(0xFF, 0xD7, 0x00);
const FC_COLOR: Color = Color::rgb(0x00, 0xB0, 0xF0);
/// 名次颜色：金、银、铜
const RANK_TIER_COLORS: [Color; 3] = [
    Color::rgb(0xFF, 0xD7, 0x00),
    Color::rgb(0xC0, 0xC0, 0xC0),
    Color::rgb(0xCD, 0x7F, 0x32),
];
/// 课题段位颜色：白、绿、蓝、红、金、彩
const CHALLENGE_COLORS: [Color; 6] = [
    Color::rgb(0xE8, 0xE8, 0xE8),
    Color::rgb(0x4C, 0xAF, 0x50),
    Color::rgb(0x21, 0x96, 0xF3),
    Color::rgb(0xE5, 0x39, 0x35),
    Color::rgb(0xFF, 0xD7, 0x00),
    Color::rgb(0xB3, 0x88, 0xFF),
];
const DARK_TEXT: Color = Color::rgb(0x20, 0x20, 0x20);
const SONG_PANEL_FILL: Color = Color::rgba(0, 0, 0, 0.7);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    /// 不透明度 0.0-1.0
    pub a: f32,
}

impl Color {
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 1.0 }
    }

    pub const fn rgba(r: u8, g: u8, b: u8, a: f32) -> Self {
        Self { r, g, b, a }
    }

    /// 解析 `#RRGGBB`
    pub fn from_hex(s: &str) -> Option<Self> {
        let hex = s.trim().strip_prefix('#')?;
        if hex.len() != 6 {
            return None;
        }
        let channel = |i: usize| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok();
        Some(Self::rgb(channel(0)?, channel(2)?, channel(4)?))
    }

    pub fn hex(&self) -> String {
        format!("#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anchor {
    Start,
    Middle,
    End,
}

impl Anchor {
    fn as_svg(self) -> &'static str {
        match self {
            Anchor::Start => "start",
            Anchor::Middle => "middle",
            Anchor::End => "end",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextItem {
    pub x: f32,
    pub y: f32,
    pub size: f32,
    pub bold: bool,
    pub anchor: Anchor,
    pub color: Color,
    pub content: String,
    /// 是否绘制发光
    pub glow: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Element {
    Rect {
        rect: Rect,
        radius: f32,
        fill: Color,
        stroke: Option<(Color, f32)>,
    },
    /// 第 `index` 条记录的曲绘
    Cover { index: usize, rect: Rect, radius: f32 },
    Text(TextItem),
}

#[derive(Debug, Clone)]
pub struct GlowSpec {
    pub color: Color,
    pub passes: Vec<GlowPass>,
}

/// 完整场景
#[derive(Debug, Clone)]
pub struct Scene {
    pub width: u32,
    pub height: u32,
    pub elements: Vec<Element>,
    pub glow: Option<GlowSpec>,
}

impl Scene {
    pub fn texts(&self) -> impl Iterator<Item = &TextItem> {
        self.elements.iter().filter_map(|e| match e {
            Element::Text(t) => Some(t),
            _ => None,
        })
    }

    pub fn has_glow_text(&self) -> bool {
        self.glow.is_some() && self.texts().any(|t| t.glow)
    }
}

/// 按显示宽度截断（CJK 记 2 列），超出部分以省略号结尾
pub fn truncate_to_width(text: &str, max_cols: usize) -> String {
    if text.width() <= max_cols {
        return text.to_string();
    }
    let budget = max_cols.saturating_sub(1);
    let mut used = 0;
    let mut out = String::new();
    for ch in text.chars() {
        let w = ch.width().unwrap_or(0);
        if used + w > budget {
            break;
        }
        used += w;
        out.push(ch);
    }
    out.push('…');
    out
}

/// 课题段位徽章：(底色, 文字色, 等级文字)。
///
/// 原始值百位为颜色档（1-6），其余两位为等级；小于 100 时只有颜色档。
fn challenge_badge(raw: u32) -> Option<(Color, Color, String)> {
    let (tier, level) = if raw >= 100 {
        (raw / 100, Some(raw % 100))
    } else {
        (raw, None)
    };
    let index = (tier as usize).checked_sub(1)?;
    let fill = *CHALLENGE_COLORS.get(index)?;
    let text = if matches!(tier, 1 | 5) { DARK_TEXT } else { TEXT_PRIMARY };
    Some((fill, text, level.map(|l| l.to_string()).unwrap_or_default()))
}

fn rank_color(rank: u32) -> Color {
    match rank {
        1..=3 => RANK_TIER_COLORS[(rank - 1) as usize],
        _ => TEXT_SECONDARY,
    }
}

/// 构建 BestN 场景。`now` 用于页脚生成时间。
///
/// 头部带头像时，头像作为第 `records.len()` 张图片出现在曲绘列表末尾。
pub fn build_scene(
    records: &[ScoreRecord],
    layout: &Layout,
    header: Option<&CardHeader>,
    config: &RenderConfig,
    now: DateTime<Utc>,
) -> Scene {
    let mut elements = Vec::with_capacity(records.len() * 12 + 12);
    let avatar_index = header
        .and_then(CardHeader::avatar_key)
        .map(|_| records.len());
    push_header(&mut elements, records.len(), layout, header, avatar_index);

    let s = layout.scale();
    for (i, (record, slot)) in records.iter().zip(&layout.cards).enumerate() {
        let card = slot.card;
        let stroke = if record.is_all_perfect() {
            (AP_COLOR, 2.0)
        } else if record.is_full_combo() {
            (FC_COLOR, 2.0)
        } else {
            (CARD_STROKE, 1.0)
        };
        elements.push(Element::Rect {
            rect: card,
            radius: 8.0 * s,
            fill: CARD_FILL,
            stroke: Some(stroke),
        });
        elements.push(Element::Cover {
            index: i,
            rect: slot.cover,
            radius: 4.0 * s,
        });

        // 难度标签（曲绘左下角）
        let badge_h = 20.0 * s;
        let badge = Rect::new(
            slot.cover.x + 5.0 * s,
            slot.cover.bottom() - badge_h - 5.0 * s,
            36.0 * s,
            badge_h,
        );
        push_badge(
            &mut elements,
            badge,
            Color::from_hex(record.difficulty.color()).unwrap_or(CARD_STROKE),
            &record.difficulty.to_string(),
            s,
        );

        // AP / FC 标签（互斥）
        let tag = if record.is_all_perfect() {
            Some(("AP", AP_COLOR))
        } else if record.is_full_combo() {
            Some(("FC", FC_COLOR))
        } else {
            None
        };
        if let Some((label, color)) = tag {
            let r = Rect::new(badge.right() + 5.0 * s, badge.y, 30.0 * s, badge_h);
            push_badge(&mut elements, r, color, label, s);
        }

        // 等级徽章（卡片右上角）
        let grade = record.grade();
        let grade_size = 30.0 * s;
        let grade_rect = Rect::new(
            card.right() - CARD_PADDING - grade_size,
            card.y + CARD_PADDING,
            grade_size,
            grade_size,
        );
        elements.push(Element::Rect {
            rect: grade_rect,
            radius: grade_size / 2.0,
            fill: Color::from_hex(grade.color()).unwrap_or(CARD_STROKE),
            stroke: None,
        });
        elements.push(Element::Text(TextItem {
            x: grade_rect.x + grade_size / 2.0,
            y: grade_rect.y + grade_size * 0.7,
            size: 18.0 * s,
            bold: true,
            anchor: Anchor::Middle,
            color: if grade == Grade::Phi {
                Color::rgb(0x20, 0x20, 0x20)
            } else {
                TEXT_PRIMARY
            },
            content: grade.label().to_string(),
            glow: false,
        }));

        // 文字块
        let title_size = 19.0 * s;
        let title_width = (slot.text_width - grade_size - 4.0).max(0.0);
        let max_cols = (title_width / (title_size * 0.55)).floor() as usize;
        let title_y = card.y + CARD_PADDING + 21.5 * s;
        let score_y = title_y + 30.0 * s;
        let acc_y = score_y + 22.0 * s;
        let level_y = acc_y + 22.0 * s;

        elements.push(Element::Text(TextItem {
            x: slot.text_x,
            y: title_y,
            size: title_size,
            bold: false,
            anchor: Anchor::Start,
            color: TEXT_PRIMARY,
            content: truncate_to_width(record.title(), max_cols.max(2)),
            glow: true,
        }));
        elements.push(Element::Text(TextItem {
            x: slot.text_x,
            y: score_y,
            size: 26.0 * s,
            bold: true,
            anchor: Anchor::Start,
            color: TEXT_PRIMARY,
            content: format!("{:07}", record.clamped_score()),
            glow: true,
        }));
        elements.push(Element::Text(TextItem {
            x: slot.text_x,
            y: acc_y,
            size: 14.0 * s,
            bold: false,
            anchor: Anchor::Start,
            color: TEXT_SECONDARY,
            content: format!("Acc: {:.2}%", record.accuracy_fraction() * 100.0),
            glow: false,
        }));
        let level_text = match record.constant {
            Some(c) => format!("Lv.{:.1} -> {:.2}", c, record.rks_value()),
            None => format!("RKS {:.2}", record.rks_value()),
        };
        elements.push(Element::Text(TextItem {
            x: slot.text_x,
            y: level_y,
            size: 14.0 * s,
            bold: false,
            anchor: Anchor::Start,
            color: TEXT_SECONDARY,
            content: level_text,
            glow: false,
        }));

        // 名次（前三名高亮）
        let rank = record.rank.unwrap_or(i as u32 + 1);
        elements.push(Element::Text(TextItem {
            x: card.right() - CARD_PADDING,
            y: level_y,
            size: 18.0 * s,
            bold: true,
            anchor: Anchor::End,
            color: rank_color(rank),
            content: format!("#{rank}"),
            glow: rank <= 3,
        }));
    }

    let footer = FooterLine {
        left: OUTER_PADDING * 2.0,
        right: layout.width as f32 - OUTER_PADDING * 2.0,
        y: layout.footer.y + layout.footer.h / 2.0 + 5.0,
    };
    push_footer(&mut elements, footer, header, config, now);

    Scene {
        width: layout.width,
        height: layout.height,
        elements,
        glow: glow_spec(config),
    }
}

fn glow_spec(config: &RenderConfig) -> Option<GlowSpec> {
    config.glow_enabled.then(|| GlowSpec {
        color: Color::from_hex(&config.glow_color).unwrap_or_else(|| {
            tracing::warn!("发光颜色无效: {}，使用默认值", config.glow_color);
            DEFAULT_GLOW_COLOR
        }),
        passes: glow_passes(config.glow_passes, config.glow_radius),
    })
}

/// 构建单曲详情场景：大幅曲绘（第 0 张图片）、曲目信息与各难度定数。
pub fn build_song_scene(
    song: &SongCard,
    layout: &SongLayout,
    header: Option<&CardHeader>,
    config: &RenderConfig,
    now: DateTime<Utc>,
) -> Scene {
    let s = layout.scale;
    let mut elements = Vec::with_capacity(16 + song.constants.len() * 2);
    elements.push(Element::Rect {
        rect: layout.panel,
        radius: 30.0 * s,
        fill: SONG_PANEL_FILL,
        stroke: None,
    });
    elements.push(Element::Cover {
        index: 0,
        rect: layout.cover,
        radius: 25.0 * s,
    });

    let x = layout.info_x;
    let info_width = layout.panel.right() - 40.0 * s - x;
    let title_size = 48.0 * s;
    let max_cols = (info_width / (title_size * 0.55)).floor().max(2.0) as usize;
    let or_unknown = |v: &str| {
        let v = v.trim();
        if v.is_empty() { "未知".to_string() } else { v.to_string() }
    };

    let mut y = layout.info_y;
    elements.push(Element::Text(TextItem {
        x,
        y,
        size: title_size,
        bold: true,
        anchor: Anchor::Start,
        color: TEXT_PRIMARY,
        content: truncate_to_width(song.title.trim(), max_cols),
        glow: true,
    }));
    y += 70.0 * s;
    let lines = [
        (format!("作曲: {}", or_unknown(&song.composer)), 28.0, 50.0),
        (format!("曲绘: {}", or_unknown(&song.illustrator)), 24.0, 70.0),
        ("谱面定数:".to_string(), 28.0, 30.0),
    ];
    for (content, size, advance) in lines {
        let size = size * s;
        elements.push(Element::Text(TextItem {
            x,
            y,
            size,
            bold: false,
            anchor: Anchor::Start,
            color: TEXT_PRIMARY,
            content: truncate_to_width(&content, (info_width / (size * 0.55)).floor().max(2.0) as usize),
            glow: false,
        }));
        y += advance * s;
    }

    // 难度标签按 EZ -> AT 排列
    let (tag_w, tag_h) = (100.0 * s, 45.0 * s);
    for (k, (difficulty, constant)) in song.constants.iter().enumerate() {
        let tag = Rect::new(x + k as f32 * 120.0 * s, y, tag_w, tag_h);
        push_constant_tag(&mut elements, tag, *difficulty, *constant, s);
    }

    let footer = FooterLine {
        left: layout.panel.x + 30.0 * s,
        right: layout.panel.right() - 30.0 * s,
        y: layout.footer_y,
    };
    push_footer(&mut elements, footer, header, config, now);

    Scene {
        width: layout.width,
        height: layout.height,
        elements,
        glow: glow_spec(config),
    }
}

fn push_constant_tag(elements: &mut Vec<Element>, rect: Rect, difficulty: Difficulty, constant: f64, s: f32) {
    elements.push(Element::Rect {
        rect,
        radius: 10.0 * s,
        fill: Color::from_hex(difficulty.color()).unwrap_or(CARD_STROKE),
        stroke: None,
    });
    elements.push(Element::Text(TextItem {
        x: rect.x + rect.w / 2.0,
        y: rect.y + rect.h / 2.0 + 7.0 * s,
        size: 20.0 * s,
        bold: true,
        anchor: Anchor::Middle,
        color: TEXT_PRIMARY,
        content: format!("{difficulty} {constant:.1}"),
        glow: false,
    }));
}

fn push_badge(elements: &mut Vec<Element>, rect: Rect, fill: Color, label: &str, s: f32) {
    elements.push(Element::Rect {
        rect,
        radius: 4.0 * s,
        fill,
        stroke: None,
    });
    elements.push(Element::Text(TextItem {
        x: rect.x + rect.w / 2.0,
        y: rect.y + rect.h / 2.0 + 5.0 * s,
        size: 13.0 * s,
        bold: true,
        anchor: Anchor::Middle,
        color: TEXT_PRIMARY,
        content: label.to_string(),
        glow: false,
    }));
}

fn push_header(
    elements: &mut Vec<Element>,
    count: usize,
    layout: &Layout,
    header: Option<&CardHeader>,
    avatar_index: Option<usize>,
) {
    let mut left = OUTER_PADDING * 2.0;
    let right = layout.width as f32 - OUTER_PADDING * 2.0;
    let name = header
        .map(|h| h.player_name.trim())
        .filter(|n| !n.is_empty())
        .unwrap_or("Phigros Player");

    // 圆形头像 + 白色描边
    if let Some(index) = avatar_index {
        let rect = Rect::new(left, (HEADER_HEIGHT - AVATAR_SIZE) / 2.0, AVATAR_SIZE, AVATAR_SIZE);
        elements.push(Element::Cover {
            index,
            rect,
            radius: AVATAR_SIZE / 2.0,
        });
        elements.push(Element::Rect {
            rect,
            radius: AVATAR_SIZE / 2.0,
            fill: Color::rgba(0, 0, 0, 0.0),
            stroke: Some((TEXT_PRIMARY, 3.0)),
        });
        left += AVATAR_SIZE + 20.0;
    }

    let mut name_x = left;
    if let Some((fill, text, level)) = header
        .and_then(|h| h.challenge_rank)
        .and_then(challenge_badge)
    {
        let badge = Rect::new(left, 30.0, 56.0, 32.0);
        elements.push(Element::Rect {
            rect: badge,
            radius: 6.0,
            fill,
            stroke: None,
        });
        if !level.is_empty() {
            elements.push(Element::Text(TextItem {
                x: badge.x + badge.w / 2.0,
                y: badge.y + 23.0,
                size: 20.0,
                bold: true,
                anchor: Anchor::Middle,
                color: text,
                content: level,
                glow: false,
            }));
        }
        name_x += badge.w + 10.0;
    }
    let max_cols = ((right - name_x) / 2.0 / 20.0).max(4.0) as usize;

    elements.push(Element::Text(TextItem {
        x: name_x,
        y: 56.0,
        size: 36.0,
        bold: true,
        anchor: Anchor::Start,
        color: TEXT_PRIMARY,
        content: truncate_to_width(name, max_cols),
        glow: true,
    }));
    if let Some(rks) = header.and_then(|h| h.rks) {
        elements.push(Element::Text(TextItem {
            x: left,
            y: 92.0,
            size: 20.0,
            bold: false,
            anchor: Anchor::Start,
            color: TEXT_SECONDARY,
            content: format!("RKS {rks:.6}"),
            glow: false,
        }));
    }
    elements.push(Element::Text(TextItem {
        x: right,
        y: 56.0,
        size: 28.0,
        bold: true,
        anchor: Anchor::End,
        color: TEXT_PRIMARY,
        content: format!("Best {count}"),
        glow: true,
    }));
    if let Some(updated) = header.and_then(|h| h.updated_at) {
        elements.push(Element::Text(TextItem {
            x: right,
            y: 92.0,
            size: 14.0,
            bold: false,
            anchor: Anchor::End,
            color: TEXT_SECONDARY,
            content: format!("Updated at {} UTC", updated.format("%Y-%m-%d %H:%M:%S")),
            glow: false,
        }));
    }
}

/// 页脚文字基线与左右边界
#[derive(Debug, Clone, Copy)]
struct FooterLine {
    left: f32,
    right: f32,
    y: f32,
}

fn push_footer(
    elements: &mut Vec<Element>,
    line: FooterLine,
    header: Option<&CardHeader>,
    config: &RenderConfig,
    now: DateTime<Utc>,
) {
    let FooterLine { left, right, y } = line;
    let local = FixedOffset::east_opt(8 * 3600)
        .map(|tz| now.with_timezone(&tz).format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| now.format("%Y-%m-%d %H:%M:%S").to_string());
    elements.push(Element::Text(TextItem {
        x: left,
        y,
        size: 12.0,
        bold: false,
        anchor: Anchor::Start,
        color: TEXT_SECONDARY,
        content: format!("Generated by phi-card at {local} UTC+8"),
        glow: false,
    }));

    let custom = header
        .and_then(|h| h.footer.as_deref())
        .unwrap_or(config.footer_text.as_str())
        .trim();
    if !custom.is_empty() {
        elements.push(Element::Text(TextItem {
            x: right,
            y,
            size: 12.0,
            bold: false,
            anchor: Anchor::End,
            color: TEXT_SECONDARY,
            content: custom.to_string(),
            glow: false,
        }));
    }
}

/// XML 1.0 允许出现在文档中的字符
fn is_xml_char(c: char) -> bool {
    matches!(c, '\t' | '\n' | '\r')
        || ('\u{20}'..='\u{D7FF}').contains(&c)
        || ('\u{E000}'..='\u{FFFD}').contains(&c)
        || c >= '\u{10000}'
}

/// 转义 XML 特殊字符，XML 不允许的控制字符直接丢弃
pub(crate) fn escape_xml(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c if is_xml_char(c) => out.push(c),
            _ => {}
        }
    }
    out
}

/// 写出一个 `<text>` 元素；`fill` 覆盖文字颜色（发光层使用）
pub(crate) fn write_text(
    out: &mut String,
    item: &TextItem,
    fill: Option<Color>,
) -> std::fmt::Result {
    let color = fill.unwrap_or(item.color);
    let weight = if item.bold { "bold" } else { "normal" };
    write!(
        out,
        r#"<text x="{:.1}" y="{:.1}" font-size="{:.1}" font-weight="{}" text-anchor="{}" fill="{}""#,
        item.x,
        item.y,
        item.size,
        weight,
        item.anchor.as_svg(),
        color.hex()
    )?;
    if color.a < 1.0 {
        write!(out, r#" fill-opacity="{:.3}""#, color.a)?;
    }
    writeln!(out, ">{}</text>", escape_xml(&item.content))
}
