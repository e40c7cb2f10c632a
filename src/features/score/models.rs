use serde::{Deserialize, Serialize};

use crate::features::rating::{Grade, MAX_SCORE, calculate_chart_rks, calculate_grade};

/// 难度枚举
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Difficulty {
    #[serde(alias = "ez", alias = "Ez")]
    EZ,
    #[serde(alias = "hd", alias = "Hd")]
    HD,
    #[serde(alias = "in", alias = "In")]
    IN,
    #[serde(alias = "at", alias = "At")]
    AT,
}

impl Difficulty {
    /// 难度标签底色
    pub fn color(self) -> &'static str {
        match self {
            Difficulty::EZ => "#51AF44",
            Difficulty::HD => "#3173B3",
            Difficulty::IN => "#BE2D23",
            Difficulty::AT => "#383838",
        }
    }
}

impl core::fmt::Display for Difficulty {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            Difficulty::EZ => "EZ",
            Difficulty::HD => "HD",
            Difficulty::IN => "IN",
            Difficulty::AT => "AT",
        };
        f.write_str(s)
    }
}

impl core::str::FromStr for Difficulty {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            d if d.eq_ignore_ascii_case("EZ") => Ok(Difficulty::EZ),
            d if d.eq_ignore_ascii_case("HD") => Ok(Difficulty::HD),
            d if d.eq_ignore_ascii_case("IN") => Ok(Difficulty::IN),
            d if d.eq_ignore_ascii_case("AT") => Ok(Difficulty::AT),
            other => Err(format!("未知难度: {other}")),
        }
    }
}

/// 单条成绩记录（由外部成绩查询客户端提供，渲染期间只读）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreRecord {
    /// 曲名（也是曲绘文件名的第一段）
    #[serde(alias = "song", alias = "title")]
    pub song_id: String,
    /// 曲师 / 谱面标识（曲绘文件名的第二段，可为空）
    #[serde(default)]
    pub composer: String,
    pub difficulty: Difficulty,
    /// 原始分数 0-1,000,000
    #[serde(default)]
    pub score: u32,
    /// ACC，可为 0-1 小数或百分比（>1.5 视为百分比）
    #[serde(alias = "acc")]
    pub accuracy: f64,
    #[serde(default, alias = "fc")]
    pub full_combo: bool,
    /// 谱面定数（可选，用于推导 RKS）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constant: Option<f64>,
    /// 预计算的 RKS 贡献值
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rks: Option<f64>,
    /// 在原列表中的名次（从 1 开始）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rank: Option<u32>,
    /// 显示名（缺省使用曲名）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl ScoreRecord {
    pub fn new(
        song_id: impl Into<String>,
        composer: impl Into<String>,
        difficulty: Difficulty,
        score: u32,
        accuracy: f64,
        full_combo: bool,
    ) -> Self {
        Self {
            song_id: song_id.into(),
            composer: composer.into(),
            difficulty,
            score,
            accuracy,
            full_combo,
            constant: None,
            rks: None,
            rank: None,
            display_name: None,
        }
    }

    /// 曲绘查找键
    pub fn asset_key(&self) -> AssetKey {
        AssetKey::new(&self.song_id, &self.composer)
    }

    /// 归一化后的 ACC（0.0-1.0）
    pub fn accuracy_fraction(&self) -> f64 {
        if self.accuracy.is_nan() {
            return 0.0;
        }
        let acc = if self.accuracy > 1.5 {
            self.accuracy / 100.0
        } else {
            self.accuracy
        };
        acc.clamp(0.0, 1.0)
    }

    /// 钳制后的分数
    pub fn clamped_score(&self) -> u32 {
        self.score.min(MAX_SCORE)
    }

    pub fn grade(&self) -> Grade {
        calculate_grade(self.score, self.accuracy_fraction(), self.full_combo)
    }

    /// RKS 贡献值：优先使用提供值，否则由定数推导
    pub fn rks_value(&self) -> f64 {
        self.rks
            .filter(|v| v.is_finite())
            .or_else(|| {
                self.constant
                    .map(|c| calculate_chart_rks(self.accuracy_fraction() * 100.0, c))
            })
            .unwrap_or(0.0)
    }

    /// 是否全连（满分视为全连）
    pub fn is_full_combo(&self) -> bool {
        self.full_combo || self.clamped_score() == MAX_SCORE
    }

    /// 是否满分（AP）
    pub fn is_all_perfect(&self) -> bool {
        self.clamped_score() == MAX_SCORE
    }

    pub fn title(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.song_id)
    }
}

/// 曲绘查找键：去除首尾空白后的 (曲名, 曲师)。
///
/// 相同键必须解析到同一张曲绘，因此并发加载按键去重。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AssetKey {
    pub title: String,
    pub composer: String,
}

impl AssetKey {
    pub fn new(title: &str, composer: &str) -> Self {
        Self {
            title: title.trim().to_string(),
            composer: composer.trim().to_string(),
        }
    }

    /// 精确匹配用的文件名主干：`曲名.曲师`（曲师为空时仅曲名）
    pub fn exact_stem(&self) -> String {
        if self.composer.is_empty() {
            self.title.clone()
        } else {
            format!("{}.{}", self.title, self.composer)
        }
    }
}

impl core::fmt::Display for AssetKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.exact_stem())
    }
}
