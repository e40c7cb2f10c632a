use serde::{Deserialize, Serialize};

/// 满分
pub const MAX_SCORE: u32 = 1_000_000;

/// ACC 阈值表（降序，ACC 取 0.0-1.0 小数）
const ACC_THRESHOLDS: [(f64, Grade); 4] = [
    (0.92, Grade::S),
    (0.88, Grade::A),
    (0.82, Grade::B),
    (0.70, Grade::C),
];

/// 成绩等级，按从高到低排列
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Grade {
    /// 满分（1,000,000）
    #[serde(rename = "φ")]
    Phi,
    /// 全连（Full Combo）但未满分
    V,
    S,
    A,
    B,
    C,
    F,
}

impl Grade {
    /// 全部等级（由高到低）
    pub const ALL: [Grade; 7] = [
        Grade::Phi,
        Grade::V,
        Grade::S,
        Grade::A,
        Grade::B,
        Grade::C,
        Grade::F,
    ];

    /// 显示文本
    pub fn label(self) -> &'static str {
        match self {
            Grade::Phi => "φ",
            Grade::V => "V",
            Grade::S => "S",
            Grade::A => "A",
            Grade::B => "B",
            Grade::C => "C",
            Grade::F => "F",
        }
    }

    /// 徽章底色
    pub fn color(self) -> &'static str {
        match self {
            Grade::Phi => "#FFD700",
            Grade::V => "#00B0F0",
            Grade::S => "#E8A33D",
            Grade::A => "#7FC36B",
            Grade::B => "#5B9BD5",
            Grade::C => "#9B7FD1",
            Grade::F => "#7A7A7A",
        }
    }
}

impl core::fmt::Display for Grade {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.label())
    }
}

/// 根据分数、ACC（0.0-1.0）与 FC 标记计算等级。
///
/// 输入越界时先钳制：分数限定在 0..=1,000,000，ACC 限定在 0.0..=1.0，NaN 视为 0。
pub fn calculate_grade(score: u32, accuracy: f64, full_combo: bool) -> Grade {
    let score = score.min(MAX_SCORE);
    if score == MAX_SCORE {
        return Grade::Phi;
    }
    if full_combo {
        return Grade::V;
    }

    let acc = if accuracy.is_nan() {
        0.0
    } else {
        accuracy.clamp(0.0, 1.0)
    };
    ACC_THRESHOLDS
        .iter()
        .find(|(threshold, _)| acc >= *threshold)
        .map_or(Grade::F, |(_, grade)| *grade)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phi_iff_max_score() {
        assert_eq!(calculate_grade(MAX_SCORE, 1.0, true), Grade::Phi);
        assert_eq!(calculate_grade(MAX_SCORE, 0.0, false), Grade::Phi);
        // 超出上限的分数被钳制为满分
        assert_eq!(calculate_grade(2_000_000, 0.5, false), Grade::Phi);
        assert_ne!(calculate_grade(MAX_SCORE - 1, 1.0, false), Grade::Phi);
        assert_ne!(calculate_grade(MAX_SCORE - 1, 1.0, true), Grade::Phi);
    }

    #[test]
    fn full_combo_below_max_is_v() {
        assert_eq!(calculate_grade(999_999, 0.9999, true), Grade::V);
        assert_eq!(calculate_grade(0, 0.0, true), Grade::V);
    }

    #[test]
    fn accuracy_thresholds_are_monotonic() {
        assert_eq!(calculate_grade(990_000, 0.95, false), Grade::S);
        assert_eq!(calculate_grade(990_000, 0.92, false), Grade::S);
        assert_eq!(calculate_grade(900_000, 0.919, false), Grade::A);
        assert_eq!(calculate_grade(900_000, 0.88, false), Grade::A);
        assert_eq!(calculate_grade(850_000, 0.82, false), Grade::B);
        assert_eq!(calculate_grade(700_000, 0.70, false), Grade::C);
        assert_eq!(calculate_grade(500_000, 0.6999, false), Grade::F);

        let mut prev = Grade::S;
        for step in (0..=1000).rev() {
            let g = calculate_grade(500_000, step as f64 / 1000.0, false);
            assert!(g >= prev, "等级应随 ACC 下降而单调不升");
            prev = g;
        }
    }

    #[test]
    fn out_of_range_input_is_clamped() {
        assert_eq!(calculate_grade(0, f64::NAN, false), Grade::F);
        assert_eq!(calculate_grade(0, -3.0, false), Grade::F);
        assert_eq!(calculate_grade(0, 42.0, false), Grade::S);
        assert_eq!(calculate_grade(0, f64::INFINITY, false), Grade::S);
    }

    #[test]
    fn grade_set_is_closed() {
        let mut seen = std::collections::BTreeSet::new();
        for score in [0, 500_000, 999_999, MAX_SCORE] {
            for acc in [0.0, 0.5, 0.7, 0.82, 0.88, 0.92, 1.0] {
                for fc in [false, true] {
                    let g = calculate_grade(score, acc, fc);
                    assert_eq!(g, calculate_grade(score, acc, fc));
                    seen.insert(g);
                }
            }
        }
        assert_eq!(seen.into_iter().collect::<Vec<_>>(), Grade::ALL.to_vec());
    }
}
