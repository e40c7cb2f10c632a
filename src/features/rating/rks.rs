/// 计算单谱面 RKS 贡献值。
///
/// `acc_percent` 为百分比形式（例如 98.5），`constant` 为谱面定数。
/// ACC 低于 70% 时贡献为 0。
pub fn calculate_chart_rks(acc_percent: f64, constant: f64) -> f64 {
    if !acc_percent.is_finite() || !constant.is_finite() || acc_percent < 70.0 {
        return 0.0;
    }
    let acc_factor = ((acc_percent.min(100.0) - 55.0) / 45.0).powi(2);
    acc_factor * constant.max(0.0)
}
