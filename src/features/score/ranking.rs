use super::models::ScoreRecord;

/// 取前 N 条成绩并分配名次。
///
/// - 所有记录都已带名次时，保留输入顺序；
/// - 否则按 RKS 降序稳定排序（同分保持输入顺序），缺失的 RKS 由定数推导。
///
/// 截取后按位置重新写入从 1 开始的名次，`n` 至少为 1。
pub fn rank_records(mut records: Vec<ScoreRecord>, n: usize) -> Vec<ScoreRecord> {
    let pre_ranked = !records.is_empty() && records.iter().all(|r| r.rank.is_some());
    for r in records.iter_mut() {
        if r.rks.is_none() {
            let v = r.rks_value();
            r.rks = Some(v);
        }
    }

    if !pre_ranked {
        records.sort_by(|a, b| b.rks_value().total_cmp(&a.rks_value()));
    }

    records.truncate(n.max(1));
    if !pre_ranked {
        for (i, r) in records.iter_mut().enumerate() {
            r.rank = Some(i as u32 + 1);
        }
    }
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::score::Difficulty;

    fn rec(name: &str, rks: f64) -> ScoreRecord {
        let mut r = ScoreRecord::new(name, "", Difficulty::IN, 900_000, 0.95, false);
        r.rks = Some(rks);
        r
    }

    #[test]
    fn sorts_by_rks_and_assigns_ranks() {
        let ranked = rank_records(vec![rec("a", 10.0), rec("b", 15.0), rec("c", 12.0)], 2);
        let names: Vec<_> = ranked.iter().map(|r| r.song_id.as_str()).collect();
        assert_eq!(names, vec!["b", "c"]);
        assert_eq!(ranked[0].rank, Some(1));
        assert_eq!(ranked[1].rank, Some(2));
    }

    #[test]
    fn ties_keep_input_order() {
        let ranked = rank_records(vec![rec("x", 13.0), rec("y", 13.0), rec("z", 13.0)], 30);
        let names: Vec<_> = ranked.iter().map(|r| r.song_id.as_str()).collect();
        assert_eq!(names, vec!["x", "y", "z"]);
    }

    #[test]
    fn pre_ranked_lists_keep_supplied_order() {
        let mut a = rec("a", 1.0);
        a.rank = Some(7);
        let mut b = rec("b", 9.0);
        b.rank = Some(8);
        let ranked = rank_records(vec![a, b], 0);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].song_id, "a");
        assert_eq!(ranked[0].rank, Some(7));
    }
}
