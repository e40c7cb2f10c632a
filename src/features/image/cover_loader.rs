use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use super::cache::{AssetCache, Illustration, IllustrationRequest};
use super::matcher::Resolved;
use crate::features::score::AssetKey;

/// 并发加载结果（已按输入顺序排列）
pub struct LoadedCovers {
    pub items: Vec<Arc<Illustration>>,
    /// 去重后的键数量
    pub distinct: usize,
    pub placeholders: usize,
}

/// 并发加载一组曲绘，输出顺序与输入顺序一致，与各任务完成先后无关。
///
/// 相同 [`AssetKey`] 只分配一个槽位、只派发一次；单个失败只会让对应槽位保持占位图。
pub async fn load_covers(
    cache: Arc<AssetCache>,
    resolved: &[Resolved],
    width: u32,
    height: u32,
    concurrency: usize,
) -> LoadedCovers {
    // 每个不同的键分配一次槽位，记录 -> 槽位 的映射只在这里构建
    let mut slot_of_key: HashMap<&AssetKey, usize> = HashMap::new();
    let mut slots: Vec<&Resolved> = Vec::new();
    let mut record_slots: Vec<usize> = Vec::with_capacity(resolved.len());
    for r in resolved {
        let idx = *slot_of_key.entry(&r.key).or_insert_with(|| {
            slots.push(r);
            slots.len() - 1
        });
        record_slots.push(idx);
    }

    let placeholder = cache.placeholder(width, height).await;
    let mut results: Vec<Arc<Illustration>> = vec![Arc::clone(&placeholder); slots.len()];

    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut set = JoinSet::new();
    for (idx, slot) in slots.iter().enumerate() {
        let source = match slot.source() {
            Ok(path) => path.to_path_buf(),
            Err(err) => {
                tracing::warn!("{}，使用占位图", err);
                continue;
            }
        };
        let request = IllustrationRequest {
            key: slot.key.clone(),
            source,
            width,
            height,
        };
        let cache = Arc::clone(&cache);
        let semaphore = Arc::clone(&semaphore);
        set.spawn(async move {
            let _permit = semaphore.acquire_owned().await;
            (idx, cache.acquire(request).await)
        });
    }

    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((idx, Ok(ill))) => results[idx] = ill,
            Ok((idx, Err(err))) => {
                tracing::warn!("曲绘 {} 使用占位图: {}", slots[idx].key, err);
            }
            Err(e) => tracing::error!("曲绘加载任务异常退出: {}", e),
        }
    }

    let items: Vec<Arc<Illustration>> = record_slots
        .iter()
        .map(|&idx| Arc::clone(&results[idx]))
        .collect();
    let placeholders = items.iter().filter(|i| i.is_placeholder()).count();
    LoadedCovers {
        items,
        distinct: slots.len(),
        placeholders,
    }
}
