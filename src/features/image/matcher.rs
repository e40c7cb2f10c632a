use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use once_cell::sync::Lazy;

use crate::error::AssetError;
use crate::features::score::AssetKey;

/// 参与索引的图片扩展名（大小写不敏感）
const ILLUSTRATION_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "webp", "bmp"];

/// 进程级曲绘索引表：目录 -> 索引快照。
///
/// 读方拿到的是 `Arc` 快照，重建只替换表中的指针，不会修改正在被读取的索引。
static INDEX_REGISTRY: Lazy<RwLock<HashMap<PathBuf, Arc<IllustrationIndex>>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// 曲绘目录索引
#[derive(Debug, Default)]
pub struct IllustrationIndex {
    dir: PathBuf,
    /// 文件名主干（区分大小写） -> 路径
    exact: HashMap<String, PathBuf>,
    /// 归一化曲名 -> 路径（先到先得）
    normalized: HashMap<String, PathBuf>,
    files: usize,
}

impl IllustrationIndex {
    /// 扫描目录建立索引。文件按文件名排序后依次登记，保证“先到先得”的结果确定。
    pub fn scan(dir: &Path) -> Self {
        let mut paths: Vec<PathBuf> = match fs::read_dir(dir) {
            Ok(entries) => entries
                .flatten()
                .map(|e| e.path())
                .filter(|p| p.is_file() && is_illustration(p))
                .collect(),
            Err(e) => {
                tracing::warn!("读取曲绘目录失败 '{}': {}", dir.display(), e);
                Vec::new()
            }
        };
        paths.sort();

        let mut index = IllustrationIndex {
            dir: dir.to_path_buf(),
            ..Default::default()
        };
        for path in paths {
            index.insert(path);
        }
        tracing::info!(
            "曲绘索引构建完成: {} ({} 个文件, {} 个归一化曲名)",
            dir.display(),
            index.files,
            index.normalized.len()
        );
        index
    }

    fn insert(&mut self, path: PathBuf) {
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
            return;
        };
        self.files += 1;

        // 曲名为第一个 '.' 之前的部分；整段主干也登记一次，兼容曲名自身带点的情况
        let title = stem.split('.').next().unwrap_or(&stem);
        for candidate in [title, stem.as_str()] {
            let norm = normalize_title(candidate);
            if !norm.is_empty() {
                self.normalized.entry(norm).or_insert_with(|| path.clone());
            }
        }
        self.exact.entry(stem).or_insert(path);
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn len(&self) -> usize {
        self.files
    }

    pub fn is_empty(&self) -> bool {
        self.files == 0
    }

    fn lookup_exact(&self, stem: &str) -> Option<&PathBuf> {
        self.exact.get(stem)
    }

    fn lookup_normalized(&self, title: &str) -> Option<&PathBuf> {
        self.normalized.get(&normalize_title(title))
    }
}

fn is_illustration(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| {
            ILLUSTRATION_EXTENSIONS
                .iter()
                .any(|allowed| ext.eq_ignore_ascii_case(allowed))
        })
}

/// 归一化曲名：转小写并去掉空白与标点，仅保留字母数字（含 CJK）。
pub fn normalize_title(title: &str) -> String {
    title
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// 获取目录索引（首次使用时扫描）
pub fn index_for(dir: &Path) -> Arc<IllustrationIndex> {
    if let Ok(registry) = INDEX_REGISTRY.read() {
        if let Some(index) = registry.get(dir) {
            return Arc::clone(index);
        }
    }

    // 扫描在锁外进行，多个并发首用者可能各扫一次，只保留先写入的那份
    let scanned = Arc::new(IllustrationIndex::scan(dir));
    match INDEX_REGISTRY.write() {
        Ok(mut registry) => Arc::clone(
            registry
                .entry(dir.to_path_buf())
                .or_insert_with(|| Arc::clone(&scanned)),
        ),
        Err(_) => scanned,
    }
}

/// 重新扫描目录并原子替换索引（新增曲绘后调用）
pub fn rebuild_index(dir: &Path) -> Arc<IllustrationIndex> {
    let scanned = Arc::new(IllustrationIndex::scan(dir));
    if let Ok(mut registry) = INDEX_REGISTRY.write() {
        registry.insert(dir.to_path_buf(), Arc::clone(&scanned));
    }
    scanned
}

/// 匹配层级
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchTier {
    Exact,
    Normalized,
    Fallback,
}

/// 单一匹配策略
pub trait Matcher: Send + Sync {
    fn tier(&self) -> MatchTier;

    fn try_match(&self, key: &AssetKey, index: &IllustrationIndex) -> Option<PathBuf>;
}

/// 精确匹配：`曲名.曲师` 与文件名主干逐字比较
pub struct ExactMatcher;

impl Matcher for ExactMatcher {
    fn tier(&self) -> MatchTier {
        MatchTier::Exact
    }

    fn try_match(&self, key: &AssetKey, index: &IllustrationIndex) -> Option<PathBuf> {
        index.lookup_exact(&key.exact_stem()).cloned()
    }
}

/// 归一化匹配：忽略大小写、空白与标点，只比较曲名
pub struct NormalizedMatcher;

impl Matcher for NormalizedMatcher {
    fn tier(&self) -> MatchTier {
        MatchTier::Normalized
    }

    fn try_match(&self, key: &AssetKey, index: &IllustrationIndex) -> Option<PathBuf> {
        index.lookup_normalized(&key.title).cloned()
    }
}

/// 兜底：固定占位图（未配置时由缓存层生成纯色占位）
pub struct FallbackMatcher {
    placeholder: Option<PathBuf>,
}

impl Matcher for FallbackMatcher {
    fn tier(&self) -> MatchTier {
        MatchTier::Fallback
    }

    fn try_match(&self, _key: &AssetKey, _index: &IllustrationIndex) -> Option<PathBuf> {
        self.placeholder.clone()
    }
}

/// 匹配结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub key: AssetKey,
    pub tier: MatchTier,
    /// 为 None 表示使用生成的占位图
    pub path: Option<PathBuf>,
}

impl Resolved {
    pub fn is_placeholder(&self) -> bool {
        self.tier == MatchTier::Fallback
    }

    /// 精确或归一化命中的源文件；落到兜底层时返回 `NotFound`
    pub fn source(&self) -> Result<&Path, AssetError> {
        match (self.tier, self.path.as_deref()) {
            (MatchTier::Exact | MatchTier::Normalized, Some(path)) => Ok(path),
            _ => Err(AssetError::NotFound(self.key.to_string())),
        }
    }
}

/// 按顺序尝试各策略，返回第一个命中
pub struct MatchResolver {
    strategies: Vec<Box<dyn Matcher>>,
}

impl MatchResolver {
    pub fn new(placeholder: Option<PathBuf>) -> Self {
        Self {
            strategies: vec![
                Box::new(ExactMatcher),
                Box::new(NormalizedMatcher),
                Box::new(FallbackMatcher { placeholder }),
            ],
        }
    }

    pub fn resolve(&self, key: &AssetKey, index: &IllustrationIndex) -> Resolved {
        for strategy in &self.strategies {
            if let Some(path) = strategy.try_match(key, index) {
                return Resolved {
                    key: key.clone(),
                    tier: strategy.tier(),
                    path: Some(path),
                };
            }
        }
        Resolved {
            key: key.clone(),
            tier: MatchTier::Fallback,
            path: None,
        }
    }
}

impl Default for MatchResolver {
    fn default() -> Self {
        Self::new(None)
    }
}
