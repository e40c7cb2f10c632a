use thiserror::Error;

/// 渲染核心统一错误类型
///
/// 只有导致布局无法进行的情况才会以错误形式返回给调用方；
/// 曲绘缺失、解码失败等资源问题在内部降级为占位图（见 [`AssetError`]）。
#[derive(Error, Debug)]
pub enum AppError {
    /// 参数校验错误（零条成绩、画布尺寸为零、卡片过小等）
    #[error("参数校验错误: {0}")]
    Validation(String),

    /// 图像渲染错误（SVG 解析、像素缓冲创建、编码失败）
    #[error("图像渲染错误: {0}")]
    ImageRendererError(String),

    /// 配置加载错误
    #[error("配置错误: {0}")]
    Config(String),

    /// I/O 错误
    #[error("I/O 错误: {0}")]
    Io(String),

    /// 内部错误（阻塞任务取消等）
    #[error("内部错误: {0}")]
    Internal(String),

    /// 资源错误（仅在显式查询单个资源时出现）
    #[error("资源错误: {0}")]
    Asset(#[from] AssetError),
}

/// 曲绘/背景资源错误类型
///
/// 这些错误在渲染任务内部被消化：
/// - `NotFound`：匹配器三级均未命中，使用占位图；
/// - `LoadFailed`：读取或解码失败，写入负缓存并使用占位图；
/// - `CacheCorruption`：磁盘缓存条目不可读，视为未命中并从源文件重新生成。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AssetError {
    /// 未找到匹配的曲绘
    #[error("未找到曲绘: {0}")]
    NotFound(String),

    /// 读取或解码失败
    #[error("曲绘加载失败: {0}")]
    LoadFailed(String),

    /// 磁盘缓存条目损坏
    #[error("磁盘缓存损坏: {0}")]
    CacheCorruption(String),
}

impl AppError {
    /// 稳定错误码，便于调用方程序化处理
    pub fn stable_code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "VALIDATION_FAILED",
            AppError::ImageRendererError(_) => "IMAGE_RENDER_FAILED",
            AppError::Config(_) => "CONFIG_ERROR",
            AppError::Io(_) => "IO_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
            AppError::Asset(AssetError::NotFound(_)) => "ASSET_NOT_FOUND",
            AppError::Asset(AssetError::LoadFailed(_)) => "ASSET_LOAD_FAILED",
            AppError::Asset(AssetError::CacheCorruption(_)) => "ASSET_CACHE_CORRUPTION",
        }
    }
}

// =============== Error conversions for common external errors ===============

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Io(err.to_string())
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

impl From<tokio::task::JoinError> for AppError {
    fn from(err: tokio::task::JoinError) -> Self {
        AppError::Internal(format!("阻塞任务执行失败: {err}"))
    }
}

impl From<std::io::Error> for AssetError {
    fn from(err: std::io::Error) -> Self {
        AssetError::LoadFailed(err.to_string())
    }
}

impl From<image::ImageError> for AssetError {
    fn from(err: image::ImageError) -> Self {
        AssetError::LoadFailed(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::{AppError, AssetError};

    #[test]
    fn asset_errors_keep_their_stable_codes_when_wrapped() {
        let err: AppError = AssetError::CacheCorruption("x.png".into()).into();
        assert_eq!(err.stable_code(), "ASSET_CACHE_CORRUPTION");
        assert!(err.to_string().contains("x.png"));
    }

    #[test]
    fn io_errors_map_to_load_failed() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: AssetError = io.into();
        assert!(matches!(err, AssetError::LoadFailed(msg) if msg.contains("gone")));
    }
}
