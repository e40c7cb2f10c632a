/// 评级计算（成绩 + ACC -> 等级）
pub mod rating;

/// 成绩记录与排序
pub mod score;

/// 成绩图渲染（曲绘匹配、缓存、并发加载、背景、合成与矢量输出）
pub mod image;
