pub mod models;
mod ranking;

pub use models::{AssetKey, Difficulty, ScoreRecord};
pub use ranking::rank_records;
