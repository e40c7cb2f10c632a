mod grade;
mod rks;

pub use grade::{Grade, MAX_SCORE, calculate_grade};
pub use rks::calculate_chart_rks;
