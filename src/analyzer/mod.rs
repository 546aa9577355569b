mod quality;

pub use quality::{QualityAnalyzer, QualityMetrics};
