use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSnapshotEntry {
    pub question: String,
    pub answer: String,
    pub narrative: String,
    pub val_annotations: Vec<i64>,
    pub annotation_sources: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatasetEntry {
    pub question: String,
    pub narrative: String,
    pub answer: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierRecord {
    pub input: String,
    pub output: String,
    pub gold: String,
    /// True when the human average is below the pass threshold.
    pub valid: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationMetrics {
    #[serde(rename = "Avg Likert")]
    pub avg_likert: Option<f64>,
    #[serde(rename = "Binary Accuracy")]
    pub binary_accuracy: Option<f64>,
    #[serde(rename = "Coverage")]
    pub coverage: Option<f64>,
    #[serde(rename = "Avg Likert (IMPL)")]
    pub impl_avg_likert: Option<f64>,
    #[serde(rename = "Binary Accuracy (IMPL)")]
    pub impl_binary_accuracy: Option<f64>,
    #[serde(rename = "Binary Coverage (IMPL)")]
    pub impl_coverage: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceFile {
    pub role: String,
    pub path: String,
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConvertCounts {
    pub cache_entries: usize,
    pub converted_records: usize,
    pub backfilled_records: usize,
    pub dropped_records: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct EvaluateCounts {
    pub total_rows: usize,
    pub scored_rows: usize,
    pub not_answerable_rows: usize,
    pub not_answerable_scored_rows: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport<C> {
    pub report_version: u32,
    pub command: String,
    pub generated_at: String,
    pub sources: Vec<SourceFile>,
    pub output_path: String,
    pub counts: C,
}
