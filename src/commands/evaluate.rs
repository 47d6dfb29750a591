use std::cmp::Ordering;
use std::path::Path;

use anyhow::{Context, Result, bail};
use csv::{ReaderBuilder, StringRecord};
use tracing::{info, warn};

use crate::cli::EvaluateArgs;
use crate::judgment::JudgmentCache;
use crate::model::{EvaluateCounts, EvaluationMetrics, RunReport};
use crate::util::{now_utc_string, source_file, write_json_pretty};


pub const NOT_ANSWERABLE_LABEL: &str = "Not Answerable";
const BINARY_PASS_THRESHOLD: f64 = 1.0;

pub fn run(args: EvaluateArgs) -> Result<()> {
    let cache = JudgmentCache::load(&args.answers_file_path)?;
    let rows = load_predictions(&args.predictions_file_path)?;
    info!(
        cache_entries = cache.len(),
        annotation_sources = cache.annotation_sources().len(),
        rows = rows.len(),
        "loaded evaluation inputs"
    );
    if cache.is_empty() {
        warn!("judgment cache is empty");
    }

    let summary = summarize(&rows, &cache);
    if summary.all.scored < summary.all.total {
        warn!(
            unscored = summary.all.total - summary.all.scored,
            total = summary.all.total,
            "rows without a matching human judgment were excluded"
        );
    }

    let metrics = summary.metrics();
    write_json_pretty(&args.output_file_path, &metrics)?;
    info!(
        path = %args.output_file_path.display(),
        avg_likert = ?metrics.avg_likert,
        binary_accuracy = ?metrics.binary_accuracy,
        coverage = ?metrics.coverage,
        "wrote evaluation metrics"
    );

    if let Some(report_path) = &args.report_path {
        let report = RunReport {
            report_version: 1,
            command: "evaluate".to_string(),
            generated_at: now_utc_string(),
            sources: vec![
                source_file("predictions", &args.predictions_file_path)?,
                source_file("cache", &args.answers_file_path)?,
            ],
            output_path: args.output_file_path.display().to_string(),
            counts: summary.counts(),
        };
        write_json_pretty(report_path, &report)?;
        info!(path = %report_path.display(), "wrote run report");
    }

    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
pub struct PredictionRow {
    pub question: String,
    pub narrative: String,
    /// Model answer; taken from `predicted_answer` when that column exists.
    pub answer: String,
    pub is_ques_answerable: String,
}

impl PredictionRow {
    pub fn is_not_answerable(&self) -> bool {
        self.is_ques_answerable == NOT_ANSWERABLE_LABEL
    }
}

#[derive(Debug, Clone, Copy)]
struct ColumnLayout {
    question: usize,
    narrative: usize,
    answer: usize,
    is_ques_answerable: usize,
}

impl ColumnLayout {
    fn from_headers(headers: &StringRecord) -> Result<Self> {
        let find = |name: &str| {
            headers
                .iter()
                .position(|header| header.trim_start_matches('\u{feff}') == name)
        };
        let require = |name: &str| {
            find(name).with_context(|| format!("predictions are missing required column `{name}`"))
        };

        let answer = match (find("predicted_answer"), find("answer")) {
            (Some(index), _) | (None, Some(index)) => index,
            (None, None) => {
                bail!("predictions need a `predicted_answer` or `answer` column")
            }
        };

        Ok(Self {
            question: require("question")?,
            narrative: require("narrative")?,
            answer,
            is_ques_answerable: require("is_ques_answerable")?,
        })
    }

    fn row(&self, record: &StringRecord) -> Result<PredictionRow> {
        let field = |index: usize| {
            record
                .get(index)
                .map(ToOwned::to_owned)
                .with_context(|| format!("record has no field at column {index}"))
        };

        Ok(PredictionRow {
            question: field(self.question)?,
            narrative: field(self.narrative)?,
            answer: field(self.answer)?,
            is_ques_answerable: field(self.is_ques_answerable)?,
        })
    }
}

pub fn load_predictions(path: &Path) -> Result<Vec<PredictionRow>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .with_context(|| format!("failed to open predictions {}", path.display()))?;

    let headers = reader
        .headers()
        .with_context(|| format!("failed to read header of {}", path.display()))?
        .clone();
    let layout = ColumnLayout::from_headers(&headers)
        .with_context(|| format!("invalid predictions file {}", path.display()))?;

    let mut rows = Vec::new();
    for (index, result) in reader.records().enumerate() {
        let line = index + 2;
        let record = result
            .with_context(|| format!("failed to read {} at line {line}", path.display()))?;
        let row = layout
            .row(&record)
            .with_context(|| format!("malformed row in {} at line {line}", path.display()))?;
        rows.push(row);
    }

    Ok(rows)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RowScore {
    pub likert: f64,
    pub binary: u8,
}

/// `None` when the row has no matching judgment and cannot be scored.
pub fn score_row(row: &PredictionRow, cache: &JudgmentCache) -> Option<RowScore> {
    let record = cache.lookup_prediction(&row.question, &row.answer, &row.narrative)?;
    let likert = record.average_likert();
    Some(RowScore {
        likert,
        binary: u8::from(likert >= BINARY_PASS_THRESHOLD),
    })
}

/// Aggregate scores over a subset of rows.
///
/// `avg_likert` and `binary_accuracy` are `None` when no row in the subset could be
/// scored; `coverage` is `None` only when the subset has no rows at all.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SubsetScores {
    pub avg_likert: Option<f64>,
    pub binary_accuracy: Option<f64>,
    pub coverage: Option<f64>,
    pub scored: usize,
    pub total: usize,
}

pub fn aggregate<'a, I>(rows: I, cache: &JudgmentCache) -> SubsetScores
where
    I: IntoIterator<Item = &'a PredictionRow>,
{
    let mut total = 0usize;
    let mut scored = 0usize;
    let mut likert_sum = 0.0_f64;
    let mut binary_sum = 0u64;

    for row in rows {
        total += 1;
        if let Some(score) = score_row(row, cache) {
            scored += 1;
            likert_sum += score.likert;
            binary_sum += u64::from(score.binary);
        }
    }

    SubsetScores {
        avg_likert: mean(likert_sum, scored),
        binary_accuracy: mean(binary_sum as f64, scored),
        coverage: mean(scored as f64 * 100.0, total),
        scored,
        total,
    }
}

fn mean(sum: f64, count: usize) -> Option<f64> {
    (count > 0).then(|| round2(sum / count as f64))
}

/// Round to two decimals, ties to even, deciding on the exact binary value of `value`
/// rather than on `value * 100`, which is itself rounded. `2.675` is stored just below
/// the tie and rounds to `2.67`; `0.125` is an exact tie and rounds to `0.12`.
fn round2(value: f64) -> f64 {
    if !value.is_finite() || value == 0.0 {
        return value;
    }

    let magnitude = value.abs();
    let bits = magnitude.to_bits();
    let exponent_bits = ((bits >> 52) & 0x7ff) as i32;
    let fraction = bits & ((1_u64 << 52) - 1);
    let (mantissa, exponent) = if exponent_bits == 0 {
        (fraction, -1074)
    } else {
        (fraction | (1_u64 << 52), exponent_bits - 1075)
    };

    // Integers need no rounding; below 2^-11 the result is zero.
    if exponent >= 0 {
        return value;
    }
    let shift = (-exponent) as u32;
    if shift > 64 {
        return 0.0_f64.copysign(value);
    }

    // magnitude = mantissa / 2^shift; compare it with the midpoint (2k + 1) / 200.
    let lower = (magnitude * 100.0).floor() as u128;
    let scaled = u128::from(mantissa) * 200;
    let midpoint = (2 * lower + 1) << shift;
    let hundredths = match scaled.cmp(&midpoint) {
        Ordering::Less => lower,
        Ordering::Greater => lower + 1,
        Ordering::Equal if lower % 2 == 0 => lower,
        Ordering::Equal => lower + 1,
    };

    (hundredths as f64 / 100.0).copysign(value)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvaluationSummary {
    pub all: SubsetScores,
    pub not_answerable: SubsetScores,
}

impl EvaluationSummary {
    pub fn metrics(&self) -> EvaluationMetrics {
        EvaluationMetrics {
            avg_likert: self.all.avg_likert,
            binary_accuracy: self.all.binary_accuracy,
            coverage: self.all.coverage,
            impl_avg_likert: self.not_answerable.avg_likert,
            impl_binary_accuracy: self.not_answerable.binary_accuracy,
            impl_coverage: self.not_answerable.coverage,
        }
    }

    pub fn counts(&self) -> EvaluateCounts {
        EvaluateCounts {
            total_rows: self.all.total,
            scored_rows: self.all.scored,
            not_answerable_rows: self.not_answerable.total,
            not_answerable_scored_rows: self.not_answerable.scored,
        }
    }
}

pub fn summarize(rows: &[PredictionRow], cache: &JudgmentCache) -> EvaluationSummary {
    EvaluationSummary {
        all: aggregate(rows, cache),
        not_answerable: aggregate(rows.iter().filter(|row| row.is_not_answerable()), cache),
    }
}
