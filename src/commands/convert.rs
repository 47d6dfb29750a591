use std::collections::HashMap;
use std::collections::hash_map::Entry;

use anyhow::Result;
use tracing::{info, warn};

use crate::cli::ConvertArgs;
use crate::judgment::JudgmentCache;
use crate::model::{ClassifierRecord, ConvertCounts, DatasetEntry, RunReport};
use crate::util::{now_utc_string, read_json, source_file, write_json_pretty};

pub const GOLD_PLACEHOLDER: &str = "not found";

pub fn run(args: ConvertArgs) -> Result<()> {
    let cache = JudgmentCache::load(&args.cache)?;
    let dataset: Vec<DatasetEntry> = read_json(&args.dataset)?;
    info!(
        cache_entries = cache.len(),
        annotation_sources = cache.annotation_sources().len(),
        dataset_entries = dataset.len(),
        "loaded conversion inputs"
    );
    if cache.is_empty() {
        warn!("judgment cache is empty");
    }

    let records = convert_cache(&cache);
    let converted_records = records.len();
    let backfilled = backfill_gold(records, &dataset);

    write_json_pretty(&args.output, &backfilled)?;
    info!(
        path = %args.output.display(),
        cache_size = converted_records,
        with_gold = backfilled.len(),
        "wrote classifier dataset"
    );

    if let Some(report_path) = &args.report_path {
        let report = RunReport {
            report_version: 1,
            command: "convert".to_string(),
            generated_at: now_utc_string(),
            sources: vec![
                source_file("cache", &args.cache)?,
                source_file("dataset", &args.dataset)?,
            ],
            output_path: args.output.display().to_string(),
            counts: ConvertCounts {
                cache_entries: cache.len(),
                converted_records,
                backfilled_records: backfilled.len(),
                dropped_records: converted_records - backfilled.len(),
            },
        };
        write_json_pretty(report_path, &report)?;
        info!(path = %report_path.display(), "wrote run report");
    }

    Ok(())
}

pub fn compose_input(question: &str, narrative: &str) -> String {
    format!("question: {question}\ncontext: {narrative}")
}

/// One record per cache entry. `valid` is set when the human average falls below 1,
/// the opposite sense of a passing evaluation score.
pub fn convert_cache(cache: &JudgmentCache) -> Vec<ClassifierRecord> {
    cache
        .iter()
        .map(|(key, record)| ClassifierRecord {
            input: compose_input(&key.question, &key.narrative),
            output: key.answer.clone(),
            gold: GOLD_PLACEHOLDER.to_string(),
            valid: record.average_likert() < 1.0,
        })
        .collect()
}

/// Index the dataset on its lower-cased composed input. The first entry seen for a key wins.
pub fn index_dataset(dataset: &[DatasetEntry]) -> HashMap<String, &DatasetEntry> {
    let mut entries = HashMap::with_capacity(dataset.len());
    let mut duplicates = 0usize;

    for item in dataset {
        let key = compose_input(&item.question, &item.narrative).to_lowercase();
        match entries.entry(key) {
            Entry::Occupied(_) => duplicates += 1,
            Entry::Vacant(slot) => {
                slot.insert(item);
            }
        }
    }

    if duplicates > 0 {
        warn!(duplicates, "dataset has repeated question/narrative pairs; keeping first");
    }

    entries
}

/// Keep only records whose input matches a dataset entry, restoring the original casing
/// of the input and attaching the dataset answer as gold.
pub fn backfill_gold(
    records: Vec<ClassifierRecord>,
    dataset: &[DatasetEntry],
) -> Vec<ClassifierRecord> {
    let index = index_dataset(dataset);
    records
        .into_iter()
        .filter_map(|mut record| {
            let item = index.get(&record.input.to_lowercase())?;
            record.input = compose_input(&item.question, &item.narrative);
            record.gold = item.answer.clone();
            Some(record)
        })
        .collect()
}
