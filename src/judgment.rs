use std::collections::{BTreeSet, HashMap};
use std::collections::hash_map::Entry;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use regex::Regex;

use crate::model::CacheSnapshotEntry;

/// Normalized (question, answer, narrative) triple. Every component is lower-cased.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JudgmentKey {
    pub question: String,
    pub answer: String,
    pub narrative: String,
}

impl JudgmentKey {
    pub fn new(question: &str, answer: &str, narrative: &str) -> Self {
        Self {
            question: question.to_lowercase(),
            answer: answer.to_lowercase(),
            narrative: narrative.to_lowercase(),
        }
    }
}

/// Likert annotations for one key, paired index-wise with the source that produced them.
#[derive(Debug, Clone, PartialEq)]
pub struct JudgmentRecord {
    pub annotations: Vec<i64>,
    pub sources: Vec<String>,
}

impl JudgmentRecord {
    pub fn average_likert(&self) -> f64 {
        let total: i64 = self.annotations.iter().sum();
        total as f64 / self.annotations.len() as f64
    }
}

/// Read-only lookup table of human judgments.
///
/// Entries keep the order of the snapshot they were built from, so anything derived
/// by iterating the cache is stable across runs.
#[derive(Debug)]
pub struct JudgmentCache {
    entries: Vec<(JudgmentKey, JudgmentRecord)>,
    index: HashMap<JudgmentKey, usize>,
    punctuation: Regex,
}

impl JudgmentCache {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read(path)
            .with_context(|| format!("failed to read judgment cache {}", path.display()))?;
        let entries: Vec<CacheSnapshotEntry> = serde_json::from_slice(&raw)
            .with_context(|| format!("failed to parse judgment cache {}", path.display()))?;

        Self::from_entries(entries)
            .with_context(|| format!("invalid judgment cache {}", path.display()))
    }

    pub fn from_entries<I>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = CacheSnapshotEntry>,
    {
        let mut cache = Self {
            entries: Vec::new(),
            index: HashMap::new(),
            punctuation: punctuation_pattern()?,
        };

        for (position, entry) in entries.into_iter().enumerate() {
            if entry.val_annotations.is_empty() {
                bail!("cache entry {position} has no annotations");
            }
            if entry.val_annotations.len() != entry.annotation_sources.len() {
                bail!(
                    "cache entry {position} has {} annotations but {} sources",
                    entry.val_annotations.len(),
                    entry.annotation_sources.len()
                );
            }

            let key = JudgmentKey::new(&entry.question, &entry.answer, &entry.narrative);
            match cache.index.entry(key.clone()) {
                Entry::Occupied(existing) => bail!(
                    "cache entry {position} duplicates normalized key of entry {}",
                    existing.get()
                ),
                Entry::Vacant(slot) => {
                    slot.insert(cache.entries.len());
                }
            }

            cache.entries.push((
                key,
                JudgmentRecord {
                    annotations: entry.val_annotations,
                    sources: entry.annotation_sources,
                },
            ));
        }

        Ok(cache)
    }

    /// Exact match on the lower-cased triple. `None` means the triple was never judged.
    pub fn lookup(
        &self,
        question: &str,
        answer: &str,
        narrative: &str,
    ) -> Option<&JudgmentRecord> {
        let key = JudgmentKey::new(question, answer, narrative);
        self.index
            .get(&key)
            .map(|&position| &self.entries[position].1)
    }

    /// Lookup for model output: the answer is stripped of punctuation first.
    pub fn lookup_prediction(
        &self,
        question: &str,
        answer: &str,
        narrative: &str,
    ) -> Option<&JudgmentRecord> {
        let answer = self.punctuation.replace_all(answer, "");
        self.lookup(question, &answer, narrative)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&JudgmentKey, &JudgmentRecord)> {
        self.entries.iter().map(|(key, record)| (key, record))
    }

    /// Distinct annotation sources across every entry.
    pub fn annotation_sources(&self) -> BTreeSet<&str> {
        self.entries
            .iter()
            .flat_map(|(_, record)| record.sources.iter().map(String::as_str))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Anything that is not a letter, a number, an underscore or whitespace. Combining marks
/// count as punctuation and every numeric category counts as a word character.
fn punctuation_pattern() -> Result<Regex> {
    Regex::new(r"[^\p{L}\p{N}_\s]").context("failed to compile punctuation regex")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(
        question: &str,
        answer: &str,
        narrative: &str,
        annotations: &[i64],
    ) -> CacheSnapshotEntry {
        CacheSnapshotEntry {
            question: question.to_string(),
            answer: answer.to_string(),
            narrative: narrative.to_string(),
            val_annotations: annotations.to_vec(),
            annotation_sources: (0..annotations.len()).map(|i| format!("m{}", i + 1)).collect(),
        }
    }

    #[test]
    fn lookup_returns_record_for_the_key_it_was_built_from() {
        let cache = JudgmentCache::from_entries(vec![entry("q1", "a1", "n1", &[1, 1])])
            .expect("cache should build");

        let record = cache.lookup("q1", "a1", "n1").expect("key should match");
        assert_eq!(record.annotations, vec![1, 1]);
        assert_eq!(record.sources, vec!["m1", "m2"]);
    }

    #[test]
    fn lookup_ignores_case_of_every_component() {
        let cache =
            JudgmentCache::from_entries(vec![entry("Who Wins?", "the fox", "Once upon", &[2])])
                .expect("cache should build");

        let expected = cache.lookup("who wins?", "the fox", "once upon").cloned();
        assert!(expected.is_some());
        assert_eq!(cache.lookup("WHO WINS?", "The Fox", "ONCE UPON").cloned(), expected);
        assert_eq!(cache.lookup("Who wins?", "THE FOX", "once Upon").cloned(), expected);
    }

    #[test]
    fn lookup_misses_on_near_duplicates() {
        let cache = JudgmentCache::from_entries(vec![entry("q1", "a1", "n1", &[3])])
            .expect("cache should build");

        assert!(cache.lookup("q1 ", "a1", "n1").is_none());
        assert!(cache.lookup("q1", "a1.", "n1").is_none());
        assert!(cache.lookup("q2", "a1", "n1").is_none());
    }

    #[test]
    fn lookup_prediction_strips_answer_punctuation_only() {
        let cache = JudgmentCache::from_entries(vec![
            entry("q1", "a1", "n1", &[1, 1]),
            entry("what?", "its fine", "n2", &[0]),
        ])
        .expect("cache should build");

        assert!(cache.lookup_prediction("Q1", "A1.", "N1").is_some());
        assert!(cache.lookup_prediction("What?", "It's fine!", "n2").is_some());
        assert!(cache.lookup_prediction("What", "It's fine!", "n2").is_none());
    }

    #[test]
    fn punctuation_pattern_keeps_word_characters_and_whitespace() {
        let pattern = punctuation_pattern().expect("pattern should compile");
        let strip = |text: &str| pattern.replace_all(text, "").into_owned();
        assert_eq!(strip("It's, a snake_case test!"), "Its a snake_case test");
        assert_eq!(strip("café — déjà vu?"), "café  déjà vu");
        assert_eq!(strip("line\nbreak."), "line\nbreak");
        assert_eq!(strip("cafe\u{301}"), "cafe");
        assert_eq!(strip("x² and ½"), "x² and ½");
        assert_eq!(strip("a\u{203f}b"), "ab");
    }

    #[test]
    fn lookup_prediction_drops_combining_marks_from_answer() {
        let cache = JudgmentCache::from_entries(vec![
            entry("q", "cafe", "n", &[2]),
            entry("q", "x²", "n", &[1]),
        ])
        .expect("cache should build");

        assert!(cache.lookup_prediction("q", "cafe\u{301}", "n").is_some());
        assert!(cache.lookup_prediction("q", "x²!", "n").is_some());
    }

    #[test]
    fn from_entries_rejects_empty_or_mismatched_annotations() {
        let empty = JudgmentCache::from_entries(vec![entry("q", "a", "n", &[])])
            .expect_err("empty annotations should be rejected");
        assert!(empty.to_string().contains("no annotations"), "unexpected error: {empty}");

        let mut mismatched = entry("q", "a", "n", &[1, 2]);
        mismatched.annotation_sources.pop();
        let error = JudgmentCache::from_entries(vec![mismatched])
            .expect_err("mismatched lengths should be rejected");
        assert!(
            error.to_string().contains("2 annotations but 1 sources"),
            "unexpected error: {error}"
        );
    }

    #[test]
    fn from_entries_rejects_keys_that_collide_after_lowercasing() {
        let error = JudgmentCache::from_entries(vec![
            entry("Q", "a", "n", &[1]),
            entry("q", "A", "N", &[2]),
        ])
        .expect_err("colliding keys should be rejected");
        assert!(error.to_string().contains("duplicates"), "unexpected error: {error}");
    }

    #[test]
    fn iteration_follows_snapshot_order() {
        let cache = JudgmentCache::from_entries(vec![
            entry("b", "x", "n", &[1]),
            entry("a", "y", "n", &[2]),
            entry("c", "z", "n", &[3]),
        ])
        .expect("cache should build");

        let questions: Vec<&str> = cache.iter().map(|(key, _)| key.question.as_str()).collect();
        assert_eq!(questions, vec!["b", "a", "c"]);
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.annotation_sources().into_iter().collect::<Vec<_>>(), vec!["m1"]);
    }

    #[test]
    fn average_likert_is_arithmetic_mean() {
        let record = JudgmentRecord {
            annotations: vec![0, 1, 2],
            sources: vec!["a".into(), "b".into(), "c".into()],
        };
        assert_eq!(record.average_likert(), 1.0);
    }

    #[test]
    fn load_parses_snapshot_file() {
        let dir = tempfile::tempdir().expect("temp dir should be created");
        let path = dir.path().join("cache.json");
        std::fs::write(
            &path,
            r#"[{"question": "Q1", "answer": "a1", "narrative": "n1",
                 "val_annotations": [2, 0], "annotation_sources": ["m1", "m2"]}]"#,
        )
        .expect("snapshot should be written");

        let cache = JudgmentCache::load(&path).expect("snapshot should load");
        assert_eq!(cache.len(), 1);
        assert!(cache.lookup("q1", "a1", "n1").is_some());
    }

    #[test]
    fn load_names_the_missing_file() {
        let error = JudgmentCache::load(Path::new("/nonexistent/cache.json"))
            .expect_err("missing file should fail");
        assert!(error.to_string().contains("/nonexistent/cache.json"), "unexpected error: {error}");
    }
}
