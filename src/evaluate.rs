//! Subtitle quality evaluation against a human reference.
//!
//! Error rates are Levenshtein distances normalized by reference length. Text
//! is lowercased with whitespace collapsed before comparison.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{JimakuError, Result};
use crate::subtitle::SubtitleDocument;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    /// Word error rate
    pub wer: f64,
    /// Character error rate
    pub cer: f64,
    pub reference_entries: usize,
    pub hypothesis_entries: usize,
    /// Mean absolute start/end offset of entries paired by position
    pub mean_timing_drift_ms: f64,
    pub max_timing_drift_ms: u64,
}

impl EvaluationReport {
    pub fn summary(&self) -> String {
        format!(
            "WER {:.2}% | CER {:.2}% | entries {}/{} | timing drift mean {:.0}ms max {}ms",
            self.wer * 100.0,
            self.cer * 100.0,
            self.hypothesis_entries,
            self.reference_entries,
            self.mean_timing_drift_ms,
            self.max_timing_drift_ms
        )
    }
}

/// Compare two parsed subtitle documents.
pub fn evaluate_documents(reference: &SubtitleDocument, hypothesis: &SubtitleDocument) -> EvaluationReport {
    let reference_text = normalize(&reference.plain_text());
    let hypothesis_text = normalize(&hypothesis.plain_text());

    let (mean_timing_drift_ms, max_timing_drift_ms) = timing_drift(reference, hypothesis);

    EvaluationReport {
        wer: word_error_rate(&reference_text, &hypothesis_text),
        cer: character_error_rate(&reference_text, &hypothesis_text),
        reference_entries: reference.entries.len(),
        hypothesis_entries: hypothesis.entries.len(),
        mean_timing_drift_ms,
        max_timing_drift_ms,
    }
}

/// Parse two SRT files and compare them.
pub fn evaluate_files(reference: &Path, hypothesis: &Path) -> Result<EvaluationReport> {
    let reference_doc = read_document(reference)?;
    let hypothesis_doc = read_document(hypothesis)?;

    let report = evaluate_documents(&reference_doc, &hypothesis_doc);
    info!(
        "Evaluated {} against {}: {}",
        hypothesis.display(),
        reference.display(),
        report.summary()
    );
    Ok(report)
}

pub fn word_error_rate(reference: &str, hypothesis: &str) -> f64 {
    let reference: Vec<&str> = reference.split_whitespace().collect();
    let hypothesis: Vec<&str> = hypothesis.split_whitespace().collect();
    error_rate(&reference, &hypothesis)
}

pub fn character_error_rate(reference: &str, hypothesis: &str) -> f64 {
    let reference: Vec<char> = reference.chars().collect();
    let hypothesis: Vec<char> = hypothesis.chars().collect();
    error_rate(&reference, &hypothesis)
}

/// Edit distance over reference length. An empty reference scores 0 against
/// an empty hypothesis and 1 otherwise.
fn error_rate<T: PartialEq>(reference: &[T], hypothesis: &[T]) -> f64 {
    if reference.is_empty() {
        return if hypothesis.is_empty() { 0.0 } else { 1.0 };
    }
    edit_distance(reference, hypothesis) as f64 / reference.len() as f64
}

fn edit_distance<T: PartialEq>(a: &[T], b: &[T]) -> usize {
    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0; b.len() + 1];

    for (i, x) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, y) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(x != y);
            current[j + 1] = substitution.min(previous[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }

    previous[b.len()]
}

fn timing_drift(reference: &SubtitleDocument, hypothesis: &SubtitleDocument) -> (f64, u64) {
    let drifts: Vec<u64> = reference
        .entries
        .iter()
        .zip(&hypothesis.entries)
        .flat_map(|(r, h)| [r.start.abs_diff(h.start), r.end.abs_diff(h.end)])
        .map(|d| d.as_millis() as u64)
        .collect();

    if drifts.is_empty() {
        return (0.0, 0);
    }
    let mean = drifts.iter().sum::<u64>() as f64 / drifts.len() as f64;
    let max = drifts.iter().copied().max().unwrap_or(0);
    (mean, max)
}

fn normalize(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

fn read_document(path: &Path) -> Result<SubtitleDocument> {
    let content = std::fs::read_to_string(path).map_err(|e| JimakuError::io_at(e, path))?;
    SubtitleDocument::parse(&content)
}
