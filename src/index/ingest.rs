//! Builds index items from the tabular exchange corpus.
//!
//! One CSV row per historical exchange: a `prompt` column, graded response
//! columns (`hq1`, `hq2`, `mq1`, `lq1`..`lq5`) and a comma-separated
//! `search_keywords` column. Each non-blank prompt is embedded exactly once.

use std::collections::BTreeSet;
use std::io::Read;

use serde_json::{Map, Value};
use thiserror::Error;

use super::types::{IndexedItem, QualityBuckets};
use crate::core::cancel::CancellationToken;
use crate::core::retry::{RetryError, RetryPolicy};
use crate::embedding::EmbeddingProvider;

const HIGH_COLUMNS: [&str; 2] = ["hq1", "hq2"];
const MEDIUM_COLUMNS: [&str; 1] = ["mq1"];
const LOW_COLUMNS: [&str; 5] = ["lq1", "lq2", "lq3", "lq4", "lq5"];

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("failed to read corpus: {0}")]
    Csv(#[from] csv::Error),
    #[error("corpus is missing the '{0}' column")]
    MissingColumn(&'static str),
    #[error("row {row}: embedding has {actual} dimensions, earlier rows have {expected}")]
    DimensionMismatch {
        row: usize,
        expected: usize,
        actual: usize,
    },
    #[error("ingestion cancelled")]
    Cancelled,
}

/// A parsed corpus row, before embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct CorpusRow {
    pub row_index: usize,
    pub prompt: String,
    pub quality_buckets: QualityBuckets,
    pub search_keywords: BTreeSet<String>,
}

/// Splits a comma-separated keyword cell, dropping blanks.
pub fn parse_keywords(cell: &str) -> BTreeSet<String> {
    cell.split(',')
        .map(str::trim)
        .filter(|kw| !kw.is_empty())
        .map(str::to_string)
        .collect()
}

/// Reads the corpus. Rows with a blank prompt are skipped; their row index is
/// still consumed so indices match the source file.
pub fn read_corpus<R: Read>(reader: R) -> Result<Vec<CorpusRow>, IngestError> {
    let mut csv_reader = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
    let headers = csv_reader.headers()?.clone();
    let column = |name: &str| headers.iter().position(|h| h.trim() == name);

    let prompt_col = column("prompt").ok_or(IngestError::MissingColumn("prompt"))?;
    let keyword_col = column("search_keywords");
    let tier_cols = |names: &[&str]| names.iter().filter_map(|n| column(n)).collect::<Vec<_>>();
    let high_cols = tier_cols(&HIGH_COLUMNS);
    let medium_cols = tier_cols(&MEDIUM_COLUMNS);
    let low_cols = tier_cols(&LOW_COLUMNS);

    let mut rows = Vec::new();
    for (row_index, record) in csv_reader.records().enumerate() {
        let record = record?;
        let prompt = record.get(prompt_col).unwrap_or("").trim();
        if prompt.is_empty() || prompt.eq_ignore_ascii_case("nan") {
            continue;
        }

        let cells = |cols: &[usize]| {
            cols.iter()
                .filter_map(|&c| record.get(c))
                .map(str::trim)
                .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case("nan"))
                .map(str::to_string)
                .collect::<Vec<_>>()
        };

        rows.push(CorpusRow {
            row_index,
            prompt: prompt.to_string(),
            quality_buckets: QualityBuckets {
                high: cells(&high_cols),
                medium: cells(&medium_cols),
                low: cells(&low_cols),
            },
            search_keywords: keyword_col
                .and_then(|c| record.get(c))
                .map(parse_keywords)
                .unwrap_or_default(),
        });
    }

    Ok(rows)
}

/// Summary of an ingestion run.
#[derive(Debug, Default)]
pub struct IngestReport {
    pub items: Vec<IndexedItem>,
    pub skipped_rows: Vec<usize>,
}

/// Embeds every row. Rows whose embedding still fails after retries are
/// skipped and reported rather than aborting the whole build.
pub async fn embed_rows(
    rows: Vec<CorpusRow>,
    embedder: &dyn EmbeddingProvider,
    retry: &RetryPolicy,
    cancel: &CancellationToken,
) -> Result<IngestReport, IngestError> {
    let mut report = IngestReport::default();
    let mut dimension: Option<usize> = None;
    let total = rows.len();

    for (n, row) in rows.into_iter().enumerate() {
        let prompt = row.prompt.as_str();
        let embedding = match retry.run("embedding", cancel, |_| embedder.embed(prompt)).await {
            Ok(vector) => vector,
            Err(RetryError::Cancelled) => return Err(IngestError::Cancelled),
            Err(RetryError::Failed { attempts, source }) => {
                tracing::warn!(
                    "Skipping row {} after {} attempt(s): {}",
                    row.row_index,
                    attempts,
                    source
                );
                report.skipped_rows.push(row.row_index);
                continue;
            }
        };

        match dimension {
            None => dimension = Some(embedding.len()),
            Some(expected) if expected != embedding.len() => {
                return Err(IngestError::DimensionMismatch {
                    row: row.row_index,
                    expected,
                    actual: embedding.len(),
                });
            }
            Some(_) => {}
        }

        let mut extra = Map::new();
        extra.insert("row_index".to_string(), Value::from(row.row_index));

        report.items.push(IndexedItem {
            id: format!("prompt_{}", row.row_index),
            position: row.row_index as u64,
            raw_text: row.prompt,
            embedding,
            search_keywords: row.search_keywords,
            quality_buckets: row.quality_buckets,
            extra,
        });

        if (n + 1) % 100 == 0 {
            tracing::info!("Embedded {}/{} rows", n + 1, total);
        }
    }

    Ok(report)
}
