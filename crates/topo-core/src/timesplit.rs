//! Time splitting: partitions a global date range into fixed-length,
//! contiguous chunks and derives per-chunk artifact filenames.
//!
//! Chunk starts are `start, start + P, start + 2P, …` (P in whole years)
//! while they do not pass `end`. Every chunk ends the day before the next
//! one starts; the last chunk ends exactly on `end`.
//!
//! Filenames carry the chunk's dates as ISO `YYYY-MM-DD` tokens so that a
//! plain lexicographic sort of chunk files is also a chronological sort.

use chrono::{Months, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TopoError};

pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// `_YYYY-MM-DD_YYYY-MM-DD`
const DATE_SUFFIX_LEN: usize = 22;

/// One closed sub-range `[start, end]` of the project period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeChunk {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl TimeChunk {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    /// Number of days covered, both ends included.
    pub fn n_days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    /// `_<start>_<end>` suffix inserted into filenames.
    pub fn date_suffix(&self) -> String {
        format!(
            "_{}_{}",
            self.start.format(DATE_FORMAT),
            self.end.format(DATE_FORMAT)
        )
    }
}

/// Chunk boundaries plus the derived solar and downscaled filenames,
/// index-aligned with `chunks`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeSplitter {
    pub chunks: Vec<TimeChunk>,
    pub solar_files: Vec<String>,
    pub downscaled_files: Vec<String>,
}

impl TimeSplitter {
    pub fn new(
        start: NaiveDate,
        end: NaiveDate,
        years: u32,
        solar_template: &str,
        downscaled_template: &str,
    ) -> Result<Self> {
        let chunks = split_range(start, end, years)?;
        let solar_files = chunks.iter().map(|c| chunk_filename(solar_template, c)).collect();
        let downscaled_files = chunks
            .iter()
            .map(|c| chunk_filename(downscaled_template, c))
            .collect();
        Ok(Self {
            chunks,
            solar_files,
            downscaled_files,
        })
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Recover the chunk index encoded in a derived filename.
    pub fn chunk_index_of(&self, name: &str) -> Option<usize> {
        let parsed = parse_chunk_filename(name)?;
        self.chunks
            .iter()
            .position(|c| c.start == parsed.start && c.end == parsed.end)
    }
}

/// Partition `[start, end]` into chunks of `years` calendar years.
///
/// Starts are computed from `start` directly (not accumulated) so a 29 Feb
/// start does not drift to the 28th after the first non-leap year.
pub fn split_range(start: NaiveDate, end: NaiveDate, years: u32) -> Result<Vec<TimeChunk>> {
    if years == 0 {
        return Err(TopoError::InvalidDateRange(
            "split length must be at least one year".into(),
        ));
    }
    if start > end {
        return Err(TopoError::InvalidDateRange(format!(
            "start {start} is after end {end}"
        )));
    }

    let chunk_months = years.checked_mul(12).ok_or_else(|| {
        TopoError::InvalidDateRange(format!("split length of {years} years is out of range"))
    })?;

    let mut starts = Vec::new();
    for k in 0u32.. {
        let Some(s) = chunk_months
            .checked_mul(k)
            .and_then(|m| start.checked_add_months(Months::new(m)))
        else {
            break;
        };
        if s > end {
            break;
        }
        starts.push(s);
    }

    let mut chunks = Vec::with_capacity(starts.len());
    for (i, &s) in starts.iter().enumerate() {
        let e = match starts.get(i + 1) {
            Some(next) => next.pred_opt().ok_or_else(|| {
                TopoError::InvalidDateRange(format!("no day precedes {next}"))
            })?,
            None => end,
        };
        chunks.push(TimeChunk::new(s, e));
    }
    Ok(chunks)
}

/// Insert the chunk's dates between a template's base name and extension:
/// `down_pt_*.json` → `down_pt_*_2019-01-01_2019-12-31.json`.
///
/// The template is split at its last dot; a template without an extension
/// gets the suffix appended.
pub fn chunk_filename(template: &str, chunk: &TimeChunk) -> String {
    let suffix = chunk.date_suffix();
    match template.rsplit_once('.') {
        Some((base, ext)) if !base.is_empty() => format!("{base}{suffix}.{ext}"),
        _ => format!("{template}{suffix}"),
    }
}

/// Parts of a chunk filename produced by [`chunk_filename`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkName {
    pub base: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub ext: Option<String>,
}

/// Parse `base_<start>_<end>[.ext]`. Returns `None` unless both date tokens
/// are exactly ISO formatted.
pub fn parse_chunk_filename(name: &str) -> Option<ChunkName> {
    if let Some((stem, ext)) = name.rsplit_once('.') {
        if let Some((base, start, end)) = split_date_suffix(stem) {
            return Some(ChunkName {
                base,
                start,
                end,
                ext: Some(ext.to_string()),
            });
        }
    }
    let (base, start, end) = split_date_suffix(name)?;
    Some(ChunkName {
        base,
        start,
        end,
        ext: None,
    })
}

fn split_date_suffix(stem: &str) -> Option<(String, NaiveDate, NaiveDate)> {
    if stem.len() < DATE_SUFFIX_LEN || !stem.is_char_boundary(stem.len() - DATE_SUFFIX_LEN) {
        return None;
    }
    let (base, suffix) = stem.split_at(stem.len() - DATE_SUFFIX_LEN);
    let rest = suffix.strip_prefix('_')?;
    let (s, e) = rest.split_once('_')?;
    Some((base.to_string(), parse_iso_date(s)?, parse_iso_date(e)?))
}

fn parse_iso_date(token: &str) -> Option<NaiveDate> {
    let date = NaiveDate::parse_from_str(token, DATE_FORMAT).ok()?;
    (date.format(DATE_FORMAT).to_string() == token).then_some(date)
}
