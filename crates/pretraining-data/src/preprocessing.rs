use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use indicatif::ProgressBar;

use crate::errors::{Error, Result};
use crate::registry::Split;

pub const SEP_TOKEN: &str = "[SEP]";
pub const UNK_TOKEN: &str = "[UNK]";
const RAW_UNK: &str = "<unk>";

/// One line of a split, as stripped from the file and after sentinel
/// substitution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitLine {
    pub raw: String,
    pub text: String,
}

impl SplitLine {
    pub fn new(line: &str) -> Self {
        let raw = line.trim_matches(' ').to_string();
        let text = substitute_sentinels(&raw);
        Self { raw, text }
    }

    /// Space-delimited tokens of the raw line. Sentinel substitution is not
    /// applied, so `[SEP]` never counts as a word.
    pub fn num_words(&self) -> usize {
        self.raw.split(' ').count()
    }
}

/// Strips surrounding spaces, then maps line breaks to ` [SEP]` and the
/// corpus `<unk>` marker to `[UNK]`.
pub fn normalize_line(line: &str) -> String {
    substitute_sentinels(line.trim_matches(' '))
}

fn substitute_sentinels(line: &str) -> String {
    line.replace('\n', &format!(" {SEP_TOKEN}"))
        .replace(RAW_UNK, UNK_TOKEN)
}

/// Reads every line of `path`, keeping line terminators so they survive as
/// separator tokens. `\r\n` terminators are read as `\n`.
pub fn read_split(path: &Path) -> Result<Vec<SplitLine>> {
    let mut reader = BufReader::new(File::open(path)?);
    let progress = ProgressBar::new_spinner();
    let mut lines = Vec::new();
    let mut buffer = String::new();
    while reader.read_line(&mut buffer)? > 0 {
        if buffer.ends_with("\r\n") {
            buffer.truncate(buffer.len() - 2);
            buffer.push('\n');
        }
        lines.push(SplitLine::new(&buffer));
        buffer.clear();
        progress.inc(1);
    }
    progress.finish_and_clear();
    log::debug!("read {} lines from {}", lines.len(), path.display());
    Ok(lines)
}

/// Reads one label per line and maps it through `convert`.
pub fn read_labels(path: &Path, split: Split, convert: &BTreeMap<String, i64>) -> Result<Vec<i64>> {
    let reader = BufReader::new(File::open(path)?);
    let mut labels = Vec::new();
    for line in reader.lines() {
        let line = line?;
        labels.push(convert_label(line.trim(), split, convert)?);
    }
    Ok(labels)
}

pub fn convert_label(label: &str, split: Split, convert: &BTreeMap<String, i64>) -> Result<i64> {
    convert
        .get(label)
        .copied()
        .ok_or_else(|| Error::UnknownLabel {
            label: label.to_string(),
            split: split.to_string(),
        })
}

pub fn count_words(lines: &[SplitLine]) -> usize {
    lines.iter().map(SplitLine::num_words).sum()
}
