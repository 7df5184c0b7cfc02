use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::registry::Split;

/// Encoded form of a single split.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EncodedSplit {
    /// Unlabeled text flattened into one id stream.
    LanguageModeling { ids: Vec<u32>, num_words: usize },
    /// One id row per example with a parallel label column.
    Classification {
        rows: Vec<Vec<u32>>,
        labels: Vec<i64>,
    },
}

/// Encoded dataset keyed by split.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedDataset {
    splits: BTreeMap<Split, EncodedSplit>,
}

impl EncodedDataset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, split: Split, encoded: EncodedSplit) {
        self.splits.insert(split, encoded);
    }

    pub fn split(&self, split: Split) -> Option<&EncodedSplit> {
        self.splits.get(&split)
    }

    pub fn splits(&self) -> impl Iterator<Item = (Split, &EncodedSplit)> {
        self.splits.iter().map(|(split, encoded)| (*split, encoded))
    }

    pub fn ids(&self, split: Split) -> Option<&[u32]> {
        match self.split(split)? {
            EncodedSplit::LanguageModeling { ids, .. } => Some(ids),
            EncodedSplit::Classification { .. } => None,
        }
    }

    pub fn rows(&self, split: Split) -> Option<&[Vec<u32>]> {
        match self.split(split)? {
            EncodedSplit::Classification { rows, .. } => Some(rows),
            EncodedSplit::LanguageModeling { .. } => None,
        }
    }

    pub fn num_words(&self, split: Split) -> Option<usize> {
        match self.split(split)? {
            EncodedSplit::LanguageModeling { num_words, .. } => Some(*num_words),
            EncodedSplit::Classification { .. } => None,
        }
    }

    pub fn labels(&self, split: Split) -> Option<&[i64]> {
        match self.split(split)? {
            EncodedSplit::Classification { labels, .. } => Some(labels),
            EncodedSplit::LanguageModeling { .. } => None,
        }
    }

    /// Flat key names: `<split>` plus `<split>_num_words` or `<split>_labels`.
    pub fn key_names(&self) -> Vec<String> {
        let mut keys = Vec::new();
        for (split, encoded) in self.splits() {
            keys.push(split.to_string());
            match encoded {
                EncodedSplit::LanguageModeling { .. } => keys.push(format!("{split}_num_words")),
                EncodedSplit::Classification { .. } => keys.push(format!("{split}_labels")),
            }
        }
        keys
    }

    /// Reads a dataset written by [`EncodedDataset::save`]. The content is
    /// trusted as-is.
    pub fn load(path: &Path) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        Ok(bincode::deserialize_from(reader)?)
    }

    /// Writes the whole dataset to `path`, replacing any previous content.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut writer = BufWriter::new(File::create(path)?);
        bincode::serialize_into(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }
}
