use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::dataset::{EncodedDataset, EncodedSplit};
use crate::download::DownloadCache;
use crate::encoding::{encode, EncodedTree, SubwordTokenizer, TextTree};
use crate::errors::{Error, Result};
use crate::logging::TokenizerLogGate;
use crate::preprocessing::{count_words, read_labels, read_split, SplitLine};
use crate::registry::{resolve_dataset, DatasetSource, Split};

pub const DEFAULT_DATASET: &str = "wikitext-103";

/// What to prepare and where to cache it.
#[derive(Debug, Clone)]
pub struct DatasetRequest {
    pub dataset: String,
    pub dataset_cache: Option<PathBuf>,
    pub with_labels: bool,
}

impl Default for DatasetRequest {
    fn default() -> Self {
        Self {
            dataset: DEFAULT_DATASET.to_string(),
            dataset_cache: None,
            with_labels: false,
        }
    }
}

impl DatasetRequest {
    pub fn new(dataset: impl Into<String>) -> Self {
        Self {
            dataset: dataset.into(),
            ..Self::default()
        }
    }

    pub fn cache(mut self, path: impl Into<PathBuf>) -> Self {
        self.dataset_cache = Some(path.into());
        self
    }

    pub fn with_labels(mut self, with_labels: bool) -> Self {
        self.with_labels = with_labels;
        self
    }
}

/// Retrieves, tokenizes, encodes and caches a dataset, with optional labels.
///
/// An existing file at the cache path is returned as-is without touching
/// the network or the tokenizer.
pub fn get_and_tokenize_dataset<T>(
    tokenizer: &T,
    request: &DatasetRequest,
    downloads: &DownloadCache,
) -> Result<EncodedDataset>
where
    T: SubwordTokenizer + ?Sized,
{
    if let Some(cached) = load_from_cache(request.dataset_cache.as_deref())? {
        return Ok(cached);
    }
    let source = resolve_dataset(&request.dataset);
    encode_source(tokenizer, &source, request, downloads)
}

/// Like [`get_and_tokenize_dataset`] but for an already resolved source.
pub fn get_and_tokenize_source<T>(
    tokenizer: &T,
    source: &DatasetSource,
    request: &DatasetRequest,
    downloads: &DownloadCache,
) -> Result<EncodedDataset>
where
    T: SubwordTokenizer + ?Sized,
{
    if let Some(cached) = load_from_cache(request.dataset_cache.as_deref())? {
        return Ok(cached);
    }
    encode_source(tokenizer, source, request, downloads)
}

fn load_from_cache(cache: Option<&Path>) -> Result<Option<EncodedDataset>> {
    match cache {
        Some(path) if path.is_file() => {
            log::info!("Load encoded dataset from cache at {}", path.display());
            Ok(Some(EncodedDataset::load(path)?))
        }
        _ => Ok(None),
    }
}

fn encode_source<T>(
    tokenizer: &T,
    source: &DatasetSource,
    request: &DatasetRequest,
    downloads: &DownloadCache,
) -> Result<EncodedDataset>
where
    T: SubwordTokenizer + ?Sized,
{
    log::info!(
        "Get dataset {} (train: {}, valid: {})",
        source.name,
        source.train,
        source.valid
    );

    let mut lines: BTreeMap<Split, Vec<SplitLine>> = BTreeMap::new();
    for split in Split::ALL {
        let path = downloads.fetch(source.location(split))?;
        lines.insert(split, read_split(&path)?);
    }

    let mut labels: BTreeMap<Split, Vec<i64>> = BTreeMap::new();
    if request.with_labels {
        let label_source = source
            .labels
            .as_ref()
            .ok_or_else(|| Error::MissingLabels(source.name.clone()))?;
        for split in Split::ALL {
            let path = downloads.fetch(label_source.location(split))?;
            labels.insert(split, read_labels(&path, split, &label_source.convert)?);
        }
    }

    log::info!("Tokenize and encode the dataset");
    let tree = TextTree::Mapping(
        lines
            .iter()
            .map(|(split, split_lines)| {
                (
                    split.to_string(),
                    TextTree::lines(split_lines.iter().map(|line| line.text.clone())),
                )
            })
            .collect(),
    );
    let encoded = {
        let _quiet = TokenizerLogGate::errors_only();
        encode(tokenizer, &tree)?
    };
    let EncodedTree::Mapping(mut encoded) = encoded else {
        return Err(Error::Tokenizer("encoded dataset lost its split mapping".into()));
    };

    let mut dataset = EncodedDataset::new();
    for split in Split::ALL {
        let split_tree = encoded
            .remove(split.as_str())
            .ok_or_else(|| Error::Tokenizer(format!("split '{split}' missing after encoding")))?;
        let entry = match labels.remove(&split) {
            Some(split_labels) => EncodedSplit::Classification {
                rows: split_tree.into_rows().ok_or_else(|| {
                    Error::Tokenizer(format!("split '{split}' did not encode to id rows"))
                })?,
                labels: split_labels,
            },
            None => EncodedSplit::LanguageModeling {
                ids: split_tree.flatten(),
                num_words: lines.get(&split).map(|l| count_words(l)).unwrap_or(0),
            },
        };
        dataset.insert(split, entry);
    }

    if let Some(path) = request.dataset_cache.as_deref() {
        log::info!("Save encoded dataset to cache at {}", path.display());
        dataset.save(path)?;
    }

    Ok(dataset)
}
